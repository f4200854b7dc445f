//! Walkthrough against the in-process engine: bind, change state, lose the
//! link and watch the binding come back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lib_control::transport::{MockEngine, MockTransport};
use lib_control::{ClientConfig, ConnectionState, ControlClient, Systems, Target};
use serde_json::json;

/// Engine state the demo starts from.
pub fn seeded_engine() -> Arc<MockEngine> {
    let engine = MockEngine::new();
    let display = Target::new("sys-1", "Display", 1);
    engine.set_status(&display, "power", json!(false));
    engine.set_status(&display, "volume", json!(20));
    engine.add_function(&display, "add", |args| {
        Ok(json!(args.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
    });
    engine
}

pub async fn run(config: ClientConfig) -> Result<()> {
    let engine = seeded_engine();
    let config = ClientConfig {
        reconnect_delay_ms: config.reconnect_delay_ms.min(500),
        ..config
    };
    let client = ControlClient::new(
        config,
        Arc::new(MockTransport::new(engine.clone())),
        Systems::new(),
    );
    let display = Target::new("sys-1", "Display", 1);
    let power = display.key("power");

    let mut power_values = client.observe(&power).subscribe();
    println!("bind {} -> {}", power, client.bind(&power).await?);

    client.exec(&display, "power", Some(json!(true))).await?;
    power_values
        .wait_for(|v| *v == Some(json!(true)))
        .await
        .context("power observer closed")?;
    println!("after exec: {} = {:?}", power, client.cached_value(&power));

    println!("add(2, 3) -> {}", client.exec(&display, "add", Some(json!([2, 3]))).await?);

    println!("dropping every link...");
    engine.drop_links();
    let mut states = client.on_connection_state_change();
    states
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .context("state channel closed")?;
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .context("no reconnect within 5s")?
    .context("state channel closed")?;

    // The replayed bind lets publish() reach us again.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !client.is_subscribed(&power) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("binding was not replayed")?;
    engine.publish(&display, "power", json!(false));
    power_values
        .wait_for(|v| *v == Some(json!(false)))
        .await
        .context("power observer closed")?;
    println!(
        "after reconnect: {} = {:?} ({} connects, {} binds sent)",
        power,
        client.cached_value(&power),
        engine.connect_count(),
        engine.count(lib_control::CommandKind::Bind, &power)
    );

    client.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_runs_to_completion() {
        let config = ClientConfig {
            reconnect_delay_ms: 20,
            ..ClientConfig::with_endpoint("mock://demo")
        };
        run(config).await.unwrap();
    }
}
