use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_control::loggers::setup_logging;
use lib_control::transport::{MockEngine, MockTransport};
use lib_control::{BindingKey, ClientConfig, CommandKind, ConnectionState, ControlClient, Systems, Target};
use serde_json::json;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Drives many concurrent binds through link drops against the simulated engine", long_about = None)]
struct Args {
    /// Concurrent callers per round
    #[clap(short, long, default_value_t = 8)]
    callers: usize,

    /// Status variables bound by every caller
    #[clap(short, long, default_value_t = 16)]
    keys: usize,

    /// Number of link drops to survive
    #[clap(short, long, default_value_t = 3)]
    drops: usize,

    /// Log level
    #[clap(long, default_value = "warn")]
    log_level: String,

    /// Directory for log files
    #[clap(long, default_value = "./logs")]
    log_dir: PathBuf,
}

fn display() -> Target {
    Target::new("sys-1", "Display", 1)
}

fn keys(count: usize) -> Vec<BindingKey> {
    (0..count).map(|i| display().key(format!("input_{}", i))).collect()
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .with_context(|| format!("timed out waiting for {}", what))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_dir, &args.log_level, "test_binding_flow")?;

    let engine = MockEngine::new();
    let all_keys = keys(args.keys);
    for (i, key) in all_keys.iter().enumerate() {
        engine.set_status(&key.target, &key.name, json!(i));
    }

    let config = ClientConfig {
        reconnect_delay_ms: 50,
        request_timeout_ms: Some(2_000),
        ..ClientConfig::with_endpoint("mock://flow")
    };
    let client = ControlClient::new(config, Arc::new(MockTransport::new(engine.clone())), Systems::new());
    let started = Instant::now();

    // Round 1: every caller binds every key at once.
    let mut tasks = Vec::new();
    for _ in 0..args.callers {
        let client = client.clone();
        let keys = all_keys.clone();
        tasks.push(tokio::spawn(async move {
            for key in &keys {
                client.bind(key).await?;
            }
            Ok::<_, lib_control::ControlError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    for key in &all_keys {
        let binds = engine.count(CommandKind::Bind, key);
        if binds != 1 {
            bail!("{} was bound {} times on the wire", key, binds);
        }
    }
    println!(
        "[ok] {} callers x {} keys -> {} wire binds, 1 connect",
        args.callers,
        args.keys,
        args.keys
    );

    // Round 2: survive link drops, with state changing while disconnected.
    for round in 1..=args.drops {
        engine.drop_links();
        wait_until("disconnect", || client.state() == ConnectionState::Disconnected).await?;
        for key in &all_keys {
            engine.set_status(&key.target, &key.name, json!(format!("r{}", round)));
        }
        wait_until("reconnect", || client.state() == ConnectionState::Connected).await?;
        wait_until("replay", || all_keys.iter().all(|k| client.is_subscribed(k))).await?;

        for key in &all_keys {
            let expected = json!(format!("r{}", round));
            if client.cached_value(key) != Some(expected.clone()) {
                bail!("{} holds {:?}, expected {}", key, client.cached_value(key), expected);
            }
            let binds = engine.count(CommandKind::Bind, key);
            if binds != round + 1 {
                bail!("{} replayed {} times after {} drops", key, binds - 1, round);
            }
        }
        println!("[ok] drop {}: {} bindings replayed and refreshed", round, all_keys.len());
    }

    // Round 3: pushes reach the cache.
    let first = &all_keys[0];
    engine.publish(&first.target, &first.name, json!("pushed"));
    wait_until("notify", || client.cached_value(first) == Some(json!("pushed"))).await?;
    println!("[ok] notify delivered");

    if engine.connect_count() != args.drops + 1 {
        bail!("expected {} connects, saw {}", args.drops + 1, engine.connect_count());
    }
    client.shutdown();
    println!("All scenarios passed in {:?}", started.elapsed());
    Ok(())
}
