use std::time::Duration;

use anyhow::Result;
use lib_control::{BindingKey, ControlClient};
use tokio::time::Instant;

/// Binds `key`, prints its value, then prints every change for `duration`.
pub async fn bind_and_watch(client: &ControlClient, key: &BindingKey, duration: Duration) -> Result<()> {
    let status = client.observe(key);
    let mut values = status.subscribe();
    let mut failures = status.failures();

    let value = client.bind(key).await?;
    println!("{} = {}", key, value);
    values.borrow_and_update();

    if duration.is_zero() {
        return Ok(());
    }

    let deadline = Instant::now() + duration;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-C received, stopping watch.");
                break;
            }
            changed = values.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(value) = values.borrow_and_update().clone() {
                    println!("{} = {}", key, value);
                }
            }
            failure = failures.recv() => {
                if let Ok(msg) = failure {
                    eprintln!("{} error: {}", key, msg);
                }
            }
        }
    }
    Ok(())
}
