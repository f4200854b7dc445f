//! # Keep-Alive Monitor
//!
//! While a link is up, sends a [`PING`] probe every interval and checks how
//! long the peer has been silent. Any inbound frame counts as evidence of
//! life. Silence beyond the liveness timeout force-closes the link, which
//! sends the client down its normal reconnect path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::connection::Connection;
use crate::protocol::PING;

/// Timing of the monitor.
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveSettings {
    pub interval: Duration,
    pub liveness_timeout: Duration,
}

/// Starts the monitor for one link. It stops when `cancel` fires.
pub fn spawn(
    connection: Arc<Connection>,
    settings: KeepAliveSettings,
    generation: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let idle = connection.idle_for();
                    if idle > settings.liveness_timeout {
                        log::warn!(
                            "No traffic from {} for {}s. Forcing reconnect.",
                            connection.endpoint(),
                            idle.as_secs()
                        );
                        connection.close_generation(generation);
                        break;
                    }
                    if let Err(e) = connection.transmit(PING.to_string()) {
                        log::debug!("Keep-alive probe not sent: {}", e);
                    }
                }
            }
        }
        log::debug!("Keep-alive monitor for link {} stopped", generation);
    })
}
