//! Service client supervision.
//!
//! Each pub-sub channel gets a [`ServiceClient`] and a subscription loop
//! thread. The loop blocks in subscribe; whenever that returns, for any
//! reason, the client reconnects and the loop subscribes again. An empty
//! slot makes subscribe fail immediately with `NotConnected`, which leads
//! back into reconnect and its delay, so a dead backend is polled at the
//! retry rate rather than spun on.

pub mod backoff;
pub mod client;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

pub use backoff::RetryDelay;
pub use client::{ClientState, ServiceClient};

use crate::codec::Supply;
use crate::error::{Result, RouterError};

/// Spawn the subscribe/reconnect loop for `client`.
pub fn spawn_subscription_loop<F>(
    client: Arc<ServiceClient>,
    mut on_supply: F,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>>
where
    F: FnMut(Supply) + Send + 'static,
{
    let thread_name = format!("{}-subscriber", client.name());

    thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            tracing::info!(
                "{} subscription loop started (channel {})",
                client.name(),
                client.channel()
            );

            while running.load(Ordering::Relaxed) {
                match client.subscribe(&mut on_supply) {
                    Ok(count) => {
                        tracing::info!("{} subscription ended after {} supplies", client.name(), count)
                    }
                    Err(RouterError::NotConnected) => {
                        tracing::debug!("{} client has no connection", client.name())
                    }
                    Err(e) => tracing::warn!("{} subscription error: {}", client.name(), e),
                }

                if !running.load(Ordering::Relaxed) {
                    break;
                }
                client.reconnect(&running);
            }

            tracing::info!("{} subscription loop stopped", client.name());
        })
        .map_err(RouterError::Io)
}
