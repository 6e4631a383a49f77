//! Presence heartbeat

use crate::service::RoomService;
use crate::spawn::{StopSignal, spawn};
use crate::time::{Duration, interval};
use std::sync::Arc;
use tracing::{debug, warn};

/// Keep the local participant's presence fresh until `stop` fires.
/// The first heartbeat goes out immediately.
pub fn start_heartbeat(
    service: Arc<dyn RoomService>,
    code: String,
    every: Duration,
    mut stop: StopSignal,
) {
    spawn(async move {
        let mut ticker = interval(every);

        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = ticker.tick() => {}
            }
            if stop.is_stopped() {
                break;
            }
            if let Err(e) = service.send_heartbeat(&code).await {
                warn!("Failed to send heartbeat: {}", e);
            }
        }
        debug!("Heartbeat for room {} stopped", code);
    });
}
