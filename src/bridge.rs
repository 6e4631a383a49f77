//! Push/Poll Bridge
//!
//! Two background tasks feed the session one stream of room snapshots: a
//! forwarder draining the push subscription, and a poller reading the room
//! state on a phase-dependent cadence. Either may be lost or delayed; the
//! merge rules in [`race_arena_core::feed`] make the union consistent.

use crate::service::{PushEvent, RoomService, Subscription};
use crate::spawn::{StopSignal, spawn};
use crate::time::{Duration, sleep};
use race_arena_core::{FeedSource, RemovalReason, Room};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// One item on the session's merged feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedInput {
    Snapshot { room: Room, source: FeedSource },
    HostChanged { new_host_id: String, room: Room },
    Removed(RemovalReason),
}

/// Translate a push notification for `local_id`.
pub fn push_input(event: PushEvent, local_id: &str) -> Option<FeedInput> {
    match event {
        PushEvent::Update(room) => Some(FeedInput::Snapshot {
            room,
            source: FeedSource::Push,
        }),
        PushEvent::HostChanged { new_host_id, room } => {
            Some(FeedInput::HostChanged { new_host_id, room })
        }
        PushEvent::Removed {
            participant_id,
            message,
        } => match participant_id {
            Some(id) if id != local_id => None,
            _ => Some(FeedInput::Removed(RemovalReason::Kicked(message))),
        },
        PushEvent::Error(e) => {
            debug!("Push channel error: {}", e);
            None
        }
    }
}

/// Drain `subscription` into `feed` until the stream ends or `stop` fires.
pub fn start_push_forwarder(
    mut subscription: Subscription,
    local_id: String,
    feed: mpsc::UnboundedSender<FeedInput>,
    mut stop: StopSignal,
) {
    spawn(async move {
        loop {
            let event = tokio::select! {
                _ = stop.stopped() => break,
                event = subscription.recv() => event,
            };
            let Some(event) = event else {
                debug!("Push stream ended");
                break;
            };
            if let Some(input) = push_input(event, &local_id) {
                if feed.send(input).is_err() {
                    break;
                }
            }
        }
        subscription.close();
    });
}

/// Poll the room on the cadence published through `cadence`; `None`
/// suspends polling.
pub fn start_poller(
    service: Arc<dyn RoomService>,
    code: String,
    mut cadence: watch::Receiver<Option<Duration>>,
    feed: mpsc::UnboundedSender<FeedInput>,
    mut stop: StopSignal,
) {
    spawn(async move {
        loop {
            let current = *cadence.borrow_and_update();
            let every = match current {
                Some(every) => every,
                None => {
                    tokio::select! {
                        _ = stop.stopped() => break,
                        changed = cadence.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
            };

            tokio::select! {
                _ = stop.stopped() => break,
                _ = sleep(every) => {}
                changed = cadence.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            if stop.is_stopped() {
                break;
            }

            let input = match service.get_room_state(&code).await {
                Ok(room) => FeedInput::Snapshot {
                    room,
                    source: FeedSource::Poll,
                },
                Err(e) => match RemovalReason::from_error(&e) {
                    Some(reason) => FeedInput::Removed(reason),
                    None => {
                        debug!("Poll of room {} failed: {}", code, e);
                        continue;
                    }
                },
            };
            let removed = matches!(input, FeedInput::Removed(_));
            if feed.send(input).is_err() || removed {
                break;
            }
        }
        debug!("Poller for room {} stopped", code);
    });
}
