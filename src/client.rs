//! HTTP room service client
//!
//! REST calls under the room resource, authenticated by the `X-Player-ID`
//! header, with a `{success, data, error, code}` response envelope. Push
//! notifications arrive over a Server-Sent-Events stream.

use crate::service::{PushEvent, RoomService, Subscription};
use crate::spawn::{TaskGuard, spawn};
use crate::sse::{SseEvent, SseParser};
use crate::types::HttpConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use race_arena_core::{
    ArenaError, GameMode, Result, Room, RoomPatch, RunnerAssignment, Team,
    generate_participant_id,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const PLAYER_HEADER: &str = "X-Player-ID";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostChangedData {
    new_host_id: String,
    room: Room,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(default)]
    message: String,
}

/// Room service over HTTP
pub struct HttpRoomService {
    http: reqwest::Client,
    config: HttpConfig,
    participant_id: String,
}

impl HttpRoomService {
    pub fn new(config: HttpConfig, participant_id: impl Into<String>) -> Result<Self> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(config.timeout);
        let http = builder
            .build()
            .map_err(|e| ArenaError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            config,
            participant_id: participant_id.into(),
        })
    }

    /// Client with a freshly generated participant id.
    pub fn with_generated_id(config: HttpConfig) -> Result<Self> {
        Self::new(config, generate_participant_id())
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .header(PLAYER_HEADER, &self.participant_id)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        decode_envelope(status, &body)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        self.call(self.http.post(self.config.url(path)).json(&body))
            .await
    }

    /// POST whose response data, if any, is not needed.
    async fn post_ack(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .post(self.config.url(path))
            .json(&self.body())
            .header(PLAYER_HEADER, &self.participant_id)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        decode_envelope::<serde_json::Value>(status, &body)
            .map(drop)
            .or_else(|e| match e {
                ArenaError::Service(_) if (200..300).contains(&status) => Ok(()),
                e => Err(e),
            })
    }

    fn body(&self) -> serde_json::Value {
        json!({ "playerId": self.participant_id })
    }
}

fn transport_error(e: reqwest::Error) -> ArenaError {
    if e.is_timeout() {
        ArenaError::Timeout
    } else {
        ArenaError::Transport(e.to_string())
    }
}

fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    let envelope: Envelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if (200..300).contains(&status) => return Err(ArenaError::Serialization(e)),
        Err(_) => return Err(error_from_response(status, None, None)),
    };
    if envelope.success {
        envelope
            .data
            .ok_or_else(|| ArenaError::Service("response carried no data".into()))
    } else {
        Err(error_from_response(
            status,
            envelope.code.as_deref(),
            envelope.error,
        ))
    }
}

/// Map a failed response onto the error classes callers act on.
fn error_from_response(status: u16, code: Option<&str>, message: Option<String>) -> ArenaError {
    let message = message.unwrap_or_else(|| format!("http {status}"));
    match code {
        Some("ROOM_NOT_FOUND") => return ArenaError::RoomNotFound,
        Some("ROOM_FULL") => return ArenaError::RoomFull,
        Some("GAME_ALREADY_STARTED" | "ALREADY_STARTED") => return ArenaError::AlreadyStarted,
        Some("NOT_A_MEMBER" | "PLAYER_NOT_FOUND") => return ArenaError::NotAMember,
        Some("NOT_HOST" | "NOT_AUTHORIZED") => return ArenaError::NotAuthorized(message),
        _ => {}
    }
    match status {
        404 => ArenaError::RoomNotFound,
        403 => ArenaError::NotAuthorized(message),
        408 | 429 | 500..=599 => ArenaError::Transport(message),
        _ => ArenaError::Service(message),
    }
}

/// Translate one SSE event into a push notification.
fn push_event(sse: &SseEvent) -> Option<PushEvent> {
    match sse.event.as_str() {
        "host_changed" => serde_json::from_str::<HostChangedData>(&sse.data)
            .ok()
            .map(|d| PushEvent::HostChanged {
                new_host_id: d.new_host_id,
                room: d.room,
            }),
        "kicked" | "room_deleted" | "room_closed" => {
            let mut message = serde_json::from_str::<MessageData>(&sse.data)
                .map(|d| d.message)
                .unwrap_or_default();
            if message.is_empty() && sse.event != "kicked" {
                message = "The room was closed".into();
            }
            Some(PushEvent::Removed {
                participant_id: None,
                message,
            })
        }
        "ping" | "heartbeat" => None,
        "error" => Some(PushEvent::Error(sse.data.clone())),
        _ => serde_json::from_str::<Room>(&sse.data)
            .ok()
            .map(PushEvent::Update),
    }
}

#[async_trait]
impl RoomService for HttpRoomService {
    fn participant_id(&self) -> &str {
        &self.participant_id
    }

    async fn create_room(
        &self,
        name: &str,
        max_participants: usize,
        mode: GameMode,
    ) -> Result<Room> {
        let room: Room = self
            .post(
                "",
                json!({
                    "playerId": self.participant_id,
                    "playerName": name,
                    "maxParticipants": max_participants,
                    "mode": mode,
                }),
            )
            .await?;
        debug!("Created room {}", room.code);
        Ok(room)
    }

    async fn join_room(&self, code: &str, name: &str) -> Result<Room> {
        self.post(
            &format!("/{code}/join"),
            json!({ "playerId": self.participant_id, "playerName": name }),
        )
        .await
    }

    async fn leave_room(&self, code: &str) -> Result<()> {
        self.post_ack(&format!("/{code}/leave")).await
    }

    async fn kick_player(&self, code: &str, participant_id: &str) -> Result<Room> {
        self.post(
            &format!("/{code}/kick"),
            json!({ "playerId": self.participant_id, "targetPlayerId": participant_id }),
        )
        .await
    }

    async fn select_racer(&self, code: &str, racer_id: u32) -> Result<Room> {
        self.post(
            &format!("/{code}/select-racer"),
            json!({ "playerId": self.participant_id, "racerId": racer_id }),
        )
        .await
    }

    async fn select_team(&self, code: &str, team: Team) -> Result<Room> {
        self.post(
            &format!("/{code}/select-team"),
            json!({ "playerId": self.participant_id, "team": team }),
        )
        .await
    }

    async fn toggle_ready(&self, code: &str) -> Result<Room> {
        self.post(&format!("/{code}/ready"), self.body()).await
    }

    async fn assign_runner_orders(
        &self,
        code: &str,
        assignments: &[RunnerAssignment],
    ) -> Result<Room> {
        self.post(
            &format!("/{code}/assign-runner-orders"),
            json!({ "playerId": self.participant_id, "assignments": assignments }),
        )
        .await
    }

    async fn start_game(&self, code: &str) -> Result<Room> {
        self.post(&format!("/{code}/start"), self.body()).await
    }

    async fn update_game_state(&self, code: &str, patch: &RoomPatch) -> Result<Room> {
        let mut body = serde_json::to_value(patch)?;
        if let Some(fields) = body.as_object_mut() {
            fields.insert("playerId".into(), json!(self.participant_id));
        }
        self.call(
            self.http
                .put(self.config.url(&format!("/{code}/state")))
                .json(&body),
        )
        .await
    }

    async fn get_room_state(&self, code: &str) -> Result<Room> {
        self.call(self.http.get(self.config.url(&format!("/{code}"))))
            .await
    }

    async fn subscribe(&self, code: &str) -> Result<Subscription> {
        let response = self
            .http
            .get(self.config.url(&format!("/{code}/events")))
            .query(&[("playerId", self.participant_id.as_str())])
            .header(PLAYER_HEADER, &self.participant_id)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(error_from_response(status, None, None));
        }

        let (tx, rx) = mpsc::channel(64);
        let (guard, mut stop) = TaskGuard::new();
        let mut stream = response.bytes_stream();
        let room_code = code.to_string();

        spawn(async move {
            let code = room_code;
            let mut parser = SseParser::new();
            loop {
                let chunk = tokio::select! {
                    _ = stop.stopped() => break,
                    chunk = stream.next() => chunk,
                };
                let bytes = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        warn!("Push stream for {} failed: {}", code, e);
                        let _ = tx.send(PushEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        debug!("Push stream for {} ended", code);
                        break;
                    }
                };
                for event in parser.feed(&bytes) {
                    if let Some(push) = push_event(&event) {
                        if tx.send(push).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        debug!("Subscribed to room: {}", code);
        Ok(Subscription::new(rx, Some(guard)))
    }

    async fn send_heartbeat(&self, code: &str) -> Result<()> {
        self.post_ack(&format!("/{code}/heartbeat")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_json() -> serde_json::Value {
        json!({
            "code": "ABC234",
            "hostId": "p1",
            "mode": "relay",
            "status": "racing",
            "maxParticipants": 6,
            "raceStartTime": 1000,
        })
    }

    #[test]
    fn envelope_success_and_failure() {
        let body = json!({ "success": true, "data": room_json() }).to_string();
        let room: Room = decode_envelope(200, &body).unwrap();
        assert_eq!(room.mode, GameMode::Relay);

        let body = json!({ "success": false, "error": "full", "code": "ROOM_FULL" }).to_string();
        assert!(matches!(
            decode_envelope::<Room>(400, &body),
            Err(ArenaError::RoomFull)
        ));

        assert!(decode_envelope::<Room>(503, "<html>").unwrap_err().is_transient());
        assert!(matches!(
            decode_envelope::<Room>(404, "not json"),
            Err(ArenaError::RoomNotFound)
        ));
    }

    #[test]
    fn envelope_without_data() {
        let ack = json!({ "success": true }).to_string();
        assert!(matches!(
            decode_envelope::<Room>(200, &ack),
            Err(ArenaError::Service(_))
        ));

        let denied = json!({ "success": false, "code": "NOT_HOST" }).to_string();
        assert!(matches!(
            decode_envelope::<serde_json::Value>(403, &denied),
            Err(ArenaError::NotAuthorized(message)) if message == "http 403"
        ));
    }

    #[test]
    fn sse_events_map_to_push_events() {
        let host = SseEvent {
            event: "host_changed".into(),
            data: json!({ "newHostId": "p2", "room": room_json() }).to_string(),
        };
        assert!(matches!(
            push_event(&host),
            Some(PushEvent::HostChanged { new_host_id, .. }) if new_host_id == "p2"
        ));

        let kicked = SseEvent {
            event: "kicked".into(),
            data: json!({ "message": "bye" }).to_string(),
        };
        assert_eq!(
            push_event(&kicked),
            Some(PushEvent::Removed {
                participant_id: None,
                message: "bye".into()
            })
        );

        let update = SseEvent {
            event: "update".into(),
            data: room_json().to_string(),
        };
        assert!(matches!(push_event(&update), Some(PushEvent::Update(_))));

        let ping = SseEvent {
            event: "ping".into(),
            data: "{}".into(),
        };
        assert_eq!(push_event(&ping), None);
    }
}
