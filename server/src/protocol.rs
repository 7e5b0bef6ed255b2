use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoordinatorError;

pub type ConnectionId = Uuid;
pub type RoomId = String;

/// Events sent from a client to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomId,
        #[serde(default)]
        is_room_creator: bool,
    },
    #[serde(rename_all = "camelCase")]
    Play { room_id: RoomId, current_time: f64 },
    #[serde(rename_all = "camelCase")]
    Pause { room_id: RoomId, current_time: f64 },
    #[serde(rename_all = "camelCase")]
    Seek { room_id: RoomId, current_time: f64 },
    #[serde(rename_all = "camelCase")]
    VideoUploaded { room_id: RoomId, media_ref: String },
    #[serde(rename_all = "camelCase")]
    SyncComplete {
        room_id: RoomId,
        current_time: f64,
        is_playing: bool,
    },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },
}

/// Events sent from the coordinator to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Sync {
        current_time: f64,
        is_playing: bool,
        media_ref: String,
    },
    #[serde(rename_all = "camelCase")]
    Play { current_time: f64 },
    #[serde(rename_all = "camelCase")]
    Pause { current_time: f64 },
    #[serde(rename_all = "camelCase")]
    Seek { current_time: f64 },
    #[serde(rename_all = "camelCase")]
    VideoUpdated { media_ref: String },
    #[serde(rename_all = "camelCase")]
    NewUser { connection_id: ConnectionId },
    #[serde(rename_all = "camelCase")]
    NewUserJoined { is_room_creator: bool },
    SyncComplete {},
    #[serde(rename_all = "camelCase")]
    UserLeft { connection_id: ConnectionId },
    Error { message: String },
}

/// Playback mutations a member can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    Play,
    Pause,
    Seek,
}

impl PlaybackAction {
    pub fn into_event(self, current_time: f64) -> ServerEvent {
        match self {
            PlaybackAction::Play => ServerEvent::Play { current_time },
            PlaybackAction::Pause => ServerEvent::Pause { current_time },
            PlaybackAction::Seek => ServerEvent::Seek { current_time },
        }
    }
}

/// Point-in-time copy of a room's playback state, sent to joiners
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub playback_time: f64,
    pub is_playing: bool,
    pub media_ref: String,
}

impl PlaybackSnapshot {
    pub fn into_event(self) -> ServerEvent {
        ServerEvent::Sync {
            current_time: self.playback_time,
            is_playing: self.is_playing,
            media_ref: self.media_ref,
        }
    }
}

/// Body returned by `POST /create-room`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub room_id: RoomId,
}

/// Body returned by `POST /upload`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub media_ref: String,
}

pub fn decode_client_event(text: &str) -> Result<ClientEvent, CoordinatorError> {
    serde_json::from_str(text).map_err(|e| CoordinatorError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_uses_wire_field_names() {
        let event = decode_client_event(
            r#"{"event":"join-room","data":{"roomId":"k3x9qa","isRoomCreator":true}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_id: "k3x9qa".into(),
                is_room_creator: true,
            }
        );
    }

    #[test]
    fn join_room_creator_flag_defaults_to_false() {
        let event =
            decode_client_event(r#"{"event":"join-room","data":{"roomId":"k3x9qa"}}"#).unwrap();
        assert!(matches!(
            event,
            ClientEvent::JoinRoom {
                is_room_creator: false,
                ..
            }
        ));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = decode_client_event(r#"{"event":"seek","data":{"roomId":"k3x9qa"}}"#)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Malformed(_)));
    }

    #[test]
    fn unknown_event_is_malformed() {
        let err = decode_client_event(r#"{"event":"rewind","data":{}}"#).unwrap_err();
        assert!(matches!(err, CoordinatorError::Malformed(_)));
        assert!(decode_client_event("not json").is_err());
    }

    #[test]
    fn server_events_serialize_with_camel_case_payloads() {
        let sync = serde_json::to_value(ServerEvent::Sync {
            current_time: 12.0,
            is_playing: false,
            media_ref: "/uploads/a.mp4".into(),
        })
        .unwrap();
        assert_eq!(
            sync,
            json!({
                "event": "sync",
                "data": {"currentTime": 12.0, "isPlaying": false, "mediaRef": "/uploads/a.mp4"}
            })
        );

        let joined = serde_json::to_value(ServerEvent::NewUserJoined {
            is_room_creator: false,
        })
        .unwrap();
        assert_eq!(
            joined,
            json!({"event": "new-user-joined", "data": {"isRoomCreator": false}})
        );
    }

    #[test]
    fn sync_complete_broadcast_carries_empty_payload() {
        let value = serde_json::to_value(ServerEvent::SyncComplete {}).unwrap();
        assert_eq!(value, json!({"event": "sync-complete", "data": {}}));
    }
}
