use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent from the client to the coordinator (must match server protocol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        is_room_creator: bool,
    },
    #[serde(rename_all = "camelCase")]
    Play { room_id: String, current_time: f64 },
    #[serde(rename_all = "camelCase")]
    Pause { room_id: String, current_time: f64 },
    #[serde(rename_all = "camelCase")]
    Seek { room_id: String, current_time: f64 },
    #[serde(rename_all = "camelCase")]
    VideoUploaded { room_id: String, media_ref: String },
    #[serde(rename_all = "camelCase")]
    SyncComplete {
        room_id: String,
        current_time: f64,
        is_playing: bool,
    },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
}

/// Events sent from the coordinator to the client
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
    NewUser { connection_id: Uuid },
    #[serde(rename_all = "camelCase")]
    NewUserJoined { is_room_creator: bool },
    SyncComplete {},
    #[serde(rename_all = "camelCase")]
    UserLeft { connection_id: Uuid },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub media_ref: String,
}
