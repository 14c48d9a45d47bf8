use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

use super::code::SessionCode;

pub type PlayerId = u32;

/// The host's own endpoint always joins its relay first.
pub const HOST_PLAYER_ID: PlayerId = 0;
pub const MAX_PLAYERS: usize = 2;
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
pub const MTU_WARN_SIZE: usize = 1200;
pub const DISCONNECT_REASON_TIMEOUT: &str = "timeout";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Connect,
    Welcome {
        player_id: PlayerId,
        server_code: SessionCode,
    },
    Ping,
    Pong,
    PlayerInput {
        data: PlayerInput,
    },
    PlayerUpdate {
        data: serde_json::Value,
    },
    Shoot {
        data: serde_json::Value,
    },
    GameStart,
    GameStateUpdate {
        data: Snapshot,
    },
    PlayerDisconnected {
        player_id: PlayerId,
        #[serde(default)]
        reason: String,
    },
    CountdownStart {
        duration: f64,
    },
    CountdownCancel,
    RestartRequest,
    ReturnToLobby,
    ReturnToMainMenu,
    ReadyPing,
    ReadyPong,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputAction {
    Move,
    Rotate,
    Shoot,
    Pause,
    Resume,
    QuitToMenu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    #[serde(rename = "type")]
    pub action: InputAction,
    pub player_id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dy: Option<f32>,
}

impl PlayerInput {
    pub fn new(action: InputAction, player_id: PlayerId) -> Self {
        Self {
            action,
            player_id,
            dx: None,
            dy: None,
        }
    }

    pub fn directional(action: InputAction, player_id: PlayerId, dx: f32, dy: f32) -> Self {
        Self {
            action,
            player_id,
            dx: Some(dx),
            dy: Some(dy),
        }
    }

    pub fn delta(&self) -> (f32, f32) {
        (self.dx.unwrap_or(0.0), self.dy.unwrap_or(0.0))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Connect => MessageKind::Connect,
            Self::Welcome { .. } => MessageKind::Welcome,
            Self::Ping => MessageKind::Ping,
            Self::Pong => MessageKind::Pong,
            Self::PlayerInput { .. } => MessageKind::PlayerInput,
            Self::PlayerUpdate { .. } => MessageKind::PlayerUpdate,
            Self::Shoot { .. } => MessageKind::Shoot,
            Self::GameStart => MessageKind::GameStart,
            Self::GameStateUpdate { .. } => MessageKind::GameStateUpdate,
            Self::PlayerDisconnected { .. } => MessageKind::PlayerDisconnected,
            Self::CountdownStart { .. } => MessageKind::CountdownStart,
            Self::CountdownCancel => MessageKind::CountdownCancel,
            Self::RestartRequest => MessageKind::RestartRequest,
            Self::ReturnToLobby => MessageKind::ReturnToLobby,
            Self::ReturnToMainMenu => MessageKind::ReturnToMainMenu,
            Self::ReadyPing => MessageKind::ReadyPing,
            Self::ReadyPong => MessageKind::ReadyPong,
            Self::Unknown => MessageKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connect,
    Welcome,
    Ping,
    Pong,
    PlayerInput,
    PlayerUpdate,
    Shoot,
    GameStart,
    GameStateUpdate,
    PlayerDisconnected,
    CountdownStart,
    CountdownCancel,
    RestartRequest,
    ReturnToLobby,
    ReturnToMainMenu,
    ReadyPing,
    ReadyPong,
    Unknown,
}

/// How the relay forwards a message it received from a registered participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Broadcast,
    Others,
    Reply,
    Drop,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "connect" => Self::Connect,
            "welcome" => Self::Welcome,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "player_input" => Self::PlayerInput,
            "player_update" => Self::PlayerUpdate,
            "shoot" => Self::Shoot,
            "game_start" => Self::GameStart,
            "game_state_update" => Self::GameStateUpdate,
            "player_disconnected" => Self::PlayerDisconnected,
            "countdown_start" => Self::CountdownStart,
            "countdown_cancel" => Self::CountdownCancel,
            "restart_request" => Self::RestartRequest,
            "return_to_lobby" => Self::ReturnToLobby,
            "return_to_main_menu" => Self::ReturnToMainMenu,
            "ready_ping" => Self::ReadyPing,
            "ready_pong" => Self::ReadyPong,
            _ => Self::Unknown,
        }
    }

    /// Reads only the `type` field so forwarding never depends on the body.
    pub fn peek(data: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_slice(data)?;
        Ok(Self::from_tag(&envelope.kind))
    }

    pub fn route(self) -> Route {
        match self {
            Self::PlayerInput
            | Self::GameStateUpdate
            | Self::CountdownStart
            | Self::CountdownCancel
            | Self::RestartRequest
            | Self::ReturnToLobby
            | Self::ReturnToMainMenu
            | Self::ReadyPing
            | Self::ReadyPong => Route::Broadcast,
            Self::PlayerUpdate | Self::Shoot => Route::Others,
            Self::Ping => Route::Reply,
            Self::Connect
            | Self::Welcome
            | Self::Pong
            | Self::GameStart
            | Self::PlayerDisconnected
            | Self::Unknown => Route::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(Message::Welcome {
            player_id: 1,
            server_code: SessionCode::loopback(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "welcome", "player_id": 1, "server_code": "LOCALL"})
        );

        let json = serde_json::to_value(Message::Connect).unwrap();
        assert_eq!(json, serde_json::json!({"type": "connect"}));
    }

    #[test]
    fn test_player_input_wire_format() {
        let message = Message::PlayerInput {
            data: PlayerInput::directional(InputAction::Move, 1, 0.5, -1.0),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "player_input",
                "data": {"type": "move", "player_id": 1, "dx": 0.5, "dy": -1.0}
            })
        );

        let shoot = Message::decode(br#"{"type":"player_input","data":{"type":"shoot","player_id":0}}"#)
            .unwrap();
        let Message::PlayerInput { data } = shoot else {
            panic!("expected player_input");
        };
        assert_eq!(data.action, InputAction::Shoot);
        assert_eq!(data.delta(), (0.0, 0.0));
    }

    #[test]
    fn test_unknown_type_decodes_to_unknown() {
        let message = Message::decode(br#"{"type":"emote","id":7}"#).unwrap();
        assert_eq!(message, Message::Unknown);
        assert_eq!(message.kind(), MessageKind::Unknown);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let message = Message::decode(br#"{"type":"ping","sent_at":12}"#).unwrap();
        assert_eq!(message, Message::Ping);
    }

    #[test]
    fn test_missing_disconnect_reason_defaults() {
        let message = Message::decode(br#"{"type":"player_disconnected","player_id":1}"#).unwrap();
        assert_eq!(
            message,
            Message::PlayerDisconnected {
                player_id: 1,
                reason: String::new()
            }
        );
    }

    #[test]
    fn test_malformed_payloads_error() {
        assert!(Message::decode(b"not json").is_err());
        assert!(Message::decode(br#"{"player_id":1}"#).is_err());
        assert!(MessageKind::peek(b"\xff\xfe").is_err());
    }

    #[test]
    fn test_peek_ignores_body() {
        let kind = MessageKind::peek(br#"{"type":"shoot","data":{"anything":[1,2,3]}}"#).unwrap();
        assert_eq!(kind, MessageKind::Shoot);
        assert_eq!(kind.route(), Route::Others);
    }

    #[test]
    fn test_routing_table() {
        assert_eq!(MessageKind::PlayerInput.route(), Route::Broadcast);
        assert_eq!(MessageKind::ReadyPong.route(), Route::Broadcast);
        assert_eq!(MessageKind::PlayerUpdate.route(), Route::Others);
        assert_eq!(MessageKind::Ping.route(), Route::Reply);
        assert_eq!(MessageKind::Welcome.route(), Route::Drop);
        assert_eq!(MessageKind::Unknown.route(), Route::Drop);
    }

    #[test]
    fn test_kind_matches_tag() {
        for message in [
            Message::Connect,
            Message::Ping,
            Message::GameStart,
            Message::CountdownStart { duration: 3.0 },
            Message::ReturnToMainMenu,
            Message::ReadyPong,
        ] {
            let bytes = message.encode().unwrap();
            assert_eq!(MessageKind::peek(&bytes).unwrap(), message.kind());
        }
    }
}
