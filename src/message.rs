use crate::matchmaker::DurationClass;
use crate::session::{MoveRecord, Placement, PlayerId, SessionView};
use crate::{Error, TurnError, ValidationError};
use serde::{Deserialize, Serialize};

/// 推送给 WebSocket 客户端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMessage {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: serde_json::Value,
}

impl GameMessage {
    pub fn new(type_: &str, data: impl Serialize) -> Self {
        GameMessage {
            type_: type_.to_string(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn state(view: &SessionView, digest: &str) -> Self {
        Self::new(
            "state",
            serde_json::json!({
                "session": view,
                "digest": digest,
            }),
        )
    }

    pub fn error(error: &Error) -> Self {
        Self::new("error", ErrorBody::from(error))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    OutOfBounds,
    OccupiedCell,
    DisconnectedMove,
    RackMismatch,
    InvalidWord,
    InvalidPlacement,
    BlockedCell,
    ExchangeUnavailable,
    NotYourTurn,
    GameAlreadyFinished,
    NotAParticipant,
    NotFound,
    Conflict,
    InvalidRequest,
    InternalError,
}

impl From<&Error> for ErrorCode {
    fn from(error: &Error) -> Self {
        match error {
            Error::Validation(e) => match e {
                ValidationError::OutOfBounds => ErrorCode::OutOfBounds,
                ValidationError::OccupiedCell => ErrorCode::OccupiedCell,
                ValidationError::DisconnectedMove => ErrorCode::DisconnectedMove,
                ValidationError::RackMismatch => ErrorCode::RackMismatch,
                ValidationError::InvalidWord(_) => ErrorCode::InvalidWord,
                ValidationError::BlockedCell => ErrorCode::BlockedCell,
                ValidationError::ExchangeUnavailable => ErrorCode::ExchangeUnavailable,
                ValidationError::EmptyPlacement
                | ValidationError::DuplicatePosition
                | ValidationError::NotInLine
                | ValidationError::GapInLine
                | ValidationError::NoWordFormed => ErrorCode::InvalidPlacement,
            },
            Error::Turn(e) => match e {
                TurnError::NotYourTurn => ErrorCode::NotYourTurn,
                TurnError::GameAlreadyFinished => ErrorCode::GameAlreadyFinished,
                TurnError::NotAParticipant => ErrorCode::NotAParticipant,
            },
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Conflict(_) => ErrorCode::Conflict,
            Error::Config(_) | Error::Storage(_) | Error::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// 错误响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(error: &Error) -> Self {
        ErrorBody {
            code: ErrorCode::from(error),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueRequest {
    pub player_id: PlayerId,
    pub duration_class: DurationClass,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerQuery {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    pub player_id: PlayerId,
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeRequest {
    pub player_id: PlayerId,
    pub rack_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveResponse {
    #[serde(rename = "move")]
    pub record: MoveRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_codes() {
        let err = Error::from(ValidationError::InvalidWord("QXZ".to_string()));
        let body = ErrorBody::from(&err);
        assert_eq!(body.code, ErrorCode::InvalidWord);
        assert!(body.message.contains("QXZ"));

        let err = Error::from(ValidationError::GapInLine);
        assert_eq!(ErrorCode::from(&err), ErrorCode::InvalidPlacement);
    }

    #[test]
    fn error_message_serializes_with_type_tag() {
        let msg = GameMessage::error(&Error::from(TurnError::NotYourTurn));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["code"], "NotYourTurn");
    }

    #[test]
    fn move_request_accepts_wildcards() {
        let raw = r#"{
            "player_id": "p1",
            "placements": [
                {"position": {"row": 7, "col": 7}, "tile": {"glyph": "C", "value": 3}},
                {"position": {"row": 7, "col": 8}, "tile": {"glyph": "?", "value": 0}, "blank_as": "a"}
            ]
        }"#;
        let request: MoveRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.placements.len(), 2);
        assert_eq!(request.placements[1].letter(), Some('A'));
    }
}
