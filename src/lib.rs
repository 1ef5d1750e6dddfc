pub mod board;
pub mod config;
pub mod lexicon;
pub mod matchmaker;
pub mod message;
pub mod network;
pub mod pool;
pub mod rack;
pub mod rng;
pub mod scoring;
pub mod service;
pub mod session;
pub mod store;
pub mod tile;

pub use board::{Board, Direction, Hazard, MineKind, Position, Premium, RewardKind};
pub use config::{Config, GameRules};
pub use lexicon::{Lexicon, WordList};
pub use matchmaker::{DurationClass, JoinOutcome, Matchmaker};
pub use message::GameMessage;
pub use network::HttpServer;
pub use pool::LetterPool;
pub use rack::Rack;
pub use rng::GameRng;
pub use service::SessionService;
pub use session::{GameSession, Outcome, Placement, PlayerId, SessionStatus};
pub use store::{DocumentStore, MemoryStore, RedisStore};
pub use tile::{Glyph, Tile};

use serde::{Deserialize, Serialize};

/// 出牌校验失败：提交者可恢复，状态不变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ValidationError {
    #[error("坐标超出棋盘")]
    OutOfBounds,
    #[error("格子已被占用")]
    OccupiedCell,
    #[error("落子未与已有字母相连")]
    DisconnectedMove,
    #[error("手牌中没有这些字母，或字母已被冻结")]
    RackMismatch,
    #[error("无效的单词: {0}")]
    InvalidWord(String),
    #[error("没有放置任何字母")]
    EmptyPlacement,
    #[error("同一格子放置了多个字母")]
    DuplicatePosition,
    #[error("字母必须放在同一行或同一列")]
    NotInLine,
    #[error("字母之间存在空格")]
    GapInLine,
    #[error("没有组成长度不小于 2 的单词")]
    NoWordFormed,
    #[error("该区域已被对手封锁")]
    BlockedCell,
    #[error("字母袋剩余不足，无法换牌")]
    ExchangeUnavailable,
}

/// 回合错误：提交者可恢复，状态不变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TurnError {
    #[error("还没轮到您")]
    NotYourTurn,
    #[error("游戏已经结束")]
    GameAlreadyFinished,
    #[error("您不是本局玩家")]
    NotAParticipant,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    #[error("回合错误: {0}")]
    Turn(#[from] TurnError),
    #[error("并发冲突: {0}")]
    Conflict(String),
    #[error("未找到: {0}")]
    NotFound(String),
    #[error("存储错误: {0}")]
    Storage(String),
    #[error("配置错误: {0}")]
    Config(String),
    #[error("内部错误: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
