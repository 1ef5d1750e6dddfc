use crate::board::{Hazard, MineKind, RewardKind};
use crate::matchmaker::DurationClass;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// 全部配置；由 `main` 加载后显式传给各组件
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub game: GameRules,
    pub matchmaking: MatchmakingConfig,
    pub store: StoreConfig,
    pub lexicon: LexiconConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 允许跨域的来源，留空表示允许所有来源
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

/// 对局规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameRules {
    pub rack_size: usize,
    /// 一次用完整架手牌的额外加分
    pub bingo_bonus: i32,
    /// 踩中分数减半地雷时的除数
    pub point_division_factor: i32,
    /// 中心格的词倍率，1 表示没有加成
    pub center_word_multiplier: i32,
    pub freeze_turns: u32,
    pub freeze_slots: usize,
    pub area_block_radius: usize,
    pub area_block_turns: u32,
    pub mines: MineCounts,
    pub rewards: RewardCounts,
}

impl Default for GameRules {
    fn default() -> Self {
        GameRules {
            rack_size: 7,
            bingo_bonus: 50,
            point_division_factor: 2,
            center_word_multiplier: 1,
            freeze_turns: 2,
            freeze_slots: 2,
            area_block_radius: 2,
            area_block_turns: 2,
            mines: MineCounts::default(),
            rewards: RewardCounts::default(),
        }
    }
}

impl GameRules {
    /// 没有任何地雷和奖励的规则（测试用）
    pub fn without_hazards() -> Self {
        GameRules {
            mines: MineCounts::none(),
            rewards: RewardCounts::none(),
            ..Self::default()
        }
    }

    /// 棋盘生成时的地雷/奖励数量表
    pub fn hazard_plan(&self) -> Vec<(Hazard, usize)> {
        vec![
            (Hazard::Mine(MineKind::PointDivision), self.mines.point_division),
            (Hazard::Mine(MineKind::PointTransfer), self.mines.point_transfer),
            (Hazard::Mine(MineKind::LetterReset), self.mines.letter_reset),
            (Hazard::Mine(MineKind::BonusCancel), self.mines.bonus_cancel),
            (Hazard::Mine(MineKind::WordCancel), self.mines.word_cancel),
            (Hazard::Reward(RewardKind::AreaBlock), self.rewards.area_block),
            (Hazard::Reward(RewardKind::LetterFreeze), self.rewards.letter_freeze),
            (Hazard::Reward(RewardKind::ExtraTurn), self.rewards.extra_turn),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MineCounts {
    pub point_division: usize,
    pub point_transfer: usize,
    pub letter_reset: usize,
    pub bonus_cancel: usize,
    pub word_cancel: usize,
}

impl Default for MineCounts {
    fn default() -> Self {
        MineCounts {
            point_division: 5,
            point_transfer: 4,
            letter_reset: 3,
            bonus_cancel: 2,
            word_cancel: 2,
        }
    }
}

impl MineCounts {
    pub fn none() -> Self {
        MineCounts {
            point_division: 0,
            point_transfer: 0,
            letter_reset: 0,
            bonus_cancel: 0,
            word_cancel: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardCounts {
    pub area_block: usize,
    pub letter_freeze: usize,
    pub extra_turn: usize,
}

impl Default for RewardCounts {
    fn default() -> Self {
        RewardCounts {
            area_block: 2,
            letter_freeze: 3,
            extra_turn: 2,
        }
    }
}

impl RewardCounts {
    pub fn none() -> Self {
        RewardCounts {
            area_block: 0,
            letter_freeze: 0,
            extra_turn: 0,
        }
    }
}

/// 匹配与对局时长
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// 固定随机种子，留空则使用系统熵
    pub seed: Option<u64>,
    pub two_minutes_secs: u64,
    pub five_minutes_secs: u64,
    pub twelve_hours_secs: u64,
    pub twenty_four_hours_secs: u64,
    /// 单回合时限，超时自动跳过；留空表示不限
    pub turn_limit_secs: Option<u64>,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        MatchmakingConfig {
            seed: None,
            two_minutes_secs: 2 * 60,
            five_minutes_secs: 5 * 60,
            twelve_hours_secs: 12 * 3600,
            twenty_four_hours_secs: 24 * 3600,
            turn_limit_secs: None,
        }
    }
}

impl MatchmakingConfig {
    /// 对局总时长
    pub fn match_length(&self, class: DurationClass) -> Duration {
        let secs = match class {
            DurationClass::TwoMinutes => self.two_minutes_secs,
            DurationClass::FiveMinutes => self.five_minutes_secs,
            DurationClass::TwelveHours => self.twelve_hours_secs,
            DurationClass::TwentyFourHours => self.twenty_four_hours_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn turn_limit(&self) -> Option<Duration> {
        self.turn_limit_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// 乐观并发冲突的最大重试次数
    pub max_retries: u32,
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_retries: 8,
            sweep_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LexiconConfig {
    /// 词表文件路径，每行一个单词
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// 读取 `config.toml`（可选）与 `WORD_MINES__*` 环境变量
    pub fn load() -> crate::Result<Self> {
        Self::load_from("config")
    }

    pub fn load_from(path: &str) -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("WORD_MINES").separator("__"))
            .build()
            .map_err(|e| crate::Error::Config(e.to_string()))?;

        config
            .try_deserialize::<Config>()
            .map_err(|e| crate::Error::Config(e.to_string()))
    }

    pub fn server_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| crate::Error::Config(format!("无效的服务器地址: {}", e)))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.store.sweep_interval_secs.max(1))
    }

    pub fn log_filter(&self) -> String {
        format!("word_mines={}", self.log.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from("does-not-exist-word-mines").unwrap();
        assert_eq!(config.game, GameRules::default());
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(
            config.matchmaking.match_length(DurationClass::FiveMinutes),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn hazard_plan_matches_counts() {
        let rules = GameRules::default();
        let total: usize = rules.hazard_plan().iter().map(|(_, n)| n).sum();
        assert_eq!(total, 23);
        assert!(GameRules::without_hazards().hazard_plan().iter().all(|(_, n)| *n == 0));
    }
}
