use crate::config::{GameRules, MatchmakingConfig};
use crate::rng::GameRng;
use crate::session::{GameSession, PlayerId, SessionId, SessionSetup};
use crate::store::{self, DocumentStore, Expect, StoreError, WriteBatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 对局时长档位，每档一个匹配队列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DurationClass {
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "24h")]
    TwentyFourHours,
}

impl DurationClass {
    pub const ALL: [DurationClass; 4] = [
        DurationClass::TwoMinutes,
        DurationClass::FiveMinutes,
        DurationClass::TwelveHours,
        DurationClass::TwentyFourHours,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DurationClass::TwoMinutes => "2m",
            DurationClass::FiveMinutes => "5m",
            DurationClass::TwelveHours => "12h",
            DurationClass::TwentyFourHours => "24h",
        }
    }
}

impl fmt::Display for DurationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurationClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DurationClass::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("未知的对局时长: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub player_id: PlayerId,
    pub duration_class: DurationClass,
    pub joined_at: DateTime<Utc>,
}

/// 某一档位的等待队列，按加入顺序排列
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDocument {
    pub entries: Vec<QueueEntry>,
}

impl QueueDocument {
    pub fn position_of(&self, player: &PlayerId) -> Option<usize> {
        self.entries.iter().position(|e| e.player_id == *player)
    }
}

/// 匹配成功后写给双方的通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTicket {
    pub session_id: SessionId,
    pub opponent: PlayerId,
    pub duration_class: DurationClass,
    pub matched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinOutcome {
    Matched {
        session_id: SessionId,
        opponent: PlayerId,
    },
    Waiting {
        position: usize,
    },
}

pub fn queue_key(class: DurationClass) -> String {
    format!("queue:{}", class)
}

pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

pub fn ticket_key(player: &str) -> String {
    format!("ticket:{}", player)
}

/// 匹配器
///
/// 出队、建局和写通知在同一个原子批次中提交，版本冲突时重新读取队列再试。
pub struct Matchmaker {
    store: Arc<dyn DocumentStore>,
    rules: GameRules,
    config: MatchmakingConfig,
    rng: Mutex<GameRng>,
    max_retries: u32,
}

impl Matchmaker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        rules: GameRules,
        config: MatchmakingConfig,
        max_retries: u32,
    ) -> Self {
        let rng = GameRng::from_seed_option(config.seed);
        Matchmaker {
            store,
            rules,
            config,
            rng: Mutex::new(rng),
            max_retries: max_retries.max(1),
        }
    }

    /// 加入队列；有等待中的对手时立即成局
    pub async fn join(&self, player: &PlayerId, class: DurationClass) -> crate::Result<JoinOutcome> {
        let key = queue_key(class);

        for attempt in 0..self.max_retries {
            let (mut queue, expect) = self.load_queue(&key).await?;

            if let Some(position) = queue.position_of(player) {
                return Ok(JoinOutcome::Waiting { position });
            }

            let now = Utc::now();
            let me = QueueEntry {
                player_id: player.clone(),
                duration_class: class,
                joined_at: now,
            };

            if queue.entries.is_empty() {
                queue.entries.push(me);
                let position = queue.entries.len() - 1;
                let batch = WriteBatch::new().put_json(&key, &queue, expect)?;
                match self.store.commit(batch).await {
                    Ok(_) => {
                        info!(player_id = %player, class = %class, "加入匹配队列");
                        return Ok(JoinOutcome::Waiting { position });
                    }
                    Err(StoreError::Conflict(_)) => {
                        debug!(player_id = %player, attempt, "队列版本冲突，重试");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let partner = queue.entries.remove(0);
            let session = self.create_session_from_match(&partner, &me).await;
            let batch = WriteBatch::new()
                .put_json(&key, &queue, expect)?
                .put_json(session_key(&session.id), &session, Expect::Absent)?
                .put_json(
                    ticket_key(&partner.player_id),
                    &MatchTicket {
                        session_id: session.id.clone(),
                        opponent: player.clone(),
                        duration_class: class,
                        matched_at: now,
                    },
                    Expect::Any,
                )?
                .put_json(
                    ticket_key(player),
                    &MatchTicket {
                        session_id: session.id.clone(),
                        opponent: partner.player_id.clone(),
                        duration_class: class,
                        matched_at: now,
                    },
                    Expect::Any,
                )?;

            match self.store.commit(batch).await {
                Ok(_) => {
                    info!(
                        session_id = %session.id,
                        player_id = %player,
                        opponent = %partner.player_id,
                        class = %class,
                        "匹配成功"
                    );
                    return Ok(JoinOutcome::Matched {
                        session_id: session.id,
                        opponent: partner.player_id,
                    });
                }
                Err(StoreError::Conflict(_)) => {
                    debug!(player_id = %player, attempt, "匹配提交冲突，重试");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(player_id = %player, class = %class, "匹配重试次数耗尽");
        Err(crate::Error::Conflict(key))
    }

    /// 离开队列；不在队列中时什么也不做，返回是否确实移除
    pub async fn leave(&self, player: &PlayerId, class: DurationClass) -> crate::Result<bool> {
        let key = queue_key(class);

        for _ in 0..self.max_retries {
            let (mut queue, expect) = self.load_queue(&key).await?;
            let Some(position) = queue.position_of(player) else {
                return Ok(false);
            };
            queue.entries.remove(position);

            let batch = WriteBatch::new().put_json(&key, &queue, expect)?;
            match self.store.commit(batch).await {
                Ok(_) => {
                    info!(player_id = %player, class = %class, "离开匹配队列");
                    return Ok(true);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(crate::Error::Conflict(key))
    }

    /// 用两个队列条目建一局；先入队的一方为一号玩家
    pub async fn create_session_from_match(
        &self,
        first: &QueueEntry,
        second: &QueueEntry,
    ) -> GameSession {
        // 每局一个派生随机流
        let seed = self.rng.lock().await.fork().seed();
        let class = second.duration_class;
        let setup = SessionSetup {
            id: Uuid::new_v4().to_string(),
            players: (first.player_id.clone(), second.player_id.clone()),
            duration_class: class,
            match_length: self.config.match_length(class),
            turn_limit: self.config.turn_limit(),
            rules: self.rules.clone(),
            seed,
        };
        GameSession::new(setup, Utc::now())
    }

    /// 查询玩家最近一次匹配结果
    pub async fn ticket(&self, player: &PlayerId) -> crate::Result<Option<MatchTicket>> {
        Ok(store::load_json(self.store.as_ref(), &ticket_key(player))
            .await?
            .map(|(ticket, _)| ticket))
    }

    /// 当前队列内容
    pub async fn queue(&self, class: DurationClass) -> crate::Result<QueueDocument> {
        Ok(self.load_queue(&queue_key(class)).await?.0)
    }

    async fn load_queue(&self, key: &str) -> Result<(QueueDocument, Expect), StoreError> {
        Ok(match store::load_json(self.store.as_ref(), key).await? {
            Some((queue, version)) => (queue, Expect::Version(version)),
            None => (QueueDocument::default(), Expect::Absent),
        })
    }
}
