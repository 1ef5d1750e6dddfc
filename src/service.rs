use crate::lexicon::Lexicon;
use crate::matchmaker::{self, DurationClass, JoinOutcome, MatchTicket, Matchmaker, QueueEntry};
use crate::session::{EndReason, GameSession, MoveRecord, Outcome, Placement, PlayerId, SessionView};
use crate::store::{self, DocumentStore, Expect, StoreError, Versioned, WriteBatch};
use crate::{Error, Result, TurnError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 已缓存的对局及其存储版本；`None` 表示需要从存储重新读取
type SessionSlot = Arc<Mutex<Option<(GameSession, u64)>>>;

/// 对局结束后归档的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResult {
    pub session_id: String,
    pub players: (PlayerId, PlayerId),
    pub scores: BTreeMap<PlayerId, i32>,
    pub outcome: Option<Outcome>,
    pub end_reason: Option<EndReason>,
    pub moves: usize,
    pub finished_at: DateTime<Utc>,
}

impl GameResult {
    fn from_session(session: &GameSession, now: DateTime<Utc>) -> Self {
        GameResult {
            session_id: session.id.clone(),
            players: session.players.clone(),
            scores: session.scores.clone(),
            outcome: session.outcome.clone(),
            end_reason: session.end_reason,
            moves: session.history.len(),
            finished_at: session.finished_at.unwrap_or(now),
        }
    }
}

pub fn result_key(session_id: &str) -> String {
    format!("result:{}", session_id)
}

/// 玩家视角快照及整局状态摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub view: SessionView,
    pub digest: String,
}

/// 对外的游戏服务
///
/// 同一局的所有修改（出牌、跳过、换牌、认输、超时清扫）都经过该局的互斥锁：
/// 在副本上执行操作，按版本号条件写入存储，成功后才替换缓存。
pub struct SessionService {
    store: Arc<dyn DocumentStore>,
    matchmaker: Matchmaker,
    lexicon: Arc<dyn Lexicon>,
    sessions: DashMap<String, SessionSlot>,
    max_retries: u32,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        matchmaker: Matchmaker,
        lexicon: Arc<dyn Lexicon>,
        max_retries: u32,
    ) -> Self {
        SessionService {
            store,
            matchmaker,
            lexicon,
            sessions: DashMap::new(),
            max_retries: max_retries.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// 正在跟踪的对局数
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn slot(&self, session_id: &str) -> SessionSlot {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn load(&self, session_id: &str) -> Result<(GameSession, u64)> {
        store::load_json(self.store.as_ref(), &matchmaker::session_key(session_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("对局 {}", session_id)))
    }

    /// 在对局副本上执行操作并提交
    ///
    /// 操作返回错误时缓存和存储都不变，除非对局在操作中结束（如到期），
    /// 此时先提交结束状态再返回错误；版本冲突时重新读取后重试。
    async fn mutate<R, F>(&self, session_id: &str, mut apply: F) -> Result<(R, GameSession)>
    where
        F: FnMut(&mut GameSession) -> Result<R>,
    {
        let slot = self.slot(session_id);
        let mut cached = slot.lock().await;

        for attempt in 0..self.max_retries {
            let (current, version) = match cached.take() {
                Some(entry) => entry,
                None => self.load(session_id).await?,
            };

            let mut next = current.clone();
            let outcome = apply(&mut next);
            let finished_now = next.is_finished() && !current.is_finished();
            // 操作中途结束的对局（如到期）仍要落盘，其余错误原样回滚
            if outcome.is_err() && !finished_now {
                if current.is_finished() {
                    drop(cached);
                    self.sessions.remove(session_id);
                } else {
                    *cached = Some((current, version));
                }
                return outcome.map(|o| (o, next));
            }
            if next == current {
                // 已结束的对局不再缓存
                if current.is_finished() {
                    drop(cached);
                    self.sessions.remove(session_id);
                } else {
                    *cached = Some((current, version));
                }
                return outcome.map(|o| (o, next));
            }

            let now = Utc::now();
            let mut batch = WriteBatch::new().put_json(
                matchmaker::session_key(session_id),
                &next,
                Expect::Version(version),
            )?;
            if finished_now {
                batch = batch.put_json(
                    result_key(session_id),
                    &GameResult::from_session(&next, now),
                    Expect::Any,
                )?;
            }

            match self.store.commit(batch).await {
                Ok(written) => {
                    let version = written.first().map(|v| v.version).unwrap_or(version + 1);
                    if next.is_finished() {
                        drop(cached);
                        self.sessions.remove(session_id);
                        info!(session_id = %session_id, "对局已归档");
                    } else {
                        *cached = Some((next.clone(), version));
                    }
                    return outcome.map(|o| (o, next));
                }
                Err(StoreError::Conflict(_)) => {
                    warn!(session_id = %session_id, attempt, "对局版本冲突，重新读取");
                }
                Err(e) => {
                    *cached = Some((current, version));
                    return Err(e.into());
                }
            }
        }

        Err(Error::Conflict(format!("对局 {}", session_id)))
    }

    /// 加入匹配队列
    pub async fn join_queue(&self, player: &PlayerId, class: DurationClass) -> Result<JoinOutcome> {
        let outcome = self.matchmaker.join(player, class).await?;
        if let JoinOutcome::Matched { session_id, .. } = &outcome {
            self.slot(session_id);
        }
        Ok(outcome)
    }

    pub async fn leave_queue(&self, player: &PlayerId, class: DurationClass) -> Result<bool> {
        self.matchmaker.leave(player, class).await
    }

    /// 玩家最近一次的匹配结果
    pub async fn ticket(&self, player: &PlayerId) -> Result<Option<MatchTicket>> {
        let ticket = self.matchmaker.ticket(player).await?;
        if let Some(ticket) = &ticket {
            self.slot(&ticket.session_id);
        }
        Ok(ticket)
    }

    /// 直接用两个队列条目建局并保存
    pub async fn create_session_from_match(
        &self,
        first: &QueueEntry,
        second: &QueueEntry,
    ) -> Result<GameSession> {
        if first.player_id == second.player_id {
            return Err(Error::Conflict("不能和自己对局".to_string()));
        }
        let session = self.matchmaker.create_session_from_match(first, second).await;
        let batch = WriteBatch::new().put_json(
            matchmaker::session_key(&session.id),
            &session,
            Expect::Absent,
        )?;
        let written = self.store.commit(batch).await?;
        let version = written.first().map(|v| v.version).unwrap_or(1);

        let slot = self.slot(&session.id);
        *slot.lock().await = Some((session.clone(), version));
        info!(session_id = %session.id, "直接创建对局");
        Ok(session)
    }

    /// 出牌
    pub async fn submit_move(
        &self,
        session_id: &str,
        player: &PlayerId,
        placements: &[Placement],
    ) -> Result<MoveRecord> {
        let lexicon = self.lexicon.clone();
        let result = self
            .mutate(session_id, |session| {
                session.submit_move(player, placements, lexicon.as_ref(), Utc::now())
            })
            .await;

        match result {
            Ok((record, _)) => Ok(record),
            Err(e) => {
                debug!(session_id = %session_id, player_id = %player, error = %e, "出牌被拒绝");
                Err(e)
            }
        }
    }

    pub async fn pass(&self, session_id: &str, player: &PlayerId) -> Result<MoveRecord> {
        let (record, _) = self
            .mutate(session_id, |session| session.pass(player, Utc::now()))
            .await?;
        debug!(session_id = %session_id, player_id = %player, "跳过回合");
        Ok(record)
    }

    pub async fn exchange(
        &self,
        session_id: &str,
        player: &PlayerId,
        rack_indices: &[usize],
    ) -> Result<MoveRecord> {
        let (record, _) = self
            .mutate(session_id, |session| {
                session.exchange(player, rack_indices, Utc::now())
            })
            .await?;
        debug!(session_id = %session_id, player_id = %player, count = rack_indices.len(), "换牌");
        Ok(record)
    }

    pub async fn resign(&self, session_id: &str, player: &PlayerId) -> Result<GameSession> {
        let (_, session) = self
            .mutate(session_id, |session| session.resign(player, Utc::now()))
            .await?;
        info!(session_id = %session_id, player_id = %player, "玩家认输");
        Ok(session)
    }

    /// 某玩家视角的当前状态
    pub async fn get_session_state(
        &self,
        session_id: &str,
        player: &PlayerId,
    ) -> Result<StateSnapshot> {
        let session = self.get_session(session_id).await?;
        let view = session
            .view_for(player)
            .ok_or(Error::Turn(TurnError::NotAParticipant))?;
        Ok(StateSnapshot {
            view,
            digest: session.digest(),
        })
    }

    /// 完整对局状态（含隐藏信息）
    pub async fn get_session(&self, session_id: &str) -> Result<GameSession> {
        if let Some(slot) = self.sessions.get(session_id).map(|s| s.clone()) {
            if let Some((session, _)) = slot.lock().await.as_ref() {
                return Ok(session.clone());
            }
        }
        let (session, _) = self.load(session_id).await?;
        // 重启后只被读取的对局也要交给清扫任务跟踪
        if !session.is_finished() {
            self.slot(session_id);
        }
        Ok(session)
    }

    /// 订阅对局的每次提交
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<Versioned> {
        self.store.subscribe(&matchmaker::session_key(session_id))
    }

    /// 检查全部跟踪中的对局：回合超时自动跳过、到期结束，返回有变化的对局数
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut changed = 0;

        for id in ids {
            let result = self
                .mutate(&id, |session| {
                    let timed_out = session.check_turn_timeout(now);
                    let expired = session.check_expiry(now);
                    Ok(timed_out || expired)
                })
                .await;

            match result {
                Ok((true, _)) => changed += 1,
                Ok((false, _)) => {}
                Err(Error::NotFound(_)) => {
                    self.sessions.remove(&id);
                }
                Err(e) => error!(session_id = %id, "清扫对局失败: {}", e),
            }
        }
        changed
    }

    /// 后台定时清扫
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let changed = self.sweep(Utc::now()).await;
                if changed > 0 {
                    debug!(changed, "清扫完成");
                }
            }
        })
    }
}
