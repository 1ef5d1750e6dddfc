use crate::board::{Board, Hazard, MineKind, Position, RewardKind};
use crate::config::GameRules;
use crate::lexicon::Lexicon;
use crate::matchmaker::DurationClass;
use crate::pool::LetterPool;
use crate::rack::Rack;
use crate::rng::GameRng;
use crate::scoring::{self, Beneficiary, FormedWord, MoveContext, TriggeredHazard};
use crate::tile::{Glyph, Tile};
use crate::{TurnError, ValidationError};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// 玩家ID类型
pub type PlayerId = String;

/// 对局ID类型
pub type SessionId = String;

/// 对局状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    AwaitingFirstMove,
    InProgress,
    Finished,
}

/// 对局结果，平局是一等公民
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Winner(PlayerId),
    Draw,
}

/// 结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// 一方手牌用完且字母袋为空
    RackEmptied,
    /// 对局时长耗尽
    Expired,
    /// 双方连续跳过
    MutualPass,
    Resigned,
}

/// 一次落子：位置和手牌中的牌；万能牌需指定代表的字母
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub position: Position,
    pub tile: Tile,
    #[serde(default)]
    pub blank_as: Option<char>,
}

impl Placement {
    pub fn new(position: Position, tile: Tile) -> Self {
        Placement {
            position,
            tile,
            blank_as: None,
        }
    }

    /// 万能牌落子
    pub fn wildcard(position: Position, letter: char) -> Self {
        Placement {
            position,
            tile: Tile::wildcard(),
            blank_as: Some(letter),
        }
    }

    /// 落子后代表的字母
    pub fn letter(&self) -> Option<char> {
        match self.tile.glyph {
            Glyph::Letter(c) => Some(c),
            Glyph::Wildcard => self
                .blank_as
                .filter(|c| c.is_ascii_alphabetic())
                .map(|c| c.to_ascii_uppercase()),
        }
    }
}

/// 冻结对手手牌槽位，直到换手次数到达 `clears_at_turn`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenLettersEffect {
    pub affected_player: PlayerId,
    pub rack_indices: Vec<usize>,
    pub clears_at_turn: u32,
}

/// 禁止对手在某一方形区域内落子，直到换手次数到达 `clears_at_turn`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaBlockEffect {
    pub affected_player: PlayerId,
    pub center: Position,
    pub radius: usize,
    pub clears_at_turn: u32,
}

impl AreaBlockEffect {
    pub fn covers(&self, position: Position) -> bool {
        self.center.distance(&position) <= self.radius
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveKind {
    Play,
    Pass,
    /// 回合超时，按跳过处理
    TimedOut,
    Exchange { count: usize },
    Resign,
}

/// 历史记录项，写入后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub player_id: PlayerId,
    pub kind: MoveKind,
    pub placements: Vec<Placement>,
    pub formed_words: Vec<FormedWord>,
    pub score_earned: i32,
    /// 得分记到谁名下（踩中转移地雷时为对手）
    pub credited_to: Option<PlayerId>,
    pub triggered: Vec<TriggeredHazard>,
    pub extra_turn: bool,
    pub timestamp: DateTime<Utc>,
}

impl MoveRecord {
    fn simple(player_id: &PlayerId, kind: MoveKind, timestamp: DateTime<Utc>) -> Self {
        MoveRecord {
            player_id: player_id.clone(),
            kind,
            placements: Vec::new(),
            formed_words: Vec::new(),
            score_earned: 0,
            credited_to: None,
            triggered: Vec::new(),
            extra_turn: false,
            timestamp,
        }
    }
}

/// 一局游戏，由这局独占
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: SessionId,
    pub players: (PlayerId, PlayerId),
    pub duration_class: DurationClass,
    pub rules: GameRules,
    pub board: Board,
    pub pool: LetterPool,
    pub racks: BTreeMap<PlayerId, Rack>,
    pub turn_owner: PlayerId,
    pub scores: BTreeMap<PlayerId, i32>,
    pub status: SessionStatus,
    pub outcome: Option<Outcome>,
    pub end_reason: Option<EndReason>,
    pub history: Vec<MoveRecord>,
    /// 每个被接受的动作加一
    pub turn_count: u32,
    pub consecutive_passes: u32,
    /// 出牌方实际换手的次数；额外回合不计入，冻结与封锁按它到期
    #[serde(default)]
    pub switch_count: u32,
    /// 当前回合是否为奖励的额外回合
    pub in_extra_turn: bool,
    pub frozen: Vec<FrozenLettersEffect>,
    pub blocks: Vec<AreaBlockEffect>,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub turn_started_at: DateTime<Utc>,
    pub turn_limit_secs: Option<u64>,
    pub finished_at: Option<DateTime<Utc>>,
    seed: u64,
}

/// 创建对局所需参数
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub id: SessionId,
    pub players: (PlayerId, PlayerId),
    pub duration_class: DurationClass,
    pub match_length: Duration,
    pub turn_limit: Option<Duration>,
    pub rules: GameRules,
    pub seed: u64,
}

const TURN_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

impl GameSession {
    /// 生成棋盘、装满字母袋、给双方发牌、随机决定先手
    pub fn new(setup: SessionSetup, now: DateTime<Utc>) -> Self {
        let mut rng = GameRng::new(setup.seed);
        let board = Board::generate(&setup.rules.hazard_plan(), &mut rng);
        let mut pool = LetterPool::standard();

        let (p1, p2) = setup.players.clone();
        let mut racks = BTreeMap::new();
        for player in [&p1, &p2] {
            let mut rack = Rack::new(setup.rules.rack_size);
            rack.refill(&mut pool, &mut rng);
            racks.insert(player.clone(), rack);
        }

        let turn_owner = if rng.random_bool(0.5) { p1.clone() } else { p2.clone() };
        let scores = BTreeMap::from([(p1.clone(), 0), (p2.clone(), 0)]);

        debug!(session_id = %setup.id, first = %turn_owner, "创建对局");

        GameSession {
            id: setup.id,
            players: setup.players,
            duration_class: setup.duration_class,
            rules: setup.rules,
            board,
            pool,
            racks,
            turn_owner,
            scores,
            status: SessionStatus::AwaitingFirstMove,
            outcome: None,
            end_reason: None,
            history: Vec::new(),
            turn_count: 0,
            consecutive_passes: 0,
            switch_count: 0,
            in_extra_turn: false,
            frozen: Vec::new(),
            blocks: Vec::new(),
            started_at: now,
            expires_at: now + chrono::Duration::seconds(setup.match_length.as_secs() as i64),
            turn_started_at: now,
            turn_limit_secs: setup.turn_limit.map(|d| d.as_secs()),
            finished_at: None,
            seed: setup.seed,
        }
    }

    /// 本动作使用的随机流；只由历史长度决定，被拒绝的动作不会消耗随机数
    fn action_rng(&self) -> GameRng {
        let salt = (self.history.len() as u64 + 1).wrapping_mul(TURN_SALT);
        GameRng::new(self.seed ^ salt)
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    pub fn is_participant(&self, player: &PlayerId) -> bool {
        self.players.0 == *player || self.players.1 == *player
    }

    /// 对手ID
    pub fn opponent_of(&self, player: &PlayerId) -> Option<&PlayerId> {
        if self.players.0 == *player {
            Some(&self.players.1)
        } else if self.players.1 == *player {
            Some(&self.players.0)
        } else {
            None
        }
    }

    pub fn rack(&self, player: &PlayerId) -> Option<&Rack> {
        self.racks.get(player)
    }

    pub fn score(&self, player: &PlayerId) -> i32 {
        self.scores.get(player).copied().unwrap_or(0)
    }

    /// 当前对该玩家生效的冻结槽位
    pub fn frozen_indices(&self, player: &PlayerId) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .frozen
            .iter()
            .filter(|f| f.affected_player == *player)
            .flat_map(|f| f.rack_indices.iter().copied())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    fn blocks_for(&self, player: &PlayerId) -> Vec<AreaBlockEffect> {
        self.blocks
            .iter()
            .filter(|b| b.affected_player == *player)
            .cloned()
            .collect()
    }

    /// 棋盘、手牌、字母袋中的牌总数，恒等于初始总数
    pub fn tile_count(&self) -> usize {
        self.pool.len()
            + self.racks.values().map(Rack::len).sum::<usize>()
            + self.board.occupied_count()
    }

    /// 序列化状态的 SHA-256
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// 动作前先结算到期；到期时对局在此结束，调用方得到 `GameAlreadyFinished`
    fn ensure_open(&mut self, now: DateTime<Utc>) -> Result<(), TurnError> {
        if self.check_expiry(now) {
            return Err(TurnError::GameAlreadyFinished);
        }
        Ok(())
    }

    /// 当前玩家动作前的通用检查
    fn ensure_turn(&self, player: &PlayerId) -> Result<PlayerId, TurnError> {
        if self.is_finished() {
            return Err(TurnError::GameAlreadyFinished);
        }
        let opponent = self
            .opponent_of(player)
            .ok_or(TurnError::NotAParticipant)?
            .clone();
        if self.turn_owner != *player {
            return Err(TurnError::NotYourTurn);
        }
        Ok(opponent)
    }

    /// 出牌
    ///
    /// 任何校验失败都不会修改状态；成功时提交棋盘、手牌、分数并推进回合。
    pub fn submit_move(
        &mut self,
        player: &PlayerId,
        placements: &[Placement],
        lexicon: &dyn Lexicon,
        now: DateTime<Utc>,
    ) -> crate::Result<MoveRecord> {
        self.ensure_open(now)?;
        let opponent = self.ensure_turn(player)?;

        let rack = self
            .racks
            .get(player)
            .ok_or(TurnError::NotAParticipant)?;
        let wanted: Vec<Tile> = placements.iter().map(|p| p.tile).collect();
        let slots = rack
            .match_tiles(&wanted, &self.frozen_indices(player))
            .ok_or(ValidationError::RackMismatch)?;

        let blocks = self.blocks_for(player);
        let ctx = MoveContext {
            rules: &self.rules,
            player,
            blocks: &blocks,
        };
        let scored = scoring::evaluate(&self.board, placements, lexicon, &ctx)?;

        // 以下为提交阶段，不再失败
        let mut rng = self.action_rng();
        self.board = scored.board;

        let credited_to = match scored.beneficiary {
            Beneficiary::Mover => player.clone(),
            Beneficiary::Opponent => opponent.clone(),
        };
        *self.scores.entry(credited_to.clone()).or_insert(0) += scored.score;

        if let Some(rack) = self.racks.get_mut(player) {
            for slot in &slots {
                rack.take(*slot);
            }
            rack.refill(&mut self.pool, &mut rng);
        }

        let mut extra_turn = false;
        for triggered in &scored.triggered {
            match triggered.hazard {
                Hazard::Mine(MineKind::LetterReset) => {
                    if let Some(rack) = self.racks.get_mut(player) {
                        let old = rack.take_all();
                        self.pool.return_tiles(old);
                        rack.refill(&mut self.pool, &mut rng);
                    }
                    self.frozen.retain(|f| f.affected_player != *player);
                }
                Hazard::Reward(RewardKind::AreaBlock) => {
                    self.blocks.push(AreaBlockEffect {
                        affected_player: opponent.clone(),
                        center: triggered.position,
                        radius: self.rules.area_block_radius,
                        clears_at_turn: self.switch_count + self.rules.area_block_turns,
                    });
                }
                Hazard::Reward(RewardKind::LetterFreeze) => {
                    let occupied = self
                        .racks
                        .get(&opponent)
                        .map(Rack::occupied_indices)
                        .unwrap_or_default();
                    let mut rack_indices: Vec<usize> = occupied
                        .choose_multiple(&mut rng, self.rules.freeze_slots)
                        .copied()
                        .collect();
                    rack_indices.sort_unstable();
                    if !rack_indices.is_empty() {
                        self.frozen.push(FrozenLettersEffect {
                            affected_player: opponent.clone(),
                            rack_indices,
                            clears_at_turn: self.switch_count + self.rules.freeze_turns,
                        });
                    }
                }
                Hazard::Reward(RewardKind::ExtraTurn) => {
                    // 额外回合不叠加，额外回合中也不会再获得
                    extra_turn = !self.in_extra_turn;
                }
                Hazard::Mine(_) => {}
            }
        }

        let record = MoveRecord {
            player_id: player.clone(),
            kind: MoveKind::Play,
            placements: placements.to_vec(),
            formed_words: scored.words,
            score_earned: scored.score,
            credited_to: Some(credited_to),
            triggered: scored.triggered,
            extra_turn,
            timestamp: now,
        };
        self.history.push(record.clone());
        self.status = SessionStatus::InProgress;
        self.consecutive_passes = 0;

        info!(
            session_id = %self.id,
            player_id = %player,
            score = record.score_earned,
            words = record.formed_words.len(),
            "出牌成功"
        );

        let rack_empty = self.racks.get(player).is_none_or(Rack::is_empty);
        if rack_empty && self.pool.is_empty() {
            self.settle_rack_out(player, &opponent);
            self.finish(EndReason::RackEmptied, now);
        } else {
            self.advance_turn(extra_turn, now);
        }
        Ok(record)
    }

    /// 跳过本回合；双方连续跳过时结束
    pub fn pass(&mut self, player: &PlayerId, now: DateTime<Utc>) -> crate::Result<MoveRecord> {
        self.ensure_open(now)?;
        self.ensure_turn(player)?;
        Ok(self.record_pass(player.clone(), MoveKind::Pass, now))
    }

    fn record_pass(&mut self, player: PlayerId, kind: MoveKind, now: DateTime<Utc>) -> MoveRecord {
        let record = MoveRecord::simple(&player, kind, now);
        self.history.push(record.clone());
        self.consecutive_passes += 1;
        if self.status == SessionStatus::AwaitingFirstMove {
            self.status = SessionStatus::InProgress;
        }

        if self.consecutive_passes >= 2 {
            self.finish(EndReason::MutualPass, now);
        } else {
            self.advance_turn(false, now);
        }
        record
    }

    /// 换牌：先从袋中抽同样数量的新牌，再把旧牌放回
    pub fn exchange(
        &mut self,
        player: &PlayerId,
        rack_indices: &[usize],
        now: DateTime<Utc>,
    ) -> crate::Result<MoveRecord> {
        self.ensure_open(now)?;
        self.ensure_turn(player)?;
        if rack_indices.is_empty() {
            return Err(ValidationError::EmptyPlacement.into());
        }

        let frozen = self.frozen_indices(player);
        let rack = self.racks.get(player).ok_or(TurnError::NotAParticipant)?;
        let mut seen = Vec::with_capacity(rack_indices.len());
        for index in rack_indices {
            if seen.contains(index) || frozen.contains(index) || rack.get(*index).is_none() {
                return Err(ValidationError::RackMismatch.into());
            }
            seen.push(*index);
        }
        if self.pool.len() < rack_indices.len() {
            return Err(ValidationError::ExchangeUnavailable.into());
        }

        let mut rng = self.action_rng();
        let fresh = self.pool.draw(rack_indices.len(), &mut rng);
        if let Some(rack) = self.racks.get_mut(player) {
            let old: Vec<Tile> = rack_indices.iter().filter_map(|i| rack.take(*i)).collect();
            rack.refill_from(fresh);
            self.pool.return_tiles(old);
        }

        let record = MoveRecord::simple(
            player,
            MoveKind::Exchange {
                count: rack_indices.len(),
            },
            now,
        );
        self.history.push(record.clone());
        self.consecutive_passes = 0;
        if self.status == SessionStatus::AwaitingFirstMove {
            self.status = SessionStatus::InProgress;
        }
        self.advance_turn(false, now);
        Ok(record)
    }

    /// 认输：对手获胜，任何时候都可以（不要求是自己的回合）
    pub fn resign(&mut self, player: &PlayerId, now: DateTime<Utc>) -> crate::Result<MoveRecord> {
        self.ensure_open(now)?;
        if self.is_finished() {
            return Err(TurnError::GameAlreadyFinished.into());
        }
        let opponent = self
            .opponent_of(player)
            .ok_or(TurnError::NotAParticipant)?
            .clone();

        let record = MoveRecord::simple(player, MoveKind::Resign, now);
        self.history.push(record.clone());
        self.finish_with(EndReason::Resigned, Outcome::Winner(opponent), now);
        Ok(record)
    }

    /// 对局到期检查，返回是否因此结束
    pub fn check_expiry(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_finished() || now < self.expires_at {
            return false;
        }
        info!(session_id = %self.id, "对局时间耗尽");
        self.finish(EndReason::Expired, now);
        true
    }

    /// 回合超时检查，超时按跳过处理，返回是否发生了超时
    pub fn check_turn_timeout(&mut self, now: DateTime<Utc>) -> bool {
        let Some(limit) = self.turn_limit_secs else {
            return false;
        };
        if self.is_finished() {
            return false;
        }
        let deadline = self.turn_started_at + chrono::Duration::seconds(limit as i64);
        if now < deadline {
            return false;
        }
        debug!(session_id = %self.id, player_id = %self.turn_owner, "回合超时");
        self.record_pass(self.turn_owner.clone(), MoveKind::TimedOut, now);
        true
    }

    /// 推进回合计数并切换出牌方；只有真正换手时效果才会到期
    fn advance_turn(&mut self, extra_turn: bool, now: DateTime<Utc>) {
        self.turn_count += 1;

        if !extra_turn {
            if let Some(next) = self.opponent_of(&self.turn_owner).cloned() {
                self.turn_owner = next;
            }
            self.switch_count += 1;
            let switches = self.switch_count;
            self.frozen.retain(|f| f.clears_at_turn > switches);
            self.blocks.retain(|b| b.clears_at_turn > switches);
        }
        self.in_extra_turn = extra_turn;
        self.turn_started_at = now;
    }

    /// 一方出完手牌：加上对手剩余牌分，对手扣除同样分值
    fn settle_rack_out(&mut self, player: &PlayerId, opponent: &PlayerId) {
        let remaining = self.racks.get(opponent).map(Rack::value).unwrap_or(0);
        *self.scores.entry(player.clone()).or_insert(0) += remaining;
        *self.scores.entry(opponent.clone()).or_insert(0) -= remaining;
    }

    /// 按分数结束对局
    fn finish(&mut self, reason: EndReason, now: DateTime<Utc>) {
        let outcome = self.leader();
        self.finish_with(reason, outcome, now);
    }

    /// 结束对局；只会生效一次
    fn finish_with(&mut self, reason: EndReason, outcome: Outcome, now: DateTime<Utc>) {
        if self.is_finished() {
            return;
        }
        self.status = SessionStatus::Finished;
        self.end_reason = Some(reason);
        self.finished_at = Some(now);
        self.outcome = Some(outcome);
        info!(session_id = %self.id, reason = ?reason, outcome = ?self.outcome, "对局结束");
    }

    /// 按分数判定胜负
    pub fn leader(&self) -> Outcome {
        let (p1, p2) = &self.players;
        let (s1, s2) = (self.score(p1), self.score(p2));
        if s1 > s2 {
            Outcome::Winner(p1.clone())
        } else if s2 > s1 {
            Outcome::Winner(p2.clone())
        } else {
            Outcome::Draw
        }
    }

    /// 玩家视角：隐藏对手手牌和未触发的格子效果
    pub fn view_for(&self, player: &PlayerId) -> Option<SessionView> {
        let opponent = self.opponent_of(player)?.clone();
        Some(SessionView {
            id: self.id.clone(),
            players: self.players.clone(),
            duration_class: self.duration_class,
            board: self.board.without_hidden_hazards(),
            rack: self.racks.get(player).cloned(),
            opponent_rack_size: self.racks.get(&opponent).map(Rack::len).unwrap_or(0),
            frozen_indices: self.frozen_indices(player),
            blocked_areas: self.blocks_for(player),
            pool_remaining: self.pool.len(),
            turn_owner: self.turn_owner.clone(),
            scores: self.scores.clone(),
            status: self.status,
            outcome: self.outcome.clone(),
            end_reason: self.end_reason,
            history: self.history.clone(),
            turn_count: self.turn_count,
            switch_count: self.switch_count,
            expires_at: self.expires_at,
            turn_started_at: self.turn_started_at,
        })
    }
}

/// 发给某一玩家的对局快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub players: (PlayerId, PlayerId),
    pub duration_class: DurationClass,
    pub board: Board,
    pub rack: Option<Rack>,
    pub opponent_rack_size: usize,
    pub frozen_indices: Vec<usize>,
    pub blocked_areas: Vec<AreaBlockEffect>,
    pub pool_remaining: usize,
    pub turn_owner: PlayerId,
    pub scores: BTreeMap<PlayerId, i32>,
    pub status: SessionStatus,
    pub outcome: Option<Outcome>,
    pub end_reason: Option<EndReason>,
    pub history: Vec<MoveRecord>,
    pub turn_count: u32,
    pub switch_count: u32,
    pub expires_at: DateTime<Utc>,
    pub turn_started_at: DateTime<Utc>,
}
