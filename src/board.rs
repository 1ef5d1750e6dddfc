use crate::ValidationError;
use crate::session::PlayerId;
use crate::tile::Tile;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 棋盘边长
pub const BOARD_SIZE: usize = 15;

/// 中心格
pub const CENTER: Position = Position { row: 7, col: 7 };

/// 棋盘坐标，行列均从 0 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub const fn new(row: usize, col: usize) -> Self {
        Position { row, col }
    }

    pub fn in_bounds(&self) -> bool {
        self.row < BOARD_SIZE && self.col < BOARD_SIZE
    }

    /// 沿方向前进一步，越界返回 None
    pub fn step(&self, direction: Direction) -> Option<Position> {
        let next = match direction {
            Direction::Horizontal => Position::new(self.row, self.col + 1),
            Direction::Vertical => Position::new(self.row + 1, self.col),
        };
        next.in_bounds().then_some(next)
    }

    /// 沿方向后退一步
    pub fn step_back(&self, direction: Direction) -> Option<Position> {
        match direction {
            Direction::Horizontal => self.col.checked_sub(1).map(|c| Position::new(self.row, c)),
            Direction::Vertical => self.row.checked_sub(1).map(|r| Position::new(r, self.col)),
        }
    }

    /// 上下左右四个相邻格
    pub fn neighbors(self) -> impl Iterator<Item = Position> {
        [Direction::Horizontal, Direction::Vertical]
            .into_iter()
            .flat_map(move |d| [self.step(d), self.step_back(d)])
            .flatten()
    }

    /// 切比雪夫距离
    pub fn distance(&self, other: &Position) -> usize {
        self.row.abs_diff(other.row).max(self.col.abs_diff(other.col))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Horizontal,
    Vertical,
}

impl Direction {
    pub fn perpendicular(self) -> Direction {
        match self {
            Direction::Horizontal => Direction::Vertical,
            Direction::Vertical => Direction::Horizontal,
        }
    }
}

/// 格子的固定倍率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Premium {
    None,
    DoubleLetter,
    TripleLetter,
    DoubleWord,
    TripleWord,
    Center,
}

impl Premium {
    /// 经典布局，按四分之一棋盘对称展开
    pub fn for_position(position: Position) -> Premium {
        let r = position.row.min(BOARD_SIZE - 1 - position.row);
        let c = position.col.min(BOARD_SIZE - 1 - position.col);
        let (a, b) = (r.min(c), r.max(c));
        match (a, b) {
            (7, 7) => Premium::Center,
            (0, 0) | (0, 7) => Premium::TripleWord,
            (1, 1) | (2, 2) | (3, 3) | (4, 4) => Premium::DoubleWord,
            (1, 5) | (5, 5) => Premium::TripleLetter,
            (0, 3) | (2, 6) | (3, 7) | (6, 6) => Premium::DoubleLetter,
            _ => Premium::None,
        }
    }

    pub fn letter_multiplier(self) -> i32 {
        match self {
            Premium::DoubleLetter => 2,
            Premium::TripleLetter => 3,
            _ => 1,
        }
    }

    /// 词倍率；中心格的倍率由规则配置决定
    pub fn word_multiplier(self, center_multiplier: i32) -> i32 {
        match self {
            Premium::DoubleWord => 2,
            Premium::TripleWord => 3,
            Premium::Center => center_multiplier,
            _ => 1,
        }
    }
}

/// 地雷：惩罚踩中的玩家
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MineKind {
    PointDivision,
    PointTransfer,
    LetterReset,
    BonusCancel,
    WordCancel,
}

/// 奖励：收集者获益或牵制对手
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewardKind {
    AreaBlock,
    LetterFreeze,
    ExtraTurn,
}

/// 隐藏格子效果；一个格子至多一个，地雷与奖励天然互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hazard {
    Mine(MineKind),
    Reward(RewardKind),
}

/// 已落在棋盘上的牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedTile {
    pub tile: Tile,
    /// 实际代表的字母，万能牌由玩家指定
    pub letter: char,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub position: Position,
    pub premium: Premium,
    pub hazard: Option<Hazard>,
    pub occupant: Option<PlacedTile>,
    pub triggered_by: Option<PlayerId>,
    pub collected_by: Option<PlayerId>,
}

impl Cell {
    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }
}

/// 15×15 棋盘，行优先存储
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: Vec<Cell>,
}

impl Board {
    /// 只有倍率、没有地雷奖励的空棋盘
    pub fn empty() -> Self {
        let cells = (0..BOARD_SIZE * BOARD_SIZE)
            .map(|i| {
                let position = Position::new(i / BOARD_SIZE, i % BOARD_SIZE);
                Cell {
                    position,
                    premium: Premium::for_position(position),
                    hazard: None,
                    occupant: None,
                    triggered_by: None,
                    collected_by: None,
                }
            })
            .collect();
        Board { cells }
    }

    /// 生成对局棋盘：在中心格以外随机布置地雷和奖励
    pub fn generate<R: Rng + ?Sized>(plan: &[(Hazard, usize)], rng: &mut R) -> Self {
        let mut board = Self::empty();
        let mut candidates: Vec<Position> = board
            .cells
            .iter()
            .map(|c| c.position)
            .filter(|p| *p != CENTER)
            .collect();
        candidates.shuffle(rng);

        let mut slots = candidates.into_iter();
        for (hazard, count) in plan {
            for _ in 0..*count {
                match slots.next() {
                    Some(position) => board.set_hazard(position, Some(*hazard)),
                    None => return board,
                }
            }
        }
        board
    }

    fn index(position: Position) -> Option<usize> {
        position
            .in_bounds()
            .then_some(position.row * BOARD_SIZE + position.col)
    }

    pub fn cell(&self, position: Position) -> Option<&Cell> {
        Self::index(position).map(|i| &self.cells[i])
    }

    fn cell_mut(&mut self, position: Position) -> Option<&mut Cell> {
        match Self::index(position) {
            Some(i) => Some(&mut self.cells[i]),
            None => None,
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn set_hazard(&mut self, position: Position, hazard: Option<Hazard>) {
        if let Some(cell) = self.cell_mut(position) {
            cell.hazard = hazard;
        }
    }

    pub fn is_occupied(&self, position: Position) -> bool {
        self.cell(position).is_some_and(Cell::is_occupied)
    }

    pub fn occupant(&self, position: Position) -> Option<PlacedTile> {
        self.cell(position).and_then(|c| c.occupant)
    }

    /// 棋盘上是否还没有任何字母
    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(Cell::is_occupied)
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_occupied()).count()
    }

    /// 放置一张牌
    pub fn place(&mut self, position: Position, placed: PlacedTile) -> Result<(), ValidationError> {
        let cell = self
            .cell_mut(position)
            .ok_or(ValidationError::OutOfBounds)?;
        if cell.occupant.is_some() {
            return Err(ValidationError::OccupiedCell);
        }
        cell.occupant = Some(placed);
        Ok(())
    }

    /// 从 `start` 沿方向读取连续有字母的格子
    ///
    /// 惰性、单遍；遇到空格或棋盘边缘即停止。
    pub fn extract_word(&self, start: Position, direction: Direction) -> WordCells<'_> {
        WordCells {
            board: self,
            next: Some(start),
            direction,
        }
    }

    /// `position` 所在连续字母段的起点
    pub fn run_start(&self, position: Position, direction: Direction) -> Position {
        let mut start = position;
        while let Some(prev) = start.step_back(direction) {
            if !self.is_occupied(prev) {
                break;
            }
            start = prev;
        }
        start
    }

    /// 连通性检查，须在落子之前的棋盘上调用
    ///
    /// 首步必须覆盖中心格；之后至少一个新字母与已有字母相邻。
    pub fn is_connected(&self, positions: &[Position]) -> Result<(), ValidationError> {
        if self.is_empty() {
            return if positions.contains(&CENTER) {
                Ok(())
            } else {
                Err(ValidationError::DisconnectedMove)
            };
        }

        let touches = positions
            .iter()
            .any(|p| p.neighbors().any(|n| self.is_occupied(n)));
        if touches {
            Ok(())
        } else {
            Err(ValidationError::DisconnectedMove)
        }
    }

    /// 触发格子效果并清除，返回被触发的效果
    pub fn resolve_hazard(&mut self, position: Position, player: &PlayerId) -> Option<Hazard> {
        let cell = self.cell_mut(position)?;
        let hazard = cell.hazard.take()?;
        match hazard {
            Hazard::Mine(_) => cell.triggered_by = Some(player.clone()),
            Hazard::Reward(_) => cell.collected_by = Some(player.clone()),
        }
        Some(hazard)
    }

    /// 尚未触发的地雷和奖励
    pub fn unresolved_hazards(&self) -> impl Iterator<Item = (Position, Hazard)> + '_ {
        self.cells
            .iter()
            .filter_map(|c| c.hazard.map(|h| (c.position, h)))
    }

    /// 隐藏未触发效果后的副本，用于发给客户端
    pub fn without_hidden_hazards(&self) -> Board {
        let mut board = self.clone();
        for cell in board.cells.iter_mut() {
            cell.hazard = None;
        }
        board
    }
}

/// `Board::extract_word` 返回的惰性迭代器
pub struct WordCells<'a> {
    board: &'a Board,
    next: Option<Position>,
    direction: Direction,
}

impl<'a> Iterator for WordCells<'a> {
    type Item = &'a Cell;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.next?;
        let cell = self.board.cell(position).filter(|c| c.is_occupied());
        self.next = match cell {
            Some(_) => position.step(self.direction),
            None => None,
        };
        cell
    }
}
