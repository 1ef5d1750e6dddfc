//! 出牌校验与计分
//!
//! 所有检查都在棋盘副本上进行，只有全部通过才把副本交给对局提交，
//! 因此被拒绝的出牌不会留下任何副作用。

use crate::ValidationError;
use crate::board::{Board, Direction, Hazard, MineKind, PlacedTile, Position};
use crate::config::GameRules;
use crate::lexicon::Lexicon;
use crate::session::{AreaBlockEffect, Placement, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 本步组成的一个单词
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormedWord {
    pub word: String,
    pub path: Vec<Position>,
    pub score: i32,
}

/// 得分归属
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Beneficiary {
    Mover,
    Opponent,
}

/// 本步触发的格子效果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredHazard {
    pub position: Position,
    pub hazard: Hazard,
}

/// 校验通过、尚未提交的出牌
#[derive(Debug, Clone)]
pub struct ScoredMove {
    /// 落子并清除已触发效果后的棋盘
    pub board: Board,
    pub words: Vec<FormedWord>,
    pub bingo: bool,
    /// 单词得分与满架奖励之和，分数减半之前
    pub raw_score: i32,
    pub score: i32,
    pub beneficiary: Beneficiary,
    pub triggered: Vec<TriggeredHazard>,
}

/// 校验所需的对局上下文
pub struct MoveContext<'a> {
    pub rules: &'a GameRules,
    pub player: &'a PlayerId,
    /// 对当前玩家生效的封锁区域
    pub blocks: &'a [AreaBlockEffect],
}

/// 校验并计分
pub fn evaluate(
    board: &Board,
    placements: &[Placement],
    lexicon: &dyn Lexicon,
    ctx: &MoveContext<'_>,
) -> Result<ScoredMove, ValidationError> {
    let positions = check_structure(board, placements, ctx.blocks)?;
    let direction = line_direction(&positions)?;
    board.is_connected(&positions)?;

    let mut next = board.clone();
    for placement in placements {
        next.place(placement.position, placed_tile(placement)?)?;
    }
    check_no_gaps(&next, &positions, direction)?;

    let paths = formed_paths(&next, &positions, direction);
    if paths.is_empty() {
        return Err(ValidationError::NoWordFormed);
    }

    let words: Vec<String> = paths.iter().map(|path| spell(&next, path)).collect();
    if let Some(bad) = words.iter().find(|w| !lexicon.is_valid_word(w)) {
        return Err(ValidationError::InvalidWord(bad.clone()));
    }

    let triggered: Vec<TriggeredHazard> = positions
        .iter()
        .filter_map(|p| {
            next.cell(*p)
                .and_then(|c| c.hazard)
                .map(|hazard| TriggeredHazard {
                    position: *p,
                    hazard,
                })
        })
        .collect();
    let mines_at = |kind: MineKind| -> BTreeSet<Position> {
        triggered
            .iter()
            .filter(|t| t.hazard == Hazard::Mine(kind))
            .map(|t| t.position)
            .collect()
    };
    let bonus_cancel = mines_at(MineKind::BonusCancel);
    let word_cancel = mines_at(MineKind::WordCancel);
    let new_cells: BTreeSet<Position> = positions.iter().copied().collect();

    let formed: Vec<FormedWord> = paths
        .into_iter()
        .zip(words)
        .map(|(path, word)| {
            let score = if path.iter().any(|p| word_cancel.contains(p)) {
                0
            } else {
                let with_bonus = !path.iter().any(|p| bonus_cancel.contains(p));
                score_path(&next, &path, &new_cells, with_bonus, ctx.rules)
            };
            FormedWord { word, path, score }
        })
        .collect();

    let bingo = placements.len() == ctx.rules.rack_size;
    let mut raw_score: i32 = formed.iter().map(|w| w.score).sum();
    if bingo {
        raw_score += ctx.rules.bingo_bonus;
    }

    let mut score = raw_score;
    let divisions = triggered
        .iter()
        .filter(|t| t.hazard == Hazard::Mine(MineKind::PointDivision))
        .count();
    for _ in 0..divisions {
        if ctx.rules.point_division_factor > 0 {
            score /= ctx.rules.point_division_factor;
        }
    }

    let beneficiary = if triggered
        .iter()
        .any(|t| t.hazard == Hazard::Mine(MineKind::PointTransfer))
    {
        Beneficiary::Opponent
    } else {
        Beneficiary::Mover
    };

    for t in &triggered {
        next.resolve_hazard(t.position, ctx.player);
    }

    Ok(ScoredMove {
        board: next,
        words: formed,
        bingo,
        raw_score,
        score,
        beneficiary,
        triggered,
    })
}

/// 非空、在界内、不重复、格子为空、不在封锁区
fn check_structure(
    board: &Board,
    placements: &[Placement],
    blocks: &[AreaBlockEffect],
) -> Result<Vec<Position>, ValidationError> {
    if placements.is_empty() {
        return Err(ValidationError::EmptyPlacement);
    }

    let mut seen = BTreeSet::new();
    for placement in placements {
        let position = placement.position;
        if !position.in_bounds() {
            return Err(ValidationError::OutOfBounds);
        }
        if !seen.insert(position) {
            return Err(ValidationError::DuplicatePosition);
        }
        if board.is_occupied(position) {
            return Err(ValidationError::OccupiedCell);
        }
        if blocks.iter().any(|b| b.covers(position)) {
            return Err(ValidationError::BlockedCell);
        }
    }
    Ok(placements.iter().map(|p| p.position).collect())
}

/// 同一行为横向，同一列为纵向；单个字母按横向处理
fn line_direction(positions: &[Position]) -> Result<Direction, ValidationError> {
    let first = positions[0];
    if positions.iter().all(|p| p.row == first.row) {
        Ok(Direction::Horizontal)
    } else if positions.iter().all(|p| p.col == first.col) {
        Ok(Direction::Vertical)
    } else {
        Err(ValidationError::NotInLine)
    }
}

fn placed_tile(placement: &Placement) -> Result<PlacedTile, ValidationError> {
    let letter = placement.letter().ok_or(ValidationError::RackMismatch)?;
    Ok(PlacedTile {
        tile: placement.tile,
        letter,
    })
}

/// 新字母首尾之间的格子必须全部有字母
fn check_no_gaps(
    board: &Board,
    positions: &[Position],
    direction: Direction,
) -> Result<(), ValidationError> {
    let (Some(min), Some(max)) = (positions.iter().min(), positions.iter().max()) else {
        return Ok(());
    };
    let covered = board
        .extract_word(*min, direction)
        .any(|cell| cell.position == *max);
    if covered {
        Ok(())
    } else {
        Err(ValidationError::GapInLine)
    }
}

/// 主线与每个新字母的垂直线上长度不小于 2 的连续段
fn formed_paths(board: &Board, positions: &[Position], direction: Direction) -> Vec<Vec<Position>> {
    let run = |anchor: Position, dir: Direction| -> Vec<Position> {
        let start = board.run_start(anchor, dir);
        board.extract_word(start, dir).map(|c| c.position).collect()
    };

    let mut paths = Vec::new();
    let main = run(positions[0], direction);
    if main.len() >= 2 {
        paths.push(main);
    }
    for position in positions {
        let cross = run(*position, direction.perpendicular());
        if cross.len() >= 2 {
            paths.push(cross);
        }
    }
    paths
}

fn spell(board: &Board, path: &[Position]) -> String {
    path.iter()
        .filter_map(|p| board.occupant(*p))
        .map(|o| o.letter)
        .collect()
}

/// 字母倍率先乘到单个字母上，再乘以本词新覆盖格子中最大的词倍率
fn score_path(
    board: &Board,
    path: &[Position],
    new_cells: &BTreeSet<Position>,
    with_bonus: bool,
    rules: &GameRules,
) -> i32 {
    let mut sum = 0;
    let mut word_multiplier = 1;
    for position in path {
        let Some(cell) = board.cell(*position) else {
            continue;
        };
        let Some(occupant) = cell.occupant else {
            continue;
        };
        if with_bonus && new_cells.contains(position) {
            sum += occupant.tile.value * cell.premium.letter_multiplier();
            word_multiplier =
                word_multiplier.max(cell.premium.word_multiplier(rules.center_word_multiplier));
        } else {
            sum += occupant.tile.value;
        }
    }
    sum * word_multiplier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{CENTER, RewardKind};
    use crate::lexicon::WordList;
    use crate::tile::Tile;

    fn play(word: &str, row: usize, col: usize, direction: Direction) -> Vec<Placement> {
        word.chars()
            .enumerate()
            .map(|(i, c)| {
                let position = match direction {
                    Direction::Horizontal => Position::new(row, col + i),
                    Direction::Vertical => Position::new(row + i, col),
                };
                Placement::new(position, Tile::letter(c).unwrap())
            })
            .collect()
    }

    fn commit(board: &Board, placements: &[Placement], lexicon: &WordList) -> ScoredMove {
        let rules = GameRules::without_hazards();
        let player = "p1".to_string();
        let ctx = MoveContext {
            rules: &rules,
            player: &player,
            blocks: &[],
        };
        evaluate(board, placements, lexicon, &ctx).unwrap()
    }

    fn eval(board: &Board, placements: &[Placement], lexicon: &WordList) -> Result<ScoredMove, ValidationError> {
        let rules = GameRules::without_hazards();
        let player = "p1".to_string();
        let ctx = MoveContext {
            rules: &rules,
            player: &player,
            blocks: &[],
        };
        evaluate(board, placements, lexicon, &ctx)
    }

    #[test]
    fn first_move_through_center_scores_face_value() {
        let lexicon = WordList::from_words(["CAT"]);
        let board = Board::empty();
        let scored = commit(&board, &play("CAT", 7, 6, Direction::Horizontal), &lexicon);
        assert_eq!(scored.words.len(), 1);
        assert_eq!(scored.words[0].word, "CAT");
        assert_eq!(scored.score, 3 + 1 + 1);
        assert_eq!(scored.beneficiary, Beneficiary::Mover);
        assert!(!scored.bingo);
    }

    fn put(board: &mut Board, row: usize, col: usize, c: char) {
        board
            .place(
                Position::new(row, col),
                PlacedTile {
                    tile: Tile::letter(c).unwrap(),
                    letter: c,
                },
            )
            .unwrap();
    }

    #[test]
    fn letter_premium_applies_to_new_tile_only() {
        let lexicon = WordList::from_words(["CAT"]);
        let mut board = Board::empty();
        put(&mut board, 7, 4, 'A');
        put(&mut board, 7, 5, 'T');
        // (7,3) 为双倍字母格
        let scored = commit(
            &board,
            &[Placement::new(Position::new(7, 3), Tile::letter('C').unwrap())],
            &lexicon,
        );
        assert_eq!(scored.words[0].word, "CAT");
        assert_eq!(scored.score, 3 * 2 + 1 + 1);
    }

    #[test]
    fn highest_word_multiplier_wins() {
        let lexicon = WordList::from_words(["AA"]);
        let mut board = Board::empty();
        put(&mut board, 1, 2, 'A');
        // (1,1) 为双倍词格，新字母只覆盖这一格
        let scored = commit(&board, &[Placement::new(Position::new(1, 1), Tile::letter('A').unwrap())], &lexicon);
        assert_eq!(scored.score, (1 + 1) * 2);
    }

    #[test]
    fn cross_words_are_scored_too() {
        let lexicon = WordList::from_words(["CAT", "AT", "TA"]);
        let board = commit(&Board::empty(), &play("CAT", 7, 6, Direction::Horizontal), &lexicon).board;
        // 在 A 下方放 T，组成纵向 AT
        let scored = commit(&board, &[Placement::new(Position::new(8, 7), Tile::letter('T').unwrap())], &lexicon);
        let words: Vec<_> = scored.words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["AT"]);
        assert_eq!(scored.score, 2);
    }

    #[test]
    fn structural_errors() {
        let lexicon = WordList::from_words(["CAT"]);
        let board = Board::empty();
        assert_eq!(eval(&board, &[], &lexicon).unwrap_err(), ValidationError::EmptyPlacement);
        assert_eq!(
            eval(&board, &play("CAT", 0, 0, Direction::Horizontal), &lexicon).unwrap_err(),
            ValidationError::DisconnectedMove
        );
        assert_eq!(
            eval(&board, &play("CAT", 7, 13, Direction::Horizontal), &lexicon).unwrap_err(),
            ValidationError::OutOfBounds
        );

        let diagonal = vec![
            Placement::new(CENTER, Tile::letter('C').unwrap()),
            Placement::new(Position::new(8, 8), Tile::letter('A').unwrap()),
        ];
        assert_eq!(eval(&board, &diagonal, &lexicon).unwrap_err(), ValidationError::NotInLine);

        let gapped = vec![
            Placement::new(CENTER, Tile::letter('C').unwrap()),
            Placement::new(Position::new(7, 9), Tile::letter('T').unwrap()),
        ];
        assert_eq!(eval(&board, &gapped, &lexicon).unwrap_err(), ValidationError::GapInLine);

        let single = vec![Placement::new(CENTER, Tile::letter('C').unwrap())];
        assert_eq!(eval(&board, &single, &lexicon).unwrap_err(), ValidationError::NoWordFormed);

        assert_eq!(
            eval(&board, &play("TAC", 7, 6, Direction::Horizontal), &lexicon).unwrap_err(),
            ValidationError::InvalidWord("TAC".to_string())
        );
    }

    #[test]
    fn wildcard_needs_a_letter_and_scores_zero() {
        let lexicon = WordList::from_words(["CAT"]);
        let board = Board::empty();
        let mut placements = play("CAT", 7, 6, Direction::Horizontal);
        placements[0] = Placement::new(Position::new(7, 6), Tile::wildcard());
        assert_eq!(eval(&board, &placements, &lexicon).unwrap_err(), ValidationError::RackMismatch);

        placements[0] = Placement::wildcard(Position::new(7, 6), 'c');
        let scored = commit(&board, &placements, &lexicon);
        assert_eq!(scored.words[0].word, "CAT");
        assert_eq!(scored.score, 2);
    }

    #[test]
    fn word_cancel_mine_zeroes_word() {
        let lexicon = WordList::from_words(["CAT"]);
        let mut board = Board::empty();
        board.set_hazard(Position::new(7, 8), Some(Hazard::Mine(MineKind::WordCancel)));
        let scored = commit(&board, &play("CAT", 7, 6, Direction::Horizontal), &lexicon);
        assert_eq!(scored.words[0].score, 0);
        assert_eq!(scored.score, 0);
        assert_eq!(scored.board.cell(Position::new(7, 8)).unwrap().hazard, None);
        assert_eq!(
            scored.board.cell(Position::new(7, 8)).unwrap().triggered_by.as_deref(),
            Some("p1")
        );
    }

    #[test]
    fn point_mines_divide_and_transfer() {
        let lexicon = WordList::from_words(["QAT"]);
        let mut board = Board::empty();
        board.set_hazard(Position::new(7, 6), Some(Hazard::Mine(MineKind::PointDivision)));
        board.set_hazard(Position::new(7, 8), Some(Hazard::Mine(MineKind::PointTransfer)));
        let scored = commit(&board, &play("QAT", 7, 6, Direction::Horizontal), &lexicon);
        assert_eq!(scored.raw_score, 12);
        assert_eq!(scored.score, 6);
        assert_eq!(scored.beneficiary, Beneficiary::Opponent);
        assert_eq!(scored.triggered.len(), 2);
    }

    #[test]
    fn bonus_cancel_ignores_premiums() {
        let lexicon = WordList::from_words(["AA"]);
        let mut board = Board::empty();
        put(&mut board, 1, 2, 'A');
        board.set_hazard(Position::new(1, 1), Some(Hazard::Mine(MineKind::BonusCancel)));
        let scored = commit(&board, &[Placement::new(Position::new(1, 1), Tile::letter('A').unwrap())], &lexicon);
        assert_eq!(scored.score, 2);
    }

    #[test]
    fn rewards_are_reported_and_cleared() {
        let lexicon = WordList::from_words(["CAT"]);
        let mut board = Board::empty();
        board.set_hazard(Position::new(7, 6), Some(Hazard::Reward(RewardKind::ExtraTurn)));
        let scored = commit(&board, &play("CAT", 7, 6, Direction::Horizontal), &lexicon);
        assert_eq!(
            scored.triggered,
            vec![TriggeredHazard {
                position: Position::new(7, 6),
                hazard: Hazard::Reward(RewardKind::ExtraTurn)
            }]
        );
        assert_eq!(
            scored.board.cell(Position::new(7, 6)).unwrap().collected_by.as_deref(),
            Some("p1")
        );
    }

    #[test]
    fn blocked_area_rejects_placement() {
        let lexicon = WordList::from_words(["CAT"]);
        let rules = GameRules::without_hazards();
        let player = "p1".to_string();
        let blocks = [AreaBlockEffect {
            affected_player: player.clone(),
            center: CENTER,
            radius: 1,
            clears_at_turn: 5,
        }];
        let ctx = MoveContext {
            rules: &rules,
            player: &player,
            blocks: &blocks,
        };
        let err = evaluate(&Board::empty(), &play("CAT", 7, 6, Direction::Horizontal), &lexicon, &ctx)
            .unwrap_err();
        assert_eq!(err, ValidationError::BlockedCell);
    }

    #[test]
    fn bingo_bonus_for_full_rack() {
        let lexicon = WordList::from_words(["ABSENTS"]);
        let scored = commit(&Board::empty(), &play("ABSENTS", 7, 4, Direction::Horizontal), &lexicon);
        assert!(scored.bingo);
        assert_eq!(scored.raw_score, 1 + 3 + 1 + 1 + 1 + 1 + 1 + 50);
    }
}
