use crate::tile::{Glyph, STANDARD_DISTRIBUTION, Tile};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 字母袋：按牌面计数的多重集合
///
/// 计数归零的牌面会从 `counts` 中删除，因此袋子是否为空只需看键集合。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterPool {
    counts: BTreeMap<Glyph, u32>,
    values: BTreeMap<Glyph, i32>,
}

impl LetterPool {
    /// 空袋子
    pub fn empty() -> Self {
        LetterPool {
            counts: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// 标准 100 张牌组
    pub fn standard() -> Self {
        let mut pool = Self::empty();
        for spec in STANDARD_DISTRIBUTION.iter() {
            pool.values.insert(spec.glyph, spec.value);
            if spec.count > 0 {
                pool.counts.insert(spec.glyph, spec.count);
            }
        }
        pool
    }

    /// 从牌列表构建
    pub fn from_tiles(tiles: impl IntoIterator<Item = Tile>) -> Self {
        let mut pool = Self::empty();
        pool.return_tiles(tiles);
        pool
    }

    /// 无放回地均匀随机抽取至多 `n` 张
    ///
    /// 袋子不足时返回的牌少于 `n`，不视为错误。
    pub fn draw<R: Rng + ?Sized>(&mut self, n: usize, rng: &mut R) -> Vec<Tile> {
        let mut bag: Vec<Glyph> = self
            .counts
            .iter()
            .flat_map(|(glyph, count)| std::iter::repeat_n(*glyph, *count as usize))
            .collect();
        let take = n.min(bag.len());
        if take == 0 {
            return Vec::new();
        }

        // partial_shuffle 是截断的 Fisher–Yates，每种排列等概率
        let (chosen, _) = bag.partial_shuffle(rng, take);
        let mut drawn = Vec::with_capacity(take);
        for glyph in chosen.iter() {
            if let Some(count) = self.counts.get_mut(glyph) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(glyph);
                }
            }
            drawn.push(Tile {
                glyph: *glyph,
                value: self.values.get(glyph).copied().unwrap_or(0),
            });
        }
        drawn
    }

    /// 取出指定牌面的一张，袋中没有时返回 None
    pub fn take(&mut self, glyph: Glyph) -> Option<Tile> {
        let count = self.counts.get_mut(&glyph)?;
        *count -= 1;
        if *count == 0 {
            self.counts.remove(&glyph);
        }
        Some(Tile {
            glyph,
            value: self.values.get(&glyph).copied().unwrap_or(0),
        })
    }

    /// 放回牌（换牌、重置字母时使用）
    pub fn return_tiles(&mut self, tiles: impl IntoIterator<Item = Tile>) {
        for tile in tiles {
            *self.counts.entry(tile.glyph).or_insert(0) += 1;
            self.values.entry(tile.glyph).or_insert(tile.value);
        }
    }

    /// 剩余张数
    pub fn len(&self) -> usize {
        self.counts.values().map(|c| *c as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// 某一牌面的剩余张数
    pub fn count_of(&self, glyph: Glyph) -> u32 {
        self.counts.get(&glyph).copied().unwrap_or(0)
    }

    /// 剩余牌面及数量
    pub fn counts(&self) -> &BTreeMap<Glyph, u32> {
        &self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::GameRng;
    use proptest::prelude::*;

    #[test]
    fn draw_removes_exhausted_glyphs_from_key_set() {
        let mut pool = LetterPool::from_tiles([Tile::letter('A').unwrap(), Tile::letter('B').unwrap()]);
        let mut rng = GameRng::new(1);

        let drawn = pool.draw(5, &mut rng);
        assert_eq!(drawn.len(), 2);
        assert!(pool.is_empty());
        assert!(pool.counts().is_empty());
        assert!(pool.draw(3, &mut rng).is_empty());
    }

    #[test]
    fn returned_tiles_keep_their_value() {
        let mut pool = LetterPool::empty();
        pool.return_tiles([Tile::wildcard(), Tile::letter('Z').unwrap()]);
        let mut rng = GameRng::new(3);
        let mut drawn = pool.draw(2, &mut rng);
        drawn.sort();
        assert_eq!(drawn, vec![Tile::letter('Z').unwrap(), Tile::wildcard()]);
    }

    #[test]
    fn draw_is_roughly_uniform() {
        // 两种牌各一张，抽一张时各自约占一半
        let mut a_count = 0;
        let mut rng = GameRng::new(11);
        for _ in 0..2000 {
            let mut pool =
                LetterPool::from_tiles([Tile::letter('A').unwrap(), Tile::letter('B').unwrap()]);
            if pool.draw(1, &mut rng)[0].glyph == Glyph::Letter('A') {
                a_count += 1;
            }
        }
        assert!((850..1150).contains(&a_count), "a_count = {}", a_count);
    }

    proptest! {
        #[test]
        fn draw_then_return_conserves_tiles(seed in any::<u64>(), n in 0usize..120) {
            let mut pool = LetterPool::standard();
            let total = pool.len();
            let mut rng = GameRng::new(seed);

            let drawn = pool.draw(n, &mut rng);
            prop_assert_eq!(drawn.len(), n.min(total));
            prop_assert_eq!(pool.len() + drawn.len(), total);

            pool.return_tiles(drawn);
            prop_assert_eq!(pool, LetterPool::standard());
        }
    }
}
