use crate::pool::LetterPool;
use crate::tile::Tile;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 玩家手牌架
///
/// 槽位下标在出牌、补牌之间保持不变，冻结效果按槽位下标锁定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rack {
    slots: Vec<Option<Tile>>,
}

impl Rack {
    pub fn new(capacity: usize) -> Self {
        Rack {
            slots: vec![None; capacity],
        }
    }

    /// 用指定牌创建（测试、恢复存档时使用）
    pub fn with_tiles(capacity: usize, tiles: impl IntoIterator<Item = Tile>) -> Self {
        let mut rack = Self::new(capacity);
        for tile in tiles {
            if let Some(slot) = rack.slots.iter_mut().find(|s| s.is_none()) {
                *slot = Some(tile);
            }
        }
        rack
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 当前持有的牌数
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn slots(&self) -> &[Option<Tile>] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<Tile> {
        self.slots.get(index).copied().flatten()
    }

    /// 已占用的槽位下标
    pub fn occupied_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|_| i))
            .collect()
    }

    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        self.slots.iter().filter_map(|s| *s)
    }

    /// 手牌分值之和（终局结算用）
    pub fn value(&self) -> i32 {
        self.tiles().map(|t| t.value).sum()
    }

    /// 取出指定槽位的牌
    pub fn take(&mut self, index: usize) -> Option<Tile> {
        self.slots.get_mut(index).and_then(|s| s.take())
    }

    /// 取出全部牌
    pub fn take_all(&mut self) -> Vec<Tile> {
        self.slots.iter_mut().filter_map(|s| s.take()).collect()
    }

    /// 从字母袋补满空槽，返回补到的张数
    pub fn refill<R: Rng + ?Sized>(&mut self, pool: &mut LetterPool, rng: &mut R) -> usize {
        let missing = self.capacity() - self.len();
        let drawn = pool.draw(missing, rng);
        let count = drawn.len();
        self.refill_from(drawn);
        count
    }

    /// 按槽位顺序把牌放入空槽，调用方保证数量不超过空槽数
    pub fn refill_from(&mut self, tiles: impl IntoIterator<Item = Tile>) {
        let mut tiles = tiles.into_iter();
        for slot in self.slots.iter_mut().filter(|s| s.is_none()) {
            match tiles.next() {
                Some(tile) => *slot = Some(tile),
                None => break,
            }
        }
    }

    /// 为一组牌找到可用槽位
    ///
    /// `locked` 中的槽位不可使用；找不到时返回 None。
    pub fn match_tiles(&self, wanted: &[Tile], locked: &[usize]) -> Option<Vec<usize>> {
        let mut used: Vec<usize> = Vec::with_capacity(wanted.len());
        for tile in wanted {
            let index = self.slots.iter().enumerate().position(|(i, s)| {
                *s == Some(*tile) && !used.contains(&i) && !locked.contains(&i)
            })?;
            used.push(index);
        }
        Some(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::GameRng;

    fn t(c: char) -> Tile {
        Tile::letter(c).unwrap()
    }

    #[test]
    fn refill_fills_holes_in_place() {
        let mut rack = Rack::with_tiles(7, [t('A'), t('B'), t('C')]);
        rack.take(1);
        let mut pool = LetterPool::standard();
        let mut rng = GameRng::new(5);

        let drawn = rack.refill(&mut pool, &mut rng);
        assert_eq!(drawn, 5);
        assert_eq!(rack.len(), 7);
        assert_eq!(rack.get(0), Some(t('A')));
        assert_eq!(rack.get(2), Some(t('C')));
    }

    #[test]
    fn refill_from_short_pool_leaves_slots_empty() {
        let mut rack = Rack::new(7);
        let mut pool = LetterPool::from_tiles([t('Q')]);
        let mut rng = GameRng::new(5);
        assert_eq!(rack.refill(&mut pool, &mut rng), 1);
        assert_eq!(rack.len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn match_tiles_skips_locked_duplicates() {
        let rack = Rack::with_tiles(7, [t('A'), t('B'), t('A')]);
        assert_eq!(rack.match_tiles(&[t('A')], &[0]), Some(vec![2]));
        assert_eq!(rack.match_tiles(&[t('A'), t('A')], &[0]), None);
        assert_eq!(rack.match_tiles(&[t('B'), t('A')], &[]), Some(vec![1, 0]));
    }
}
