//! 可注入、可复现的随机源
//!
//! 棋盘地雷布局、先手选择、抽牌、冻结槽位都从这里取随机数，
//! 测试里用固定种子即可得到完全一致的对局。

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// 基于 ChaCha8 的确定性随机数生成器
#[derive(Clone, Debug)]
pub struct GameRng {
    inner: ChaCha8Rng,
    seed: u64,
    fork_counter: u64,
}

impl GameRng {
    /// 使用指定种子创建
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
            seed,
            fork_counter: 0,
        }
    }

    /// 使用系统熵创建（生产环境）
    pub fn from_entropy() -> Self {
        Self::new(rand::rng().random())
    }

    /// 从配置中的可选种子创建
    pub fn from_seed_option(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::new(seed),
            None => Self::from_entropy(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// 派生一个独立的随机流，每个对局各持一份
    pub fn fork(&mut self) -> Self {
        self.fork_counter += 1;
        let fork_seed = self
            .seed
            .wrapping_add(self.fork_counter.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        Self::new(fork_seed)
    }
}

impl RngCore for GameRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }
}
