//! 锁注册表
//!
//! 每个功耗模式一个引用计数，外加由计数派生的位图。
//! 注册表本身不加锁: 它只存在于 [`PmContext`](super::PmContext)
//! 的中断安全互斥域内，每次变更后位图都与计数一致。

use super::error::PmError;
use super::mode::{ModeMask, PowerMode};

/// 各模式的锁计数
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    counts: [u32; PowerMode::COUNT],
    held: ModeMask,
}

impl LockRegistry {
    /// 全零状态
    pub const fn new() -> Self {
        Self {
            counts: [0; PowerMode::COUNT],
            held: ModeMask::EMPTY,
        }
    }

    /// 增加计数
    ///
    /// 返回 `true` 表示 0→1，需要重新计算目标模式。
    pub fn lock(&mut self, mode: PowerMode) -> bool {
        let count = &mut self.counts[mode.index()];
        *count += 1;
        if *count == 1 {
            self.held.insert(mode);
            true
        } else {
            false
        }
    }

    /// 减少计数
    ///
    /// 返回 `Ok(true)` 表示 1→0，需要重新计算目标模式。
    /// 计数为 0 时先检查再递减: 返回 `InvalidState` 且不修改任何状态。
    pub fn unlock(&mut self, mode: PowerMode) -> Result<bool, PmError> {
        let count = &mut self.counts[mode.index()];
        if *count == 0 {
            debug_assert!(false, "pm lock count underflow for {:?}", mode);
            return Err(PmError::InvalidState);
        }
        *count -= 1;
        if *count == 0 {
            self.held.remove(mode);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// 当前持有位图
    #[inline]
    pub fn held_mask(&self) -> ModeMask {
        self.held
    }

    /// 指定模式的计数
    #[inline]
    pub fn count(&self, mode: PowerMode) -> u32 {
        self.counts[mode.index()]
    }

    /// 位图与计数是否一致
    pub fn is_consistent(&self) -> bool {
        PowerMode::ALL
            .iter()
            .all(|&m| self.held.contains(m) == (self.counts[m.index()] > 0))
    }
}
