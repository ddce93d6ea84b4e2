//! 电源管理锁表
//!
//! 固定容量的锁槽位表。句柄携带槽位序号与代数 (generation)，
//! 锁被删除后代数递增，旧句柄随即失效。
//!
//! 同一句柄可以嵌套获取，只有 0↔1 的转换会通知注册表。

use heapless::Vec;

use super::error::PmError;
use super::mode::{LockType, PowerMode};
use crate::config;

/// 锁句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LockHandle {
    index: u8,
    generation: u16,
}

/// 单把锁的统计
///
/// 始终记录，只在开启 `profiling` 时出现在统计输出中。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// 最近一次 0→1 的时间 (μs)
    pub last_taken: i64,
    /// 累计持有时间 (μs)，不含当前这一次
    pub time_held: i64,
    /// 0→1 的次数
    pub times_taken: u32,
}

/// 锁表中的一项
#[derive(Debug, Clone, Copy)]
pub struct LockEntry {
    pub lock_type: LockType,
    pub name: &'static str,
    pub count: u32,
    pub stats: LockStats,
}

impl LockEntry {
    /// 当前持有时间 (含进行中的这一次)
    pub fn time_held_at(&self, now: i64) -> i64 {
        if self.count > 0 {
            self.stats.time_held + (now - self.stats.last_taken)
        } else {
            self.stats.time_held
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u16,
    entry: Option<LockEntry>,
}

/// 固定容量锁表
#[derive(Debug)]
pub struct LockTable {
    slots: Vec<Slot, { config::MAX_LOCKS }>,
}

impl LockTable {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// 创建一把锁，表满时返回 `NoMem`
    pub fn create(&mut self, lock_type: LockType, name: &'static str) -> Result<LockHandle, PmError> {
        let entry = LockEntry {
            lock_type,
            name,
            count: 0,
            stats: LockStats::default(),
        };

        if let Some((index, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.entry.is_none())
        {
            slot.entry = Some(entry);
            return Ok(LockHandle {
                index: index as u8,
                generation: slot.generation,
            });
        }

        let index = self.slots.len();
        self.slots
            .push(Slot {
                generation: 0,
                entry: Some(entry),
            })
            .map_err(|_| PmError::NoMem)?;
        Ok(LockHandle {
            index: index as u8,
            generation: 0,
        })
    }

    /// 删除锁，仍被持有时返回 `InvalidState`
    pub fn delete(&mut self, handle: LockHandle) -> Result<(), PmError> {
        let slot = self.slot_mut(handle)?;
        match slot.entry {
            Some(entry) if entry.count > 0 => Err(PmError::InvalidState),
            _ => {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                Ok(())
            }
        }
    }

    /// 获取锁
    ///
    /// 返回 `Some(mode)` 表示该句柄 0→1，需要对注册表加锁。
    pub fn acquire(&mut self, handle: LockHandle, now: i64) -> Result<Option<PowerMode>, PmError> {
        let entry = self.entry_mut(handle)?;
        entry.count += 1;
        if entry.count == 1 {
            entry.stats.last_taken = now;
            entry.stats.times_taken += 1;
            Ok(Some(entry.lock_type.mode()))
        } else {
            Ok(None)
        }
    }

    /// 释放锁
    ///
    /// 返回 `Some(mode)` 表示该句柄 1→0，需要对注册表解锁。
    pub fn release(&mut self, handle: LockHandle, now: i64) -> Result<Option<PowerMode>, PmError> {
        let entry = self.entry_mut(handle)?;
        if entry.count == 0 {
            return Err(PmError::InvalidState);
        }
        entry.count -= 1;
        if entry.count == 0 {
            entry.stats.time_held += now - entry.stats.last_taken;
            Ok(Some(entry.lock_type.mode()))
        } else {
            Ok(None)
        }
    }

    /// 查询锁
    pub fn get(&self, handle: LockHandle) -> Result<&LockEntry, PmError> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_ref())
            .ok_or(PmError::InvalidArgument)
    }

    /// 遍历所有存在的锁
    pub fn iter(&self) -> impl Iterator<Item = &LockEntry> {
        self.slots.iter().filter_map(|s| s.entry.as_ref())
    }

    /// 已创建的锁数量
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_mut(&mut self, handle: LockHandle) -> Result<&mut Slot, PmError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.entry.is_some())
            .ok_or(PmError::InvalidArgument)
    }

    fn entry_mut(&mut self, handle: LockHandle) -> Result<&mut LockEntry, PmError> {
        self.slot_mut(handle)?
            .entry
            .as_mut()
            .ok_or(PmError::InvalidArgument)
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
