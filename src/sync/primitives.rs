//! 同步原语封装
//!
//! 电源管理状态会在任务、空闲任务和中断上下文中被访问，
//! 因此所有共享状态统一使用 `CriticalSectionRawMutex`:
//! 在 ESP32 双核环境下，临界区既屏蔽本核中断，也与另一核心互斥。

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use portable_atomic::{AtomicBool, Ordering};

// ===== 类型别名: 简化使用 =====

/// 可在中断中使用的阻塞互斥锁
///
/// 临界区必须很短，不能在其中等待其他核心。
///
/// # Example
/// ```ignore
/// static STATE: IsrMutex<u32> = IsrMutex::new(RefCell::new(0));
///
/// STATE.lock(|s| *s.borrow_mut() += 1);
/// ```
pub type IsrMutex<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

/// 创建新的中断安全互斥锁
#[inline]
pub const fn new_isr_mutex<T>(value: T) -> IsrMutex<T> {
    Mutex::new(RefCell::new(value))
}

// ===== 优化的原子操作封装 =====

/// 原子标志 - 最快的核间通知
///
/// 比 Signal 更轻量，适用于简单的布尔状态通知。
/// 每个字段同一时刻只有一个写者: 发起方置位，所属核心清除。
pub struct AtomicFlag {
    flag: AtomicBool,
}

impl AtomicFlag {
    /// 创建新的原子标志
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// 设置标志
    #[inline(always)]
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// 清除标志
    #[inline(always)]
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// 写入指定值
    #[inline(always)]
    pub fn store(&self, value: bool) {
        self.flag.store(value, Ordering::Release);
    }

    /// 检查并清除标志 (test-and-clear)
    #[inline(always)]
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    /// 检查标志 (不清除)
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new()
    }
}
