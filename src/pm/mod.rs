//! 电源管理
//!
//! 应用通过锁表达约束 ("CPU 保持最高频率"、"禁止 light sleep" 等)，
//! 本模块据此选出满足所有约束的最低功耗模式，并在两个核心上安全地
//! 切换 CPU 频率:
//!
//! ```text
//! acquire/release → LockRegistry (0↔1) → resolve() → PmContext::switch
//!                                                      ├─ 降频: 缩放 CCOMPARE → 写频率
//!                                                      └─ 升频: 写频率 → 缩放 CCOMPARE
//!                                                           └─ 核间中断 → 另一核心更新 CCOMPARE
//! ```
//!
//! RTOS 空闲任务与中断入口通过钩子维护每核心的忙锁，
//! 使 "CPU 正在工作" 同样表现为一把 `CpuFreqMax` 锁。

pub mod context;
pub mod error;
pub mod freq;
pub mod hal;
pub mod lock;
pub mod mode;
pub mod registry;
pub mod rescale;
pub mod sleep;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{PmContext, SwitchOutcome};
pub use error::{PmError, PmFault};
pub use freq::{ClockSource, FreqConfig, FreqTable, PmConfig};
pub use hal::{ClockControl, CoreId, CrossCore, CycleTimer, LightSleep, LocalInterrupts, MicrosTimer, Platform};
pub use lock::{LockEntry, LockHandle};
pub use mode::{resolve, LockType, ModeMask, PowerMode};
pub use rescale::{RescaleFactors, ScaledTimer, TickSource};
pub use sleep::{SkipLightSleepCallback, SleepOutcome};
