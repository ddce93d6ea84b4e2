//! RustPM - ESP32 双核电源管理库
//!
//! 本库提供以下核心功能:
//! - 引用计数的电源管理锁 (PM lock)
//! - 最低允许功耗模式的仲裁
//! - 双核安全的 CPU 频率切换 (含 CCOMPARE 重新缩放)
//! - RTOS 空闲任务/中断入口钩子 (驱动 light sleep)
//! - 条件编译日志系统
//!
//! 硬件相关操作全部通过 [`pm::hal`] 中的 trait 注入，
//! 核心逻辑与具体芯片无关，可在主机上进行单元测试。

#![cfg_attr(not(test), no_std)]

pub mod pm;
pub mod sync;
pub mod util;

#[cfg(feature = "esp32s3")]
pub mod hw;

// ===== 重导出常用类型 =====
pub use pm::{
    CoreId,
    FreqConfig,
    LockHandle,
    LockType,
    PmConfig,
    PmContext,
    PmError,
    PmFault,
    PowerMode,
};
pub use sync::primitives::{AtomicFlag, IsrMutex};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 系统配置常量
pub mod config {
    /// 支持的最大核心数
    pub const MAX_CORES: usize = 2;

    /// 锁表容量 (含每个核心的 RTOS 忙锁)
    pub const MAX_LOCKS: usize = 32;

    /// skip-light-sleep 回调表容量
    pub const MAX_SKIP_CALLBACKS: usize = 2;

    /// 默认 CPU 频率 (MHz)
    pub const DEFAULT_CPU_MHZ: u32 = 240;

    /// 晶振频率 (MHz)
    pub const XTAL_MHZ: u32 = 40;

    /// PLL 模式下的 APB 频率 (MHz)
    pub const APB_PLL_MHZ: u32 = 80;

    /// 晶振分频后允许的最低 CPU 频率 (MHz)
    pub const XTAL_DIV_MIN_MHZ: u32 = 10;

    /// RTOS Tick 频率 (Hz)
    pub const RTOS_TICK_HZ: u32 = 100;

    /// CCOMPARE 至少领先 CCOUNT 的周期数，否则不再调整
    pub const COMPARE_MIN_CYCLES_IN_FUTURE: u32 = 1000;

    /// 核间 CCOMPARE 更新握手的最大自旋次数
    pub const HANDSHAKE_SPIN_LIMIT: u32 = 1_000_000;

    /// 等待另一次模式切换完成的最大自旋次数
    pub const SWITCH_SPIN_LIMIT: u32 = 1_000_000;

    /// 预计空闲至少这么多个 tick 才尝试进入 light sleep
    pub const IDLE_TICKS_BEFORE_SLEEP: u32 = 3;

    /// 提前唤醒时间 (μs)，补偿唤醒开销
    pub const LIGHT_SLEEP_EARLY_WAKEUP_US: i64 = 100;
}
