//! 硬件协作接口
//!
//! 电源管理核心只通过这些 trait 访问硬件:
//! - [`CycleTimer`]: 当前核心的 CCOUNT / CCOMPARE 寄存器
//! - [`CrossCore`]: 核心标识与核间中断
//! - [`ClockControl`]: CPU 频率编程
//! - [`MicrosTimer`]: 单调微秒时钟 (esp_timer)
//! - [`LightSleep`]: 进入 light sleep
//! - [`LocalInterrupts`]: 屏蔽当前核心的中断
//!
//! 芯片后端实现 [`Platform`]，测试使用假实现。

use core::fmt;

use super::freq::FreqConfig;

/// CPU 核心标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoreId {
    /// Core0 (PRO_CPU) - 主核心
    Core0 = 0,
    /// Core1 (APP_CPU) - 应用核心
    Core1 = 1,
}

impl CoreId {
    /// 从序号构造
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(CoreId::Core0),
            1 => Some(CoreId::Core1),
            _ => None,
        }
    }

    /// 作为数组下标
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 获取另一个核心
    pub const fn other(self) -> Self {
        match self {
            CoreId::Core0 => CoreId::Core1,
            CoreId::Core1 => CoreId::Core0,
        }
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.index())
    }
}

/// 当前核心的周期计数器与比较寄存器
///
/// 所有方法都作用于调用者所在的核心。
pub trait CycleTimer {
    /// CCOUNT
    fn cycle_count(&self) -> u32;

    /// RTOS tick 使用的 CCOMPARE
    fn compare(&self) -> u32;

    /// 写入 CCOMPARE
    fn set_compare(&self, value: u32);
}

/// 核心标识与核间信号
pub trait CrossCore {
    /// 调用者所在的核心
    fn current_core(&self) -> CoreId;

    /// 参与调度的核心数 (1 或 2)
    fn core_count(&self) -> usize {
        2
    }

    /// 向指定核心发送频率切换中断
    ///
    /// 目标核心的中断处理程序必须调用
    /// [`PmContext::on_interrupt_entry`](super::PmContext::on_interrupt_entry)。
    fn send_freq_switch(&self, core: CoreId);
}

/// CPU 时钟编程
pub trait ClockControl {
    /// 应用新的频率配置 (快速路径，不重新读回)
    fn set_cpu_frequency(&self, config: &FreqConfig);

    /// 读取硬件当前的频率配置
    fn current_frequency(&self) -> FreqConfig;

    /// 晶振频率 (MHz)
    fn xtal_mhz(&self) -> u32 {
        crate::config::XTAL_MHZ
    }
}

/// 单调微秒时钟
pub trait MicrosTimer {
    /// 启动以来的微秒数，跨频率切换保持单调
    fn now_us(&self) -> i64;

    /// 更新计时器的 tick 速率 (APB 每微秒 tick 数)
    fn update_ticks_per_us(&self, ticks_per_us: u32);

    /// 下一个定时器闹钟的绝对时间 (μs)，没有则为 `None`
    fn next_alarm_us(&self) -> Option<i64> {
        None
    }
}

/// light sleep 执行者
pub trait LightSleep {
    /// 进入 light sleep，最多 `duration_us` 微秒后被定时器唤醒
    fn light_sleep(&self, duration_us: u64);
}

/// 只屏蔽当前核心的中断
///
/// 频率切换与空闲钩子在这里执行。不能用全局临界区代替:
/// 发起切换的核心等待另一核心响应核间中断时，另一核心必须能进入中断。
pub trait LocalInterrupts {
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// 完整的平台接口
pub trait Platform:
    CycleTimer + CrossCore + ClockControl + MicrosTimer + LightSleep + LocalInterrupts + Sync
{
}

impl<T> Platform for T where
    T: CycleTimer + CrossCore + ClockControl + MicrosTimer + LightSleep + LocalInterrupts + Sync
{
}
