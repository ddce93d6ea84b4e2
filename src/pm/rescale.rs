//! 频率切换时的定时器重新缩放
//!
//! CPU 频率改变后，CCOUNT 的计数速率随之改变。为了让已设置的
//! CCOMPARE 闹钟仍在同一时刻触发，需要按新旧频率比例缩放剩余周期数:
//!
//! ```text
//! new_compare = now + ceil((old_compare - now) * new_ticks_per_us / old_ticks_per_us)
//! ```
//!
//! 本模块只包含纯计算与 [`ScaledTimer`]，调度 (哪个核心、何时执行)
//! 由 [`PmContext`](super::PmContext) 负责。

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use super::hal::MicrosTimer;
use crate::config;

/// 一次频率切换的新旧速率
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RescaleFactors {
    /// 切换前每微秒周期数
    pub old_ticks_per_us: u32,
    /// 切换后每微秒周期数
    pub new_ticks_per_us: u32,
}

impl RescaleFactors {
    pub const fn new(old_ticks_per_us: u32, new_ticks_per_us: u32) -> Self {
        Self {
            old_ticks_per_us,
            new_ticks_per_us,
        }
    }

    /// 频率是否降低
    #[inline]
    pub const fn is_decrease(&self) -> bool {
        self.new_ticks_per_us < self.old_ticks_per_us
    }

    /// 按比例缩放周期差，向上取整
    ///
    /// 使用 64 位中间值，结果超出 `u32` 时饱和。
    pub fn scale_delta(&self, delta: u32) -> u32 {
        let old = self.old_ticks_per_us.max(1) as u64;
        let scaled = (delta as u64 * self.new_ticks_per_us as u64).div_ceil(old);
        u32::try_from(scaled).unwrap_or(u32::MAX)
    }
}

/// 一个 RTOS tick 对应的 CPU 周期数
#[inline]
pub const fn tick_divisor(cpu_mhz: u32) -> u32 {
    cpu_mhz * (1_000_000 / config::RTOS_TICK_HZ)
}

/// 计算缩放后的 CCOMPARE
///
/// 返回 `None` 表示不应修改寄存器:
/// - CCOMPARE 距离 CCOUNT 不足 `COMPARE_MIN_CYCLES_IN_FUTURE` (闹钟马上触发)
/// - 缩放后的差值不小于一个 tick 周期 (计算已过期或溢出)
pub fn compare_after_rescale(
    ccount: u32,
    ccompare: u32,
    factors: RescaleFactors,
    tick_divisor: u32,
) -> Option<u32> {
    let ahead = ccompare
        .wrapping_sub(config::COMPARE_MIN_CYCLES_IN_FUTURE)
        .wrapping_sub(ccount);
    if ahead >= u32::MAX / 2 {
        return None;
    }
    let scaled = factors.scale_delta(ccompare.wrapping_sub(ccount));
    if scaled >= tick_divisor {
        return None;
    }
    Some(ccount.wrapping_add(scaled))
}

/// 原始计数源 (64 位，不回绕)
pub trait TickSource {
    fn raw_ticks(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
struct TimerBase {
    base_us: i64,
    base_ticks: u64,
    ticks_per_us: u32,
}

/// 速率可变的微秒时钟
///
/// 供微秒时钟由 APB 驱动的芯片后端使用: 把原始计数源包装成
/// [`MicrosTimer`]，`PmContext` 在 APB 变化时调用 `update_ticks_per_us`。
/// 每次速率改变时以当前时刻为新的基准，因此 `now_us()` 在切换前后
/// 保持单调且连续。ESP32-S3 的 SYSTIMER 由晶振驱动，不需要它。
pub struct ScaledTimer<S> {
    source: S,
    base: Mutex<CriticalSectionRawMutex, RefCell<TimerBase>>,
}

impl<S: TickSource> ScaledTimer<S> {
    pub const fn new(source: S, ticks_per_us: u32) -> Self {
        Self {
            source,
            base: Mutex::const_new(
                CriticalSectionRawMutex::new(),
                RefCell::new(TimerBase {
                    base_us: 0,
                    base_ticks: 0,
                    ticks_per_us,
                }),
            ),
        }
    }

    /// 当前 tick 速率
    pub fn ticks_per_us(&self) -> u32 {
        self.base.lock(|b| b.borrow().ticks_per_us)
    }

    /// 底层计数源
    pub fn source(&self) -> &S {
        &self.source
    }

    fn elapsed_us(base: &TimerBase, raw: u64) -> i64 {
        let ticks = raw.saturating_sub(base.base_ticks);
        base.base_us + (ticks / base.ticks_per_us.max(1) as u64) as i64
    }
}

impl<S: TickSource> MicrosTimer for ScaledTimer<S> {
    fn now_us(&self) -> i64 {
        self.base.lock(|b| {
            let base = b.borrow();
            Self::elapsed_us(&base, self.source.raw_ticks())
        })
    }

    fn update_ticks_per_us(&self, ticks_per_us: u32) {
        self.base.lock(|b| {
            let mut base = b.borrow_mut();
            let raw = self.source.raw_ticks();
            base.base_us = Self::elapsed_us(&base, raw);
            base.base_ticks = raw;
            base.ticks_per_us = ticks_per_us;
        })
    }
}
