//! Tickless idle 与 light sleep
//!
//! 空闲任务在预计空闲时间足够长、当前模式为 LIGHT_SLEEP 且没有外设
//! 反对时进入 light sleep。外设通过 skip 回调表达 "本次不要睡"。

use heapless::Vec;

use super::error::PmError;
use crate::config;

/// 外设回调: 返回 `true` 表示本次应跳过 light sleep
///
/// 在空闲任务的临界区内调用，必须非常短。
pub type SkipLightSleepCallback = fn() -> bool;

/// RTOS tick 周期 (μs)
pub const TICK_PERIOD_US: i64 = 1_000_000 / config::RTOS_TICK_HZ as i64;

/// 一次 light sleep 尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepOutcome {
    /// 已睡眠；调用者需把 RTOS tick 计数前移 `step_ticks`
    Slept {
        slept_us: i64,
        step_ticks: u32,
    },
    /// 模式、切换状态、回调或另一核心要求跳过
    Skipped,
    /// 可睡眠时间太短
    TooShort,
}

/// 固定容量的 skip 回调表
#[derive(Debug, Default)]
pub struct SkipCallbacks {
    callbacks: Vec<SkipLightSleepCallback, { config::MAX_SKIP_CALLBACKS }>,
}

impl SkipCallbacks {
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// 注册回调，表满时返回 `NoMem`
    pub fn register(&mut self, cb: SkipLightSleepCallback) -> Result<(), PmError> {
        self.callbacks.push(cb).map_err(|_| PmError::NoMem)
    }

    /// 注销回调，未注册时返回 `InvalidState`
    pub fn unregister(&mut self, cb: SkipLightSleepCallback) -> Result<(), PmError> {
        let pos = self
            .callbacks
            .iter()
            .position(|&c| c as usize == cb as usize)
            .ok_or(PmError::InvalidState)?;
        self.callbacks.swap_remove(pos);
        Ok(())
    }

    /// 任一回调要求跳过
    pub fn any_skip(&self) -> bool {
        self.callbacks.iter().any(|cb| cb())
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// 计算应向唤醒定时器请求的睡眠时长 (μs)
///
/// 可睡眠时间取预计空闲时间与下一个定时器闹钟中较早者；
/// 不足 `IDLE_TICKS_BEFORE_SLEEP` 个 tick 时返回 `None`。
/// 返回值已减去提前唤醒量。
pub fn plan_sleep(now_us: i64, expected_idle_us: i64, next_alarm_us: Option<i64>) -> Option<u64> {
    let until_alarm = next_alarm_us.map_or(i64::MAX, |alarm| alarm.saturating_sub(now_us));
    let sleep_us = expected_idle_us.min(until_alarm);
    if sleep_us < config::IDLE_TICKS_BEFORE_SLEEP as i64 * TICK_PERIOD_US {
        return None;
    }
    Some((sleep_us - config::LIGHT_SLEEP_EARLY_WAKEUP_US) as u64)
}

/// 睡眠时长对应的完整 tick 数
#[inline]
pub fn slept_ticks(slept_us: i64) -> u32 {
    (slept_us.max(0) / TICK_PERIOD_US) as u32
}
