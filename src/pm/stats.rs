//! 模式驻留时间统计与输出
//!
//! 统计在模式切换完成时累加；输出格式与 IDF 的 `esp_pm_dump_locks`
//! 保持一致，方便对比。未启用 `profiling` 时省略时间相关的列。

use core::fmt::{self, Write};

use super::freq::FreqTable;
use super::lock::LockEntry;
use super::mode::PowerMode;

/// 各模式累计驻留时间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeStats {
    /// 每个模式的累计时间 (μs)，不含当前模式正在进行的这一段
    pub time_in_mode: [i64; PowerMode::COUNT],
    /// 最近一次模式切换的时间 (μs)
    pub last_mode_change: i64,
}

impl ModeStats {
    pub const fn new() -> Self {
        Self {
            time_in_mode: [0; PowerMode::COUNT],
            last_mode_change: 0,
        }
    }

    /// 离开 `leaving` 模式时调用
    pub fn record_change(&mut self, leaving: PowerMode, now: i64) {
        self.time_in_mode[leaving.index()] += now - self.last_mode_change;
        self.last_mode_change = now;
    }

    /// 含当前模式进行中时间的快照
    pub fn snapshot(&self, current: PowerMode, now: i64) -> [i64; PowerMode::COUNT] {
        let mut times = self.time_in_mode;
        times[current.index()] += now - self.last_mode_change;
        times
    }
}

/// 一次输出所需的全部数据，在临界区外格式化
pub struct StatsSnapshot<'a> {
    pub now: i64,
    pub locks: &'a [LockEntry],
    pub table: FreqTable,
    pub light_sleep_enabled: bool,
    pub time_in_mode: [i64; PowerMode::COUNT],
}

/// 百分比，`total` 为 0 时输出 0
fn percent(part: i64, total: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        part * 100 / total
    }
}

/// 百分比向上取整
fn percent_ceil(part: i64, total: i64) -> i64 {
    let d100 = total / 100;
    if d100 <= 0 {
        0
    } else {
        (part + d100 - 1) / d100
    }
}

/// 输出锁统计与模式统计
pub fn write_stats<W: Write>(out: &mut W, snap: &StatsSnapshot<'_>) -> fmt::Result {
    writeln!(out, "Lock stats:")?;
    if cfg!(feature = "profiling") {
        writeln!(
            out,
            "{:<15} {:<14} {:<8} {:<13} {:<10} {:<8}",
            "Name", "Type", "Active", "Total_count", "Time(us)", "Time(%)"
        )?;
    } else {
        writeln!(out, "{:<15} {:<14} {:<8}", "Name", "Type", "Active")?;
    }
    for lock in snap.locks {
        write!(out, "{:<15} {:<14} {:<8}", lock.name, lock.lock_type.name(), lock.count)?;
        if cfg!(feature = "profiling") {
            let held = lock.time_held_at(snap.now);
            write!(
                out,
                " {:<13} {:<10} {}%",
                lock.stats.times_taken,
                held,
                percent_ceil(held, snap.now)
            )?;
        }
        writeln!(out)?;
    }

    writeln!(out)?;
    writeln!(out, "Mode stats:")?;
    if cfg!(feature = "profiling") {
        writeln!(out, "{:<8}  {:<10}  {:<10}  {:<10}", "Mode", "CPU_freq", "Time(us)", "Time(%)")?;
    } else {
        writeln!(out, "{:<8}  {:<10}", "Mode", "CPU_freq")?;
    }
    for mode in PowerMode::ALL {
        if mode == PowerMode::LightSleep && !snap.light_sleep_enabled {
            continue;
        }
        write!(out, "{:<8}  {:>3}M{:<7}", mode.name(), snap.table.get(mode).cpu_mhz, "")?;
        if cfg!(feature = "profiling") {
            let t = snap.time_in_mode[mode.index()];
            write!(out, "  {:<10}  {}%", t, percent(t, snap.now))?;
        }
        writeln!(out)?;
    }
    Ok(())
}
