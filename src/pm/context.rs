//! 电源管理上下文
//!
//! [`PmContext`] 持有全部电源管理状态:
//! - 锁表与各模式锁计数
//! - 当前模式与进行中的切换
//! - 模式 → 频率表
//! - 每核心标志 (CCOMPARE 更新请求、空闲状态、light sleep 跳过)
//!
//! 锁表、注册表、切换状态和频率表位于同一个中断安全互斥域中
//! (`embassy_sync::blocking_mutex::Mutex`)。每核心标志是原子量，
//! 同一时刻只有一个写者: 发起切换的核心置位另一核心的
//! `needs_compare_update`，由该核心自己清除。
//!
//! 模式切换本身在互斥域之外执行，只屏蔽本核中断。
//! 发起方等待另一核心更新 CCOMPARE 时，另一核心必须能响应核间中断，
//! 因此等待期间绝不持有全局临界区。
//!
//! # 生命周期
//!
//! `new` → `init` (创建并获取每核心的 RTOS 忙锁) → 使用 → drop。
//! 没有持久化状态，重新构造即复位。

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};

use super::error::{PmError, PmFault};
use super::freq::{ClockSource, FreqConfig, FreqTable, PmConfig};
use super::hal::{CoreId, Platform};
use super::lock::{LockEntry, LockHandle, LockTable};
use super::mode::{resolve, LockType, ModeMask, PowerMode};
use super::registry::LockRegistry;
use super::rescale::{compare_after_rescale, tick_divisor, RescaleFactors};
use super::sleep::{plan_sleep, slept_ticks, SkipCallbacks, SkipLightSleepCallback, SleepOutcome};
#[cfg(feature = "profiling")]
use super::stats::ModeStats;
use super::stats::{write_stats, StatsSnapshot};
use crate::config;
use crate::sync::AtomicFlag;
use crate::util::log::{log_debug, log_error, log_info, log_trace, log_warn};

/// RTOS 忙锁名称 (每核心一把)
const BUSY_LOCK_NAMES: [&str; config::MAX_CORES] = ["rtos0", "rtos1"];

/// light sleep 醒来后，把 tick 闹钟设在这么多周期之后
const TICK_KICK_CYCLES: u32 = 100;

/// 启动时假定的频率，`init` 时以硬件读数替换
const BOOT_FREQ: FreqConfig = FreqConfig {
    source: ClockSource::Pll,
    cpu_mhz: config::DEFAULT_CPU_MHZ,
    apb_mhz: config::APB_PLL_MHZ,
};

/// 一次切换请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchOutcome {
    /// 已完成切换
    Switched { from: PowerMode, to: PowerMode },
    /// 已处于目标模式
    NoChange,
    /// 进行中的切换目标不低于本次请求，本次被合并
    Dropped,
}

/// `begin_switch` 的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwitchDecision {
    Proceed {
        from: PowerMode,
        to: PowerMode,
        config_changed: bool,
    },
    NoChange,
    Dropped,
    /// 另一次更低功耗的切换正在进行，需要等待
    Busy,
}

#[derive(Debug)]
struct SwitchState {
    current: PowerMode,
    is_switching: bool,
    /// 仅在 `is_switching` 时有意义
    target: PowerMode,
    /// `configure` 之后第一次切换从硬件读取旧频率
    config_changed: bool,
}

struct PmState {
    locks: LockTable,
    registry: LockRegistry,
    switch: SwitchState,
    table: FreqTable,
    config: PmConfig,
    light_sleep_enabled: bool,
    skip_callbacks: SkipCallbacks,
    busy_locks: [Option<LockHandle>; config::MAX_CORES],
    initialized: bool,
    #[cfg(feature = "profiling")]
    mode_stats: ModeStats,
}

impl PmState {
    const fn new() -> Self {
        Self {
            locks: LockTable::new(),
            registry: LockRegistry::new(),
            switch: SwitchState {
                current: PowerMode::CpuMax,
                is_switching: false,
                target: PowerMode::CpuMax,
                config_changed: false,
            },
            table: FreqTable::uniform(BOOT_FREQ),
            config: PmConfig {
                max_freq_mhz: config::DEFAULT_CPU_MHZ,
                min_freq_mhz: config::DEFAULT_CPU_MHZ,
                light_sleep_enable: false,
            },
            light_sleep_enabled: false,
            skip_callbacks: SkipCallbacks::new(),
            busy_locks: [None; config::MAX_CORES],
            initialized: false,
            #[cfg(feature = "profiling")]
            mode_stats: ModeStats::new(),
        }
    }

    fn resolved(&self) -> PowerMode {
        resolve(self.registry.held_mask(), self.light_sleep_enabled)
    }
}

/// 每核心标志
struct CoreState {
    /// 另一核心请求本核心按新频率更新 CCOMPARE
    needs_compare_update: AtomicFlag,
    /// 本核心已释放 RTOS 忙锁
    is_idle: AtomicFlag,
    /// 另一核心刚从 light sleep 醒来，本核心下次不要睡
    skip_light_sleep: AtomicFlag,
    /// 本核心上次没有尝试 light sleep
    skipped_light_sleep: AtomicFlag,
}

impl CoreState {
    const fn new() -> Self {
        Self {
            needs_compare_update: AtomicFlag::new(),
            is_idle: AtomicFlag::new(),
            skip_light_sleep: AtomicFlag::new(),
            skipped_light_sleep: AtomicFlag::new(),
        }
    }
}

/// 电源管理上下文
pub struct PmContext<P, M = CriticalSectionRawMutex> {
    platform: P,
    state: Mutex<M, RefCell<PmState>>,
    cores: [CoreState; config::MAX_CORES],
    /// 切换进行中的旧/新每微秒周期数，平时为 0
    ccount_div: AtomicU32,
    ccount_mul: AtomicU32,
    /// 一个 RTOS tick 的 CPU 周期数 (按当前频率)
    tick_divisor: AtomicU32,
    handshake_spin_limit: AtomicU32,
}

impl<P: Platform> PmContext<P, CriticalSectionRawMutex> {
    /// 使用全局临界区作为互斥域
    pub const fn new(platform: P) -> Self {
        Self::with_raw_mutex(platform, CriticalSectionRawMutex::new())
    }
}

impl<P: Platform, M: RawMutex> PmContext<P, M> {
    /// 使用指定的原始互斥锁
    ///
    /// `M` 必须可以在中断中使用。
    pub const fn with_raw_mutex(platform: P, raw: M) -> Self {
        Self {
            platform,
            state: Mutex::const_new(raw, RefCell::new(PmState::new())),
            cores: [CoreState::new(), CoreState::new()],
            ccount_div: AtomicU32::new(0),
            ccount_mul: AtomicU32::new(0),
            tick_divisor: AtomicU32::new(tick_divisor(config::DEFAULT_CPU_MHZ)),
            handshake_spin_limit: AtomicU32::new(config::HANDSHAKE_SPIN_LIMIT),
        }
    }

    /// 底层平台
    pub fn platform(&self) -> &P {
        &self.platform
    }

    #[inline]
    fn with_state<R>(&self, f: impl FnOnce(&mut PmState) -> R) -> R {
        self.state.lock(|s| f(&mut s.borrow_mut()))
    }

    fn core_count(&self) -> usize {
        self.platform.core_count().min(config::MAX_CORES)
    }

    // ===== 初始化与配置 =====

    /// 初始化
    ///
    /// 以硬件当前频率填充频率表，并为每个核心创建、获取一把
    /// `CpuFreqMax` 类型的 RTOS 忙锁。重复调用返回 `InvalidState`。
    pub fn init(&self) -> Result<(), PmError> {
        let now = self.platform.now_us();
        let freq = self.platform.current_frequency();
        let cores = self.core_count();

        let handles = self.with_state(|s| {
            if s.initialized {
                return Err(PmError::InvalidState);
            }
            let mut handles = [None; config::MAX_CORES];
            for (core, handle) in handles.iter_mut().enumerate().take(cores) {
                *handle = Some(s.locks.create(LockType::CpuFreqMax, BUSY_LOCK_NAMES[core])?);
            }
            s.busy_locks = handles;
            s.table = FreqTable::uniform(freq);
            s.config = PmConfig {
                max_freq_mhz: freq.cpu_mhz,
                min_freq_mhz: freq.cpu_mhz,
                light_sleep_enable: false,
            };
            s.light_sleep_enabled = false;
            s.switch.current = PowerMode::CpuMax;
            #[cfg(feature = "profiling")]
            {
                s.mode_stats = ModeStats::new();
                s.mode_stats.last_mode_change = now;
            }
            s.initialized = true;
            Ok(handles)
        })?;

        self.tick_divisor
            .store(tick_divisor(freq.cpu_mhz), Ordering::Release);

        for handle in handles.iter().flatten() {
            self.acquire(*handle)?;
        }

        log_info!(
            "PM initialized: {} core(s), {} MHz, t={}us",
            cores,
            freq.cpu_mhz,
            now
        );
        Ok(())
    }

    /// 设置频率范围与 light sleep 策略
    ///
    /// 校验失败时不修改任何状态。新配置在下一次模式切换时生效。
    pub fn configure(&self, pm: PmConfig) -> Result<(), PmError> {
        let table = match FreqTable::from_config(&pm, self.platform.xtal_mhz()) {
            Ok(table) => table,
            Err(e) => {
                log_warn!(
                    "PM config rejected (max={} min={} light_sleep={}): {}",
                    pm.max_freq_mhz,
                    pm.min_freq_mhz,
                    pm.light_sleep_enable,
                    e
                );
                return Err(e);
            }
        };

        self.with_state(|s| {
            s.table = table;
            s.config = pm;
            s.light_sleep_enabled = pm.light_sleep_enable;
            s.switch.config_changed = true;
        });

        log_info!(
            "Frequency switching config: CPU_MAX: {}, APB_MAX: {}, APB_MIN: {}, Light sleep: {}",
            table.get(PowerMode::CpuMax).cpu_mhz,
            table.get(PowerMode::ApbMax).cpu_mhz,
            table.get(PowerMode::ApbMin).cpu_mhz,
            if pm.light_sleep_enable { "ENABLED" } else { "DISABLED" }
        );
        Ok(())
    }

    /// 当前生效的配置
    pub fn configuration(&self) -> PmConfig {
        self.with_state(|s| s.config)
    }

    /// 指定模式下的 CPU 频率 (MHz)
    pub fn cpu_freq_mhz(&self, mode: PowerMode) -> u32 {
        self.with_state(|s| s.table.get(mode).cpu_mhz)
    }

    /// 设置核间握手的最大自旋次数
    pub fn set_handshake_spin_limit(&self, spins: u32) {
        self.handshake_spin_limit
            .store(spins.max(1), Ordering::Relaxed);
    }

    // ===== 查询 =====

    /// 当前模式
    pub fn current_mode(&self) -> PowerMode {
        self.with_state(|s| s.switch.current)
    }

    /// 是否有切换正在进行
    pub fn is_switching(&self) -> bool {
        self.with_state(|s| s.switch.is_switching)
    }

    /// 当前持有的模式位图
    pub fn held_mask(&self) -> ModeMask {
        self.with_state(|s| s.registry.held_mask())
    }

    /// 指定模式的锁计数
    pub fn lock_count(&self, mode: PowerMode) -> u32 {
        self.with_state(|s| s.registry.count(mode))
    }

    /// 按当前持有的锁计算出的最低允许模式
    pub fn resolved_mode(&self) -> PowerMode {
        self.with_state(|s| s.resolved())
    }

    /// 核心的 RTOS 忙锁，未初始化时为 `None`
    pub fn busy_lock(&self, core: CoreId) -> Option<LockHandle> {
        self.with_state(|s| s.busy_locks[core.index()])
    }

    /// 锁的快照
    pub fn lock_entry(&self, handle: LockHandle) -> Result<LockEntry, PmError> {
        self.with_state(|s| s.locks.get(handle).copied())
    }

    /// 核心是否已释放忙锁
    pub fn is_idle(&self, core: CoreId) -> bool {
        self.cores[core.index()].is_idle.is_set()
    }

    // ===== 锁 =====

    /// 创建锁，表满时返回 `NoMem`
    pub fn create_lock(&self, lock_type: LockType, name: &'static str) -> Result<LockHandle, PmError> {
        let handle = self.with_state(|s| s.locks.create(lock_type, name))?;
        log_debug!("lock '{}' created ({})", name, lock_type);
        Ok(handle)
    }

    /// 删除锁，仍被持有时返回 `InvalidState`
    pub fn delete_lock(&self, handle: LockHandle) -> Result<(), PmError> {
        self.with_state(|s| s.locks.delete(handle))
    }

    /// 获取锁
    ///
    /// 可在中断中调用。该句柄 0→1 且该模式 0→1 时重新计算目标模式，
    /// 切换在互斥域之外执行。
    pub fn acquire(&self, handle: LockHandle) -> Result<(), PmError> {
        let now = self.platform.now_us();
        let recompute = self.with_state(|s| {
            Ok::<_, PmError>(match s.locks.acquire(handle, now)? {
                Some(mode) => s.registry.lock(mode),
                None => false,
            })
        })?;
        if recompute {
            self.switch_to_resolved();
        }
        Ok(())
    }

    /// 释放锁
    ///
    /// 未持有时返回 `InvalidState`，不修改任何计数。
    pub fn release(&self, handle: LockHandle) -> Result<(), PmError> {
        let now = self.platform.now_us();
        let recompute = self.with_state(|s| match s.locks.release(handle, now)? {
            Some(mode) => s.registry.unlock(mode),
            None => Ok(false),
        });
        match recompute {
            Ok(true) => self.switch_to_resolved(),
            Ok(false) => {}
            Err(e) => {
                log_warn!("release failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    // ===== 模式切换 =====

    /// 切换到指定模式
    ///
    /// 请求低于当前持有的锁所允许的最低模式时，按锁的要求切换。
    /// 已处于该模式时不做任何事。核间握手超时是致命错误。
    pub fn request_switch(&self, mode: PowerMode) -> SwitchOutcome {
        match self.switch_mode(Some(mode)) {
            Ok(outcome) => outcome,
            Err(fault) => self.fatal(fault),
        }
    }

    /// 切换到指定模式，故障以 `Err` 返回
    pub fn try_request_switch(&self, mode: PowerMode) -> Result<SwitchOutcome, PmFault> {
        self.switch_mode(Some(mode))
    }

    fn switch_to_resolved(&self) {
        if let Err(fault) = self.switch_mode(None) {
            self.fatal(fault);
        }
    }

    fn fatal(&self, fault: PmFault) -> ! {
        log_error!("{}", fault);
        panic!("{}", fault)
    }

    /// `requested` 为 `None` 时在互斥域内按注册表计算目标
    fn switch_mode(&self, requested: Option<PowerMode>) -> Result<SwitchOutcome, PmFault> {
        let core = self.platform.current_core();
        self.platform.without_interrupts(|| {
            let mut spins = 0u32;
            let (from, to, config_changed) = loop {
                match self.begin_switch(core, requested) {
                    SwitchDecision::Proceed {
                        from,
                        to,
                        config_changed,
                    } => break (from, to, config_changed),
                    SwitchDecision::NoChange => return Ok(SwitchOutcome::NoChange),
                    SwitchDecision::Dropped => return Ok(SwitchOutcome::Dropped),
                    SwitchDecision::Busy => {
                        spins += 1;
                        if spins >= config::SWITCH_SPIN_LIMIT {
                            return Err(PmFault::SwitchTimeout);
                        }
                        core::hint::spin_loop();
                    }
                }
            };

            let result = self.change_frequency(core, from, to, config_changed);
            self.finish_switch(to);
            result.map(|()| SwitchOutcome::Switched { from, to })
        })
    }

    /// 在互斥域内决定是否开始切换
    ///
    /// 目标模式不低于注册表计算的模式。有切换进行中时: 目标不低于本次请求则合并 (`Dropped`)，
    /// 否则先处理本核心的 CCOMPARE 更新请求再返回 `Busy`，
    /// 否则发起方会一直等待本核心。
    pub(crate) fn begin_switch(&self, core: CoreId, requested: Option<PowerMode>) -> SwitchDecision {
        self.with_state(|s| {
            let floor = s.resolved();
            let mode = requested.map_or(floor, |m| m.max(floor));
            if s.switch.is_switching {
                if s.switch.target >= mode {
                    return SwitchDecision::Dropped;
                }
                let local = &self.cores[core.index()].needs_compare_update;
                if local.is_set() {
                    self.update_compare();
                    local.clear();
                }
                return SwitchDecision::Busy;
            }
            if mode == s.switch.current {
                return SwitchDecision::NoChange;
            }
            s.switch.is_switching = true;
            s.switch.target = mode;
            SwitchDecision::Proceed {
                from: s.switch.current,
                to: mode,
                config_changed: core::mem::take(&mut s.switch.config_changed),
            }
        })
    }

    /// 发布新模式并结束切换
    pub(crate) fn finish_switch(&self, to: PowerMode) {
        #[cfg(feature = "profiling")]
        let now = self.platform.now_us();
        let from = self.with_state(|s| {
            let from = s.switch.current;
            #[cfg(feature = "profiling")]
            s.mode_stats.record_change(from, now);
            s.switch.current = to;
            s.switch.is_switching = false;
            from
        });
        log_debug!("mode {} -> {}", from, to);
    }

    /// 按模式表改变 CPU 频率
    ///
    /// 降频时先缩放 CCOMPARE 再写频率，升频时先写频率再缩放，
    /// 保证缩放计算使用的速率与当时的实际时钟一致。
    fn change_frequency(
        &self,
        core: CoreId,
        from: PowerMode,
        to: PowerMode,
        config_changed: bool,
    ) -> Result<(), PmFault> {
        let (old, new, initialized) =
            self.with_state(|s| (s.table.get(from), s.table.get(to), s.initialized));
        let old = if config_changed {
            self.platform.current_frequency()
        } else {
            old
        };
        if old.cpu_mhz == new.cpu_mhz {
            return Ok(());
        }

        log_trace!("{} MHz -> {} MHz", old.cpu_mhz, new.cpu_mhz);
        let factors = RescaleFactors::new(old.ticks_per_us(), new.ticks_per_us());
        if factors.is_decrease() {
            let result = self.rescale(core, factors, old, new, initialized);
            self.platform.set_cpu_frequency(&new);
            result
        } else {
            self.platform.set_cpu_frequency(&new);
            self.rescale(core, factors, old, new, initialized)
        }
    }

    /// 频率变化后的定时器调整
    ///
    /// 微秒计时器的速率只在 APB 变化时由发起方更新一次；
    /// 本核心直接更新 CCOMPARE，另一核心通过核间中断在其中断入口钩子中更新。
    fn rescale(
        &self,
        core: CoreId,
        factors: RescaleFactors,
        old: FreqConfig,
        new: FreqConfig,
        initialized: bool,
    ) -> Result<(), PmFault> {
        if old.apb_mhz != new.apb_mhz {
            self.platform.update_ticks_per_us(new.apb_mhz);
        }
        self.tick_divisor
            .store(tick_divisor(new.cpu_mhz), Ordering::Release);

        if !initialized {
            return Ok(());
        }

        self.ccount_div
            .store(factors.old_ticks_per_us, Ordering::Release);
        self.ccount_mul
            .store(factors.new_ticks_per_us, Ordering::Release);

        self.update_compare();

        let result = if self.core_count() > 1 {
            self.handshake(core.other())
        } else {
            Ok(())
        };

        self.ccount_mul.store(0, Ordering::Release);
        self.ccount_div.store(0, Ordering::Release);
        result
    }

    /// 请求另一核心更新 CCOMPARE 并等待其完成
    fn handshake(&self, other: CoreId) -> Result<(), PmFault> {
        let flag = &self.cores[other.index()].needs_compare_update;
        flag.set();
        self.platform.send_freq_switch(other);

        let limit = self.handshake_spin_limit.load(Ordering::Relaxed);
        let mut spins = 0u32;
        while flag.is_set() {
            spins += 1;
            if spins >= limit {
                flag.clear();
                return Err(PmFault::HandshakeTimeout { core: other });
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// 按发布的缩放因子更新本核心的 CCOMPARE
    fn update_compare(&self) {
        let factors = RescaleFactors::new(
            self.ccount_div.load(Ordering::Acquire),
            self.ccount_mul.load(Ordering::Acquire),
        );
        if factors.old_ticks_per_us == 0 {
            return;
        }
        let ccount = self.platform.cycle_count();
        let ccompare = self.platform.compare();
        let divisor = self.tick_divisor.load(Ordering::Acquire);
        if let Some(next) = compare_after_rescale(ccount, ccompare, factors, divisor) {
            self.platform.set_compare(next);
        }
    }

    // ===== 空闲 / 中断钩子 =====

    fn periph_should_skip_light_sleep(&self) -> bool {
        self.with_state(|s| s.light_sleep_enabled && s.skip_callbacks.any_skip())
    }

    /// 空闲任务钩子: 释放本核心的忙锁
    ///
    /// 已空闲时不做任何事。外设回调要求跳过 light sleep 时保持忙锁。
    pub fn on_idle_enter(&self, core: CoreId) {
        self.platform.without_interrupts(|| {
            let state = &self.cores[core.index()];
            if state.is_idle.is_set() || self.periph_should_skip_light_sleep() {
                return;
            }
            let Some(handle) = self.busy_lock(core) else {
                return;
            };
            if let Err(e) = self.release(handle) {
                log_warn!("{}: busy lock release failed: {}", core, e);
                return;
            }
            state.is_idle.set();
        })
    }

    /// 中断入口钩子
    ///
    /// 有待处理的 CCOMPARE 更新时只处理它，否则若本核心空闲则重新获取忙锁。
    /// 标志在 CCOMPARE 写入之后才清除，发起方看到清除即表示更新完成。
    pub fn on_interrupt_entry(&self, core: CoreId) {
        self.platform.without_interrupts(|| {
            let state = &self.cores[core.index()];
            if state.needs_compare_update.is_set() {
                self.update_compare();
                state.needs_compare_update.clear();
            } else {
                self.leave_idle(core);
            }
        })
    }

    fn leave_idle(&self, core: CoreId) {
        let state = &self.cores[core.index()];
        if !state.is_idle.is_set() {
            return;
        }
        let Some(handle) = self.busy_lock(core) else {
            return;
        };
        if let Err(e) = self.acquire(handle) {
            log_warn!("{}: busy lock acquire failed: {}", core, e);
            return;
        }
        state.is_idle.clear();
    }

    /// Tickless idle: 尝试进入 light sleep
    ///
    /// 仅当当前模式为 LIGHT_SLEEP、没有切换进行中、外设回调不反对且
    /// 另一核心没有要求跳过时才会睡眠。整个过程在互斥域内进行。
    /// 睡眠后要求另一核心跳过下一次尝试。
    pub fn on_idle_sleep(&self, core: CoreId, expected_idle_us: i64) -> SleepOutcome {
        if !cfg!(feature = "tickless-idle") {
            return SleepOutcome::Skipped;
        }
        let local = &self.cores[core.index()];
        let other = if self.core_count() > 1 {
            Some(&self.cores[core.other().index()])
        } else {
            None
        };

        self.platform.without_interrupts(|| {
            self.with_state(|s| {
                if local.skip_light_sleep.take() {
                    local.skipped_light_sleep.set();
                    return SleepOutcome::Skipped;
                }
                let skip = s.switch.current != PowerMode::LightSleep
                    || s.switch.is_switching
                    || (s.light_sleep_enabled && s.skip_callbacks.any_skip());
                local.skipped_light_sleep.store(skip);
                if skip {
                    return SleepOutcome::Skipped;
                }

                let start = self.platform.now_us();
                let Some(duration) =
                    plan_sleep(start, expected_idle_us, self.platform.next_alarm_us())
                else {
                    return SleepOutcome::TooShort;
                };
                self.platform.light_sleep(duration);

                let slept_us = self.platform.now_us() - start;
                let step_ticks = slept_ticks(slept_us);
                if step_ticks > 0 {
                    // 错过的 tick 由调用者补记，尽快触发下一个 tick 中断
                    let ccount = self.platform.cycle_count();
                    self.platform
                        .set_compare(ccount.wrapping_add(TICK_KICK_CYCLES));
                }
                if let Some(other) = other {
                    other.skip_light_sleep.set();
                }
                SleepOutcome::Slept {
                    slept_us,
                    step_ticks,
                }
            })
        })
    }

    /// 空闲任务的等待中断 (waiti)
    ///
    /// 本核心上次没有尝试 light sleep 时调用 `wait`。唤醒本核心的中断
    /// 已经重新获取了忙锁，回到空闲任务后再次释放。
    pub fn on_idle_wait(&self, core: CoreId, wait: impl FnOnce()) {
        if !cfg!(feature = "tickless-idle") {
            wait();
            return;
        }
        let state = &self.cores[core.index()];
        if state.skipped_light_sleep.is_set() {
            wait();
            self.on_idle_enter(core);
        }
        state.skipped_light_sleep.set();
    }

    // ===== light sleep 跳过回调 =====

    /// 注册外设回调，表满时返回 `NoMem`
    pub fn register_skip_light_sleep_callback(&self, cb: SkipLightSleepCallback) -> Result<(), PmError> {
        self.with_state(|s| s.skip_callbacks.register(cb))
    }

    /// 注销外设回调，未注册时返回 `InvalidState`
    pub fn unregister_skip_light_sleep_callback(&self, cb: SkipLightSleepCallback) -> Result<(), PmError> {
        self.with_state(|s| s.skip_callbacks.unregister(cb))
    }

    // ===== 统计 =====

    /// 输出锁与模式统计
    ///
    /// 快照在互斥域内取得，格式化在互斥域之外进行。
    pub fn dump_stats<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let now = self.platform.now_us();
        let (locks, table, light_sleep_enabled, time_in_mode) = self.with_state(|s| {
            let locks: heapless::Vec<LockEntry, { config::MAX_LOCKS }> =
                s.locks.iter().copied().collect();
            #[cfg(feature = "profiling")]
            let times = s.mode_stats.snapshot(s.switch.current, now);
            #[cfg(not(feature = "profiling"))]
            let times = [0; PowerMode::COUNT];
            (locks, s.table, s.light_sleep_enabled, times)
        });

        write_stats(
            out,
            &StatsSnapshot {
                now,
                locks: &locks,
                table,
                light_sleep_enabled,
                time_in_mode,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::hal::MicrosTimer;
    use crate::pm::testing::{set_current_core, ApbClockedPlatform, Event, FakePlatform};
    use core::sync::atomic::{AtomicBool, Ordering as StdOrdering};

    fn pm_config(max: u32, min: u32, light_sleep: bool) -> PmConfig {
        PmConfig {
            max_freq_mhz: max,
            min_freq_mhz: min,
            light_sleep_enable: light_sleep,
        }
    }

    /// 单核上下文，240MHz 启动
    fn single_core() -> PmContext<FakePlatform> {
        set_current_core(CoreId::Core0);
        let ctx = PmContext::new(FakePlatform::new(1, 240));
        ctx.init().unwrap();
        ctx
    }

    #[test]
    fn test_init_holds_busy_locks() {
        let ctx = single_core();
        assert_eq!(ctx.current_mode(), PowerMode::CpuMax);
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 1);
        assert!(ctx.busy_lock(CoreId::Core0).is_some());
        assert!(ctx.busy_lock(CoreId::Core1).is_none());
        assert_eq!(ctx.init(), Err(PmError::InvalidState));
    }

    #[test]
    fn test_no_locks_resolves_light_sleep() {
        let ctx = single_core();
        ctx.configure(pm_config(240, 40, true)).unwrap();
        ctx.on_idle_enter(CoreId::Core0);

        assert!(ctx.held_mask().is_empty());
        assert_eq!(ctx.resolved_mode(), PowerMode::LightSleep);
        assert_eq!(ctx.current_mode(), PowerMode::LightSleep);
        assert_eq!(ctx.platform().frequency().cpu_mhz, 40);
    }

    #[test]
    fn test_cpu_max_lock_round_trip() {
        let ctx = single_core();
        ctx.configure(pm_config(240, 40, true)).unwrap();
        ctx.on_idle_enter(CoreId::Core0);
        let before = ctx.held_mask();

        let lock = ctx.create_lock(LockType::CpuFreqMax, "spi_master").unwrap();
        ctx.acquire(lock).unwrap();
        assert_eq!(ctx.resolved_mode(), PowerMode::CpuMax);
        assert_eq!(ctx.current_mode(), PowerMode::CpuMax);
        assert_eq!(ctx.platform().frequency().cpu_mhz, 240);

        ctx.release(lock).unwrap();
        assert_eq!(ctx.held_mask(), before);
        assert_eq!(ctx.resolved_mode(), PowerMode::LightSleep);
        assert_eq!(ctx.current_mode(), PowerMode::LightSleep);
    }

    #[test]
    fn test_light_sleep_disabled_stops_at_apb_min() {
        let ctx = single_core();
        ctx.configure(pm_config(240, 40, false)).unwrap();
        ctx.on_idle_enter(CoreId::Core0);

        assert_eq!(ctx.resolved_mode(), PowerMode::ApbMin);
        assert_eq!(ctx.current_mode(), PowerMode::ApbMin);
    }

    #[test]
    fn test_two_cpu_max_locks_one_released() {
        let ctx = single_core();
        ctx.configure(pm_config(240, 40, true)).unwrap();
        ctx.on_idle_enter(CoreId::Core0);

        let a = ctx.create_lock(LockType::CpuFreqMax, "a").unwrap();
        let b = ctx.create_lock(LockType::CpuFreqMax, "b").unwrap();
        ctx.acquire(a).unwrap();
        ctx.acquire(b).unwrap();
        ctx.release(a).unwrap();

        assert!(ctx.held_mask().contains(PowerMode::CpuMax));
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 1);
        assert_eq!(ctx.resolved_mode(), PowerMode::CpuMax);
        assert_eq!(ctx.current_mode(), PowerMode::CpuMax);
    }

    #[test]
    fn test_idle_enter_twice_releases_once() {
        let ctx = single_core();
        ctx.on_idle_enter(CoreId::Core0);
        assert!(ctx.is_idle(CoreId::Core0));
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 0);

        ctx.on_idle_enter(CoreId::Core0);
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 0);

        ctx.on_interrupt_entry(CoreId::Core0);
        assert!(!ctx.is_idle(CoreId::Core0));
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 1);

        ctx.on_interrupt_entry(CoreId::Core0);
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 1);
    }

    #[test]
    fn test_rescale_ordering_decrease_vs_increase() {
        let ctx = single_core();
        ctx.configure(pm_config(240, 40, false)).unwrap();
        let p = ctx.platform();
        // 闹钟在 100μs 之后
        p.set_core_ccount(CoreId::Core0, 10_000);
        p.set_core_compare(CoreId::Core0, 10_000 + 24_000);
        p.clear_events();

        // 降频: 先调整计时器与 CCOMPARE，再写频率
        ctx.on_idle_enter(CoreId::Core0);
        assert_eq!(
            p.events(),
            [
                Event::TimerRate(40),
                Event::CompareSet {
                    core: CoreId::Core0,
                    value: 10_000 + 4_000
                },
                Event::FreqWrite {
                    cpu_mhz: 40,
                    timer_ticks_per_us: 40
                },
            ]
        );

        p.clear_events();
        p.set_core_compare(CoreId::Core0, 10_000 + 4_000);

        // 升频: 先写频率，写入时计时器仍是旧速率
        ctx.on_interrupt_entry(CoreId::Core0);
        assert_eq!(
            p.events(),
            [
                Event::FreqWrite {
                    cpu_mhz: 240,
                    timer_ticks_per_us: 40
                },
                Event::TimerRate(80),
                Event::CompareSet {
                    core: CoreId::Core0,
                    value: 10_000 + 24_000
                },
            ]
        );
    }

    #[test]
    fn test_switch_to_current_mode_is_noop() {
        let ctx = single_core();
        ctx.configure(pm_config(240, 40, false)).unwrap();
        ctx.platform().clear_events();

        assert_eq!(ctx.request_switch(PowerMode::CpuMax), SwitchOutcome::NoChange);
        assert!(ctx.platform().events().is_empty());
        assert_eq!(ctx.current_mode(), PowerMode::CpuMax);
        assert!(!ctx.is_switching());
    }

    #[test]
    fn test_same_frequency_skips_rescale() {
        let ctx = single_core();
        // 240MHz 下 APB_MAX 与 CPU_MAX 同频
        ctx.configure(pm_config(240, 40, false)).unwrap();
        let uart = ctx.create_lock(LockType::ApbFreqMax, "uart").unwrap();
        ctx.acquire(uart).unwrap();
        ctx.platform().clear_events();

        ctx.on_idle_enter(CoreId::Core0);
        assert_eq!(ctx.current_mode(), PowerMode::ApbMax);
        assert!(ctx.platform().events().is_empty());
    }

    #[test]
    fn test_explicit_switch_never_goes_below_held_lock() {
        let ctx = single_core();
        ctx.configure(pm_config(240, 40, true)).unwrap();
        ctx.on_idle_enter(CoreId::Core0);
        let spi = ctx.create_lock(LockType::CpuFreqMax, "spi").unwrap();
        ctx.acquire(spi).unwrap();

        assert_eq!(ctx.request_switch(PowerMode::LightSleep), SwitchOutcome::NoChange);
        assert_eq!(ctx.try_request_switch(PowerMode::ApbMin), Ok(SwitchOutcome::NoChange));
        assert_eq!(ctx.current_mode(), PowerMode::CpuMax);
        assert!(ctx.current_mode() >= ctx.resolved_mode());
        assert_eq!(ctx.platform().frequency().cpu_mhz, 240);

        // 高于锁要求的请求照常执行
        ctx.release(spi).unwrap();
        assert_eq!(ctx.current_mode(), PowerMode::LightSleep);
        assert_eq!(
            ctx.request_switch(PowerMode::ApbMax),
            SwitchOutcome::Switched {
                from: PowerMode::LightSleep,
                to: PowerMode::ApbMax
            }
        );
        assert_eq!(ctx.platform().frequency().cpu_mhz, 240);
    }

    #[test]
    fn test_lower_request_coalesced_into_inflight() {
        let ctx = single_core();
        let core = CoreId::Core0;
        ctx.on_idle_enter(core);
        assert_eq!(ctx.current_mode(), PowerMode::ApbMin);

        assert!(matches!(
            ctx.begin_switch(core, Some(PowerMode::ApbMax)),
            SwitchDecision::Proceed { .. }
        ));
        assert_eq!(ctx.try_request_switch(PowerMode::ApbMin), Ok(SwitchOutcome::Dropped));
        ctx.finish_switch(PowerMode::ApbMax);

        assert_eq!(ctx.current_mode(), PowerMode::ApbMax);
        assert!(!ctx.is_switching());
    }

    #[test]
    fn test_higher_request_waits_for_inflight() {
        let ctx = single_core();
        let core = CoreId::Core0;
        ctx.on_idle_enter(core);
        assert_eq!(ctx.current_mode(), PowerMode::ApbMin);

        assert!(matches!(
            ctx.begin_switch(core, Some(PowerMode::ApbMax)),
            SwitchDecision::Proceed { .. }
        ));
        assert_eq!(ctx.begin_switch(core, Some(PowerMode::CpuMax)), SwitchDecision::Busy);
        ctx.finish_switch(PowerMode::ApbMax);

        assert_eq!(
            ctx.try_request_switch(PowerMode::CpuMax),
            Ok(SwitchOutcome::Switched {
                from: PowerMode::ApbMax,
                to: PowerMode::CpuMax
            })
        );
        assert_eq!(ctx.current_mode(), PowerMode::CpuMax);
    }

    #[test]
    fn test_inflight_switch_never_completing_times_out() {
        let ctx = single_core();
        ctx.on_idle_enter(CoreId::Core0);
        ctx.begin_switch(CoreId::Core0, Some(PowerMode::ApbMax));
        assert_eq!(
            ctx.try_request_switch(PowerMode::CpuMax),
            Err(PmFault::SwitchTimeout)
        );
    }

    /// 双核上下文: 两个核心都空闲，停在 CPU_MAX，并已应用 `pm`
    ///
    /// 默认频率表各模式同频，这之前的切换都不涉及握手。
    fn dual_core_idle(pm: PmConfig) -> PmContext<FakePlatform> {
        set_current_core(CoreId::Core0);
        let ctx = PmContext::new(FakePlatform::new(2, 240));
        ctx.init().unwrap();
        ctx.on_idle_enter(CoreId::Core1);
        ctx.on_idle_enter(CoreId::Core0);
        assert_eq!(ctx.current_mode(), PowerMode::ApbMin);
        assert_eq!(
            ctx.request_switch(PowerMode::CpuMax),
            SwitchOutcome::Switched {
                from: PowerMode::ApbMin,
                to: PowerMode::CpuMax
            }
        );
        ctx.configure(pm).unwrap();
        ctx.platform().clear_events();
        ctx
    }

    /// 由 `initiator` 发起切换，另一核心在线程中响应核间中断
    fn switch_with_responder(
        ctx: &PmContext<FakePlatform>,
        initiator: CoreId,
        mode: PowerMode,
    ) -> Result<SwitchOutcome, PmFault> {
        let responder = initiator.other();
        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                set_current_core(responder);
                while !done.load(StdOrdering::Acquire) {
                    if ctx.platform().take_ipi(responder) {
                        ctx.on_interrupt_entry(responder);
                    }
                    std::hint::spin_loop();
                }
            });

            set_current_core(initiator);
            let outcome = ctx.try_request_switch(mode);
            done.store(true, StdOrdering::Release);
            outcome
        })
    }

    fn timer_rate_updates(p: &FakePlatform) -> Vec<u32> {
        p.events()
            .iter()
            .filter_map(|e| match e {
                Event::TimerRate(rate) => Some(*rate),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_handshake_timeout_reported() {
        let ctx = dual_core_idle(pm_config(240, 40, false));
        ctx.set_handshake_spin_limit(100);

        assert_eq!(
            ctx.try_request_switch(PowerMode::ApbMin),
            Err(PmFault::HandshakeTimeout {
                core: CoreId::Core1
            })
        );
        // 故障后状态仍然一致
        assert!(!ctx.is_switching());
        assert_eq!(ctx.current_mode(), PowerMode::ApbMin);
        assert!(ctx
            .platform()
            .events()
            .contains(&Event::Ipi(CoreId::Core1)));
    }

    #[test]
    #[should_panic(expected = "possible deadlock")]
    fn test_handshake_timeout_is_fatal() {
        let ctx = dual_core_idle(pm_config(240, 40, false));
        ctx.set_handshake_spin_limit(100);
        ctx.request_switch(PowerMode::ApbMin);
    }

    #[test]
    fn test_two_core_handshake() {
        let ctx = dual_core_idle(pm_config(240, 40, false));
        ctx.set_handshake_spin_limit(u32::MAX);

        let p = ctx.platform();
        for core in [CoreId::Core0, CoreId::Core1] {
            p.set_core_ccount(core, 50_000);
            // 100μs @ 240MHz
            p.set_core_compare(core, 50_000 + 24_000);
        }

        // Core0 发起降频，APB 80MHz → 40MHz
        assert_eq!(
            switch_with_responder(&ctx, CoreId::Core0, PowerMode::ApbMin),
            Ok(SwitchOutcome::Switched {
                from: PowerMode::CpuMax,
                to: PowerMode::ApbMin
            })
        );
        // 两个核心的闹钟都按 40MHz 重新缩放为 4000 周期
        assert_eq!(p.core_compare(CoreId::Core0), 50_000 + 4_000);
        assert_eq!(p.core_compare(CoreId::Core1), 50_000 + 4_000);
        assert_eq!(p.frequency().cpu_mhz, 40);
        assert_eq!(timer_rate_updates(p), [40]);

        // Core1 发起升频，速率同样只更新一次
        p.clear_events();
        assert_eq!(
            switch_with_responder(&ctx, CoreId::Core1, PowerMode::CpuMax),
            Ok(SwitchOutcome::Switched {
                from: PowerMode::ApbMin,
                to: PowerMode::CpuMax
            })
        );
        assert_eq!(p.core_compare(CoreId::Core0), 50_000 + 24_000);
        assert_eq!(p.core_compare(CoreId::Core1), 50_000 + 24_000);
        assert_eq!(p.frequency().cpu_mhz, 240);
        assert_eq!(timer_rate_updates(p), [80]);
        assert!(p.events().contains(&Event::Ipi(CoreId::Core0)));
    }

    #[test]
    fn test_pending_compare_update_takes_priority_over_idle_exit() {
        let ctx = single_core();
        let core = CoreId::Core0;
        ctx.on_idle_enter(core);
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 0);

        let p = ctx.platform();
        p.set_core_ccount(core, 10_000);
        p.set_core_compare(core, 10_000 + 24_000);
        // 发起方已发布 240MHz → 80MHz 的缩放因子
        ctx.ccount_div.store(240, Ordering::Release);
        ctx.ccount_mul.store(80, Ordering::Release);
        ctx.cores[core.index()].needs_compare_update.set();

        // 第一次只处理 CCOMPARE 更新，保持空闲
        ctx.on_interrupt_entry(core);
        assert_eq!(p.core_compare(core), 10_000 + 8_000);
        assert!(!ctx.cores[core.index()].needs_compare_update.is_set());
        assert!(ctx.is_idle(core));
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 0);

        ctx.ccount_div.store(0, Ordering::Release);
        ctx.ccount_mul.store(0, Ordering::Release);

        // 第二次才退出空闲
        ctx.on_interrupt_entry(core);
        assert!(!ctx.is_idle(core));
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 1);
    }

    #[test]
    fn test_apb_clocked_timer_continuous_across_switch() {
        set_current_core(CoreId::Core0);
        let ctx = PmContext::new(ApbClockedPlatform::new(1, 240));
        ctx.init().unwrap();
        ctx.configure(pm_config(240, 40, false)).unwrap();

        let timer = &ctx.platform().timer;
        timer.source().advance(80 * 1_000);
        assert_eq!(ctx.platform().now_us(), 1_000);

        // APB 80MHz → 40MHz
        ctx.on_idle_enter(CoreId::Core0);
        assert_eq!(ctx.current_mode(), PowerMode::ApbMin);
        assert_eq!(timer.ticks_per_us(), 40);
        assert_eq!(ctx.platform().now_us(), 1_000);

        timer.source().advance(40 * 500);
        assert_eq!(ctx.platform().now_us(), 1_500);
    }

    #[test]
    fn test_configure_rejects_without_side_effects() {
        let ctx = single_core();
        let before = ctx.configuration();

        assert_eq!(
            ctx.configure(pm_config(80, 160, false)),
            Err(PmError::InvalidArgument)
        );
        assert_eq!(
            ctx.configure(pm_config(120, 40, false)),
            Err(PmError::InvalidArgument)
        );
        assert_eq!(ctx.configuration(), before);
        assert_eq!(ctx.cpu_freq_mhz(PowerMode::ApbMin), 240);
    }

    #[test]
    fn test_configure_fills_table() {
        let ctx = single_core();
        ctx.configure(pm_config(160, 40, false)).unwrap();
        assert_eq!(ctx.cpu_freq_mhz(PowerMode::CpuMax), 160);
        assert_eq!(ctx.cpu_freq_mhz(PowerMode::ApbMax), 80);
        assert_eq!(ctx.cpu_freq_mhz(PowerMode::ApbMin), 40);
        assert_eq!(ctx.cpu_freq_mhz(PowerMode::LightSleep), 40);
        // 配置本身不触发切换
        assert_eq!(ctx.current_mode(), PowerMode::CpuMax);
    }

    #[test]
    fn test_lock_usage_errors() {
        let ctx = single_core();
        let lock = ctx.create_lock(LockType::ApbFreqMax, "i2c").unwrap();
        assert_eq!(ctx.release(lock), Err(PmError::InvalidState));

        ctx.acquire(lock).unwrap();
        assert_eq!(ctx.delete_lock(lock), Err(PmError::InvalidState));
        ctx.release(lock).unwrap();
        ctx.delete_lock(lock).unwrap();
        assert_eq!(ctx.acquire(lock), Err(PmError::InvalidArgument));
        assert_eq!(ctx.lock_count(PowerMode::ApbMax), 0);
    }

    #[cfg(feature = "tickless-idle")]
    /// 所有模式同频，切换不涉及 CCOMPARE
    fn sleepy(cores: usize) -> PmContext<FakePlatform> {
        set_current_core(CoreId::Core0);
        let ctx = PmContext::new(FakePlatform::new(cores, 40));
        ctx.init().unwrap();
        ctx.configure(pm_config(40, 40, true)).unwrap();
        for core in 0..cores {
            if let Some(core) = CoreId::from_index(core) {
                ctx.on_idle_enter(core);
            }
        }
        ctx
    }

    #[cfg(feature = "tickless-idle")]
    #[test]
    fn test_light_sleep_entered_when_allowed() {
        let ctx = sleepy(1);
        assert_eq!(ctx.current_mode(), PowerMode::LightSleep);
        let p = ctx.platform();
        p.set_core_ccount(CoreId::Core0, 1_000);

        let outcome = ctx.on_idle_sleep(CoreId::Core0, 1_000_000);
        let expected = 1_000_000 - config::LIGHT_SLEEP_EARLY_WAKEUP_US;
        assert_eq!(
            outcome,
            SleepOutcome::Slept {
                slept_us: expected,
                step_ticks: 99
            }
        );
        assert!(p.events().contains(&Event::Sleep(expected as u64)));
        assert_eq!(p.core_compare(CoreId::Core0), 1_000 + TICK_KICK_CYCLES);
    }

    #[cfg(feature = "tickless-idle")]
    #[test]
    fn test_light_sleep_bounded_by_next_alarm() {
        let ctx = sleepy(1);
        let p = ctx.platform();
        p.set_next_alarm(Some(p.now() + 40_000));

        let outcome = ctx.on_idle_sleep(CoreId::Core0, 1_000_000);
        assert_eq!(
            outcome,
            SleepOutcome::Slept {
                slept_us: 40_000 - config::LIGHT_SLEEP_EARLY_WAKEUP_US,
                step_ticks: 3
            }
        );
    }

    #[cfg(feature = "tickless-idle")]
    #[test]
    fn test_light_sleep_too_short() {
        let ctx = sleepy(1);
        assert_eq!(ctx.on_idle_sleep(CoreId::Core0, 20_000), SleepOutcome::TooShort);
        assert!(ctx.platform().events().is_empty());
    }

    #[test]
    fn test_light_sleep_skipped_outside_sleep_mode() {
        let ctx = single_core();
        assert_eq!(ctx.on_idle_sleep(CoreId::Core0, 1_000_000), SleepOutcome::Skipped);
    }

    #[cfg(feature = "tickless-idle")]
    fn deny_sleep() -> bool {
        true
    }

    #[cfg(feature = "tickless-idle")]
    #[test]
    fn test_skip_callback_blocks_sleep() {
        let ctx = sleepy(1);
        ctx.register_skip_light_sleep_callback(deny_sleep).unwrap();
        assert_eq!(ctx.on_idle_sleep(CoreId::Core0, 1_000_000), SleepOutcome::Skipped);

        ctx.unregister_skip_light_sleep_callback(deny_sleep).unwrap();
        assert!(matches!(
            ctx.on_idle_sleep(CoreId::Core0, 1_000_000),
            SleepOutcome::Slept { .. }
        ));
        assert_eq!(
            ctx.unregister_skip_light_sleep_callback(deny_sleep),
            Err(PmError::InvalidState)
        );
    }

    #[cfg(feature = "tickless-idle")]
    #[test]
    fn test_other_core_skips_once_after_sleep() {
        let ctx = sleepy(2);
        assert!(matches!(
            ctx.on_idle_sleep(CoreId::Core0, 1_000_000),
            SleepOutcome::Slept { .. }
        ));

        set_current_core(CoreId::Core1);
        assert_eq!(ctx.on_idle_sleep(CoreId::Core1, 1_000_000), SleepOutcome::Skipped);
        assert!(matches!(
            ctx.on_idle_sleep(CoreId::Core1, 1_000_000),
            SleepOutcome::Slept { .. }
        ));
    }

    #[cfg(feature = "tickless-idle")]
    #[test]
    fn test_idle_wait_rereleases_busy_lock() {
        let ctx = single_core();
        let core = CoreId::Core0;
        ctx.on_idle_enter(core);
        assert_eq!(ctx.on_idle_sleep(core, 1_000_000), SleepOutcome::Skipped);

        let mut woke = false;
        ctx.on_idle_wait(core, || {
            // 唤醒 waiti 的中断重新获取忙锁
            ctx.on_interrupt_entry(core);
            assert_eq!(ctx.lock_count(PowerMode::CpuMax), 1);
            woke = true;
        });
        assert!(woke);
        assert!(ctx.is_idle(core));
        assert_eq!(ctx.lock_count(PowerMode::CpuMax), 0);
    }

    #[cfg(feature = "tickless-idle")]
    #[test]
    fn test_idle_wait_after_sleep_attempt_returns_immediately() {
        let ctx = sleepy(1);
        assert_eq!(ctx.on_idle_sleep(CoreId::Core0, 20_000), SleepOutcome::TooShort);

        let mut waited = false;
        ctx.on_idle_wait(CoreId::Core0, || waited = true);
        assert!(!waited);

        // 下一次没有尝试 light sleep 时才等待
        ctx.on_idle_wait(CoreId::Core0, || waited = true);
        assert!(waited);
    }

    #[test]
    fn test_dump_stats() {
        let ctx = single_core();
        ctx.configure(pm_config(240, 40, false)).unwrap();
        let lock = ctx.create_lock(LockType::NoLightSleep, "wifi").unwrap();
        ctx.acquire(lock).unwrap();
        ctx.platform().advance_us(1_000);
        ctx.on_idle_enter(CoreId::Core0);
        ctx.platform().advance_us(3_000);

        let mut out = String::new();
        ctx.dump_stats(&mut out).unwrap();
        assert!(out.contains("rtos0"));
        assert!(out.contains("wifi"));
        assert!(out.contains("NO_LIGHT_SLEEP"));
        assert!(out.contains("Mode stats:"));
        // light sleep 关闭时不输出 SLEEP 行
        assert!(!out.lines().any(|l| l.starts_with("SLEEP")));
    }
}
