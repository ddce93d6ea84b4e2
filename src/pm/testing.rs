//! 主机测试用的假平台
//!
//! 每个测试线程通过 [`set_current_core`] 扮演一个核心。
//! 所有硬件写操作按顺序记录为 [`Event`]。

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::vec::Vec;

use super::freq::FreqConfig;
use super::hal::{ClockControl, CoreId, CrossCore, CycleTimer, LightSleep, LocalInterrupts, MicrosTimer};
use super::rescale::{ScaledTimer, TickSource};

std::thread_local! {
    static CURRENT_CORE: Cell<CoreId> = const { Cell::new(CoreId::Core0) };
}

/// 设置当前线程扮演的核心
pub fn set_current_core(core: CoreId) {
    CURRENT_CORE.with(|c| c.set(core));
}

fn current() -> CoreId {
    CURRENT_CORE.with(|c| c.get())
}

/// 记录的硬件操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// 写 CPU 频率，附带写入时计时器的速率
    FreqWrite { cpu_mhz: u32, timer_ticks_per_us: u32 },
    /// 更新计时器速率
    TimerRate(u32),
    CompareSet { core: CoreId, value: u32 },
    Ipi(CoreId),
    Sleep(u64),
}

pub struct FakePlatform {
    cores: usize,
    ccount: [AtomicU32; 2],
    ccompare: [AtomicU32; 2],
    freq: Mutex<FreqConfig>,
    timer_ticks_per_us: AtomicU32,
    now_us: AtomicI64,
    next_alarm: Mutex<Option<i64>>,
    ipi_pending: [AtomicBool; 2],
    events: Mutex<Vec<Event>>,
}

impl FakePlatform {
    pub fn new(cores: usize, cpu_mhz: u32) -> Self {
        let freq = FreqConfig::from_mhz(cpu_mhz, crate::config::XTAL_MHZ)
            .expect("unsupported test frequency");
        Self {
            cores,
            ccount: [AtomicU32::new(0), AtomicU32::new(0)],
            ccompare: [AtomicU32::new(0), AtomicU32::new(0)],
            freq: Mutex::new(freq),
            timer_ticks_per_us: AtomicU32::new(freq.apb_mhz),
            now_us: AtomicI64::new(0),
            next_alarm: Mutex::new(None),
            ipi_pending: [AtomicBool::new(false), AtomicBool::new(false)],
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn frequency(&self) -> FreqConfig {
        *self.freq.lock().unwrap()
    }

    pub fn set_core_ccount(&self, core: CoreId, value: u32) {
        self.ccount[core.index()].store(value, Ordering::SeqCst);
    }

    pub fn set_core_compare(&self, core: CoreId, value: u32) {
        self.ccompare[core.index()].store(value, Ordering::SeqCst);
    }

    pub fn core_compare(&self, core: CoreId) -> u32 {
        self.ccompare[core.index()].load(Ordering::SeqCst)
    }

    pub fn now(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }

    pub fn advance_us(&self, us: i64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }

    pub fn set_next_alarm(&self, at: Option<i64>) {
        *self.next_alarm.lock().unwrap() = at;
    }

    /// 取走发往 `core` 的核间中断
    pub fn take_ipi(&self, core: CoreId) -> bool {
        self.ipi_pending[core.index()].swap(false, Ordering::SeqCst)
    }
}

impl CycleTimer for FakePlatform {
    fn cycle_count(&self) -> u32 {
        self.ccount[current().index()].load(Ordering::SeqCst)
    }

    fn compare(&self) -> u32 {
        self.ccompare[current().index()].load(Ordering::SeqCst)
    }

    fn set_compare(&self, value: u32) {
        let core = current();
        self.ccompare[core.index()].store(value, Ordering::SeqCst);
        self.record(Event::CompareSet { core, value });
    }
}

impl CrossCore for FakePlatform {
    fn current_core(&self) -> CoreId {
        current()
    }

    fn core_count(&self) -> usize {
        self.cores
    }

    fn send_freq_switch(&self, core: CoreId) {
        self.record(Event::Ipi(core));
        self.ipi_pending[core.index()].store(true, Ordering::SeqCst);
    }
}

impl ClockControl for FakePlatform {
    fn set_cpu_frequency(&self, config: &FreqConfig) {
        *self.freq.lock().unwrap() = *config;
        self.record(Event::FreqWrite {
            cpu_mhz: config.cpu_mhz,
            timer_ticks_per_us: self.timer_ticks_per_us.load(Ordering::SeqCst),
        });
    }

    fn current_frequency(&self) -> FreqConfig {
        self.frequency()
    }
}

impl MicrosTimer for FakePlatform {
    fn now_us(&self) -> i64 {
        self.now()
    }

    fn update_ticks_per_us(&self, ticks_per_us: u32) {
        self.timer_ticks_per_us.store(ticks_per_us, Ordering::SeqCst);
        self.record(Event::TimerRate(ticks_per_us));
    }

    fn next_alarm_us(&self) -> Option<i64> {
        *self.next_alarm.lock().unwrap()
    }
}

impl LightSleep for FakePlatform {
    fn light_sleep(&self, duration_us: u64) {
        self.record(Event::Sleep(duration_us));
        self.advance_us(duration_us as i64);
    }
}

impl LocalInterrupts for FakePlatform {
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// 由 APB 驱动的计数器
pub struct ApbCounter(AtomicU64);

impl ApbCounter {
    pub fn advance(&self, ticks: u64) {
        self.0.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl TickSource for ApbCounter {
    fn raw_ticks(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// 微秒时钟随 APB 变速的平台，其余硬件操作交给 [`FakePlatform`]
pub struct ApbClockedPlatform {
    pub inner: FakePlatform,
    pub timer: ScaledTimer<ApbCounter>,
}

impl ApbClockedPlatform {
    pub fn new(cores: usize, cpu_mhz: u32) -> Self {
        let inner = FakePlatform::new(cores, cpu_mhz);
        let apb_mhz = inner.frequency().apb_mhz;
        Self {
            inner,
            timer: ScaledTimer::new(ApbCounter(AtomicU64::new(0)), apb_mhz),
        }
    }
}

impl CycleTimer for ApbClockedPlatform {
    fn cycle_count(&self) -> u32 {
        self.inner.cycle_count()
    }

    fn compare(&self) -> u32 {
        self.inner.compare()
    }

    fn set_compare(&self, value: u32) {
        self.inner.set_compare(value);
    }
}

impl CrossCore for ApbClockedPlatform {
    fn current_core(&self) -> CoreId {
        self.inner.current_core()
    }

    fn core_count(&self) -> usize {
        self.inner.core_count()
    }

    fn send_freq_switch(&self, core: CoreId) {
        self.inner.send_freq_switch(core);
    }
}

impl ClockControl for ApbClockedPlatform {
    fn set_cpu_frequency(&self, config: &FreqConfig) {
        self.inner.set_cpu_frequency(config);
    }

    fn current_frequency(&self) -> FreqConfig {
        self.inner.current_frequency()
    }
}

impl MicrosTimer for ApbClockedPlatform {
    fn now_us(&self) -> i64 {
        self.timer.now_us()
    }

    fn update_ticks_per_us(&self, ticks_per_us: u32) {
        self.timer.update_ticks_per_us(ticks_per_us);
    }
}

impl LightSleep for ApbClockedPlatform {
    fn light_sleep(&self, duration_us: u64) {
        self.inner.light_sleep(duration_us);
    }
}

impl LocalInterrupts for ApbClockedPlatform {
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}
