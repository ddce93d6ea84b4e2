//! ESP32-S3 平台实现
//!
//! - CCOUNT / CCOMPARE0: `xtensa_lx::timer`，RTOS tick 使用 CCOMPARE0
//! - 核间中断: 软件中断 2 (发往 Core0) 与 3 (发往 Core1)
//! - 微秒时钟: SYSTIMER (`esp_hal::time::Instant`)，由 XTAL 驱动，
//!   与 CPU/APB 频率无关
//! - 本核中断屏蔽: `xtensa_lx::interrupt`
//!
//! CPU 频率编程与 light sleep 由板级代码通过 [`BoardHooks`] 提供。
//!
//! # 中断处理程序
//!
//! 两个软件中断的处理程序必须分别在对应核心上绑定，并在处理程序中
//! 先调用 [`PmContext::on_interrupt_entry`](crate::PmContext::on_interrupt_entry)
//! 再调用 [`Esp32s3Platform::ack_freq_switch`]:
//!
//! ```rust,ignore
//! #[esp_hal::handler]
//! fn freq_switch_core0() {
//!     if let Some(pm) = PM.try_get() {
//!         pm.on_interrupt_entry(CoreId::Core0);
//!     }
//!     Esp32s3Platform::<Board>::ack_freq_switch(CoreId::Core0);
//! }
//! ```

use core::marker::PhantomData;

use esp_hal::interrupt::software::SoftwareInterrupt;
use esp_hal::system::Cpu;
use esp_hal::time::Instant;

use crate::config;
use crate::pm::freq::FreqConfig;
use crate::pm::hal::{ClockControl, CoreId, CrossCore, CycleTimer, LightSleep, LocalInterrupts, MicrosTimer};
use crate::util::log::log_trace;

/// 板级钩子: CPU 时钟编程与 light sleep
pub trait BoardHooks: ClockControl + LightSleep + Sync {}

impl<T> BoardHooks for T where T: ClockControl + LightSleep + Sync {}

/// ESP32-S3 平台
pub struct Esp32s3Platform<B> {
    board: B,
    cores: usize,
    _ipi: PhantomData<fn() -> (SoftwareInterrupt<'static, 2>, SoftwareInterrupt<'static, 3>)>,
}

impl<B: BoardHooks> Esp32s3Platform<B> {
    /// 创建平台
    ///
    /// 传入的软件中断必须已在对应核心上绑定处理程序。
    /// `cores` 为参与调度的核心数；Core1 未启动时传 1。
    pub fn new(
        _ipi_core0: SoftwareInterrupt<'static, 2>,
        _ipi_core1: SoftwareInterrupt<'static, 3>,
        cores: usize,
        board: B,
    ) -> Self {
        Self {
            board,
            cores: cores.clamp(1, config::MAX_CORES),
            _ipi: PhantomData,
        }
    }

    /// 板级钩子
    pub fn board(&self) -> &B {
        &self.board
    }

    /// 在频率切换中断处理程序末尾清除中断
    pub fn ack_freq_switch(core: CoreId) {
        // SAFETY: `new` 取得了两个软件中断的所有权，这里只做清除
        match core {
            CoreId::Core0 => unsafe { SoftwareInterrupt::<'static, 2>::steal() }.reset(),
            CoreId::Core1 => unsafe { SoftwareInterrupt::<'static, 3>::steal() }.reset(),
        }
    }
}

impl<B: BoardHooks> CycleTimer for Esp32s3Platform<B> {
    #[inline(always)]
    fn cycle_count(&self) -> u32 {
        xtensa_lx::timer::get_cycle_count()
    }

    #[inline(always)]
    fn compare(&self) -> u32 {
        xtensa_lx::timer::get_ccompare0()
    }

    #[inline(always)]
    fn set_compare(&self, value: u32) {
        xtensa_lx::timer::set_ccompare0(value);
    }
}

impl<B: BoardHooks> CrossCore for Esp32s3Platform<B> {
    fn current_core(&self) -> CoreId {
        match Cpu::current() {
            Cpu::ProCpu => CoreId::Core0,
            _ => CoreId::Core1,
        }
    }

    fn core_count(&self) -> usize {
        self.cores
    }

    fn send_freq_switch(&self, core: CoreId) {
        // SAFETY: 同上，raise 只写 FROM_CPU_INTR 寄存器
        match core {
            CoreId::Core0 => unsafe { SoftwareInterrupt::<'static, 2>::steal() }.raise(),
            CoreId::Core1 => unsafe { SoftwareInterrupt::<'static, 3>::steal() }.raise(),
        }
    }
}

impl<B: BoardHooks> ClockControl for Esp32s3Platform<B> {
    fn set_cpu_frequency(&self, config: &FreqConfig) {
        self.board.set_cpu_frequency(config);
    }

    fn current_frequency(&self) -> FreqConfig {
        self.board.current_frequency()
    }

    fn xtal_mhz(&self) -> u32 {
        self.board.xtal_mhz()
    }
}

impl<B: BoardHooks> MicrosTimer for Esp32s3Platform<B> {
    fn now_us(&self) -> i64 {
        Instant::now().duration_since_epoch().as_micros() as i64
    }

    fn update_ticks_per_us(&self, ticks_per_us: u32) {
        // SYSTIMER 由 XTAL 驱动，不受 APB 影响
        log_trace!("APB now {} ticks/us", ticks_per_us);
    }
}

impl<B: BoardHooks> LightSleep for Esp32s3Platform<B> {
    fn light_sleep(&self, duration_us: u64) {
        self.board.light_sleep(duration_us);
    }
}

impl<B: BoardHooks> LocalInterrupts for Esp32s3Platform<B> {
    #[inline(always)]
    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        let old_mask = xtensa_lx::interrupt::disable();
        let r = f();
        // SAFETY: 恢复进入前的中断屏蔽状态
        unsafe { xtensa_lx::interrupt::set_mask(old_mask) };
        r
    }
}
