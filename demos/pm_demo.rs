//! 电源管理演示 - 锁驱动的频率切换与 tickless idle
//!
//! 本示例演示 RustPM 的核心流程:
//! - 初始化 PM 上下文并配置 240MHz / 40MHz / light sleep
//! - 应用锁 (APB_FREQ_MAX) 在采样期间保持 APB 频率
//! - 主循环扮演空闲任务: 释放忙锁 → 尝试 light sleep → waiti
//! - 周期性输出锁与模式统计
//!
//! 演示板只记录频率配置，light sleep 以忙等代替。
//! Core1 未启动，平台按单核运行。
//!
//! # 运行
//! ```bash
//! cargo run --example pm_demo --features esp32s3,dev
//! ```

#![no_std]
#![no_main]

use embassy_sync::once_lock::OnceLock;
use esp_hal::delay::Delay;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use portable_atomic::{AtomicU32, Ordering};
use rustpm::hw::Esp32s3Platform;
use rustpm::pm::{ClockControl, ClockSource, LightSleep, SleepOutcome};
use rustpm::sync::primitives::new_isr_mutex;
use rustpm::{config, log_info, log_warn, CoreId, FreqConfig, IsrMutex, LockType, PmConfig, PmContext};
use static_cell::StaticCell;

#[cfg(feature = "dev")]
use esp_backtrace as _;

#[cfg(feature = "log-defmt")]
use defmt_rtt as _;

#[cfg(not(feature = "dev"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ===== ESP-IDF 兼容 App Descriptor (手动定义) =====
// 设置 min_efuse_blk_rev_full = 0 以支持所有芯片版本
#[repr(C)]
struct EspAppDesc {
    magic_word: u32,
    secure_version: u32,
    reserv1: [u32; 2],
    version: [u8; 32],
    project_name: [u8; 32],
    time: [u8; 16],
    date: [u8; 16],
    idf_ver: [u8; 32],
    app_elf_sha256: [u8; 32],
    min_efuse_blk_rev_full: u16,
    max_efuse_blk_rev_full: u16,
    mmu_page_size: u8,
    reserv3: [u8; 3],
    reserv2: [u32; 18],
}

/// 定长、以 0 填充的字符串字段
const fn field<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
    let mut out = [0u8; N];
    let mut i = 0;
    while i < bytes.len() && i < N - 1 {
        out[i] = bytes[i];
        i += 1;
    }
    out
}

#[link_section = ".flash.appdesc"]
#[used]
static ESP_APP_DESC: EspAppDesc = EspAppDesc {
    magic_word: 0xABCD5432,
    secure_version: 0,
    reserv1: [0; 2],
    version: field(env!("CARGO_PKG_VERSION")),
    project_name: field("pm_demo"),
    time: field("00:00:00"),
    date: field("2025-01-01"),
    idf_ver: field("v5.0"),
    app_elf_sha256: [0; 32],
    min_efuse_blk_rev_full: 0,
    max_efuse_blk_rev_full: u16::MAX,
    mmu_page_size: 16, // 64KB = 2^16
    reserv3: [0; 3],
    reserv2: [0; 18],
};

// ===== 演示板 =====

/// 记录当前 CPU 频率配置的演示板
struct DemoBoard {
    freq: IsrMutex<FreqConfig>,
}

impl DemoBoard {
    const fn new() -> Self {
        Self {
            freq: new_isr_mutex(FreqConfig {
                source: ClockSource::Pll,
                cpu_mhz: config::DEFAULT_CPU_MHZ,
                apb_mhz: config::APB_PLL_MHZ,
            }),
        }
    }
}

impl ClockControl for DemoBoard {
    fn set_cpu_frequency(&self, config: &FreqConfig) {
        self.freq.lock(|f| *f.borrow_mut() = *config);
    }

    fn current_frequency(&self) -> FreqConfig {
        self.freq.lock(|f| *f.borrow())
    }
}

impl LightSleep for DemoBoard {
    fn light_sleep(&self, duration_us: u64) {
        Delay::new().delay_micros(duration_us.min(u32::MAX as u64) as u32);
    }
}

// ===== 静态分配 =====
type Pm = PmContext<Esp32s3Platform<DemoBoard>>;

static PM_CELL: StaticCell<Pm> = StaticCell::new();
static PM: OnceLock<&'static Pm> = OnceLock::new();

/// 采样计数
static SAMPLES: AtomicU32 = AtomicU32::new(0);

#[esp_hal::handler]
fn freq_switch_core0() {
    if let Some(pm) = PM.try_get() {
        pm.on_interrupt_entry(CoreId::Core0);
    }
    Esp32s3Platform::<DemoBoard>::ack_freq_switch(CoreId::Core0);
}

/// 模拟一次外设采样
fn sample(pm: &Pm, lock: rustpm::LockHandle, delay: &Delay) {
    if let Err(e) = pm.acquire(lock) {
        log_warn!("sensor lock: {}", e);
        return;
    }
    delay.delay_micros(500);
    SAMPLES.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = pm.release(lock) {
        log_warn!("sensor lock release: {}", e);
    }
}

#[esp_hal::main]
fn main() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default());
    let delay = Delay::new();

    log_info!("RustPM demo starting on ESP32-S3");

    // ========================================
    // 1. 核间中断 (单核运行时只绑定 Core0)
    // ========================================
    let mut sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    sw_ints
        .software_interrupt2
        .set_interrupt_handler(freq_switch_core0);

    let platform = Esp32s3Platform::new(
        sw_ints.software_interrupt2,
        sw_ints.software_interrupt3,
        1,
        DemoBoard::new(),
    );

    // ========================================
    // 2. PM 初始化与配置
    // ========================================
    let pm: &'static Pm = PM_CELL.init(PmContext::new(platform));
    let _ = PM.init(pm);

    pm.init().unwrap();
    pm.configure(PmConfig {
        max_freq_mhz: 240,
        min_freq_mhz: 40,
        light_sleep_enable: true,
    })
    .unwrap();

    let sensor = pm.create_lock(LockType::ApbFreqMax, "sensor").unwrap();

    // ========================================
    // 3. 主循环 = 空闲任务
    // ========================================
    let mut round: u32 = 0;
    loop {
        sample(pm, sensor, &delay);

        pm.on_idle_enter(CoreId::Core0);
        if let SleepOutcome::Slept { slept_us, step_ticks } = pm.on_idle_sleep(CoreId::Core0, 50_000) {
            log_info!("light sleep {}us, {} ticks", slept_us, step_ticks);
        }
        pm.on_idle_wait(CoreId::Core0, || delay.delay_micros(1_000));

        // 回到工作: 与真实中断入口相同
        pm.on_interrupt_entry(CoreId::Core0);

        round = round.wrapping_add(1);
        if round % 100 == 0 {
            let mut out: heapless::String<1024> = heapless::String::new();
            if pm.dump_stats(&mut out).is_ok() {
                log_info!("samples={}\n{}", SAMPLES.load(Ordering::Relaxed), out.as_str());
            }
        }
    }
}
