//! 频率配置表
//!
//! 每个功耗模式对应一个具体的时钟配置。该表只由
//! [`PmContext::configure`](super::PmContext::configure) 修改，
//! 模式切换的热路径只读取它。

use super::error::PmError;
use super::mode::PowerMode;
use crate::config;

/// CPU 时钟源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// 晶振 (可分频)
    Xtal,
    /// PLL
    Pll,
}

/// 具体的时钟配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FreqConfig {
    /// 时钟源
    pub source: ClockSource,
    /// CPU 频率 (MHz)，也即每微秒 CCOUNT tick 数
    pub cpu_mhz: u32,
    /// APB 频率 (MHz)
    pub apb_mhz: u32,
}

impl FreqConfig {
    /// 将 CPU 频率转换为时钟配置
    ///
    /// 80/160/240MHz 使用 PLL (APB 固定 80MHz)；
    /// 晶振频率的整数分频使用 XTAL (APB 与 CPU 同频)。
    pub const fn from_mhz(cpu_mhz: u32, xtal_mhz: u32) -> Option<Self> {
        match cpu_mhz {
            80 | 160 | 240 => Some(FreqConfig {
                source: ClockSource::Pll,
                cpu_mhz,
                apb_mhz: config::APB_PLL_MHZ,
            }),
            0 => None,
            mhz if mhz <= xtal_mhz && xtal_mhz % mhz == 0 => Some(FreqConfig {
                source: ClockSource::Xtal,
                cpu_mhz: mhz,
                apb_mhz: mhz,
            }),
            _ => None,
        }
    }

    /// 每微秒 CPU 周期数
    #[inline(always)]
    pub const fn ticks_per_us(&self) -> u32 {
        self.cpu_mhz
    }
}

/// 应用传入的电源管理配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PmConfig {
    /// 最高 CPU 频率 (MHz)，用于 CPU_MAX
    pub max_freq_mhz: u32,
    /// 最低 CPU 频率 (MHz)，用于 APB_MIN / LIGHT_SLEEP
    pub min_freq_mhz: u32,
    /// 无锁时是否允许自动进入 light sleep
    pub light_sleep_enable: bool,
}

impl Default for PmConfig {
    fn default() -> Self {
        Self {
            max_freq_mhz: config::DEFAULT_CPU_MHZ,
            min_freq_mhz: config::DEFAULT_CPU_MHZ,
            light_sleep_enable: false,
        }
    }
}

/// 模式 → 时钟配置 表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreqTable {
    rows: [FreqConfig; PowerMode::COUNT],
}

impl FreqTable {
    /// 所有模式使用同一配置
    pub const fn uniform(config: FreqConfig) -> Self {
        Self {
            rows: [config; PowerMode::COUNT],
        }
    }

    /// 校验配置并构造频率表
    ///
    /// 失败时不产生任何副作用。
    pub fn from_config(pm: &PmConfig, xtal_mhz: u32) -> Result<Self, PmError> {
        if !cfg!(feature = "tickless-idle") && pm.light_sleep_enable {
            return Err(PmError::NotSupported);
        }
        if pm.min_freq_mhz > pm.max_freq_mhz {
            return Err(PmError::InvalidArgument);
        }
        let cpu_max =
            FreqConfig::from_mhz(pm.max_freq_mhz, xtal_mhz).ok_or(PmError::InvalidArgument)?;
        let apb_min =
            FreqConfig::from_mhz(pm.min_freq_mhz, xtal_mhz).ok_or(PmError::InvalidArgument)?;
        // 低于晶振频率时由 REF_CLK 分频，分频后不得低于下限
        if pm.min_freq_mhz < xtal_mhz && pm.min_freq_mhz < config::XTAL_DIV_MIN_MHZ {
            return Err(PmError::InvalidArgument);
        }

        // 240MHz 与 80/160MHz 之间切换需要关闭 PLL，
        // 因此 APB_MAX 在 240MHz 下保持 240MHz
        let apb_max_mhz = match pm.max_freq_mhz {
            240 => 240,
            160 | 80 => 80,
            other => other,
        }
        .max(pm.min_freq_mhz);
        let apb_max = FreqConfig::from_mhz(apb_max_mhz, xtal_mhz).ok_or(PmError::InvalidArgument)?;

        let mut rows = [apb_min; PowerMode::COUNT];
        rows[PowerMode::ApbMax.index()] = apb_max;
        rows[PowerMode::CpuMax.index()] = cpu_max;
        Ok(Self { rows })
    }

    /// 指定模式的配置
    #[inline]
    pub fn get(&self, mode: PowerMode) -> FreqConfig {
        self.rows[mode.index()]
    }
}
