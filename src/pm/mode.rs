//! 功耗模式与锁类型
//!
//! 四个功耗模式按功耗从低到高排列，序号越小功耗越低、保证越少。
//! 锁类型到模式的映射在编译期由穷尽 `match` 固定。

use core::fmt;

/// 功耗模式 (按功耗从低到高排序)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerMode {
    /// 允许 light sleep，空闲时时钟门控
    LightSleep = 0,
    /// 最低 CPU/APB 频率
    ApbMin = 1,
    /// APB 保持最高频率 (80MHz)
    ApbMax = 2,
    /// CPU 保持最高频率
    CpuMax = 3,
}

impl PowerMode {
    /// 模式数量
    pub const COUNT: usize = 4;

    /// 所有模式，从低功耗到高功耗
    pub const ALL: [PowerMode; Self::COUNT] = [
        PowerMode::LightSleep,
        PowerMode::ApbMin,
        PowerMode::ApbMax,
        PowerMode::CpuMax,
    ];

    /// 作为数组下标
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 统计输出中使用的短名称
    pub const fn name(self) -> &'static str {
        match self {
            PowerMode::LightSleep => "SLEEP",
            PowerMode::ApbMin => "APB_MIN",
            PowerMode::ApbMax => "APB_MAX",
            PowerMode::CpuMax => "CPU_MAX",
        }
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 应用可持有的约束类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LockType {
    /// 要求 CPU 运行在最高频率
    CpuFreqMax,
    /// 要求 APB 运行在最高频率
    ApbFreqMax,
    /// 禁止进入 light sleep
    NoLightSleep,
}

impl LockType {
    /// 锁类型对应的最低模式
    #[inline]
    pub const fn mode(self) -> PowerMode {
        match self {
            LockType::CpuFreqMax => PowerMode::CpuMax,
            LockType::ApbFreqMax => PowerMode::ApbMax,
            LockType::NoLightSleep => PowerMode::ApbMin,
        }
    }

    /// 统计输出中使用的名称
    pub const fn name(self) -> &'static str {
        match self {
            LockType::CpuFreqMax => "CPU_FREQ_MAX",
            LockType::ApbFreqMax => "APB_FREQ_MAX",
            LockType::NoLightSleep => "NO_LIGHT_SLEEP",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 当前被持有的模式位图 (bit i 对应 `PowerMode` 序号 i)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeMask(u8);

impl ModeMask {
    /// 空位图
    pub const EMPTY: ModeMask = ModeMask(0);

    #[inline(always)]
    const fn bit(mode: PowerMode) -> u8 {
        1 << mode as u8
    }

    /// 从原始位构造 (高位被截断)
    pub const fn from_bits(bits: u8) -> Self {
        ModeMask(bits & 0x0F)
    }

    /// 原始位
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, mode: PowerMode) -> bool {
        self.0 & Self::bit(mode) != 0
    }

    pub fn insert(&mut self, mode: PowerMode) {
        self.0 |= Self::bit(mode);
    }

    pub fn remove(&mut self, mode: PowerMode) {
        self.0 &= !Self::bit(mode);
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 位图中功耗最高的模式
    pub const fn highest(self) -> Option<PowerMode> {
        if self.contains(PowerMode::CpuMax) {
            Some(PowerMode::CpuMax)
        } else if self.contains(PowerMode::ApbMax) {
            Some(PowerMode::ApbMax)
        } else if self.contains(PowerMode::ApbMin) {
            Some(PowerMode::ApbMin)
        } else if self.contains(PowerMode::LightSleep) {
            Some(PowerMode::LightSleep)
        } else {
            None
        }
    }
}

/// 计算满足全部已持有锁的最低功耗模式
///
/// 优先级 (先匹配者胜出):
/// 1. 持有 CPU_MAX 锁 → CPU_MAX
/// 2. 持有 APB_MAX 锁 → APB_MAX
/// 3. 持有 APB_MIN 锁，或全局禁止 light sleep → APB_MIN
/// 4. 否则 → LIGHT_SLEEP
///
/// `light_sleep_enabled == false` 是全局策略，而不是一把锁。
pub const fn resolve(mask: ModeMask, light_sleep_enabled: bool) -> PowerMode {
    if mask.contains(PowerMode::CpuMax) {
        PowerMode::CpuMax
    } else if mask.contains(PowerMode::ApbMax) {
        PowerMode::ApbMax
    } else if mask.contains(PowerMode::ApbMin) || !light_sleep_enabled {
        PowerMode::ApbMin
    } else {
        PowerMode::LightSleep
    }
}
