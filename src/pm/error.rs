//! 电源管理错误类型
//!
//! - [`PmError`]: 可恢复错误，同步返回给调用者
//! - [`PmFault`]: 硬件/协调故障，由上层转换为致命错误

use core::fmt;

use super::hal::CoreId;

/// 可恢复的电源管理错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PmError {
    /// 参数无效 (频率范围错误、句柄失效)
    InvalidArgument,
    /// 状态无效 (释放未持有的锁、删除被持有的锁、重复初始化)
    InvalidState,
    /// 当前构建不支持该配置
    NotSupported,
    /// 固定大小的表已满
    NoMem,
}

impl fmt::Display for PmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::InvalidState => write!(f, "Invalid state"),
            Self::NotSupported => write!(f, "Not supported"),
            Self::NoMem => write!(f, "Out of resources"),
        }
    }
}

/// 不可恢复的协调故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PmFault {
    /// 另一核心未在限定时间内完成 CCOMPARE 更新
    HandshakeTimeout {
        /// 未响应的核心
        core: CoreId,
    },
    /// 等待进行中的模式切换超时
    SwitchTimeout,
}

impl fmt::Display for PmFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeTimeout { core } => {
                write!(f, "Failed to update CCOMPARE on {}, possible deadlock", core)
            }
            Self::SwitchTimeout => write!(f, "Mode switch did not complete, possible deadlock"),
        }
    }
}
