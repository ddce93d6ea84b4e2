//! 条件编译日志系统
//!
//! 根据 feature 选择不同的日志后端:
//! - `log-defmt`: 使用 defmt (高效二进制日志)
//! - `dev` / `log-println`: 使用 esp-println (文本日志)
//! - 默认 (release / 主机测试): 完全禁用日志 (零开销)
//!
//! 电源管理代码在中断入口、空闲钩子中运行，
//! 这些路径上只允许 `log_trace!`，且默认编译为空。

// ===================================================================
// defmt 后端 (feature = "log-defmt")
// ===================================================================
#[cfg(feature = "log-defmt")]
#[doc(hidden)]
#[macro_export]
macro_rules! __pm_log {
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (trace, $($arg:tt)*) => { defmt::trace!($($arg)*) };
}

// ===================================================================
// esp-println 后端 (feature = "dev" 或 "log-println")
// ===================================================================
#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[doc(hidden)]
#[macro_export]
macro_rules! __pm_log {
    (error, $($arg:tt)*) => { esp_println::println!("[ERROR][pm] {}", format_args!($($arg)*)) };
    (warn, $($arg:tt)*) => { esp_println::println!("[WARN][pm] {}", format_args!($($arg)*)) };
    (info, $($arg:tt)*) => { esp_println::println!("[INFO][pm] {}", format_args!($($arg)*)) };
    (debug, $($arg:tt)*) => { esp_println::println!("[DEBUG][pm] {}", format_args!($($arg)*)) };
    (trace, $($arg:tt)*) => { esp_println::println!("[TRACE][pm] {}", format_args!($($arg)*)) };
}

// ===================================================================
// 空实现 (release 模式，无日志 feature)
// ===================================================================
#[cfg(not(any(feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[doc(hidden)]
#[macro_export]
macro_rules! __pm_log {
    ($level:ident, $($arg:tt)*) => {{
        // 仍然做一次格式检查，但不产生任何代码
        if false {
            let _ = core::format_args!($($arg)*);
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__pm_log!(error, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__pm_log!(warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__pm_log!(info, $($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__pm_log!(debug, $($arg)*) };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::__pm_log!(trace, $($arg)*) };
}

// ===================================================================
// 便捷重导出
// ===================================================================
pub use log_debug;
pub use log_error;
pub use log_info;
pub use log_trace;
pub use log_warn;
