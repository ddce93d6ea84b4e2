//! 芯片后端
//!
//! - `esp32s3`: 基于 esp-hal 1.0 与 xtensa-lx 的平台实现

pub mod esp32s3;

pub use esp32s3::{BoardHooks, Esp32s3Platform};
