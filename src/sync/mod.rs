//! 同步原语模块
//!
//! 提供中断安全的同步原语，基于 embassy-sync / portable-atomic 封装:
//! - `IsrMutex`: 可在中断中使用的阻塞互斥锁
//! - `AtomicFlag`: 核间单比特通知

pub mod primitives;

pub use primitives::{AtomicFlag, IsrMutex};
