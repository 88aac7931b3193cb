//! 事件模块
//!
//! - `types.rs`: 上传事件、进度报告与会话汇总
//! - `notifier.rs`: 进度/汇总通知接口
//! - `throttle.rs`: 进度事件节流

mod notifier;
mod throttle;
mod types;

pub use notifier::*;
pub use throttle::*;
pub use types::*;
