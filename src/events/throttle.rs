//! 进度事件节流器
//!
//! 控制进度回调频率（默认 500ms），并保证同一文件内上报的百分比不回退

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 500;

#[derive(Debug, Default)]
struct ThrottleState {
    last_emit: Option<Instant>,
    last_percent: f64,
}

/// 进度事件节流器
///
/// 多个 worker 共享同一个节流器；回调在锁内执行，
/// 因此观察者看到的百分比序列严格按发布顺序单调不减
#[derive(Debug)]
pub struct ProgressThrottler {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl ProgressThrottler {
    /// 创建新的节流器
    ///
    /// # 参数
    /// * `interval` - 最小发布间隔
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    /// 按需发布一次进度
    ///
    /// 百分比小于已发布值或已发布过 100% 时丢弃；`force` 为 true 时忽略时间间隔。
    /// 返回是否调用了 `emit`
    pub fn emit_if_due<F>(&self, percent: f64, force: bool, emit: F) -> bool
    where
        F: FnOnce(f64),
    {
        let mut state = self.state.lock();

        if percent < state.last_percent {
            return false;
        }
        // 100% 只上报一次
        if state.last_emit.is_some() && state.last_percent >= 100.0 {
            return false;
        }

        let now = Instant::now();
        let due = match state.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if !due && !force {
            return false;
        }

        state.last_emit = Some(now);
        state.last_percent = percent;
        emit(percent);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn throttler_ms(interval_ms: u64) -> ProgressThrottler {
        ProgressThrottler::new(Duration::from_millis(interval_ms))
    }

    #[test]
    fn test_throttler_basic() {
        let throttler = throttler_ms(100);

        let mut emitted = Vec::new();

        // 第一次应该发布
        assert!(throttler.emit_if_due(10.0, false, |p| emitted.push(p)));

        // 立即再次调用，不应该发布
        assert!(!throttler.emit_if_due(20.0, false, |p| emitted.push(p)));
        assert_eq!(emitted, vec![10.0]);
    }

    #[test]
    fn test_throttler_after_interval() {
        let throttler = throttler_ms(50);

        assert!(throttler.emit_if_due(10.0, false, |_| {}));

        thread::sleep(Duration::from_millis(60));

        assert!(throttler.emit_if_due(20.0, false, |_| {}));
    }

    #[test]
    fn test_force_emit_final() {
        let throttler = throttler_ms(1000);
        let mut emitted = Vec::new();

        throttler.emit_if_due(40.0, false, |p| emitted.push(p));
        throttler.emit_if_due(60.0, false, |p| emitted.push(p));
        throttler.emit_if_due(100.0, true, |p| emitted.push(p));

        assert_eq!(emitted, vec![40.0, 100.0]);
    }

    #[test]
    fn test_never_goes_backwards() {
        let throttler = throttler_ms(0);

        let mut emitted = Vec::new();

        assert!(throttler.emit_if_due(50.0, false, |p| emitted.push(p)));
        assert!(!throttler.emit_if_due(30.0, true, |p| emitted.push(p)));
        assert!(throttler.emit_if_due(50.0, false, |p| emitted.push(p)));
        assert_eq!(emitted, vec![50.0, 50.0]);
    }

    #[test]
    fn test_completion_reported_once() {
        let throttler = throttler_ms(0);

        assert!(throttler.emit_if_due(100.0, true, |_| {}));
        assert!(!throttler.emit_if_due(100.0, true, |_| {}));
    }
}
