use std::time::{SystemTime, UNIX_EPOCH};

/// 时间来源，租约计时与滑动窗口都通过它取当前时间（Unix 秒）
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
