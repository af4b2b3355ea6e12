//! 指数退避重试策略

use std::time::Duration;

use rand::Rng;

/// 重试策略
///
/// 第 n 次失败后的等待时间为 `initial_delay * 2^(n-1)`，上限 `max_delay`，
/// 可附加不超过 10% 的抖动。同一次评分内等待时间单调不减。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// 第 `failures` 次失败后的基础等待时间（不含抖动）
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            failures: 0,
            last: Duration::ZERO,
        }
    }
}

/// 单次评分的退避状态
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    last: Duration,
}

impl Backoff {
    /// 记录一次失败并返回下一次等待时间
    ///
    /// `retry_after` 为后端建议的等待时间，不超过 `max_delay`
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Duration {
        self.failures += 1;
        let base = self.policy.base_delay(self.failures);

        let mut delay = base;
        if self.policy.jitter {
            let max_jitter_ms = (base.as_millis() / 10) as u64;
            if max_jitter_ms > 0 {
                let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
                delay += Duration::from_millis(jitter);
            }
        }
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }

        delay = delay.min(self.policy.max_delay).max(self.last);
        self.last = delay;
        delay
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// 是否已用完所有尝试
    pub fn exhausted(&self) -> bool {
        self.failures >= self.policy.max_attempts
    }
}
