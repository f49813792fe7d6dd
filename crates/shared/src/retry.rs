//! 重试策略与执行器
//!
//! 消费循环用它重试失败的处理器调用。重试次数与退避参数来自
//! `retry_count` / `retry_backoff` 等选项；倍数为 1.0 时即固定间隔。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{ClientOptions, keys};
use crate::error::Result;

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 首次失败等 `initial_delay`，之后每次乘以 `multiplier`，不超过 `max_delay`。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多重试 3 次，初始等待 1 秒，最大等待 30 秒，倍数 2.0
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 固定间隔重试
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// 从选项表读取，缺失的项使用默认值
    pub fn from_options(options: &ClientOptions) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_retries: options.parse_or(keys::RETRY_COUNT, defaults.max_retries)?,
            initial_delay: options.duration_ms_or(keys::RETRY_BACKOFF, defaults.initial_delay)?,
            max_delay: options.duration_ms_or(keys::RETRY_MAX_BACKOFF, defaults.max_delay)?,
            multiplier: options.parse_or(keys::RETRY_BACKOFF_MULTIPLIER, defaults.multiplier)?,
        })
    }

    /// 计算第 N 次重试的等待时间（attempt 从 0 开始）
    ///
    /// 公式: initial_delay * multiplier^attempt，结果不超过 max_delay。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// attempt 表示已经重试的次数，小于 max_retries 时可继续
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy — 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 重试执行结果
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: std::result::Result<T, E>,
    /// 返回错误的调用次数（含最后一次）
    pub failed_attempts: u32,
}

/// 带重试的异步执行器
///
/// 操作最多执行 `1 + max_retries` 次，仅在 `is_retryable` 返回 true 时重试。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    let mut failed_attempts: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return RetryOutcome {
                    result: Ok(value),
                    failed_attempts,
                };
            }
            Err(err) => {
                failed_attempts += 1;

                if !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        error = %err,
                        "操作失败且不可重试，直接返回错误"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        failed_attempts,
                    };
                }

                if !policy.should_retry(attempt) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_retries = policy.max_retries,
                        error = %err,
                        "已达最大重试次数，放弃重试"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        failed_attempts,
                    };
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
