//! 重试策略 - 业务能力层
//!
//! 对单个编号最多尝试 `max_attempts` 次，两次尝试之间固定等待。
//! 不做指数退避：等待只是为了让页面异步渲染完成，同时避免频繁请求远端。

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::infrastructure::SessionError;
use crate::models::{Identifier, Outcome};

/// 执行一次完整尝试的能力
#[async_trait]
pub trait AttemptRunner: Send {
    /// `attempt` 从 1 开始
    async fn attempt(&mut self, identifier: &Identifier, attempt: u32)
        -> Result<Outcome, SessionError>;
}

/// 单个编号的最终决定
#[derive(Debug)]
pub enum RetryDecision {
    Completed { payload: String, attempts: u32 },
    /// 次数用尽或判定为不可重试
    Failed { attempts: u32 },
    /// 会话故障，需要中止当前 worker 区间
    Fault { error: SessionError, attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    inter_attempt_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, inter_attempt_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            inter_attempt_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 反复执行 `runner` 直到成功、不可重试或次数用尽
    ///
    /// 每次需要重试前调用 `on_retry(已用次数, 本次结果)`。
    pub async fn run<A, F>(&self, runner: &mut A, identifier: &Identifier, on_retry: F) -> RetryDecision
    where
        A: AttemptRunner,
        F: FnMut(u32, &Outcome) + Send,
    {
        self.resume(runner, identifier, 0, on_retry).await
    }

    /// 与 `run` 相同，但前 `used` 次尝试已在别的会话上用掉
    ///
    /// 返回的 `attempts` 包含已用掉的次数。
    pub async fn resume<A, F>(
        &self,
        runner: &mut A,
        identifier: &Identifier,
        used: u32,
        mut on_retry: F,
    ) -> RetryDecision
    where
        A: AttemptRunner,
        F: FnMut(u32, &Outcome) + Send,
    {
        if used >= self.max_attempts {
            return RetryDecision::Failed { attempts: used };
        }

        for attempt in used + 1..=self.max_attempts {
            let outcome = match runner.attempt(identifier, attempt).await {
                Ok(outcome) => outcome,
                Err(error) if error.is_fault() => {
                    warn!("{} 第 {} 次尝试时会话故障: {}", identifier, attempt, error);
                    return RetryDecision::Fault {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) => Outcome::Transient(error.to_string()),
            };

            match outcome {
                Outcome::Success(payload) => {
                    return RetryDecision::Completed {
                        payload,
                        attempts: attempt,
                    };
                }
                Outcome::NoResult { permanent: true } => {
                    debug!("{} 未找到结果，按配置不再重试", identifier);
                    return RetryDecision::Failed { attempts: attempt };
                }
                other => {
                    debug!("{} 第 {}/{} 次尝试: {}", identifier, attempt, self.max_attempts, other);
                    if attempt < self.max_attempts {
                        on_retry(attempt, &other);
                        sleep(self.inter_attempt_delay).await;
                    }
                }
            }
        }

        RetryDecision::Failed {
            attempts: self.max_attempts,
        }
    }
}
