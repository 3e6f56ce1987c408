use std::fmt;

/// 单次提交尝试的结果
///
/// 每次尝试只产生一个，且只在该次尝试内被消费。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 成功，携带页面正文
    Success(String),
    /// 远端明确提示验证码错误
    Rejected,
    /// 页面加载了，但没有成功标记
    ///
    /// `permanent` 由分类器按配置的策略决定，为 true 时不再重试。
    NoResult { permanent: bool },
    /// 超时或会话抖动
    Transient(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(_) => write!(f, "成功"),
            Outcome::Rejected => write!(f, "验证码被拒绝"),
            Outcome::NoResult { permanent: false } => write!(f, "未找到结果"),
            Outcome::NoResult { permanent: true } => write!(f, "未找到结果（不再重试）"),
            Outcome::Transient(reason) => write!(f, "临时错误: {}", reason),
        }
    }
}
