use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, ConfigError};
use crate::infrastructure::remote::Locator;

/// 程序配置文件
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 编号固定前缀
    pub id_prefix: String,
    /// 起始序号（含）
    pub start: u32,
    /// 结束序号（含）
    pub end: u32,
    /// 下拉框中要选择的区间值（如学期）
    pub range_selector: String,
    /// 并发会话数量
    pub worker_count: usize,
    /// 单个编号最多尝试次数
    pub max_attempts: u32,
    /// 单次等待页面元素的超时（秒）
    pub wait_timeout_secs: u64,
    /// 两次尝试之间的固定间隔（毫秒）
    pub inter_attempt_delay_ms: u64,
    /// 提交后等待页面稳定的时间（毫秒）
    pub settle_delay_ms: u64,
    /// "未找到结果" 的处理策略
    pub no_result_policy: NoResultPolicy,
    /// 会话故障后允许重建会话的次数
    pub max_session_restarts: u32,
    /// 整体运行截止时间（秒），不设置则无限等待
    pub run_deadline_secs: Option<u64>,
    /// 结果输出文件
    pub output_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 浏览器配置 ---
    pub headless: bool,
    pub chrome_executable: Option<String>,
    // --- 验证码识别配置 ---
    pub recognizer: RecognizerKind,
    pub charset_hint: String,
    pub tesseract_cmd: String,
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- 站点配置 ---
    pub site: SiteProfile,
    pub markers: MarkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_prefix: "0103AL231".to_string(),
            start: 1,
            end: 84,
            range_selector: "4".to_string(),
            worker_count: 4,
            max_attempts: 5,
            wait_timeout_secs: 20,
            inter_attempt_delay_ms: 3000,
            settle_delay_ms: 2000,
            no_result_policy: NoResultPolicy::Retry,
            max_session_restarts: 0,
            run_deadline_secs: None,
            output_file: "results.txt".to_string(),
            verbose_logging: false,
            headless: false,
            chrome_executable: None,
            recognizer: RecognizerKind::Tesseract,
            charset_hint: "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".to_string(),
            tesseract_cmd: "tesseract".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            site: SiteProfile::default(),
            markers: MarkerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// 先读取 TOML 配置文件（不存在则使用默认值），再用环境变量覆盖
    pub fn load(path: &Path) -> Result<Self> {
        let base = if path.exists() {
            let display = path.display().to_string();
            let content = std::fs::read_to_string(path)
                .map_err(|e| AppError::file_read_failed(display.as_str(), e))?;
            toml::from_str::<Config>(&content)
                .map_err(|e| AppError::toml_parse_failed(display.as_str(), e))?
        } else {
            Self::default()
        };
        Ok(base.apply_env())
    }

    fn apply_env(self) -> Self {
        let default = self;
        Self {
            id_prefix: std::env::var("ID_PREFIX").unwrap_or(default.id_prefix),
            start: std::env::var("RANGE_START").ok().and_then(|v| v.parse().ok()).unwrap_or(default.start),
            end: std::env::var("RANGE_END").ok().and_then(|v| v.parse().ok()).unwrap_or(default.end),
            range_selector: std::env::var("RANGE_SELECTOR").unwrap_or(default.range_selector),
            worker_count: std::env::var("WORKER_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.worker_count),
            max_attempts: std::env::var("MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_attempts),
            wait_timeout_secs: std::env::var("WAIT_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.wait_timeout_secs),
            inter_attempt_delay_ms: std::env::var("INTER_ATTEMPT_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.inter_attempt_delay_ms),
            settle_delay_ms: std::env::var("SETTLE_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.settle_delay_ms),
            no_result_policy: std::env::var("NO_RESULT_POLICY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.no_result_policy),
            max_session_restarts: std::env::var("MAX_SESSION_RESTARTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_session_restarts),
            run_deadline_secs: std::env::var("RUN_DEADLINE_SECS").ok().and_then(|v| v.parse().ok()).or(default.run_deadline_secs),
            output_file: std::env::var("OUTPUT_FILE").unwrap_or(default.output_file),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            headless: std::env::var("HEADLESS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.headless),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(default.chrome_executable),
            recognizer: std::env::var("RECOGNIZER").ok().and_then(|v| v.parse().ok()).unwrap_or(default.recognizer),
            charset_hint: std::env::var("CHARSET_HINT").unwrap_or(default.charset_hint),
            tesseract_cmd: std::env::var("TESSERACT_CMD").unwrap_or(default.tesseract_cmd),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            site: default.site,
            markers: default.markers,
        }
    }

    /// 运行前校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("id_prefix", "编号前缀不能为空"));
        }
        if self.range_selector.trim().is_empty() {
            return Err(ConfigError::invalid("range_selector", "区间选择值不能为空"));
        }
        if self.start > self.end {
            return Err(ConfigError::invalid(
                "start",
                format!("起始序号 {} 大于结束序号 {}", self.start, self.end),
            ));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::invalid("worker_count", "并发数至少为 1"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "尝试次数至少为 1"));
        }
        if self.wait_timeout_secs == 0 {
            return Err(ConfigError::invalid("wait_timeout_secs", "等待超时必须大于 0"));
        }
        if self.markers.success_marker.trim().is_empty() {
            return Err(ConfigError::invalid("markers.success_marker", "成功标记不能为空"));
        }
        if self.recognizer == RecognizerKind::Llm && self.llm_api_key.is_empty() {
            return Err(ConfigError::EnvVarNotFound {
                var_name: "LLM_API_KEY".to_string(),
            });
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn inter_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.inter_attempt_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

/// "页面已加载但没有成功标记" 的处理方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoResultPolicy {
    /// 与验证码错误一样重试
    Retry,
    /// 视为编号不存在，直接记为失败
    Permanent,
}

impl FromStr for NoResultPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(NoResultPolicy::Retry),
            "permanent" => Ok(NoResultPolicy::Permanent),
            other => Err(ConfigError::EnvVarParseFailed {
                var_name: "NO_RESULT_POLICY".to_string(),
                value: other.to_string(),
                expected_type: "retry | permanent".to_string(),
            }),
        }
    }
}

/// 验证码识别方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerKind {
    Tesseract,
    Llm,
}

impl FromStr for RecognizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Ok(RecognizerKind::Tesseract),
            "llm" => Ok(RecognizerKind::Llm),
            other => Err(ConfigError::EnvVarParseFailed {
                var_name: "RECOGNIZER".to_string(),
                value: other.to_string(),
                expected_type: "tesseract | llm".to_string(),
            }),
        }
    }
}

/// 目标站点的表单元素定位
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub form_url: String,
    /// 需要先点击的项目选项（如 B.Tech）
    pub program_option: Locator,
    /// 区间下拉框（如学期）
    pub range_select: Locator,
    pub challenge_image: Locator,
    pub identifier_input: Locator,
    pub challenge_input: Locator,
    pub submit_button: Locator,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            form_url: "https://result.rgpv.ac.in/Result/ProgramSelect.aspx".to_string(),
            program_option: Locator::xpath("//label[@for='radlstProgram_1']"),
            range_select: Locator::css("#ctl00_ContentPlaceHolder1_drpSemester"),
            challenge_image: Locator::xpath("//img[contains(@src, 'CaptchaImage.axd')]"),
            identifier_input: Locator::css("#ctl00_ContentPlaceHolder1_txtrollno"),
            challenge_input: Locator::css("#ctl00_ContentPlaceHolder1_TextBox1"),
            submit_button: Locator::xpath("//input[@value='View Result']"),
        }
    }
}

/// 结果页面的判定文本
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// 出现任意一个即视为验证码被拒绝
    pub rejection_markers: Vec<String>,
    /// 成功页面必定包含的文本
    pub success_marker: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            rejection_markers: vec![
                "Invalid Captcha".to_string(),
                "Please enter correct captcha".to_string(),
            ],
            success_marker: "Enrollment No".to_string(),
        }
    }
}
