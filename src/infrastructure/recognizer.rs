//! 验证码识别 - 基础设施层
//!
//! 识别结果不保证正确，调用方依靠重试兜底。
//!
//! ## 实现
//! - `TesseractRecognizer` - 调用本地 tesseract 可执行文件（单行模式 `--psm 7`）
//! - `LlmRecognizer` - 通过 `async-openai` 调用兼容 OpenAI API 的视觉模型

use std::process::Stdio;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("无法启动识别程序 {cmd}: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("识别程序执行失败: {0}")]
    Process(String),
    #[error("LLM 识别失败 (模型: {model}): {reason}")]
    Llm { model: String, reason: String },
}

/// 图像转文本能力
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// 识别图像中的文字，`charset_hint` 为允许出现的字符
    async fn recognize(&self, image: &[u8], charset_hint: &str) -> Result<String, RecognizerError>;
}

/// 只保留字母和数字
pub fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// 本地 tesseract 识别
pub struct TesseractRecognizer {
    cmd: String,
}

impl TesseractRecognizer {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &[u8], charset_hint: &str) -> Result<String, RecognizerError> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            "7".to_string(),
        ];
        if !charset_hint.is_empty() {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={}", charset_hint));
        }

        let mut child = Command::new(&self.cmd)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RecognizerError::Spawn {
                cmd: self.cmd.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image)
                .await
                .map_err(|e| RecognizerError::Process(e.to_string()))?;
            // 关闭 stdin，tesseract 才会开始识别
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RecognizerError::Process(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognizerError::Process(format!(
                "{} 退出码 {:?}: {}",
                self.cmd,
                output.status.code(),
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("tesseract 识别结果: {:?}", text);
        Ok(text)
    }
}

/// 视觉大模型识别
pub struct LlmRecognizer {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmRecognizer {
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    fn llm_err(&self, reason: impl std::fmt::Display) -> RecognizerError {
        RecognizerError::Llm {
            model: self.model_name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl TextRecognizer for LlmRecognizer {
    async fn recognize(&self, image: &[u8], charset_hint: &str) -> Result<String, RecognizerError> {
        debug!("调用 LLM 识别验证码，模型: {}, 图片 {} 字节", self.model_name, image.len());

        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content("你是一个验证码识别助手。只输出图片中的验证码字符，不要输出任何其他内容。")
            .build()
            .map_err(|e| self.llm_err(e))?;

        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: format!("识别这张验证码图片。允许的字符: {}", charset_hint),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: data_url,
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()
            .map_err(|e| self.llm_err(e))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.0)
            .max_tokens(32u32)
            .build()
            .map_err(|e| self.llm_err(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.llm_err(e)
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| self.llm_err("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_alphanumerics() {
        assert_eq!(sanitize(" aB3 -x9\n"), "aB3x9");
        assert_eq!(sanitize("“Q7K2”."), "Q7K2");
        assert_eq!(sanitize("..."), "");
    }

    #[test]
    fn test_sanitize_drops_non_ascii_letters() {
        assert_eq!(sanitize("验证码AB12"), "AB12");
    }

    #[tokio::test]
    async fn test_missing_tesseract_binary_is_spawn_error() {
        let recognizer = TesseractRecognizer::new("definitely-not-a-real-ocr-binary");
        let result = recognizer.recognize(&[0u8; 4], "ABC").await;
        assert!(matches!(result, Err(RecognizerError::Spawn { .. })));
    }
}
