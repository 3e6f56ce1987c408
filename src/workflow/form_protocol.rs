//! 表单提交流程 - 流程层
//!
//! 核心职责：定义"一次尝试"的完整步骤
//!
//! 状态顺序（不可跳过，重试时从头开始）：
//! `Init → Navigated → OptionSelected → RangeSelected → ChallengeCaptured
//!  → ChallengeTranscribed → Submitted → Classified`
//!
//! 每一步都是带超时的等待，任何一步超时都以 `Transient` 结束本次尝试。
//! 远端表单在重新导航后会重置，所以不存在"从中间继续"。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{Config, SiteProfile};
use crate::infrastructure::{
    sanitize, Locator, RemoteSession, SessionError, TextRecognizer, WaitCondition,
};
use crate::models::{Identifier, Outcome};
use crate::services::{AttemptRunner, OutcomeClassifier};
use crate::workflow::form_ctx::FormCtx;

/// 单次尝试所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormState {
    Init,
    Navigated,
    OptionSelected,
    RangeSelected,
    ChallengeCaptured,
    ChallengeTranscribed,
    Submitted,
    Classified,
}

impl fmt::Display for FormState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormState::Init => "初始",
            FormState::Navigated => "已打开表单",
            FormState::OptionSelected => "已选择项目",
            FormState::RangeSelected => "已选择区间",
            FormState::ChallengeCaptured => "已截取验证码",
            FormState::ChallengeTranscribed => "已识别验证码",
            FormState::Submitted => "已提交",
            FormState::Classified => "已判定",
        };
        f.write_str(name)
    }
}

/// 表单提交流程
///
/// - 只持有站点配置、识别器和判定器
/// - 不持有会话，会话由调用方（worker）传入
/// - 不关心重试，重试由 `RetryPolicy` 决定
pub struct FormProtocol {
    site: SiteProfile,
    range_selector: String,
    charset_hint: String,
    recognizer: Arc<dyn TextRecognizer>,
    classifier: OutcomeClassifier,
    wait_timeout: Duration,
    settle_delay: Duration,
}

impl FormProtocol {
    pub fn new(config: &Config, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            site: config.site.clone(),
            range_selector: config.range_selector.clone(),
            charset_hint: config.charset_hint.clone(),
            recognizer,
            classifier: OutcomeClassifier::new(&config.markers, config.no_result_policy),
            wait_timeout: config.wait_timeout(),
            settle_delay: config.settle_delay(),
        }
    }

    /// 绑定到一个会话，得到可交给 `RetryPolicy` 的执行器
    pub fn bind<'a, S: RemoteSession>(
        &'a self,
        session: &'a mut S,
        worker: usize,
    ) -> BoundAttempt<'a, S> {
        BoundAttempt {
            protocol: self,
            session,
            worker,
        }
    }

    /// 执行一次完整尝试
    ///
    /// 只有会话故障会以 `Err` 返回，其余错误都转换为 `Outcome::Transient`。
    pub async fn attempt<S: RemoteSession>(
        &self,
        session: &mut S,
        ctx: &FormCtx<'_>,
    ) -> Result<Outcome, SessionError> {
        let mut state = FormState::Init;
        match self.drive(session, ctx, &mut state).await {
            Ok(outcome) => {
                info!("{} {}", ctx, outcome);
                Ok(outcome)
            }
            Err(e) if e.is_fault() => Err(e),
            Err(e) => {
                warn!("{} 在「{}」之后中断: {}", ctx, state, e);
                Ok(Outcome::Transient(format!("{}之后中断: {}", state, e)))
            }
        }
    }

    async fn drive<S: RemoteSession>(
        &self,
        session: &mut S,
        ctx: &FormCtx<'_>,
        state: &mut FormState,
    ) -> Result<Outcome, SessionError> {
        let timeout = self.wait_timeout;

        // 上一次尝试遗留的弹窗会阻塞导航
        if session.pending_dialog().await? {
            debug!("{} 确认遗留弹窗", ctx);
            session.accept_dialog().await?;
        }

        session.navigate(&self.site.form_url).await?;
        *state = FormState::Navigated;

        let option = session
            .wait_until(&WaitCondition::Clickable(self.site.program_option.clone()), timeout)
            .await?;
        session.click(&option).await?;
        *state = FormState::OptionSelected;

        let dropdown = session
            .wait_until(&WaitCondition::Present(self.site.range_select.clone()), timeout)
            .await?;
        session.select_option(&dropdown, &self.range_selector).await?;
        *state = FormState::RangeSelected;
        debug!("{} 已选择区间: {}", ctx, self.range_selector);

        let image_element = session
            .wait_until(&WaitCondition::Present(self.site.challenge_image.clone()), timeout)
            .await?;
        let challenge = session.capture_image(&image_element).await?;
        *state = FormState::ChallengeCaptured;

        // 验证码图片只使用一次
        let recognized = self.recognizer.recognize(&challenge, &self.charset_hint).await;
        drop(challenge);
        let answer = match recognized {
            Ok(raw) => sanitize(&raw),
            Err(e) => return Ok(Outcome::Transient(format!("验证码识别失败: {}", e))),
        };
        if answer.is_empty() {
            return Ok(Outcome::Transient("验证码识别结果为空".to_string()));
        }
        *state = FormState::ChallengeTranscribed;
        debug!("{} 识别出验证码: {}", ctx, answer);

        let id_input = session
            .wait_until(&WaitCondition::Present(self.site.identifier_input.clone()), timeout)
            .await?;
        session.set_text(&id_input, ctx.identifier.as_str()).await?;

        let challenge_input = session
            .wait_until(&WaitCondition::Present(self.site.challenge_input.clone()), timeout)
            .await?;
        session.set_text(&challenge_input, &answer).await?;

        let submit = session
            .wait_until(&WaitCondition::Clickable(self.site.submit_button.clone()), timeout)
            .await?;
        session.click(&submit).await?;
        *state = FormState::Submitted;

        sleep(self.settle_delay).await;
        // 弹窗会阻塞页面，有弹窗时直接交给判定器处理
        if !session.pending_dialog().await? {
            session
                .wait_until(&WaitCondition::Present(Locator::css("body")), timeout)
                .await?;
        }

        let outcome = self.classifier.classify(session).await?;
        *state = FormState::Classified;
        Ok(outcome)
    }
}

/// 绑定了会话的流程，每次 `attempt` 都从 `Init` 开始
pub struct BoundAttempt<'a, S> {
    protocol: &'a FormProtocol,
    session: &'a mut S,
    worker: usize,
}

#[async_trait]
impl<'a, S: RemoteSession> AttemptRunner for BoundAttempt<'a, S> {
    async fn attempt(
        &mut self,
        identifier: &Identifier,
        attempt: u32,
    ) -> Result<Outcome, SessionError> {
        let ctx = FormCtx::new(self.worker, identifier, attempt);
        self.protocol.attempt(&mut *self.session, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::RecognizerError;
    use crate::infrastructure::SessionResult;

    /// 记录所有调用的假会话
    #[derive(Default)]
    struct FakeSession {
        calls: Vec<String>,
        /// 等待该定位时超时
        timeout_on: Option<Locator>,
        fault_on_navigate: bool,
        dialog_after_submit: bool,
        dialog_open: bool,
        result_text: String,
    }

    #[async_trait]
    impl RemoteSession for FakeSession {
        type Element = Locator;

        async fn navigate(&mut self, url: &str) -> SessionResult<()> {
            if self.fault_on_navigate {
                return Err(SessionError::Fault("browser exited".into()));
            }
            self.calls.push(format!("navigate {}", url));
            Ok(())
        }

        async fn find_element(&mut self, locator: &Locator) -> SessionResult<Locator> {
            Ok(locator.clone())
        }

        async fn wait_until(
            &mut self,
            condition: &WaitCondition,
            timeout: Duration,
        ) -> SessionResult<Locator> {
            if self.timeout_on.as_ref() == Some(condition.locator()) {
                return Err(SessionError::TimeoutExceeded {
                    what: condition.to_string(),
                    timeout,
                });
            }
            Ok(condition.locator().clone())
        }

        async fn click(&mut self, element: &Locator) -> SessionResult<()> {
            self.calls.push(format!("click {}", element));
            if *element == SiteProfile::default().submit_button && self.dialog_after_submit {
                self.dialog_open = true;
            }
            Ok(())
        }

        async fn set_text(&mut self, element: &Locator, value: &str) -> SessionResult<()> {
            self.calls.push(format!("set {} = {}", element, value));
            Ok(())
        }

        async fn select_option(&mut self, element: &Locator, text: &str) -> SessionResult<()> {
            self.calls.push(format!("select {} = {}", element, text));
            Ok(())
        }

        async fn capture_image(&mut self, _element: &Locator) -> SessionResult<Vec<u8>> {
            self.calls.push("capture".into());
            Ok(vec![1, 2, 3])
        }

        async fn page_text(&mut self) -> SessionResult<String> {
            Ok(self.result_text.clone())
        }

        async fn page_source(&mut self) -> SessionResult<String> {
            Ok(format!("<html><body>{}</body></html>", self.result_text))
        }

        async fn pending_dialog(&mut self) -> SessionResult<bool> {
            Ok(self.dialog_open)
        }

        async fn accept_dialog(&mut self) -> SessionResult<()> {
            self.calls.push("accept dialog".into());
            self.dialog_open = false;
            Ok(())
        }
    }

    struct FixedRecognizer(&'static str);

    #[async_trait]
    impl TextRecognizer for FixedRecognizer {
        async fn recognize(&self, image: &[u8], _hint: &str) -> Result<String, RecognizerError> {
            assert_eq!(image, &[1, 2, 3]);
            Ok(self.0.to_string())
        }
    }

    fn protocol(recognized: &'static str) -> FormProtocol {
        let config = Config {
            settle_delay_ms: 0,
            ..Config::default()
        };
        FormProtocol::new(&config, Arc::new(FixedRecognizer(recognized)))
    }

    fn submitted(session: &FakeSession) -> bool {
        let submit = format!("click {}", SiteProfile::default().submit_button);
        session.calls.iter().any(|c| *c == submit)
    }

    #[tokio::test]
    async fn test_happy_path_runs_steps_in_order() {
        let site = SiteProfile::default();
        let mut session = FakeSession {
            result_text: "Enrollment No 0103AL231007".into(),
            ..FakeSession::default()
        };
        let id = Identifier::new("0103AL231", 7);
        let ctx = FormCtx::new(0, &id, 1);

        let outcome = protocol(" q7 K-2 ").attempt(&mut session, &ctx).await.unwrap();

        assert_eq!(outcome, Outcome::Success("Enrollment No 0103AL231007".into()));
        assert_eq!(
            session.calls,
            vec![
                format!("navigate {}", site.form_url),
                format!("click {}", site.program_option),
                format!("select {} = 4", site.range_select),
                "capture".to_string(),
                format!("set {} = 0103AL231007", site.identifier_input),
                format!("set {} = q7K2", site.challenge_input),
                format!("click {}", site.submit_button),
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_becomes_transient_without_submitting() {
        let mut session = FakeSession {
            timeout_on: Some(SiteProfile::default().range_select),
            ..FakeSession::default()
        };
        let id = Identifier::new("X", 1);
        let outcome = protocol("AB12")
            .attempt(&mut session, &FormCtx::new(0, &id, 1))
            .await
            .unwrap();

        match outcome {
            Outcome::Transient(reason) => assert!(reason.contains("已选择项目")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!submitted(&session));
    }

    #[tokio::test]
    async fn test_empty_transcription_is_transient() {
        let mut session = FakeSession::default();
        let id = Identifier::new("X", 1);
        let outcome = protocol(" .- ")
            .attempt(&mut session, &FormCtx::new(0, &id, 1))
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Transient(_)));
        assert!(!submitted(&session));
    }

    #[tokio::test]
    async fn test_dialog_after_submit_is_rejected_and_accepted() {
        let mut session = FakeSession {
            dialog_after_submit: true,
            result_text: "Enrollment No".into(),
            ..FakeSession::default()
        };
        let id = Identifier::new("X", 1);
        let outcome = protocol("AB12")
            .attempt(&mut session, &FormCtx::new(0, &id, 1))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(session.calls.last().map(String::as_str), Some("accept dialog"));
        assert!(!session.dialog_open);
    }

    #[tokio::test]
    async fn test_stale_dialog_is_accepted_before_navigation() {
        let mut session = FakeSession {
            dialog_open: true,
            result_text: "Enrollment No".into(),
            ..FakeSession::default()
        };
        let id = Identifier::new("X", 1);
        let outcome = protocol("AB12")
            .attempt(&mut session, &FormCtx::new(0, &id, 2))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(session.calls[0], "accept dialog");
        assert!(session.calls[1].starts_with("navigate "));
    }

    #[tokio::test]
    async fn test_body_wait_timeout_after_submit_is_transient() {
        let mut session = FakeSession {
            timeout_on: Some(Locator::css("body")),
            ..FakeSession::default()
        };
        let id = Identifier::new("X", 1);
        let outcome = protocol("AB12")
            .attempt(&mut session, &FormCtx::new(0, &id, 1))
            .await
            .unwrap();

        assert!(submitted(&session));
        match outcome {
            Outcome::Transient(reason) => assert!(reason.contains("已提交")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fault_propagates() {
        let mut session = FakeSession {
            fault_on_navigate: true,
            ..FakeSession::default()
        };
        let id = Identifier::new("X", 1);
        let result = protocol("AB12")
            .attempt(&mut session, &FormCtx::new(0, &id, 1))
            .await;
        assert!(matches!(result, Err(SessionError::Fault(_))));
    }
}
