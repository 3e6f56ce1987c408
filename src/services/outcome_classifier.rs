//! 结果判定服务 - 业务能力层
//!
//! 把提交后的页面信号（弹窗、正文、源码）映射为唯一的 [`Outcome`]。
//! 站点相关的文本全部来自配置。

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::config::{MarkerConfig, NoResultPolicy};
use crate::infrastructure::{RemoteSession, SessionError};
use crate::models::Outcome;

/// 提交后采集到的页面信号
#[derive(Debug, Clone, Default)]
pub struct PageSignals {
    pub dialog_present: bool,
    pub page_text: String,
    pub page_source: String,
}

pub struct OutcomeClassifier {
    rejection: Option<Regex>,
    success_marker: String,
    no_result_policy: NoResultPolicy,
}

impl OutcomeClassifier {
    pub fn new(markers: &MarkerConfig, no_result_policy: NoResultPolicy) -> Self {
        let alternatives: Vec<String> = markers
            .rejection_markers
            .iter()
            .filter(|m| !m.trim().is_empty())
            .map(|m| regex::escape(m))
            .collect();

        // 全部是转义后的字面量，构建不会失败
        let rejection = if alternatives.is_empty() {
            None
        } else {
            RegexBuilder::new(&alternatives.join("|"))
                .case_insensitive(true)
                .build()
                .ok()
        };

        Self {
            rejection,
            success_marker: markers.success_marker.clone(),
            no_result_policy,
        }
    }

    /// 纯判定逻辑
    pub fn classify_signals(&self, signals: &PageSignals) -> Outcome {
        if signals.dialog_present {
            return Outcome::Rejected;
        }

        if let Some(rejection) = &self.rejection {
            if rejection.is_match(&signals.page_source) || rejection.is_match(&signals.page_text) {
                return Outcome::Rejected;
            }
        }

        if !signals.page_text.contains(&self.success_marker) {
            return Outcome::NoResult {
                permanent: self.no_result_policy == NoResultPolicy::Permanent,
            };
        }

        Outcome::Success(signals.page_text.clone())
    }

    /// 从会话采集信号并判定
    ///
    /// 有弹窗时先确认弹窗再判为 `Rejected`，不再读取页面。
    /// 会话故障向上返回，其余采集失败判为 `Transient`。
    pub async fn classify<S: RemoteSession>(&self, session: &mut S) -> Result<Outcome, SessionError> {
        match self.collect(session).await {
            Ok(signals) => {
                let outcome = self.classify_signals(&signals);
                debug!("页面判定结果: {}", outcome);
                Ok(outcome)
            }
            Err(e) if e.is_fault() => Err(e),
            Err(e) => Ok(Outcome::Transient(format!("采集页面信号失败: {}", e))),
        }
    }

    async fn collect<S: RemoteSession>(&self, session: &mut S) -> Result<PageSignals, SessionError> {
        if session.pending_dialog().await? {
            session.accept_dialog().await?;
            return Ok(PageSignals {
                dialog_present: true,
                ..PageSignals::default()
            });
        }

        let page_source = session.page_source().await?;
        let page_text = session.page_text().await?;
        Ok(PageSignals {
            dialog_present: false,
            page_text,
            page_source,
        })
    }
}
