use serde::{Deserialize, Serialize};

use crate::models::identifier::Identifier;

/// 记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Completed,
    Failed,
}

/// 单个编号的最终结果，写入汇总表后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub identifier: Identifier,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// 产生该结果所用的尝试次数
    pub attempts: u32,
}

impl ResultRecord {
    pub fn completed(identifier: Identifier, payload: String, attempts: u32) -> Self {
        Self {
            identifier,
            status: RecordStatus::Completed,
            payload: Some(payload),
            attempts,
        }
    }

    pub fn failed(identifier: Identifier, attempts: u32) -> Self {
        Self {
            identifier,
            status: RecordStatus::Failed,
            payload: None,
            attempts,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RecordStatus::Completed
    }

    /// 渲染为输出文件中的一个文本块
    pub fn to_text_block(&self) -> String {
        match (&self.status, &self.payload) {
            (RecordStatus::Completed, Some(payload)) => {
                format!("✅ 编号: {}\n{}\n\n", self.identifier, payload)
            }
            _ => format!(
                "❌ 编号: {} 在 {} 次尝试后仍未获取到结果\n\n",
                self.identifier, self.attempts
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_blocks() {
        let id = Identifier::new("0103AL231", 1);
        let ok = ResultRecord::completed(id.clone(), "Enrollment No 0103AL231001".into(), 2);
        assert_eq!(
            ok.to_text_block(),
            "✅ 编号: 0103AL231001\nEnrollment No 0103AL231001\n\n"
        );

        let failed = ResultRecord::failed(id, 5);
        assert!(failed.payload.is_none());
        assert_eq!(
            failed.to_text_block(),
            "❌ 编号: 0103AL231001 在 5 次尝试后仍未获取到结果\n\n"
        );
    }
}
