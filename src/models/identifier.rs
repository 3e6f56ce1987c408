use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 序号补零宽度
pub const SEQUENCE_WIDTH: usize = 3;

/// 查询编号（固定前缀 + 补零序号）
///
/// 一旦构造就不再变化。排序按 `(prefix, sequence)` 进行，
/// 在 0..=999 范围内与字符串排序一致，超过 999 时仍保持数值顺序。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    prefix: String,
    sequence: u32,
    text: String,
}

impl Identifier {
    /// 由前缀和序号构造编号
    pub fn new(prefix: impl Into<String>, sequence: u32) -> Self {
        let prefix = prefix.into();
        let text = format!("{}{:0width$}", prefix, sequence, width = SEQUENCE_WIDTH);
        Self {
            prefix,
            sequence,
            text,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prefix
            .cmp(&other.prefix)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
