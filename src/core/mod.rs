//! 核心层：错误分类与用量统计

pub mod error;
pub mod usage;

pub use error::AgentError;
pub use usage::{TokenUsage, UsageLedger, UsageTotals};
