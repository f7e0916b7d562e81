//! Token 与费用统计
//!
//! 每次补全调用同时累加到所属 Agent 的计数与进程级 UsageLedger（按模型区分）。
//! 计数只增不减；运行时为多线程，故 UsageLedger 以 Mutex 保护。

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// 单次补全返回的 token 计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// 某模型（或全部模型）的累计用量与费用
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_dollars: f64,
}

/// 价格表：(模型名前缀, 每百万 prompt token 美元, 每百万 completion token 美元)，最长前缀优先
const PRICE_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-4o", 2.5, 10.0),
    ("gpt-4-turbo", 10.0, 30.0),
    ("gpt-4", 30.0, 60.0),
    ("gpt-3.5-turbo", 0.5, 1.5),
];

/// 未知模型的默认价格档位
const DEFAULT_PRICE: (f64, f64) = (2.0, 2.0);

/// 返回模型的 (prompt, completion) 每百万 token 价格
pub fn rates_for(model: &str) -> (f64, f64) {
    PRICE_TABLE
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, p, c)| (*p, *c))
        .unwrap_or(DEFAULT_PRICE)
}

/// 按模型计算累计用量对应的费用
pub fn price(model: &str, usage: &TokenUsage) -> f64 {
    let (prompt_rate, completion_rate) = rates_for(model);
    (usage.prompt_tokens as f64 * prompt_rate + usage.completion_tokens as f64 * completion_rate)
        / 1_000_000.0
}

/// 进程级用量账本：在 main 中创建一次，通过 Arc 在所有会话间共享
#[derive(Debug, Default)]
pub struct UsageLedger {
    per_model: Mutex<BTreeMap<String, TokenUsage>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累加一次补全的用量（加法合并）
    pub fn record(&self, model: &str, usage: &TokenUsage) {
        let mut per_model = self
            .per_model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        per_model.entry(model.to_string()).or_default().add(usage);
    }

    pub fn model_totals(&self, model: &str) -> UsageTotals {
        let per_model = self
            .per_model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        per_model
            .get(model)
            .map(|u| to_totals(model, u))
            .unwrap_or_default()
    }

    /// 所有模型的合计（用于推送给监督端）
    pub fn totals(&self) -> UsageTotals {
        let per_model = self
            .per_model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        per_model
            .iter()
            .map(|(model, u)| to_totals(model, u))
            .fold(UsageTotals::default(), |mut acc, t| {
                acc.prompt_tokens += t.prompt_tokens;
                acc.completion_tokens += t.completion_tokens;
                acc.total_tokens += t.total_tokens;
                acc.total_dollars += t.total_dollars;
                acc
            })
    }
}

fn to_totals(model: &str, usage: &TokenUsage) -> UsageTotals {
    UsageTotals {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        total_dollars: price(model, usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        assert_eq!(rates_for("gpt-4o-mini-2024-07-18"), (0.15, 0.6));
        assert_eq!(rates_for("gpt-4o"), (2.5, 10.0));
        assert_eq!(rates_for("gpt-4-0613"), (30.0, 60.0));
        assert_eq!(rates_for("llama-3"), DEFAULT_PRICE);
    }

    #[test]
    fn test_ledger_accumulates_per_model() {
        let ledger = UsageLedger::new();
        ledger.record("gpt-4", &TokenUsage::new(1_000, 500));
        ledger.record("gpt-4", &TokenUsage::new(1_000, 500));
        ledger.record("other", &TokenUsage::new(1_000_000, 0));

        let gpt4 = ledger.model_totals("gpt-4");
        assert_eq!(gpt4.prompt_tokens, 2_000);
        assert_eq!(gpt4.total_tokens, 3_000);
        assert!((gpt4.total_dollars - 0.12).abs() < 1e-9);

        let all = ledger.totals();
        assert_eq!(all.prompt_tokens, 1_002_000);
        assert!((all.total_dollars - 2.12).abs() < 1e-9);
    }
}
