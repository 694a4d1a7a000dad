//! Per-provider token and spend accounting.
//!
//! Thread-safe: counters are atomics inside a [`DashMap`], so concurrent
//! reviewers record usage without a global lock. Rates are stored as
//! micro-dollars per 1K tokens to avoid floating-point drift in long runs.

use super::TokenUsage;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct ProviderCounters {
    input_rate_micro: u64,
    output_rate_micro: u64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    requests: AtomicU64,
}

/// Running token and cost totals for every provider.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Default)]
pub struct CostLedger {
    providers: DashMap<String, ProviderCounters>,
}

impl CostLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the USD-per-1K rates for `provider_id`.
    pub fn set_rates(&self, provider_id: &str, input_per_1k: f64, output_per_1k: f64) {
        let mut entry = self.providers.entry(provider_id.to_string()).or_default();
        entry.input_rate_micro = f64_to_micro(input_per_1k);
        entry.output_rate_micro = f64_to_micro(output_per_1k);
    }

    /// Record one successful call.
    pub fn record(&self, provider_id: &str, usage: TokenUsage) {
        let entry = self.providers.entry(provider_id.to_string()).or_default();
        entry.input_tokens.fetch_add(usage.input_tokens, Ordering::Relaxed);
        entry.output_tokens.fetch_add(usage.output_tokens, Ordering::Relaxed);
        entry.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time totals.
    pub fn snapshot(&self) -> CostSnapshot {
        let mut providers = BTreeMap::new();
        let mut total_micro: u128 = 0;
        for entry in self.providers.iter() {
            let c = entry.value();
            let input_tokens = c.input_tokens.load(Ordering::Relaxed);
            let output_tokens = c.output_tokens.load(Ordering::Relaxed);
            let cost_micro = (input_tokens as u128 * c.input_rate_micro as u128
                + output_tokens as u128 * c.output_rate_micro as u128)
                / 1000;
            total_micro += cost_micro;
            providers.insert(
                entry.key().clone(),
                ProviderCost {
                    requests: c.requests.load(Ordering::Relaxed),
                    input_tokens,
                    output_tokens,
                    cost_usd: micro_to_f64(cost_micro),
                },
            );
        }
        CostSnapshot {
            providers,
            total_cost_usd: micro_to_f64(total_micro),
        }
    }

    /// Zero every counter, keeping rates.
    pub fn reset(&self) {
        for entry in self.providers.iter() {
            entry.input_tokens.store(0, Ordering::Relaxed);
            entry.output_tokens.store(0, Ordering::Relaxed);
            entry.requests.store(0, Ordering::Relaxed);
        }
    }
}

/// Totals for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderCost {
    /// Successful calls.
    pub requests: u64,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Estimated spend in USD.
    pub cost_usd: f64,
}

/// Point-in-time snapshot of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSnapshot {
    /// Totals keyed by provider id.
    pub providers: BTreeMap<String, ProviderCost>,
    /// Sum over all providers.
    pub total_cost_usd: f64,
}

fn f64_to_micro(usd: f64) -> u64 {
    (usd * 1_000_000.0).round().max(0.0) as u64
}

fn micro_to_f64(micro: u128) -> f64 {
    micro as f64 / 1_000_000.0
}
