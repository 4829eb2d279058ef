//! Pricing Lookup — C7 (spec.md §4.7).
//!
//! A `{model, provider, mode}` → [`PricingEntry`] table. Cost calculation
//! picks among several alternative rate sets depending on what the usage
//! block reports; a missing pricing row costs zero and logs a warning,
//! never an error (spec.md §4.7).

use dashmap::DashMap;

use crate::schema::{Provider, Usage};

/// Which surface generated the usage being priced — part of the pricing
/// table's lookup key alongside `{model, provider}` (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Chat,
    Embedding,
    Speech,
    Transcription,
}

/// The 128k-token pricing-tier threshold is on `total_tokens`, not prompt
/// tokens alone (spec.md §9 "Pricing above-128k tier").
pub const ABOVE_128K_THRESHOLD: u64 = 128_000;

#[derive(Debug, Clone, Default)]
pub struct PricingEntry {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    pub batch_input_cost_per_token: Option<f64>,
    pub batch_output_cost_per_token: Option<f64>,
    pub cache_read_input_cost_per_token: Option<f64>,
    pub audio_cost_per_second: Option<f64>,
    pub audio_input_cost_per_token: Option<f64>,
    pub audio_output_cost_per_token: Option<f64>,
    pub above_128k_input_cost_per_token: Option<f64>,
    pub above_128k_output_cost_per_token: Option<f64>,
}

/// Read-mostly sharded table, refreshed wholesale by the background syncer
/// (spec.md §4.7, §6 "external collaborator: model-pricing data fetch").
/// Bifrost does not itself fetch the catalog — `refresh` just takes
/// whatever the caller already downloaded.
#[derive(Default)]
pub struct PricingTable {
    entries: DashMap<(String, Provider, Mode), PricingEntry>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, model: impl Into<String>, provider: Provider, mode: Mode, entry: PricingEntry) {
        self.entries.insert((model.into(), provider, mode), entry);
    }

    /// Wholesale replace the table from a freshly synced catalog. Failure
    /// to sync is the caller's concern — an empty or partial `rows` here
    /// simply leaves previously-synced rows in place unless the caller
    /// chooses to clear first.
    pub fn refresh(&self, rows: impl IntoIterator<Item = (String, Provider, Mode, PricingEntry)>) {
        for (model, provider, mode, entry) in rows {
            self.entries.insert((model, provider, mode), entry);
        }
    }

    pub fn lookup(&self, model: &str, provider: Provider, mode: Mode) -> Option<PricingEntry> {
        self.entries.get(&(model.to_string(), provider, mode)).map(|e| e.clone())
    }

    /// Compute cost in dollars for one usage block. Zero with a logged
    /// warning if no pricing row matches (spec.md §4.7) — never an error.
    pub fn cost(&self, model: &str, provider: Provider, mode: Mode, usage: &Usage) -> f64 {
        match self.lookup(model, provider, mode) {
            Some(entry) => calculate_cost(&entry, usage),
            None => {
                tracing::warn!(model, provider = provider.as_str(), "no pricing row found, billing zero");
                0.0
            },
        }
    }
}

/// Selects, in priority order: duration-based audio, audio/text
/// token-split, cache-read input (output always regular), batch, the
/// above-128k tier, then plain regular per-token (spec.md §4.7).
fn calculate_cost(entry: &PricingEntry, usage: &Usage) -> f64 {
    if let Some(seconds) = usage.audio_seconds {
        return seconds * entry.audio_cost_per_second.unwrap_or(0.0);
    }

    if let Some(details) = &usage.audio_token_details {
        let text = details.text_tokens.unwrap_or(0) as f64;
        let audio = details.audio_tokens.unwrap_or(0) as f64;
        return text * entry.input_cost_per_token
            + audio * entry.audio_input_cost_per_token.unwrap_or(entry.input_cost_per_token)
            + usage.completion_tokens.unwrap_or(0) as f64 * entry.output_cost_per_token;
    }

    let prompt_tokens = usage.prompt_tokens.unwrap_or(0) as f64;
    let completion_tokens = usage.completion_tokens.unwrap_or(0) as f64;
    let total_tokens = usage.total_tokens.unwrap_or(0);

    let input_rate = if usage.is_cache_read {
        entry.cache_read_input_cost_per_token.unwrap_or(entry.input_cost_per_token)
    } else if usage.is_batch {
        entry.batch_input_cost_per_token.unwrap_or(entry.input_cost_per_token)
    } else if total_tokens > ABOVE_128K_THRESHOLD {
        entry.above_128k_input_cost_per_token.unwrap_or(entry.input_cost_per_token)
    } else {
        entry.input_cost_per_token
    };

    // Cache reads always bill output at the regular rate (spec.md §4.7).
    let output_rate = if usage.is_cache_read {
        entry.output_cost_per_token
    } else if usage.is_batch {
        entry.batch_output_cost_per_token.unwrap_or(entry.output_cost_per_token)
    } else if total_tokens > ABOVE_128K_THRESHOLD {
        entry.above_128k_output_cost_per_token.unwrap_or(entry.output_cost_per_token)
    } else {
        entry.output_cost_per_token
    };

    prompt_tokens * input_rate + completion_tokens * output_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_entry() -> PricingEntry {
        PricingEntry {
            input_cost_per_token: 0.01,
            output_cost_per_token: 0.02,
            above_128k_input_cost_per_token: Some(0.02),
            above_128k_output_cost_per_token: Some(0.04),
            ..Default::default()
        }
    }

    #[test]
    fn missing_row_costs_zero() {
        let table = PricingTable::new();
        let usage = Usage {
            prompt_tokens: Some(100),
            ..Default::default()
        };
        assert_eq!(table.cost("unknown-model", Provider::OpenAI, Mode::Chat, &usage), 0.0);
    }

    #[test]
    fn regular_per_token_cost() {
        let usage = Usage {
            prompt_tokens: Some(100),
            completion_tokens: Some(50),
            total_tokens: Some(150),
            ..Default::default()
        };
        let cost = calculate_cost(&flat_entry(), &usage);
        assert!((cost - (100.0 * 0.01 + 50.0 * 0.02)).abs() < 1e-9);
    }

    #[test]
    fn above_128k_tier_applies_on_total_tokens() {
        let usage = Usage {
            prompt_tokens: Some(100_000),
            completion_tokens: Some(50_000),
            total_tokens: Some(150_000),
            ..Default::default()
        };
        let cost = calculate_cost(&flat_entry(), &usage);
        assert!((cost - (100_000.0 * 0.02 + 50_000.0 * 0.04)).abs() < 1e-6);
    }

    #[test]
    fn cache_read_uses_cache_rate_for_input_only() {
        let entry = PricingEntry {
            input_cost_per_token: 0.01,
            output_cost_per_token: 0.02,
            cache_read_input_cost_per_token: Some(0.002),
            ..Default::default()
        };
        let usage = Usage {
            prompt_tokens: Some(100),
            completion_tokens: Some(50),
            total_tokens: Some(150),
            is_cache_read: true,
            ..Default::default()
        };
        let cost = calculate_cost(&entry, &usage);
        assert!((cost - (100.0 * 0.002 + 50.0 * 0.02)).abs() < 1e-9);
    }
}
