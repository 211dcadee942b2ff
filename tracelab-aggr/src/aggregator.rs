// Copyright 2025 Tracelab (https://github.com/tracelab)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Statistic accumulators
//!
//! Each accumulator is fed a stream of samples via `append` (infallible) and
//! consumed once via `result`. Accumulators are constructed fresh per
//! computation run and never shared across runs.

use std::collections::HashMap;

use tracelab_core::aggregate::{
    AggregateData, AggregatorType, OptionDistribution, OptionDistributionItem, ScoreDistribution,
    ScoreDistributionItem,
};

/// Label for the synthetic bucket holding everything beyond a top-N cap.
pub const OTHER_LABEL: &str = "Other";

/// Accumulator over a numeric sample stream.
pub trait Aggregator: Send {
    /// Feed one sample. Never fails.
    fn append(&mut self, score: f64);

    /// Statistics computed from the samples appended so far. Reading is
    /// idempotent; accumulators are not reused after it.
    fn result(&self) -> Vec<(AggregatorType, AggregateData)>;
}

/// Accumulator over a categorical label stream.
pub trait CategoricalAggregator: Send {
    fn append(&mut self, option: &str);

    fn result(&self) -> Vec<(AggregatorType, AggregateData)>;
}

/// Running count/sum/min/max; always part of a numeric group.
#[derive(Debug, Default)]
pub struct BasicAggregator {
    max: f64,
    min: f64,
    sum: f64,
    count: u64,
}

impl Aggregator for BasicAggregator {
    fn append(&mut self, score: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = score;
            self.max = score;
            self.sum = score;
            return;
        }

        if score < self.min {
            self.min = score;
        }
        if score > self.max {
            self.max = score;
        }
        self.sum += score;
    }

    fn result(&self) -> Vec<(AggregatorType, AggregateData)> {
        let avg = if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        };

        vec![
            (AggregatorType::Average, AggregateData::Double(avg)),
            (AggregatorType::Sum, AggregateData::Double(self.sum)),
            (AggregatorType::Max, AggregateData::Double(self.max)),
            (AggregatorType::Min, AggregateData::Double(self.min)),
        ]
    }
}

/// Label and frequency of one distinct value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

/// Sort counts descending and optionally collapse everything beyond `cap`
/// into a synthetic [`OTHER_LABEL`] entry whose count is the sum of the
/// collapsed entries. `cap = None` returns all entries. Ties are broken by
/// label so the output is deterministic.
pub fn top_n_counts(counts: &HashMap<String, i64>, cap: Option<usize>) -> Vec<LabelCount> {
    let mut entries: Vec<LabelCount> = counts
        .iter()
        .map(|(label, count)| LabelCount {
            label: label.clone(),
            count: *count,
        })
        .collect();

    entries.sort_by(|l, r| r.count.cmp(&l.count).then_with(|| l.label.cmp(&r.label)));

    if let Some(cap) = cap {
        if entries.len() > cap {
            let collapsed: i64 = entries[cap..].iter().map(|e| e.count).sum();
            entries.truncate(cap);
            entries.push(LabelCount {
                label: OTHER_LABEL.to_string(),
                count: collapsed,
            });
        }
    }

    entries
}

/// Exact per-value frequency histogram for small, discrete score domains.
///
/// Scores are keyed by their two-decimal rendering, which is also the label
/// shown to consumers.
#[derive(Debug, Default)]
pub struct ScoreDistributionAggregator {
    score_counts: HashMap<String, i64>,
    total: i64,
    /// Result-size cap; `None` returns every distinct value.
    cap: Option<usize>,
}

impl ScoreDistributionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collapse entries beyond the top `cap` into an `"Other"` bucket.
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }
}

impl Aggregator for ScoreDistributionAggregator {
    fn append(&mut self, score: f64) {
        *self.score_counts.entry(format!("{score:.2}")).or_insert(0) += 1;
        self.total += 1;
    }

    fn result(&self) -> Vec<(AggregatorType, AggregateData)> {
        let mut items: Vec<ScoreDistributionItem> = top_n_counts(&self.score_counts, self.cap)
            .into_iter()
            .map(|entry| ScoreDistributionItem {
                score: entry.label,
                count: entry.count,
                percentage: entry.count as f64 / self.total as f64,
            })
            .collect();

        // Ascending by score label for display.
        items.sort_by(|l, r| l.score.cmp(&r.score));

        vec![(
            AggregatorType::Distribution,
            AggregateData::ScoreDistribution(ScoreDistribution { items }),
        )]
    }
}

/// Frequency histogram over opaque string labels (annotation tag values,
/// boolean options).
#[derive(Debug, Default)]
pub struct OptionDistributionAggregator {
    option_counts: HashMap<String, i64>,
    total: i64,
    cap: Option<usize>,
}

impl OptionDistributionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }
}

impl CategoricalAggregator for OptionDistributionAggregator {
    fn append(&mut self, option: &str) {
        *self
            .option_counts
            .entry(option.to_string())
            .or_insert(0) += 1;
        self.total += 1;
    }

    fn result(&self) -> Vec<(AggregatorType, AggregateData)> {
        let items: Vec<OptionDistributionItem> = top_n_counts(&self.option_counts, self.cap)
            .into_iter()
            .map(|entry| OptionDistributionItem {
                option: entry.label,
                count: entry.count,
                percentage: entry.count as f64 / self.total as f64,
            })
            .collect();

        vec![(
            AggregatorType::Distribution,
            AggregateData::OptionDistribution(OptionDistribution { items }),
        )]
    }
}
