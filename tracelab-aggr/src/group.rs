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

//! Accumulator groups
//!
//! A group composes a basic accumulator with optional distribution
//! accumulators selected at construction time. `append` fans out to every
//! member; `result` concatenates every member's statistics into one ordered
//! summary.

use tracelab_core::aggregate::{AggregateResult, AggregatorResult};

use crate::aggregator::{
    Aggregator, BasicAggregator, CategoricalAggregator, OptionDistributionAggregator,
    ScoreDistributionAggregator,
};
use crate::bucket::BucketDistributionAggregator;

/// Group of numeric accumulators; always contains a [`BasicAggregator`].
pub struct AggregatorGroup {
    aggregators: Vec<Box<dyn Aggregator>>,
}

impl AggregatorGroup {
    pub fn new() -> Self {
        Self {
            aggregators: vec![Box::<BasicAggregator>::default()],
        }
    }

    /// Add an exact per-value frequency histogram.
    pub fn with_score_distribution(mut self) -> Self {
        self.aggregators
            .push(Box::new(ScoreDistributionAggregator::new()));
        self
    }

    /// Add a fixed-bucket-count histogram with `num_buckets` buckets.
    pub fn with_bucket_distribution(mut self, num_buckets: usize) -> Self {
        self.aggregators
            .push(Box::new(BucketDistributionAggregator::new(num_buckets)));
        self
    }

    pub fn append(&mut self, score: f64) {
        for aggregator in &mut self.aggregators {
            aggregator.append(score);
        }
    }

    /// One ordered summary across all members, sorted by statistic-kind
    /// ordinal for deterministic serialization.
    pub fn result(&self) -> AggregateResult {
        let mut aggregator_results: Vec<AggregatorResult> = self
            .aggregators
            .iter()
            .flat_map(|aggregator| aggregator.result())
            .map(|(aggregator_type, data)| AggregatorResult {
                aggregator_type,
                data,
            })
            .collect();

        aggregator_results.sort_by_key(|r| r.aggregator_type);

        AggregateResult { aggregator_results }
    }
}

impl Default for AggregatorGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Group of categorical accumulators over string labels.
pub struct CategoricalAggregatorGroup {
    aggregators: Vec<Box<dyn CategoricalAggregator>>,
}

impl CategoricalAggregatorGroup {
    pub fn new() -> Self {
        Self {
            aggregators: vec![Box::new(OptionDistributionAggregator::new())],
        }
    }

    pub fn append(&mut self, option: &str) {
        for aggregator in &mut self.aggregators {
            aggregator.append(option);
        }
    }

    pub fn result(&self) -> AggregateResult {
        let aggregator_results = self
            .aggregators
            .iter()
            .flat_map(|aggregator| aggregator.result())
            .map(|(aggregator_type, data)| AggregatorResult {
                aggregator_type,
                data,
            })
            .collect();

        AggregateResult { aggregator_results }
    }
}

impl Default for CategoricalAggregatorGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelab_core::aggregate::{AggregateData, AggregatorType};

    #[test]
    fn test_group_result_ordering() {
        let mut group = AggregatorGroup::new().with_score_distribution();
        for score in [1.0, 2.0, 3.0] {
            group.append(score);
        }

        let result = group.result();
        let kinds: Vec<AggregatorType> = result
            .aggregator_results
            .iter()
            .map(|r| r.aggregator_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                AggregatorType::Average,
                AggregatorType::Sum,
                AggregatorType::Max,
                AggregatorType::Min,
                AggregatorType::Distribution,
            ]
        );
        assert_eq!(result.average_score(), 2.0);
    }

    #[test]
    fn test_group_without_options_has_basic_stats_only() {
        let mut group = AggregatorGroup::new();
        group.append(4.0);

        let result = group.result();
        assert_eq!(result.aggregator_results.len(), 4);
    }

    #[test]
    fn test_bucket_group_fans_out() {
        let mut group = AggregatorGroup::new().with_bucket_distribution(5);
        for score in [0.0, 10.0] {
            group.append(score);
        }

        let result = group.result();
        let dist = result
            .aggregator_results
            .iter()
            .find(|r| r.aggregator_type == AggregatorType::Distribution)
            .expect("missing distribution");
        let AggregateData::ScoreDistribution(dist) = &dist.data else {
            panic!("expected score distribution");
        };
        assert_eq!(dist.items.len(), 5);
        assert_eq!(dist.items.iter().map(|i| i.count).sum::<i64>(), 2);
    }

    #[test]
    fn test_categorical_group() {
        let mut group = CategoricalAggregatorGroup::new();
        for option in ["101", "102", "101"] {
            group.append(option);
        }

        let result = group.result();
        assert_eq!(result.aggregator_results.len(), 1);
        // No scalar statistics, so no summary score.
        assert_eq!(result.average_score(), 0.0);

        let AggregateData::OptionDistribution(dist) = &result.aggregator_results[0].data else {
            panic!("expected option distribution");
        };
        assert_eq!(dist.items[0].option, "101");
        assert_eq!(dist.items[0].count, 2);
    }

    #[test]
    fn test_identical_streams_serialize_identically() {
        let feed = |group: &mut AggregatorGroup| {
            for score in [0.5, 1.0, 0.5, 0.0, 1.0, 1.0] {
                group.append(score);
            }
        };

        let mut a = AggregatorGroup::new().with_score_distribution();
        let mut b = AggregatorGroup::new().with_score_distribution();
        feed(&mut a);
        feed(&mut b);

        let a_bytes = serde_json::to_vec(&a.result()).unwrap();
        let b_bytes = serde_json::to_vec(&b.result()).unwrap();
        assert_eq!(a_bytes, b_bytes);
    }
}
