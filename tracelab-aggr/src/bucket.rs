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

//! Fixed-bucket-count histogram for high-cardinality measurements
//!
//! Used for latency, token counts, and continuous evaluator scores where an
//! exact per-value histogram would be unbounded. Samples are buffered and
//! bucketed at `result()` time against the final min/max, so the bucket
//! layout reflects the whole stream.

use tracelab_core::aggregate::{
    AggregateData, AggregatorType, ScoreDistribution, ScoreDistributionItem,
};

use crate::aggregator::Aggregator;

/// Bucket count used when a non-positive count is requested.
pub const DEFAULT_NUM_BUCKETS: usize = 20;

/// Histogram over `num_buckets` equal-width buckets spanning `[min, max]`.
///
/// Buckets are left-closed right-open, except the last which is right-closed
/// so `max` lands in it. Every bucket is emitted, including empty ones, so
/// consumers can render a complete histogram.
#[derive(Debug)]
pub struct BucketDistributionAggregator {
    scores: Vec<f64>,
    min: f64,
    max: f64,
    num_buckets: usize,
}

impl BucketDistributionAggregator {
    pub fn new(num_buckets: usize) -> Self {
        let num_buckets = if num_buckets == 0 {
            DEFAULT_NUM_BUCKETS
        } else {
            num_buckets
        };
        Self {
            scores: Vec::new(),
            min: 0.0,
            max: 0.0,
            num_buckets,
        }
    }

    /// Bucket index for `score`, clamped to `[0, num_buckets - 1]`.
    fn bucket_index(&self, score: f64) -> usize {
        if self.scores.is_empty() || self.max == self.min {
            return 0;
        }

        if score <= self.min {
            return 0;
        }
        if score >= self.max {
            return self.num_buckets - 1;
        }

        let width = (self.max - self.min) / self.num_buckets as f64;
        let index = ((score - self.min) / width).floor() as i64;
        index.clamp(0, self.num_buckets as i64 - 1) as usize
    }

    /// `[start, end]` range of bucket `index` given a precomputed width.
    fn bucket_range(&self, index: usize, width: f64) -> (f64, f64) {
        if self.scores.is_empty() || self.max == self.min {
            return (self.min, self.max);
        }

        let start = self.min + index as f64 * width;
        let end = if index == self.num_buckets - 1 {
            self.max
        } else {
            self.min + (index + 1) as f64 * width
        };
        (start, end)
    }

    /// `"start-end"` label. The displayed end of every bucket but the last is
    /// pulled back by 0.01 so adjacent ranges do not visually overlap.
    fn bucket_label(&self, index: usize, width: f64) -> String {
        let (start, end) = self.bucket_range(index, width);
        let display_end = if index < self.num_buckets - 1 {
            ((end - 0.01) * 100.0).floor() / 100.0
        } else {
            end
        };
        format!("{start:.2}-{display_end:.2}")
    }
}

impl Aggregator for BucketDistributionAggregator {
    fn append(&mut self, score: f64) {
        self.scores.push(score);

        if self.scores.len() == 1 {
            self.min = score;
            self.max = score;
        } else {
            if score < self.min {
                self.min = score;
            }
            if score > self.max {
                self.max = score;
            }
        }
    }

    fn result(&self) -> Vec<(AggregatorType, AggregateData)> {
        let mut bucket_counts = vec![0i64; self.num_buckets];
        for score in &self.scores {
            bucket_counts[self.bucket_index(*score)] += 1;
        }

        let width = if self.scores.is_empty() || self.max == self.min {
            0.0
        } else {
            (self.max - self.min) / self.num_buckets as f64
        };

        let total = self.scores.len() as i64;
        let items = (0..self.num_buckets)
            .map(|index| {
                let count = bucket_counts[index];
                let percentage = if total > 0 {
                    count as f64 / total as f64
                } else {
                    0.0
                };
                ScoreDistributionItem {
                    score: self.bucket_label(index, width),
                    count,
                    percentage,
                }
            })
            .collect();

        vec![(
            AggregatorType::Distribution,
            AggregateData::ScoreDistribution(ScoreDistribution { items }),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(agg: &BucketDistributionAggregator) -> ScoreDistribution {
        let results = agg.result();
        match &results[0].1 {
            AggregateData::ScoreDistribution(dist) => dist.clone(),
            other => panic!("expected score distribution, got {other:?}"),
        }
    }

    #[test]
    fn test_default_bucket_count() {
        let agg = BucketDistributionAggregator::new(0);
        assert_eq!(distribution(&agg).items.len(), DEFAULT_NUM_BUCKETS);
    }

    #[test]
    fn test_bucket_coverage() {
        let mut agg = BucketDistributionAggregator::new(8);
        let samples = [0.3, 1.7, 2.2, 4.9, 5.0, 7.7, 9.1, 9.9, 3.3, 6.6];
        for s in samples {
            agg.append(s);
        }

        let dist = distribution(&agg);
        assert_eq!(dist.items.len(), 8);

        let total: i64 = dist.items.iter().map(|i| i.count).sum();
        assert_eq!(total, samples.len() as i64);

        let pct: f64 = dist.items.iter().map(|i| i.percentage).sum();
        assert!((pct - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_bucketing() {
        // 0 lands in the first bucket, 10 in the last (right-closed).
        let mut agg = BucketDistributionAggregator::new(10);
        agg.append(0.0);
        agg.append(10.0);

        let dist = distribution(&agg);
        assert_eq!(dist.items[0].count, 1);
        assert_eq!(dist.items[9].count, 1);
        for item in &dist.items[1..9] {
            assert_eq!(item.count, 0);
        }
    }

    #[test]
    fn test_all_equal_samples_land_in_bucket_zero() {
        let mut agg = BucketDistributionAggregator::new(10);
        for _ in 0..3 {
            agg.append(5.0);
        }

        let dist = distribution(&agg);
        assert_eq!(dist.items[0].count, 3);
        // min == max collapses every range to "5.00-5.00".
        assert_eq!(dist.items[0].score, "5.00-5.00");
        let rest: i64 = dist.items[1..].iter().map(|i| i.count).sum();
        assert_eq!(rest, 0);
    }

    #[test]
    fn test_interior_bucketing() {
        // Range [0, 10], 10 buckets of width 1: 4.5 belongs to bucket 4.
        let mut agg = BucketDistributionAggregator::new(10);
        agg.append(0.0);
        agg.append(10.0);
        agg.append(4.5);

        let dist = distribution(&agg);
        assert_eq!(dist.items[4].count, 1);
    }

    #[test]
    fn test_bucket_labels_do_not_overlap() {
        let mut agg = BucketDistributionAggregator::new(4);
        agg.append(0.0);
        agg.append(8.0);

        let dist = distribution(&agg);
        let labels: Vec<&str> = dist.items.iter().map(|i| i.score.as_str()).collect();
        assert_eq!(
            labels,
            vec!["0.00-1.99", "2.00-3.99", "4.00-5.99", "6.00-8.00"]
        );
    }

    #[test]
    fn test_empty_stream_emits_all_buckets() {
        let agg = BucketDistributionAggregator::new(5);
        let dist = distribution(&agg);
        assert_eq!(dist.items.len(), 5);
        for item in &dist.items {
            assert_eq!(item.count, 0);
            assert_eq!(item.percentage, 0.0);
        }
    }
}
