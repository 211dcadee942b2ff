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

//! Aggregate-result entities
//!
//! `AggregateResult` is the computed summary for one field of one experiment:
//! an ordered list of statistics, each a tagged `AggregateData` value.
//! `ExptAggrResult` is the persisted row wrapping the serialized summary
//! together with the optimistic-concurrency version counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Statistic kinds, ordered by their display ordinal.
///
/// The ordinal drives the sort of `AggregateResult::aggregator_results`, so
/// serialized summaries are deterministic for a given input set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorType {
    Average = 1,
    Sum = 2,
    Max = 3,
    Min = 4,
    Distribution = 5,
}

/// One entry of an exact or bucketed score histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDistributionItem {
    /// Either a `%.2f` score rendering or a `"start-end"` bucket range.
    pub score: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub items: Vec<ScoreDistributionItem>,
}

/// One entry of a categorical-option histogram, keyed by an opaque label
/// (e.g. an annotation tag-value id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDistributionItem {
    pub option: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptionDistribution {
    pub items: Vec<OptionDistributionItem>,
}

/// Tagged statistic payload.
///
/// The original store represented this as an untyped value recovered by
/// runtime inspection; here every consumer matches exhaustively, so a new
/// payload shape cannot be silently dropped at serialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", content = "value", rename_all = "snake_case")]
pub enum AggregateData {
    Double(f64),
    ScoreDistribution(ScoreDistribution),
    OptionDistribution(OptionDistribution),
}

impl AggregateData {
    /// Scalar value, if this payload carries one.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            AggregateData::Double(v) => Some(*v),
            AggregateData::ScoreDistribution(_) | AggregateData::OptionDistribution(_) => None,
        }
    }
}

/// One statistic of an aggregate summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorResult {
    pub aggregator_type: AggregatorType,
    pub data: AggregateData,
}

/// Computed summary for one `(experiment, field)` pair.
///
/// Produced fresh on every computation run and immutable once serialized.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    pub aggregator_results: Vec<AggregatorResult>,
}

impl AggregateResult {
    /// The Average statistic, or 0 when the summary has none
    /// (categorical-only summaries carry no scalar statistics).
    pub fn average_score(&self) -> f64 {
        self.aggregator_results
            .iter()
            .find(|r| r.aggregator_type == AggregatorType::Average)
            .and_then(|r| r.data.as_double())
            .unwrap_or(0.0)
    }
}

/// Field families an aggregate row can summarize.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Per-evaluator-version scores; field key is the evaluator version id.
    EvaluatorScore,
    /// Human annotation tags; field key is the tag key id.
    Annotation,
    TargetLatency,
    TargetInputTokens,
    TargetOutputTokens,
    TargetTotalTokens,
}

/// Fixed field keys for the target-metric rows (one row per metric).
pub const FIELD_KEY_TARGET_LATENCY: &str = "target_latency";
pub const FIELD_KEY_TARGET_INPUT_TOKENS: &str = "target_input_tokens";
pub const FIELD_KEY_TARGET_OUTPUT_TOKENS: &str = "target_output_tokens";
pub const FIELD_KEY_TARGET_TOTAL_TOKENS: &str = "target_total_tokens";

/// Persisted aggregate row.
///
/// Identity key is `(experiment_id, field_type, field_key)`; at most one
/// current row exists per key. `version` is bumped on every update and guards
/// writes against concurrent recalculations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExptAggrResult {
    pub space_id: i64,
    pub experiment_id: i64,
    pub field_type: FieldType,
    pub field_key: String,
    /// Summary score for list views; the Average statistic of the blob.
    pub score: f64,
    /// Serialized `AggregateResult`, opaque to storage.
    pub aggr_result: Vec<u8>,
    pub version: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExptAggrResult {
    /// Build a row from a freshly computed summary, serializing the blob and
    /// extracting the Average statistic as the row score.
    pub fn from_aggregate(
        space_id: i64,
        experiment_id: i64,
        field_type: FieldType,
        field_key: impl Into<String>,
        aggregate: &AggregateResult,
    ) -> Result<Self> {
        Ok(Self {
            space_id,
            experiment_id,
            field_type,
            field_key: field_key.into(),
            score: aggregate.average_score(),
            aggr_result: serde_json::to_vec(aggregate)?,
            version: 0,
            updated_at: None,
        })
    }

    /// Deserialize the summary blob.
    pub fn aggregate(&self) -> Result<AggregateResult> {
        Ok(serde_json::from_slice(&self.aggr_result)?)
    }

    /// Structural equality of the computed content, ignoring version and
    /// timestamps. Summary serialization is deterministic, so comparing the
    /// blob bytes compares the statistics themselves.
    pub fn content_eq(&self, other: &ExptAggrResult) -> bool {
        self.score == other.score && self.aggr_result == other.aggr_result
    }

    /// Reconciliation key.
    pub fn field_id(&self) -> (FieldType, String) {
        (self.field_type, self.field_key.clone())
    }
}

/// Per-experiment aggregate view assembled for API consumers.
#[derive(Debug, Clone, Default)]
pub struct ExptAggregateView {
    pub experiment_id: i64,
    /// Keyed by evaluator version id.
    pub evaluator_results: std::collections::HashMap<i64, EvaluatorAggregateResult>,
    /// Keyed by tag key id.
    pub annotation_results: std::collections::HashMap<i64, AnnotationAggregateResult>,
    pub target_results: TargetMetricsAggregateResult,
    /// Latest write across all of the experiment's aggregate rows.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Evaluator-score summary labeled with evaluator metadata.
#[derive(Debug, Clone)]
pub struct EvaluatorAggregateResult {
    pub evaluator_id: i64,
    pub evaluator_version_id: i64,
    pub name: Option<String>,
    pub version: Option<String>,
    pub aggregator_results: Vec<AggregatorResult>,
}

/// Annotation-tag summary labeled with tag metadata.
#[derive(Debug, Clone)]
pub struct AnnotationAggregateResult {
    pub tag_key_id: i64,
    pub name: Option<String>,
    pub aggregator_results: Vec<AggregatorResult>,
}

/// Latency and token distributions of the experiment's eval target.
#[derive(Debug, Clone, Default)]
pub struct TargetMetricsAggregateResult {
    pub target_id: i64,
    pub target_version_id: i64,
    pub latency: Vec<AggregatorResult>,
    pub input_tokens: Vec<AggregatorResult>,
    pub output_tokens: Vec<AggregatorResult>,
    pub total_tokens: Vec<AggregatorResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_aggregate() -> AggregateResult {
        AggregateResult {
            aggregator_results: vec![
                AggregatorResult {
                    aggregator_type: AggregatorType::Average,
                    data: AggregateData::Double(0.8),
                },
                AggregatorResult {
                    aggregator_type: AggregatorType::Sum,
                    data: AggregateData::Double(1.6),
                },
            ],
        }
    }

    #[test]
    fn test_average_score_extraction() {
        assert_eq!(sample_aggregate().average_score(), 0.8);
        assert_eq!(AggregateResult::default().average_score(), 0.0);
    }

    #[test]
    fn test_blob_round_trip() {
        let row = ExptAggrResult::from_aggregate(
            1,
            2,
            FieldType::EvaluatorScore,
            "7",
            &sample_aggregate(),
        )
        .unwrap();

        assert_eq!(row.score, 0.8);
        assert_eq!(row.version, 0);
        assert_eq!(row.aggregate().unwrap(), sample_aggregate());
    }

    #[test]
    fn test_content_eq_ignores_version() {
        let a = ExptAggrResult::from_aggregate(
            1,
            2,
            FieldType::EvaluatorScore,
            "7",
            &sample_aggregate(),
        )
        .unwrap();
        let mut b = a.clone();
        b.version = 9;
        b.updated_at = Some(Utc::now());
        assert!(a.content_eq(&b));

        b.score = 0.9;
        assert!(!a.content_eq(&b));
    }

    #[test]
    fn test_tagged_union_round_trip() {
        let data = AggregateData::ScoreDistribution(ScoreDistribution {
            items: vec![ScoreDistributionItem {
                score: "1.00".to_string(),
                count: 3,
                percentage: 1.0,
            }],
        });
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"data_type\":\"score_distribution\""));
        let back: AggregateData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_aggregator_type_ordering() {
        assert!(AggregatorType::Average < AggregatorType::Sum);
        assert!(AggregatorType::Min < AggregatorType::Distribution);
    }
}
