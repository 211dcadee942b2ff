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

//! Upstream records the engine aggregates over
//!
//! These are read-only projections of entities owned by other services:
//! per-turn result references, evaluator output records, target output
//! records, and human annotation records.

use serde::{Deserialize, Serialize};

/// Links one experiment turn to one evaluator's result record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvaluatorResultRef {
    pub evaluator_version_id: i64,
    pub evaluator_result_id: i64,
}

/// One row of an experiment's turn-result scan; only the target-record id is
/// consumed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResultRow {
    pub id: i64,
    pub target_result_id: i64,
}

/// Evaluator output record. A manual correction, when present, overrides the
/// raw score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorRecord {
    pub id: i64,
    pub score: Option<f64>,
    pub correction_score: Option<f64>,
}

impl EvaluatorRecord {
    /// Score to aggregate: the correction when one exists, otherwise the raw
    /// evaluator score. `None` means the record is skipped.
    pub fn effective_score(&self) -> Option<f64> {
        self.correction_score.or(self.score)
    }
}

/// Eval-target output record carrying the latency/token measurements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: i64,
    pub output: Option<TargetOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetOutput {
    pub latency_ms: i64,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Links one experiment turn to one annotation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateRecordRef {
    pub experiment_id: i64,
    pub tag_key_id: i64,
    pub annotate_record_id: i64,
}

/// Value shapes an annotation tag can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagContentType {
    ContinuousNumber,
    Boolean,
    Categorical,
    FreeText,
}

/// Human annotation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateRecord {
    pub id: i64,
    pub tag_key_id: i64,
    pub tag_value_id: i64,
    pub tag_content_type: TagContentType,
    /// Set for continuous-number tags only.
    pub score: Option<f64>,
}

/// Annotation tag metadata, used to label aggregate views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag_key_id: i64,
    pub tag_key_name: String,
}

/// Evaluator version metadata, used to label aggregate views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorVersionMeta {
    pub evaluator_id: i64,
    pub evaluator_version_id: i64,
    pub name: String,
    pub version: String,
}

/// Links an experiment to the evaluator versions it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExptEvaluatorRef {
    pub experiment_id: i64,
    pub evaluator_id: i64,
    pub evaluator_version_id: i64,
}

/// Experiment run lifecycle. Owned elsewhere; consulted here only as a
/// precondition for partial recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Terminated,
}

impl ExperimentStatus {
    /// Whether the experiment has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExperimentStatus::Success | ExperimentStatus::Failed | ExperimentStatus::Terminated
        )
    }
}

/// Basic experiment projection used by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentMeta {
    pub id: i64,
    pub space_id: i64,
    pub target_id: i64,
    pub target_version_id: i64,
    pub status: ExperimentStatus,
}
