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

//! Port contracts the engine consumes
//!
//! Persistence, record fetching, locking and event publishing are owned by
//! external collaborators. The engine is constructed with `Arc<dyn Trait>`
//! implementations of these ports; `tracelab-aggr::memory` ships in-memory
//! implementations for tests and embedded use.

use std::time::Duration;

use async_trait::async_trait;

use crate::aggregate::{ExptAggrResult, FieldType};
use crate::error::Result;
use crate::event::AggrCalculateEvent;
use crate::record::{
    AnnotateRecord, AnnotateRecordRef, EvaluatorRecord, EvaluatorVersionMeta, ExperimentMeta,
    ExptEvaluatorRef, TagInfo, TargetRecord, TurnEvaluatorResultRef, TurnResultRow,
};

/// Reader over an experiment's per-turn result rows.
#[async_trait]
pub trait TurnResultReader: Send + Sync {
    /// All evaluator-result references of an experiment.
    async fn get_evaluator_result_refs(
        &self,
        space_id: i64,
        experiment_id: i64,
    ) -> Result<Vec<TurnEvaluatorResultRef>>;

    /// Evaluator-result references of one evaluator version.
    async fn get_evaluator_result_refs_by_version(
        &self,
        space_id: i64,
        experiment_id: i64,
        evaluator_version_id: i64,
    ) -> Result<Vec<TurnEvaluatorResultRef>>;

    /// One page of turn results starting at `cursor`; returns the rows and
    /// the cursor for the next page.
    async fn scan_turn_results(
        &self,
        experiment_id: i64,
        cursor: i64,
        limit: i64,
        space_id: i64,
    ) -> Result<(Vec<TurnResultRow>, i64)>;
}

/// Batch fetcher for evaluator output records.
#[async_trait]
pub trait EvaluatorRecordReader: Send + Sync {
    async fn batch_get_evaluator_records(&self, ids: &[i64]) -> Result<Vec<EvaluatorRecord>>;
}

/// Batch fetcher for eval-target output records.
#[async_trait]
pub trait TargetRecordReader: Send + Sync {
    async fn batch_get_target_records(
        &self,
        space_id: i64,
        ids: &[i64],
    ) -> Result<Vec<TargetRecord>>;
}

/// Key-value style store of persisted aggregate rows, addressed by
/// `(experiment_id, field_type, field_key)`.
#[async_trait]
pub trait AggrResultStore: Send + Sync {
    async fn get_by_experiment(&self, experiment_id: i64) -> Result<Vec<ExptAggrResult>>;

    async fn get_by_experiment_ids(&self, experiment_ids: &[i64])
        -> Result<Vec<ExptAggrResult>>;

    async fn get_one(
        &self,
        experiment_id: i64,
        field_type: FieldType,
        field_key: &str,
    ) -> Result<Option<ExptAggrResult>>;

    async fn create_batch(&self, rows: Vec<ExptAggrResult>) -> Result<()>;

    /// Atomically increment the row's version counter and return the new
    /// version. The returned version guards the subsequent
    /// [`update_by_version`](Self::update_by_version) write.
    async fn update_and_get_latest_version(
        &self,
        experiment_id: i64,
        field_type: FieldType,
        field_key: &str,
    ) -> Result<i64>;

    /// Write the row's content iff its stored version still equals
    /// `version`; fails with `AggrError::VersionConflict` otherwise.
    async fn update_by_version(&self, row: &ExptAggrResult, version: i64) -> Result<()>;
}

/// Reader over experiment metadata.
#[async_trait]
pub trait ExperimentReader: Send + Sync {
    async fn get_experiment(&self, experiment_id: i64, space_id: i64) -> Result<ExperimentMeta>;

    async fn batch_get_basics(&self, experiment_ids: &[i64]) -> Result<Vec<ExperimentMeta>>;

    async fn get_evaluator_refs(
        &self,
        experiment_ids: &[i64],
        space_id: i64,
    ) -> Result<Vec<ExptEvaluatorRef>>;
}

/// Reader over annotation records and their per-turn references.
#[async_trait]
pub trait AnnotationReader: Send + Sync {
    async fn get_record_refs_by_tag_key(
        &self,
        experiment_id: i64,
        space_id: i64,
        tag_key_id: i64,
    ) -> Result<Vec<AnnotateRecordRef>>;

    async fn batch_get_record_refs(
        &self,
        experiment_ids: &[i64],
        space_id: i64,
    ) -> Result<Vec<AnnotateRecordRef>>;

    async fn get_records_by_ids(&self, space_id: i64, ids: &[i64])
        -> Result<Vec<AnnotateRecord>>;
}

/// Evaluator version metadata lookup (read path labeling only).
#[async_trait]
pub trait EvaluatorMetaReader: Send + Sync {
    async fn batch_get_evaluator_versions(
        &self,
        evaluator_version_ids: &[i64],
    ) -> Result<Vec<EvaluatorVersionMeta>>;
}

/// Annotation tag metadata lookup (read path labeling only).
#[async_trait]
pub trait TagMetaReader: Send + Sync {
    async fn batch_get_tag_info(&self, space_id: i64, tag_key_ids: &[i64])
        -> Result<Vec<TagInfo>>;
}

/// TTL-bounded distributed lock.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Try to acquire `key` for `ttl`; `false` means another holder is
    /// active.
    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Release `key`; `false` means the lock was not held.
    async fn unlock(&self, key: &str) -> Result<bool>;
}

/// Publisher of recompute events consumed by the external scheduler.
#[async_trait]
pub trait AggrEventPublisher: Send + Sync {
    async fn publish_recompute_event(
        &self,
        event: AggrCalculateEvent,
        delay: Option<Duration>,
    ) -> Result<()>;
}
