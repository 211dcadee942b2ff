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

//! In-memory port implementations
//!
//! Reference implementations of the `tracelab-core` port traits backed by
//! in-process maps. They carry the same semantics as the production
//! collaborators (version-guarded writes, TTL locks, cursor pagination) and
//! back the engine's tests as well as fully embedded deployments.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use tracelab_core::aggregate::{ExptAggrResult, FieldType};
use tracelab_core::error::{AggrError, Result};
use tracelab_core::event::AggrCalculateEvent;
use tracelab_core::ports::{
    AggrEventPublisher, AggrResultStore, AnnotationReader, EvaluatorMetaReader,
    EvaluatorRecordReader, ExperimentReader, LockProvider, TagMetaReader, TargetRecordReader,
    TurnResultReader,
};
use tracelab_core::record::{
    AnnotateRecord, AnnotateRecordRef, EvaluatorRecord, EvaluatorVersionMeta, ExperimentMeta,
    ExptEvaluatorRef, TagInfo, TargetRecord, TurnEvaluatorResultRef, TurnResultRow,
};

type RowKey = (i64, FieldType, String);

fn row_key(experiment_id: i64, field_type: FieldType, field_key: &str) -> RowKey {
    (experiment_id, field_type, field_key.to_string())
}

/// Versioned in-memory aggregate store.
///
/// Tracks create/update call counts so tests can assert that reconciliation
/// performed (or skipped) writes.
#[derive(Default)]
pub struct InMemoryAggrResultStore {
    rows: Mutex<HashMap<RowKey, ExptAggrResult>>,
    creates: Mutex<usize>,
    updates: Mutex<usize>,
}

impl InMemoryAggrResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(create calls, update calls)` observed so far.
    pub fn write_counts(&self) -> (usize, usize) {
        (*self.creates.lock(), *self.updates.lock())
    }

    /// Seed a row directly, bypassing the write counters.
    pub fn seed(&self, row: ExptAggrResult) {
        let key = row_key(row.experiment_id, row.field_type, &row.field_key);
        self.rows.lock().insert(key, row);
    }
}

#[async_trait]
impl AggrResultStore for InMemoryAggrResultStore {
    async fn get_by_experiment(&self, experiment_id: i64) -> Result<Vec<ExptAggrResult>> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|row| row.experiment_id == experiment_id)
            .cloned()
            .collect())
    }

    async fn get_by_experiment_ids(
        &self,
        experiment_ids: &[i64],
    ) -> Result<Vec<ExptAggrResult>> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|row| experiment_ids.contains(&row.experiment_id))
            .cloned()
            .collect())
    }

    async fn get_one(
        &self,
        experiment_id: i64,
        field_type: FieldType,
        field_key: &str,
    ) -> Result<Option<ExptAggrResult>> {
        Ok(self
            .rows
            .lock()
            .get(&row_key(experiment_id, field_type, field_key))
            .cloned())
    }

    async fn create_batch(&self, rows: Vec<ExptAggrResult>) -> Result<()> {
        *self.creates.lock() += 1;
        let mut stored = self.rows.lock();
        let now = Utc::now();
        for mut row in rows {
            row.updated_at = Some(now);
            let key = row_key(row.experiment_id, row.field_type, &row.field_key);
            stored.insert(key, row);
        }
        Ok(())
    }

    async fn update_and_get_latest_version(
        &self,
        experiment_id: i64,
        field_type: FieldType,
        field_key: &str,
    ) -> Result<i64> {
        let mut stored = self.rows.lock();
        let row = stored
            .get_mut(&row_key(experiment_id, field_type, field_key))
            .ok_or_else(|| {
                AggrError::NotFound(format!(
                    "aggregate result for experiment {experiment_id}, field {field_type:?}:{field_key}"
                ))
            })?;
        row.version += 1;
        Ok(row.version)
    }

    async fn update_by_version(&self, row: &ExptAggrResult, version: i64) -> Result<()> {
        *self.updates.lock() += 1;
        let mut stored = self.rows.lock();
        let key = row_key(row.experiment_id, row.field_type, &row.field_key);
        let current = stored.get_mut(&key).ok_or_else(|| {
            AggrError::NotFound(format!(
                "aggregate result for experiment {}, field {:?}:{}",
                row.experiment_id, row.field_type, row.field_key
            ))
        })?;

        if current.version != version {
            return Err(AggrError::VersionConflict {
                experiment_id: row.experiment_id,
                field_type: row.field_type,
                field_key: row.field_key.clone(),
                version,
            });
        }

        current.score = row.score;
        current.aggr_result = row.aggr_result.clone();
        current.updated_at = Some(Utc::now());
        Ok(())
    }
}

/// TTL-bounded in-process lock.
#[derive(Default)]
pub struct InMemoryLockProvider {
    held: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut held = self.held.lock();
        let now = Instant::now();
        if let Some(expiry) = held.get(key) {
            if *expiry > now {
                return Ok(false);
            }
        }
        held.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<bool> {
        Ok(self.held.lock().remove(key).is_some())
    }
}

/// Publisher that records every event instead of sending it anywhere.
#[derive(Default)]
pub struct CollectingEventPublisher {
    events: Mutex<Vec<(AggrCalculateEvent, Option<Duration>)>>,
}

impl CollectingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(AggrCalculateEvent, Option<Duration>)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AggrEventPublisher for CollectingEventPublisher {
    async fn publish_recompute_event(
        &self,
        event: AggrCalculateEvent,
        delay: Option<Duration>,
    ) -> Result<()> {
        self.events.lock().push((event, delay));
        Ok(())
    }
}

/// Vec-backed turn-result reader with index-cursor pagination.
#[derive(Default)]
pub struct InMemoryTurnResultReader {
    evaluator_refs: HashMap<i64, Vec<TurnEvaluatorResultRef>>,
    turn_rows: HashMap<i64, Vec<TurnResultRow>>,
}

impl InMemoryTurnResultReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluator_refs(
        mut self,
        experiment_id: i64,
        refs: Vec<TurnEvaluatorResultRef>,
    ) -> Self {
        self.evaluator_refs.insert(experiment_id, refs);
        self
    }

    pub fn with_turn_rows(mut self, experiment_id: i64, rows: Vec<TurnResultRow>) -> Self {
        self.turn_rows.insert(experiment_id, rows);
        self
    }
}

#[async_trait]
impl TurnResultReader for InMemoryTurnResultReader {
    async fn get_evaluator_result_refs(
        &self,
        _space_id: i64,
        experiment_id: i64,
    ) -> Result<Vec<TurnEvaluatorResultRef>> {
        Ok(self
            .evaluator_refs
            .get(&experiment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_evaluator_result_refs_by_version(
        &self,
        _space_id: i64,
        experiment_id: i64,
        evaluator_version_id: i64,
    ) -> Result<Vec<TurnEvaluatorResultRef>> {
        Ok(self
            .evaluator_refs
            .get(&experiment_id)
            .map(|refs| {
                refs.iter()
                    .filter(|r| r.evaluator_version_id == evaluator_version_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scan_turn_results(
        &self,
        experiment_id: i64,
        cursor: i64,
        limit: i64,
        _space_id: i64,
    ) -> Result<(Vec<TurnResultRow>, i64)> {
        let rows = self.turn_rows.get(&experiment_id);
        let Some(rows) = rows else {
            return Ok((Vec::new(), cursor));
        };

        let start = (cursor as usize).min(rows.len());
        let end = (start + limit as usize).min(rows.len());
        Ok((rows[start..end].to_vec(), end as i64))
    }
}

/// Map-backed evaluator record fetcher.
#[derive(Default)]
pub struct InMemoryEvaluatorRecordReader {
    records: HashMap<i64, EvaluatorRecord>,
}

impl InMemoryEvaluatorRecordReader {
    pub fn new(records: Vec<EvaluatorRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }
}

#[async_trait]
impl EvaluatorRecordReader for InMemoryEvaluatorRecordReader {
    async fn batch_get_evaluator_records(&self, ids: &[i64]) -> Result<Vec<EvaluatorRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }
}

/// Map-backed target record fetcher.
#[derive(Default)]
pub struct InMemoryTargetRecordReader {
    records: HashMap<i64, TargetRecord>,
}

impl InMemoryTargetRecordReader {
    pub fn new(records: Vec<TargetRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }
}

#[async_trait]
impl TargetRecordReader for InMemoryTargetRecordReader {
    async fn batch_get_target_records(
        &self,
        _space_id: i64,
        ids: &[i64],
    ) -> Result<Vec<TargetRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }
}

/// Map-backed experiment metadata reader.
#[derive(Default)]
pub struct InMemoryExperimentReader {
    experiments: HashMap<i64, ExperimentMeta>,
    evaluator_refs: Vec<ExptEvaluatorRef>,
}

impl InMemoryExperimentReader {
    pub fn new(experiments: Vec<ExperimentMeta>) -> Self {
        Self {
            experiments: experiments.into_iter().map(|e| (e.id, e)).collect(),
            evaluator_refs: Vec::new(),
        }
    }

    pub fn with_evaluator_refs(mut self, refs: Vec<ExptEvaluatorRef>) -> Self {
        self.evaluator_refs = refs;
        self
    }
}

#[async_trait]
impl ExperimentReader for InMemoryExperimentReader {
    async fn get_experiment(&self, experiment_id: i64, _space_id: i64) -> Result<ExperimentMeta> {
        self.experiments
            .get(&experiment_id)
            .cloned()
            .ok_or_else(|| AggrError::NotFound(format!("experiment {experiment_id}")))
    }

    async fn batch_get_basics(&self, experiment_ids: &[i64]) -> Result<Vec<ExperimentMeta>> {
        Ok(experiment_ids
            .iter()
            .filter_map(|id| self.experiments.get(id).cloned())
            .collect())
    }

    async fn get_evaluator_refs(
        &self,
        experiment_ids: &[i64],
        _space_id: i64,
    ) -> Result<Vec<ExptEvaluatorRef>> {
        Ok(self
            .evaluator_refs
            .iter()
            .filter(|r| experiment_ids.contains(&r.experiment_id))
            .cloned()
            .collect())
    }
}

/// Vec-backed annotation reader.
#[derive(Default)]
pub struct InMemoryAnnotationReader {
    refs: Vec<AnnotateRecordRef>,
    records: HashMap<i64, AnnotateRecord>,
}

impl InMemoryAnnotationReader {
    pub fn new(refs: Vec<AnnotateRecordRef>, records: Vec<AnnotateRecord>) -> Self {
        Self {
            refs,
            records: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }
}

#[async_trait]
impl AnnotationReader for InMemoryAnnotationReader {
    async fn get_record_refs_by_tag_key(
        &self,
        experiment_id: i64,
        _space_id: i64,
        tag_key_id: i64,
    ) -> Result<Vec<AnnotateRecordRef>> {
        Ok(self
            .refs
            .iter()
            .filter(|r| r.experiment_id == experiment_id && r.tag_key_id == tag_key_id)
            .cloned()
            .collect())
    }

    async fn batch_get_record_refs(
        &self,
        experiment_ids: &[i64],
        _space_id: i64,
    ) -> Result<Vec<AnnotateRecordRef>> {
        Ok(self
            .refs
            .iter()
            .filter(|r| experiment_ids.contains(&r.experiment_id))
            .cloned()
            .collect())
    }

    async fn get_records_by_ids(
        &self,
        _space_id: i64,
        ids: &[i64],
    ) -> Result<Vec<AnnotateRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }
}

/// Map-backed evaluator version metadata reader.
#[derive(Default)]
pub struct InMemoryEvaluatorMetaReader {
    versions: HashMap<i64, EvaluatorVersionMeta>,
}

impl InMemoryEvaluatorMetaReader {
    pub fn new(versions: Vec<EvaluatorVersionMeta>) -> Self {
        Self {
            versions: versions
                .into_iter()
                .map(|v| (v.evaluator_version_id, v))
                .collect(),
        }
    }
}

#[async_trait]
impl EvaluatorMetaReader for InMemoryEvaluatorMetaReader {
    async fn batch_get_evaluator_versions(
        &self,
        evaluator_version_ids: &[i64],
    ) -> Result<Vec<EvaluatorVersionMeta>> {
        Ok(evaluator_version_ids
            .iter()
            .filter_map(|id| self.versions.get(id).cloned())
            .collect())
    }
}

/// Map-backed tag metadata reader.
#[derive(Default)]
pub struct InMemoryTagMetaReader {
    tags: HashMap<i64, TagInfo>,
}

impl InMemoryTagMetaReader {
    pub fn new(tags: Vec<TagInfo>) -> Self {
        Self {
            tags: tags.into_iter().map(|t| (t.tag_key_id, t)).collect(),
        }
    }
}

#[async_trait]
impl TagMetaReader for InMemoryTagMetaReader {
    async fn batch_get_tag_info(
        &self,
        _space_id: i64,
        tag_key_ids: &[i64],
    ) -> Result<Vec<TagInfo>> {
        Ok(tag_key_ids
            .iter()
            .filter_map(|id| self.tags.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelab_core::aggregate::AggregateResult;

    fn seeded_store() -> InMemoryAggrResultStore {
        let store = InMemoryAggrResultStore::new();
        let row = ExptAggrResult::from_aggregate(
            1,
            2,
            FieldType::EvaluatorScore,
            "7",
            &AggregateResult::default(),
        )
        .unwrap();
        store.seed(row);
        store
    }

    #[tokio::test]
    async fn test_version_guarded_update() {
        let store = seeded_store();

        // Two writers both bump the version; the first writer's guard is
        // stale by the time it writes.
        let stale = store
            .update_and_get_latest_version(2, FieldType::EvaluatorScore, "7")
            .await
            .unwrap();
        let fresh = store
            .update_and_get_latest_version(2, FieldType::EvaluatorScore, "7")
            .await
            .unwrap();
        assert_eq!(stale, 1);
        assert_eq!(fresh, 2);

        let row = store
            .get_one(2, FieldType::EvaluatorScore, "7")
            .await
            .unwrap()
            .unwrap();

        let err = store.update_by_version(&row, stale).await.unwrap_err();
        assert!(err.is_version_conflict());

        store.update_by_version(&row, fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_bump_version_on_missing_row() {
        let store = InMemoryAggrResultStore::new();
        let err = store
            .update_and_get_latest_version(9, FieldType::Annotation, "1")
            .await
            .unwrap_err();
        assert!(matches!(err, AggrError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lock_ttl_expiry() {
        let locker = InMemoryLockProvider::new();

        assert!(locker.lock("k", Duration::from_secs(60)).await.unwrap());
        assert!(!locker.lock("k", Duration::from_secs(60)).await.unwrap());

        // Zero TTL expires immediately, so the next acquisition wins.
        assert!(locker.unlock("k").await.unwrap());
        assert!(locker.lock("k", Duration::ZERO).await.unwrap());
        assert!(locker.lock("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_pagination() {
        let rows: Vec<TurnResultRow> = (0..7)
            .map(|i| TurnResultRow {
                id: i,
                target_result_id: 100 + i,
            })
            .collect();
        let reader = InMemoryTurnResultReader::new().with_turn_rows(1, rows);

        let (page, cursor) = reader.scan_turn_results(1, 0, 3, 1).await.unwrap();
        assert_eq!(page.len(), 3);
        let (page, cursor) = reader.scan_turn_results(1, cursor, 3, 1).await.unwrap();
        assert_eq!(page.len(), 3);
        let (page, _) = reader.scan_turn_results(1, cursor, 3, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].target_result_id, 106);
    }
}
