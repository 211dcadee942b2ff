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

//! Aggregate-result computation and reconciliation
//!
//! A full recompute rebuilds every field summary of an experiment from the
//! raw result records, then diffs against the previously persisted rows:
//! new keys are created in one batch, unchanged rows are skipped, changed
//! rows get a version-guarded update. Recomputation is idempotent, so a
//! failed run is simply retried by the external scheduler.
//!
//! Partial recomputation (one evaluator field or one annotation field)
//! shares the version-guarded update path but requires that an initial full
//! computation already exists.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use tracelab_core::aggregate::{ExptAggrResult, FieldType};
use tracelab_core::error::{AggrError, Result};
use tracelab_core::event::AggrFieldParam;
use tracelab_core::ports::{
    AggrResultStore, AnnotationReader, EvaluatorRecordReader, ExperimentReader, LockProvider,
    TargetRecordReader, TurnResultReader,
};
use tracelab_core::record::{AnnotateRecord, EvaluatorRecord, TagContentType};

use crate::group::{AggregatorGroup, CategoricalAggregatorGroup};
use crate::scheduler::calc_aggr_lock_key;
use crate::target_metrics::{TargetMetricGroups, TargetMetricsBuilder};

/// Computes and reconciles aggregate results for experiments.
///
/// All collaborators are injected at construction; the service holds no
/// other state, so one instance serves concurrent runs for different
/// experiments.
pub struct AggrResultService {
    turn_results: Arc<dyn TurnResultReader>,
    evaluator_records: Arc<dyn EvaluatorRecordReader>,
    target_records: Arc<dyn TargetRecordReader>,
    annotations: Arc<dyn AnnotationReader>,
    experiments: Arc<dyn ExperimentReader>,
    aggr_store: Arc<dyn AggrResultStore>,
    locker: Arc<dyn LockProvider>,
}

impl AggrResultService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        turn_results: Arc<dyn TurnResultReader>,
        evaluator_records: Arc<dyn EvaluatorRecordReader>,
        target_records: Arc<dyn TargetRecordReader>,
        annotations: Arc<dyn AnnotationReader>,
        experiments: Arc<dyn ExperimentReader>,
        aggr_store: Arc<dyn AggrResultStore>,
        locker: Arc<dyn LockProvider>,
    ) -> Self {
        Self {
            turn_results,
            evaluator_records,
            target_records,
            annotations,
            experiments,
            aggr_store,
            locker,
        }
    }

    /// Full recompute of every field of an experiment.
    ///
    /// Releases the per-experiment scheduling lock only on success; on
    /// failure the lock expires via its TTL, bounding the retry window.
    pub async fn create_aggr_result(&self, space_id: i64, experiment_id: i64) -> Result<()> {
        let existing = self.aggr_store.get_by_experiment(experiment_id).await?;

        let evaluator_groups = self
            .build_evaluator_groups(space_id, experiment_id)
            .await?;

        let target_groups =
            TargetMetricsBuilder::new(self.turn_results.clone(), self.target_records.clone())
                .build(space_id, experiment_id)
                .await?;

        self.reconcile(
            space_id,
            experiment_id,
            evaluator_groups,
            target_groups,
            existing,
        )
        .await?;

        match self.locker.unlock(&calc_aggr_lock_key(experiment_id)).await {
            Ok(_) => {}
            Err(err) => {
                warn!(experiment_id, error = %err, "failed to release aggregate calculation lock");
            }
        }

        Ok(())
    }

    /// One accumulator group per evaluator version, fed every scored record.
    async fn build_evaluator_groups(
        &self,
        space_id: i64,
        experiment_id: i64,
    ) -> Result<HashMap<i64, AggregatorGroup>> {
        let refs = self
            .turn_results
            .get_evaluator_result_refs(space_id, experiment_id)
            .await?;

        let mut groups = HashMap::new();
        if refs.is_empty() {
            return Ok(groups);
        }

        let mut result_ids = Vec::with_capacity(refs.len());
        let mut version_to_result_ids: HashMap<i64, Vec<i64>> = HashMap::new();
        for reference in &refs {
            result_ids.push(reference.evaluator_result_id);
            version_to_result_ids
                .entry(reference.evaluator_version_id)
                .or_default()
                .push(reference.evaluator_result_id);
        }

        let records = self
            .evaluator_records
            .batch_get_evaluator_records(&result_ids)
            .await?;
        let record_map: HashMap<i64, &EvaluatorRecord> =
            records.iter().map(|record| (record.id, record)).collect();

        for (evaluator_version_id, result_ids) in version_to_result_ids {
            let mut group = AggregatorGroup::new().with_score_distribution();
            for result_id in result_ids {
                let Some(record) = record_map.get(&result_id) else {
                    continue;
                };
                let Some(score) = record.score else {
                    continue;
                };
                group.append(score);
            }
            groups.insert(evaluator_version_id, group);
        }

        Ok(groups)
    }

    /// Diff the freshly computed summaries against the persisted rows and
    /// apply creates, version-guarded updates, and skips.
    async fn reconcile(
        &self,
        space_id: i64,
        experiment_id: i64,
        evaluator_groups: HashMap<i64, AggregatorGroup>,
        target_groups: TargetMetricGroups,
        existing: Vec<ExptAggrResult>,
    ) -> Result<()> {
        let existing_map: HashMap<(FieldType, String), ExptAggrResult> = existing
            .into_iter()
            .map(|row| (row.field_id(), row))
            .collect();

        let mut rows = Vec::with_capacity(evaluator_groups.len() + 4);
        for (evaluator_version_id, group) in &evaluator_groups {
            rows.push(ExptAggrResult::from_aggregate(
                space_id,
                experiment_id,
                FieldType::EvaluatorScore,
                evaluator_version_id.to_string(),
                &group.result(),
            )?);
        }
        rows.extend(target_groups.into_rows(space_id, experiment_id)?);

        let mut to_create = Vec::new();
        let mut to_update = Vec::new();
        for mut row in rows {
            match existing_map.get(&row.field_id()) {
                Some(existing) if existing.content_eq(&row) => continue,
                Some(_) => {
                    let version = self
                        .aggr_store
                        .update_and_get_latest_version(
                            experiment_id,
                            row.field_type,
                            &row.field_key,
                        )
                        .await?;
                    row.version = version;
                    to_update.push(row);
                }
                None => to_create.push(row),
            }
        }

        if !to_create.is_empty() {
            let created = to_create.len();
            self.aggr_store.create_batch(to_create).await?;
            info!(experiment_id, created, "created aggregate result rows");
        }

        if !to_update.is_empty() {
            let updated = to_update.len();
            for row in to_update {
                let version = row.version;
                self.aggr_store.update_by_version(&row, version).await?;
            }
            info!(experiment_id, updated, "updated aggregate result rows");
        }

        Ok(())
    }

    /// Recompute one evaluator-score field after its records changed (e.g. a
    /// manual score correction).
    ///
    /// Returns `Ok(())` without writing when no initial computation exists
    /// yet and the experiment is still running; once the experiment is
    /// terminal, a missing row is a real error.
    pub async fn update_evaluator_aggr_result(&self, param: &AggrFieldParam) -> Result<()> {
        if param.field_type != FieldType::EvaluatorScore {
            return Err(AggrError::InvalidParam(format!(
                "expected evaluator score field, got {:?}",
                param.field_type
            )));
        }

        if !self.field_ready(param).await? {
            return Ok(());
        }

        // Bump the version before recomputing so a concurrent full recompute
        // of the same field loses the race instead of being overwritten.
        let version = self
            .aggr_store
            .update_and_get_latest_version(param.experiment_id, param.field_type, &param.field_key)
            .await?;

        let evaluator_version_id: i64 = param.field_key.parse().map_err(|_| {
            AggrError::InvalidParam(format!("malformed evaluator field key {}", param.field_key))
        })?;

        let refs = self
            .turn_results
            .get_evaluator_result_refs_by_version(
                param.space_id,
                param.experiment_id,
                evaluator_version_id,
            )
            .await?;
        let result_ids: Vec<i64> = refs.iter().map(|r| r.evaluator_result_id).collect();
        let records = self
            .evaluator_records
            .batch_get_evaluator_records(&result_ids)
            .await?;

        let mut group = AggregatorGroup::new().with_score_distribution();
        for record in &records {
            let Some(score) = record.effective_score() else {
                continue;
            };
            group.append(score);
        }

        let row = ExptAggrResult::from_aggregate(
            param.space_id,
            param.experiment_id,
            FieldType::EvaluatorScore,
            param.field_key.clone(),
            &group.result(),
        )?;
        self.aggr_store.update_by_version(&row, version).await?;

        info!(
            experiment_id = param.experiment_id,
            field_key = %param.field_key,
            "updated evaluator aggregate result"
        );
        Ok(())
    }

    /// Initial computation of one annotation field, routed on the tag's
    /// content type. Free-text tags are not aggregated.
    pub async fn create_annotation_aggr_result(&self, param: &AggrFieldParam) -> Result<()> {
        if param.field_type != FieldType::Annotation {
            return Err(AggrError::InvalidParam(format!(
                "expected annotation field, got {:?}",
                param.field_type
            )));
        }

        let Some(records) = self.load_annotation_records(param).await? else {
            return Ok(());
        };

        let Some(row) = self.build_annotation_row(param, &records)? else {
            return Ok(());
        };

        self.aggr_store.create_batch(vec![row]).await?;
        info!(
            experiment_id = param.experiment_id,
            field_key = %param.field_key,
            "created annotation aggregate result"
        );
        Ok(())
    }

    /// Recompute one annotation field. Same preconditions as
    /// [`update_evaluator_aggr_result`](Self::update_evaluator_aggr_result).
    pub async fn update_annotation_aggr_result(&self, param: &AggrFieldParam) -> Result<()> {
        if param.field_type != FieldType::Annotation {
            return Err(AggrError::InvalidParam(format!(
                "expected annotation field, got {:?}",
                param.field_type
            )));
        }

        if !self.field_ready(param).await? {
            return Ok(());
        }

        let version = self
            .aggr_store
            .update_and_get_latest_version(param.experiment_id, param.field_type, &param.field_key)
            .await?;

        let Some(records) = self.load_annotation_records(param).await? else {
            return Ok(());
        };

        let Some(row) = self.build_annotation_row(param, &records)? else {
            return Ok(());
        };

        self.aggr_store.update_by_version(&row, version).await?;
        info!(
            experiment_id = param.experiment_id,
            field_key = %param.field_key,
            "updated annotation aggregate result"
        );
        Ok(())
    }

    /// Whether a partial recompute may proceed: the row must already exist
    /// from an initial full computation. A missing row is tolerated while
    /// the experiment is still active (the scheduler will come back) and a
    /// hard error once it is terminal.
    async fn field_ready(&self, param: &AggrFieldParam) -> Result<bool> {
        let row = self
            .aggr_store
            .get_one(param.experiment_id, param.field_type, &param.field_key)
            .await?;
        if row.is_some() {
            return Ok(true);
        }

        let experiment = self
            .experiments
            .get_experiment(param.experiment_id, param.space_id)
            .await?;
        if !experiment.status.is_finished() {
            info!(
                experiment_id = param.experiment_id,
                field_key = %param.field_key,
                "initial aggregate computation not finished, skipping field update"
            );
            return Ok(false);
        }

        Err(AggrError::NotFound(format!(
            "aggregate result for experiment {}, field {:?}:{}",
            param.experiment_id, param.field_type, param.field_key
        )))
    }

    async fn load_annotation_records(
        &self,
        param: &AggrFieldParam,
    ) -> Result<Option<Vec<AnnotateRecord>>> {
        let tag_key_id: i64 = param.field_key.parse().map_err(|_| {
            AggrError::InvalidParam(format!("malformed tag field key {}", param.field_key))
        })?;

        let refs = self
            .annotations
            .get_record_refs_by_tag_key(param.experiment_id, param.space_id, tag_key_id)
            .await?;
        if refs.is_empty() {
            info!(
                experiment_id = param.experiment_id,
                tag_key_id, "no annotation records found, skipping aggregate"
            );
            return Ok(None);
        }

        let record_ids: Vec<i64> = refs.iter().map(|r| r.annotate_record_id).collect();
        let records = self
            .annotations
            .get_records_by_ids(param.space_id, &record_ids)
            .await?;
        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(records))
    }

    /// Build the persisted row for an annotation field, or `None` when the
    /// tag's content type is not aggregated.
    fn build_annotation_row(
        &self,
        param: &AggrFieldParam,
        records: &[AnnotateRecord],
    ) -> Result<Option<ExptAggrResult>> {
        let aggregate = match records[0].tag_content_type {
            TagContentType::ContinuousNumber => {
                let mut group = AggregatorGroup::new().with_score_distribution();
                for record in records {
                    let Some(score) = record.score else {
                        continue;
                    };
                    group.append(score);
                }
                group.result()
            }
            TagContentType::Boolean | TagContentType::Categorical => {
                let mut group = CategoricalAggregatorGroup::new();
                for record in records {
                    group.append(&record.tag_value_id.to_string());
                }
                group.result()
            }
            TagContentType::FreeText => return Ok(None),
        };

        Ok(Some(ExptAggrResult::from_aggregate(
            param.space_id,
            param.experiment_id,
            FieldType::Annotation,
            param.field_key.clone(),
            &aggregate,
        )?))
    }
}
