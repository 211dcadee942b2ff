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

//! Read-path assembly of cross-field aggregate views
//!
//! Persisted aggregate rows are grouped per experiment and labeled with
//! evaluator and tag metadata for presentation. Metadata lookups run on a
//! small bounded pool; every submitted lookup runs to completion and the
//! first failure is returned. Labeling is best-effort: a field whose
//! metadata is missing keeps its statistics and loses only its display name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use tracelab_core::aggregate::{
    AnnotationAggregateResult, EvaluatorAggregateResult, ExptAggregateView, FieldType,
    TargetMetricsAggregateResult,
};
use tracelab_core::error::{AggrError, Result};
use tracelab_core::ports::{
    AggrResultStore, AnnotationReader, EvaluatorMetaReader, ExperimentReader, TagMetaReader,
};
use tracelab_core::record::{EvaluatorVersionMeta, ExperimentMeta, TagInfo};

/// Size of the metadata-lookup worker pool.
const METADATA_FETCH_CONCURRENCY: usize = 3;

/// Assembles aggregate views for API consumers.
pub struct AggrResultViewReader {
    aggr_store: Arc<dyn AggrResultStore>,
    experiments: Arc<dyn ExperimentReader>,
    annotations: Arc<dyn AnnotationReader>,
    evaluator_meta: Arc<dyn EvaluatorMetaReader>,
    tag_meta: Arc<dyn TagMetaReader>,
}

/// One completed metadata lookup.
enum MetaPart {
    Experiments(Vec<ExperimentMeta>),
    Evaluators(HashMap<i64, EvaluatorVersionMeta>),
    Tags(HashMap<i64, TagInfo>),
}

impl AggrResultViewReader {
    pub fn new(
        aggr_store: Arc<dyn AggrResultStore>,
        experiments: Arc<dyn ExperimentReader>,
        annotations: Arc<dyn AnnotationReader>,
        evaluator_meta: Arc<dyn EvaluatorMetaReader>,
        tag_meta: Arc<dyn TagMetaReader>,
    ) -> Self {
        Self {
            aggr_store,
            experiments,
            annotations,
            evaluator_meta,
            tag_meta,
        }
    }

    /// Aggregate views for `experiment_ids`, one per experiment that has at
    /// least one persisted aggregate row.
    pub async fn batch_get_aggregate_views(
        &self,
        space_id: i64,
        experiment_ids: &[i64],
    ) -> Result<Vec<ExptAggregateView>> {
        let rows = self
            .aggr_store
            .get_by_experiment_ids(experiment_ids)
            .await?;

        let (experiments, evaluators, tags) =
            self.fetch_metadata(space_id, experiment_ids).await?;

        let target_ids: HashMap<i64, (i64, i64)> = experiments
            .iter()
            .map(|e| (e.id, (e.target_id, e.target_version_id)))
            .collect();

        let mut rows_by_experiment: HashMap<i64, Vec<_>> = HashMap::new();
        for row in rows {
            rows_by_experiment
                .entry(row.experiment_id)
                .or_default()
                .push(row);
        }

        let mut views = Vec::with_capacity(rows_by_experiment.len());
        for (experiment_id, rows) in rows_by_experiment {
            let mut view = ExptAggregateView {
                experiment_id,
                ..Default::default()
            };
            if let Some((target_id, target_version_id)) = target_ids.get(&experiment_id) {
                view.target_results = TargetMetricsAggregateResult {
                    target_id: *target_id,
                    target_version_id: *target_version_id,
                    ..Default::default()
                };
            }

            for row in rows {
                if row.updated_at > view.updated_at {
                    view.updated_at = row.updated_at;
                }

                let aggregate = row.aggregate()?;
                match row.field_type {
                    FieldType::EvaluatorScore => {
                        let evaluator_version_id: i64 =
                            row.field_key.parse().map_err(|_| {
                                AggrError::InvalidParam(format!(
                                    "malformed evaluator field key {}",
                                    row.field_key
                                ))
                            })?;
                        let meta = evaluators.get(&evaluator_version_id);
                        if meta.is_none() {
                            warn!(
                                experiment_id,
                                evaluator_version_id,
                                "missing evaluator metadata, returning unlabeled result"
                            );
                        }
                        view.evaluator_results.insert(
                            evaluator_version_id,
                            EvaluatorAggregateResult {
                                evaluator_id: meta.map(|m| m.evaluator_id).unwrap_or_default(),
                                evaluator_version_id,
                                name: meta.map(|m| m.name.clone()),
                                version: meta.map(|m| m.version.clone()),
                                aggregator_results: aggregate.aggregator_results,
                            },
                        );
                    }
                    FieldType::Annotation => {
                        let tag_key_id: i64 = row.field_key.parse().map_err(|_| {
                            AggrError::InvalidParam(format!(
                                "malformed tag field key {}",
                                row.field_key
                            ))
                        })?;
                        let info = tags.get(&tag_key_id);
                        if info.is_none() {
                            warn!(
                                experiment_id,
                                tag_key_id,
                                "missing tag metadata, returning unlabeled result"
                            );
                        }
                        view.annotation_results.insert(
                            tag_key_id,
                            AnnotationAggregateResult {
                                tag_key_id,
                                name: info.map(|i| i.tag_key_name.clone()),
                                aggregator_results: aggregate.aggregator_results,
                            },
                        );
                    }
                    FieldType::TargetLatency => {
                        view.target_results.latency = aggregate.aggregator_results;
                    }
                    FieldType::TargetInputTokens => {
                        view.target_results.input_tokens = aggregate.aggregator_results;
                    }
                    FieldType::TargetOutputTokens => {
                        view.target_results.output_tokens = aggregate.aggregator_results;
                    }
                    FieldType::TargetTotalTokens => {
                        view.target_results.total_tokens = aggregate.aggregator_results;
                    }
                }
            }

            views.push(view);
        }

        Ok(views)
    }

    /// Run the three metadata lookups on a bounded pool. Submitted lookups
    /// always run to completion; the first observed failure is returned.
    async fn fetch_metadata(
        &self,
        space_id: i64,
        experiment_ids: &[i64],
    ) -> Result<(
        Vec<ExperimentMeta>,
        HashMap<i64, EvaluatorVersionMeta>,
        HashMap<i64, TagInfo>,
    )> {
        let semaphore = Arc::new(Semaphore::new(METADATA_FETCH_CONCURRENCY));
        let mut tasks: JoinSet<Result<MetaPart>> = JoinSet::new();

        {
            let experiments = self.experiments.clone();
            let ids = experiment_ids.to_vec();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AggrError::Store(e.to_string()))?;
                Ok(MetaPart::Experiments(
                    experiments.batch_get_basics(&ids).await?,
                ))
            });
        }

        {
            let experiments = self.experiments.clone();
            let evaluator_meta = self.evaluator_meta.clone();
            let ids = experiment_ids.to_vec();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AggrError::Store(e.to_string()))?;
                let refs = experiments.get_evaluator_refs(&ids, space_id).await?;
                let mut version_ids: Vec<i64> =
                    refs.iter().map(|r| r.evaluator_version_id).collect();
                version_ids.sort_unstable();
                version_ids.dedup();
                let versions = evaluator_meta
                    .batch_get_evaluator_versions(&version_ids)
                    .await?;
                Ok(MetaPart::Evaluators(
                    versions
                        .into_iter()
                        .map(|v| (v.evaluator_version_id, v))
                        .collect(),
                ))
            });
        }

        {
            let annotations = self.annotations.clone();
            let tag_meta = self.tag_meta.clone();
            let ids = experiment_ids.to_vec();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AggrError::Store(e.to_string()))?;
                let refs = annotations.batch_get_record_refs(&ids, space_id).await?;
                let mut tag_key_ids: Vec<i64> = refs.iter().map(|r| r.tag_key_id).collect();
                tag_key_ids.sort_unstable();
                tag_key_ids.dedup();
                let infos = tag_meta.batch_get_tag_info(space_id, &tag_key_ids).await?;
                Ok(MetaPart::Tags(
                    infos.into_iter().map(|i| (i.tag_key_id, i)).collect(),
                ))
            });
        }

        let mut experiments = Vec::new();
        let mut evaluators = HashMap::new();
        let mut tags = HashMap::new();
        let mut first_err: Option<AggrError> = None;

        // Drain every task before reporting, so in-flight lookups are never
        // abandoned mid-write.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(MetaPart::Experiments(parts))) => experiments = parts,
                Ok(Ok(MetaPart::Evaluators(parts))) => evaluators = parts,
                Ok(Ok(MetaPart::Tags(parts))) => tags = parts,
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(AggrError::Store(err.to_string()));
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok((experiments, evaluators, tags)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tracelab_core::aggregate::ExptAggrResult;
    use tracelab_core::record::{AnnotateRecordRef, ExperimentStatus, ExptEvaluatorRef};

    use crate::group::{AggregatorGroup, CategoricalAggregatorGroup};
    use crate::memory::{
        InMemoryAggrResultStore, InMemoryAnnotationReader, InMemoryEvaluatorMetaReader,
        InMemoryExperimentReader, InMemoryTagMetaReader,
    };

    fn evaluator_row(experiment_id: i64, version_id: i64, scores: &[f64]) -> ExptAggrResult {
        let mut group = AggregatorGroup::new().with_score_distribution();
        for score in scores {
            group.append(*score);
        }
        ExptAggrResult::from_aggregate(
            1,
            experiment_id,
            FieldType::EvaluatorScore,
            version_id.to_string(),
            &group.result(),
        )
        .unwrap()
    }

    fn annotation_row(experiment_id: i64, tag_key_id: i64) -> ExptAggrResult {
        let mut group = CategoricalAggregatorGroup::new();
        group.append("201");
        group.append("201");
        group.append("202");
        ExptAggrResult::from_aggregate(
            1,
            experiment_id,
            FieldType::Annotation,
            tag_key_id.to_string(),
            &group.result(),
        )
        .unwrap()
    }

    fn latency_row(experiment_id: i64) -> ExptAggrResult {
        let mut group = AggregatorGroup::new().with_bucket_distribution(20);
        group.append(120.0);
        group.append(480.0);
        ExptAggrResult::from_aggregate(
            1,
            experiment_id,
            FieldType::TargetLatency,
            tracelab_core::aggregate::FIELD_KEY_TARGET_LATENCY,
            &group.result(),
        )
        .unwrap()
    }

    fn reader_fixture(store: Arc<InMemoryAggrResultStore>) -> AggrResultViewReader {
        let experiments = Arc::new(
            InMemoryExperimentReader::new(vec![ExperimentMeta {
                id: 2,
                space_id: 1,
                target_id: 31,
                target_version_id: 32,
                status: ExperimentStatus::Success,
            }])
            .with_evaluator_refs(vec![ExptEvaluatorRef {
                experiment_id: 2,
                evaluator_id: 5,
                evaluator_version_id: 7,
            }]),
        );
        let annotations = Arc::new(InMemoryAnnotationReader::new(
            vec![AnnotateRecordRef {
                experiment_id: 2,
                tag_key_id: 11,
                annotate_record_id: 900,
            }],
            Vec::new(),
        ));
        let evaluator_meta = Arc::new(InMemoryEvaluatorMetaReader::new(vec![
            EvaluatorVersionMeta {
                evaluator_id: 5,
                evaluator_version_id: 7,
                name: "accuracy".to_string(),
                version: "v2".to_string(),
            },
        ]));
        let tag_meta = Arc::new(InMemoryTagMetaReader::new(vec![TagInfo {
            tag_key_id: 11,
            tag_key_name: "helpfulness".to_string(),
        }]));

        AggrResultViewReader::new(store, experiments, annotations, evaluator_meta, tag_meta)
    }

    #[tokio::test]
    async fn test_assemble_cross_field_view() {
        let store = Arc::new(InMemoryAggrResultStore::new());
        store
            .create_batch(vec![
                evaluator_row(2, 7, &[0.5, 1.0]),
                annotation_row(2, 11),
                latency_row(2),
            ])
            .await
            .unwrap();

        let reader = reader_fixture(store);
        let views = reader.batch_get_aggregate_views(1, &[2]).await.unwrap();

        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.experiment_id, 2);
        assert!(view.updated_at.is_some());

        let evaluator = &view.evaluator_results[&7];
        assert_eq!(evaluator.evaluator_id, 5);
        assert_eq!(evaluator.name.as_deref(), Some("accuracy"));
        assert_eq!(evaluator.version.as_deref(), Some("v2"));
        assert_eq!(evaluator.aggregator_results.len(), 5);

        let annotation = &view.annotation_results[&11];
        assert_eq!(annotation.name.as_deref(), Some("helpfulness"));

        assert_eq!(view.target_results.target_id, 31);
        assert_eq!(view.target_results.target_version_id, 32);
        assert!(!view.target_results.latency.is_empty());
        assert!(view.target_results.input_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_missing_metadata_keeps_statistics() {
        let store = Arc::new(InMemoryAggrResultStore::new());
        store
            .create_batch(vec![evaluator_row(2, 99, &[1.0])])
            .await
            .unwrap();

        let reader = reader_fixture(store);
        let views = reader.batch_get_aggregate_views(1, &[2]).await.unwrap();

        let evaluator = &views[0].evaluator_results[&99];
        assert_eq!(evaluator.name, None);
        assert_eq!(evaluator.aggregator_results.len(), 5);
    }

    struct FailingExperimentReader;

    #[async_trait]
    impl ExperimentReader for FailingExperimentReader {
        async fn get_experiment(
            &self,
            _experiment_id: i64,
            _space_id: i64,
        ) -> tracelab_core::Result<ExperimentMeta> {
            Err(AggrError::Store("experiment reader down".to_string()))
        }

        async fn batch_get_basics(
            &self,
            _experiment_ids: &[i64],
        ) -> tracelab_core::Result<Vec<ExperimentMeta>> {
            Err(AggrError::Store("experiment reader down".to_string()))
        }

        async fn get_evaluator_refs(
            &self,
            _experiment_ids: &[i64],
            _space_id: i64,
        ) -> tracelab_core::Result<Vec<ExptEvaluatorRef>> {
            Err(AggrError::Store("experiment reader down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_first_metadata_error_propagates() {
        let store = Arc::new(InMemoryAggrResultStore::new());
        let reader = AggrResultViewReader::new(
            store,
            Arc::new(FailingExperimentReader),
            Arc::new(InMemoryAnnotationReader::new(Vec::new(), Vec::new())),
            Arc::new(InMemoryEvaluatorMetaReader::new(Vec::new())),
            Arc::new(InMemoryTagMetaReader::new(Vec::new())),
        );

        let err = reader
            .batch_get_aggregate_views(1, &[2])
            .await
            .unwrap_err();
        assert!(matches!(err, AggrError::Store(_)));
    }
}
