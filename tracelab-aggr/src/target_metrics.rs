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

//! Target-metric streaming builder
//!
//! Computes latency and token distributions for an experiment without
//! loading the full result set: turn results are scanned in fixed-size pages
//! (with a pause between pages to bound load on the backing store), then the
//! referenced target records are fetched in chunks and fed into bucketed
//! accumulator groups. Any scan or fetch failure aborts the whole build.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use tracelab_core::aggregate::{
    ExptAggrResult, FieldType, FIELD_KEY_TARGET_INPUT_TOKENS, FIELD_KEY_TARGET_LATENCY,
    FIELD_KEY_TARGET_OUTPUT_TOKENS, FIELD_KEY_TARGET_TOTAL_TOKENS,
};
use tracelab_core::error::Result;
use tracelab_core::ports::{TargetRecordReader, TurnResultReader};
use tracelab_core::record::TargetRecord;

use crate::group::AggregatorGroup;

/// Rows per scan page and records per fetch chunk.
const PAGE_SIZE: i64 = 50;
/// Hard ceiling on scan iterations; substitutes for cancellation.
const MAX_SCAN_PAGES: usize = 10_000;
/// Pause between scan pages.
const SCAN_INTERVAL: Duration = Duration::from_millis(30);
/// Bucket count for every target-metric histogram.
const TARGET_NUM_BUCKETS: usize = 20;

/// The four per-experiment target-metric accumulator groups.
pub struct TargetMetricGroups {
    pub latency: AggregatorGroup,
    pub input_tokens: AggregatorGroup,
    pub output_tokens: AggregatorGroup,
    pub total_tokens: AggregatorGroup,
}

impl std::fmt::Debug for TargetMetricGroups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetMetricGroups").finish_non_exhaustive()
    }
}

impl TargetMetricGroups {
    pub fn new() -> Self {
        let bucketed = || AggregatorGroup::new().with_bucket_distribution(TARGET_NUM_BUCKETS);
        Self {
            latency: bucketed(),
            input_tokens: bucketed(),
            output_tokens: bucketed(),
            total_tokens: bucketed(),
        }
    }

    /// Feed a batch of target records. Records with missing output data are
    /// skipped; token groups are only fed when usage is reported.
    pub fn ingest(&mut self, records: &[TargetRecord]) {
        for record in records {
            let Some(output) = &record.output else {
                continue;
            };

            self.latency.append(output.latency_ms as f64);
            if let Some(usage) = &output.usage {
                self.input_tokens.append(usage.input_tokens as f64);
                self.output_tokens.append(usage.output_tokens as f64);
                self.total_tokens.append(usage.total_tokens as f64);
            }
        }
    }

    /// Build the four persisted rows, one per metric field.
    pub fn into_rows(self, space_id: i64, experiment_id: i64) -> Result<Vec<ExptAggrResult>> {
        let fields = [
            (FieldType::TargetLatency, FIELD_KEY_TARGET_LATENCY, &self.latency),
            (
                FieldType::TargetInputTokens,
                FIELD_KEY_TARGET_INPUT_TOKENS,
                &self.input_tokens,
            ),
            (
                FieldType::TargetOutputTokens,
                FIELD_KEY_TARGET_OUTPUT_TOKENS,
                &self.output_tokens,
            ),
            (
                FieldType::TargetTotalTokens,
                FIELD_KEY_TARGET_TOTAL_TOKENS,
                &self.total_tokens,
            ),
        ];

        fields
            .into_iter()
            .map(|(field_type, field_key, group)| {
                ExptAggrResult::from_aggregate(
                    space_id,
                    experiment_id,
                    field_type,
                    field_key,
                    &group.result(),
                )
            })
            .collect()
    }
}

impl Default for TargetMetricGroups {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams an experiment's turn results and builds [`TargetMetricGroups`].
pub struct TargetMetricsBuilder {
    turn_results: Arc<dyn TurnResultReader>,
    target_records: Arc<dyn TargetRecordReader>,
}

impl TargetMetricsBuilder {
    pub fn new(
        turn_results: Arc<dyn TurnResultReader>,
        target_records: Arc<dyn TargetRecordReader>,
    ) -> Self {
        Self {
            turn_results,
            target_records,
        }
    }

    pub async fn build(&self, space_id: i64, experiment_id: i64) -> Result<TargetMetricGroups> {
        let mut target_result_ids = Vec::new();
        let mut cursor = 0i64;

        for _ in 0..MAX_SCAN_PAGES {
            debug!(
                experiment_id,
                cursor,
                limit = PAGE_SIZE,
                "scanning turn results for target metrics"
            );

            let (rows, next_cursor) = self
                .turn_results
                .scan_turn_results(experiment_id, cursor, PAGE_SIZE, space_id)
                .await?;
            cursor = next_cursor;

            if rows.is_empty() {
                break;
            }

            target_result_ids.extend(rows.iter().map(|row| row.target_result_id));

            // A short page means the scan is exhausted.
            if (rows.len() as i64) < PAGE_SIZE {
                break;
            }

            tokio::time::sleep(SCAN_INTERVAL).await;
        }

        let mut groups = TargetMetricGroups::new();
        for chunk in target_result_ids.chunks(PAGE_SIZE as usize) {
            let records = self
                .target_records
                .batch_get_target_records(space_id, chunk)
                .await?;
            groups.ingest(&records);
        }

        Ok(groups)
    }
}
