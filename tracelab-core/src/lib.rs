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

//! # Tracelab Core
//!
//! Domain types and port contracts for the experiment aggregation engine:
//! the statistic tagged union, persisted aggregate rows with optimistic
//! versioning, upstream record projections, recompute events, and the
//! async traits external collaborators implement (stores, readers, locks,
//! publishers).
//!
//! The engine itself lives in `tracelab-aggr`.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod ports;
pub mod record;

pub use aggregate::{
    AggregateData, AggregateResult, AggregatorResult, AggregatorType, AnnotationAggregateResult,
    EvaluatorAggregateResult, ExptAggrResult, ExptAggregateView, FieldType, OptionDistribution,
    OptionDistributionItem, ScoreDistribution, ScoreDistributionItem,
    TargetMetricsAggregateResult, FIELD_KEY_TARGET_INPUT_TOKENS, FIELD_KEY_TARGET_LATENCY,
    FIELD_KEY_TARGET_OUTPUT_TOKENS, FIELD_KEY_TARGET_TOTAL_TOKENS,
};
pub use error::{AggrError, Result};
pub use event::{AggrCalculateEvent, AggrFieldParam, CalculateMode};
pub use ports::{
    AggrEventPublisher, AggrResultStore, AnnotationReader, EvaluatorMetaReader,
    EvaluatorRecordReader, ExperimentReader, LockProvider, TagMetaReader, TargetRecordReader,
    TurnResultReader,
};
pub use record::{
    AnnotateRecord, AnnotateRecordRef, EvaluatorRecord, EvaluatorVersionMeta, ExperimentMeta,
    ExperimentStatus, ExptEvaluatorRef, TagContentType, TagInfo, TargetOutput, TargetRecord,
    TokenUsage, TurnEvaluatorResultRef, TurnResultRow,
};
