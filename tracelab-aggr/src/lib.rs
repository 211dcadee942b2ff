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

//! Aggregate-result computation engine
//!
//! Computes per-field statistical summaries (average, sum, max, min,
//! distributions) over an experiment's evaluator scores, human annotations,
//! and target runtime metrics, persists them as versioned rows, and
//! reconciles recomputations against what is already stored.
//!
//! The engine talks to its surroundings exclusively through the port traits
//! in `tracelab-core`; the [`memory`] module provides in-process
//! implementations of every port.

pub mod aggregator;
pub mod bucket;
pub mod group;
pub mod memory;
pub mod scheduler;
pub mod service;
pub mod target_metrics;
pub mod view;

pub use aggregator::{OptionDistributionAggregator, ScoreDistributionAggregator};
pub use bucket::BucketDistributionAggregator;
pub use group::{AggregatorGroup, CategoricalAggregatorGroup};
pub use scheduler::{calc_aggr_lock_key, SchedulingGuard, CALC_AGGR_LOCK_TTL};
pub use service::AggrResultService;
pub use target_metrics::{TargetMetricGroups, TargetMetricsBuilder};
pub use view::AggrResultViewReader;
