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

//! Recompute scheduling guard
//!
//! Publishing a recompute event is gated on a TTL-bounded per-experiment
//! lock, so two concurrent scheduling attempts cannot trigger duplicate
//! recomputation. The lock is released by the computation run on success
//! (see `AggrResultService::create_aggr_result`) or expires via TTL after a
//! failed run.

use std::sync::Arc;
use std::time::Duration;

use tracelab_core::error::{AggrError, Result};
use tracelab_core::event::AggrCalculateEvent;
use tracelab_core::ports::{AggrEventPublisher, LockProvider};

/// TTL of the per-experiment calculation lock.
pub const CALC_AGGR_LOCK_TTL: Duration = Duration::from_secs(10 * 60);

/// Lock key guarding aggregate recomputation of one experiment.
pub fn calc_aggr_lock_key(experiment_id: i64) -> String {
    format!("calc_expt_result_aggr:{experiment_id}")
}

/// Gates recompute-event publication on the per-experiment lock.
pub struct SchedulingGuard {
    locker: Arc<dyn LockProvider>,
    publisher: Arc<dyn AggrEventPublisher>,
}

impl SchedulingGuard {
    pub fn new(locker: Arc<dyn LockProvider>, publisher: Arc<dyn AggrEventPublisher>) -> Self {
        Self { locker, publisher }
    }

    /// Publish `event` with an optional delay, unless a recomputation for
    /// the same experiment is already in flight.
    ///
    /// A held lock surfaces as [`AggrError::DuplicateCalculation`], distinct
    /// from transient errors so callers do not retry in a tight loop.
    pub async fn publish_recompute_event(
        &self,
        event: AggrCalculateEvent,
        delay: Option<Duration>,
    ) -> Result<()> {
        let locked = self
            .locker
            .lock(&calc_aggr_lock_key(event.experiment_id), CALC_AGGR_LOCK_TTL)
            .await?;

        if !locked {
            return Err(AggrError::DuplicateCalculation(event.experiment_id));
        }

        self.publisher.publish_recompute_event(event, delay).await
    }
}
