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

//! Error taxonomy for the aggregation engine

use thiserror::Error;

use crate::aggregate::FieldType;

/// Errors surfaced by the aggregation engine.
///
/// Callers route on the variant: `VersionConflict` means a concurrent writer
/// advanced the row and the whole computation should be redone,
/// `DuplicateCalculation` means another scheduling attempt already holds the
/// per-experiment lock and retrying immediately is pointless.
#[derive(Debug, Error)]
pub enum AggrError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(
        "version conflict on experiment {experiment_id}, field {field_type:?}:{field_key}, \
         expected version {version}"
    )]
    VersionConflict {
        experiment_id: i64,
        field_type: FieldType,
        field_key: String,
        version: i64,
    },

    #[error("duplicate aggregate calculation in progress for experiment {0}")]
    DuplicateCalculation(i64),

    #[error("storage error: {0}")]
    Store(String),

    #[error("event publish error: {0}")]
    Publish(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, AggrError>;

impl AggrError {
    /// Whether this error signals that a concurrent writer won the race.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, AggrError::VersionConflict { .. })
    }

    /// Whether this error signals a duplicate scheduling attempt.
    pub fn is_duplicate_calculation(&self) -> bool {
        matches!(self, AggrError::DuplicateCalculation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_predicates() {
        let err = AggrError::VersionConflict {
            experiment_id: 1,
            field_type: FieldType::EvaluatorScore,
            field_key: "7".to_string(),
            version: 3,
        };
        assert!(err.is_version_conflict());
        assert!(!err.is_duplicate_calculation());

        let err = AggrError::DuplicateCalculation(42);
        assert!(err.is_duplicate_calculation());
        assert!(err.to_string().contains("42"));
    }
}
