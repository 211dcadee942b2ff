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

//! Recompute scheduling events

use serde::{Deserialize, Serialize};

use crate::aggregate::FieldType;

/// What a recompute run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculateMode {
    /// Full recompute of every field of the experiment.
    CreateAllFields,
    /// Recompute of a single `(field_type, field_key)` pair.
    UpdateSpecificField,
    /// Initial computation of one annotation field.
    CreateAnnotationFields,
}

/// Event consumed by the external scheduler to trigger a recompute run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggrCalculateEvent {
    pub space_id: i64,
    pub experiment_id: i64,
    pub mode: CalculateMode,
    /// Set for single-field modes.
    pub field_type: Option<FieldType>,
    pub field_key: Option<String>,
}

impl AggrCalculateEvent {
    /// Event for a full recompute of one experiment.
    pub fn all_fields(space_id: i64, experiment_id: i64) -> Self {
        Self {
            space_id,
            experiment_id,
            mode: CalculateMode::CreateAllFields,
            field_type: None,
            field_key: None,
        }
    }
}

/// Parameters of a single-field computation request.
#[derive(Debug, Clone)]
pub struct AggrFieldParam {
    pub space_id: i64,
    pub experiment_id: i64,
    pub field_type: FieldType,
    pub field_key: String,
}
