// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Cost estimates for planner index selection.
//!
//! Costs are relative units. Every estimate starts from the row count plus
//! [`COST_ROW_OFFSET`], so even an empty table has a non-trivial scan cost,
//! and shrinks with the conditions the index can use.

use super::Column;

/// Condition masks, one per column, describing how a query constrains it.
pub struct IndexCondition;

impl IndexCondition {
    /// `column = value`
    pub const EQUALITY: u32 = 1;
    /// `column >= value`
    pub const START: u32 = 2;
    /// `column <= value`
    pub const END: u32 = 4;
    /// `column BETWEEN a AND b`
    pub const RANGE: u32 = Self::START | Self::END;
}

/// Added to every row count before estimating.
pub const COST_ROW_OFFSET: u64 = 1000;

/// Estimates the cost of a lookup through an index on `columns`.
///
/// `masks` holds one condition mask per table column (indexed by column id);
/// `None` means no conditions. An equality on every column of a unique index
/// costs 3.
pub fn cost_range_index(
    masks: Option<&[u32]>,
    row_count: u64,
    columns: &[Column],
    unique: bool,
) -> f64 {
    let row_count = row_count.saturating_add(COST_ROW_OFFSET);
    let mut rows_cost = row_count;
    let Some(masks) = masks else {
        return rows_cost as f64;
    };

    let mut total_selectivity: u64 = 0;
    for (i, column) in columns.iter().enumerate() {
        let mask = masks.get(column.id).copied().unwrap_or(0);
        if mask & IndexCondition::EQUALITY == IndexCondition::EQUALITY {
            if i + 1 == columns.len() && unique {
                rows_cost = 3;
                break;
            }
            let selectivity = u64::from(column.selectivity.min(100));
            total_selectivity = 100 - ((100 - total_selectivity) * (100 - selectivity) / 100);
            let distinct_rows = (row_count * total_selectivity / 100).max(1);
            rows_cost = 2 + (row_count / distinct_rows).max(1);
        } else if mask & IndexCondition::RANGE == IndexCondition::RANGE {
            rows_cost = 2 + rows_cost / 4;
            break;
        } else if mask & IndexCondition::START == IndexCondition::START {
            rows_cost = 2 + rows_cost / 3;
            break;
        } else if mask & IndexCondition::END == IndexCondition::END {
            rows_cost /= 3;
            break;
        } else {
            break;
        }
    }

    rows_cost as f64
}
