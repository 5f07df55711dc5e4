use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    repository::models::{OpexParameterRecord, RoomCount},
    services::scope::{select_rule, EffectiveWindow, Location, RuleScope, ScopedRule},
};

/// Per-unit monthly opex policy.
///
/// `cleaning = cleaning_per_unit + cleaning_per_room * R`, electricity and gas scale
/// with `R`, smart locks are a flat per-unit charge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpexParameters {
    pub cleaning_per_unit: f64,
    pub cleaning_per_room: f64,
    pub electricity_per_room: f64,
    pub gas_per_room: f64,
    pub smart_locks_per_unit: f64,
}

impl Default for OpexParameters {
    fn default() -> Self {
        Self {
            cleaning_per_unit: 75.0,
            cleaning_per_room: 15.0,
            electricity_per_room: 150.0,
            gas_per_room: 25.0,
            smart_locks_per_unit: 30.0,
        }
    }
}

impl OpexParameters {
    pub fn breakdown(&self, room_count: i64) -> OpexBreakdown {
        let rooms = room_count.max(0) as f64;
        let cleaning = self.cleaning_per_unit + self.cleaning_per_room * rooms;
        let electricity = self.electricity_per_room * rooms;
        let gas = self.gas_per_room * rooms;
        let smart_locks = self.smart_locks_per_unit;
        OpexBreakdown {
            cleaning,
            electricity,
            gas,
            smart_locks,
            total: cleaning + electricity + gas + smart_locks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpexBreakdown {
    pub cleaning: f64,
    pub electricity: f64,
    pub gas: f64,
    pub smart_locks: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitOpEx {
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Uuid,
    pub room_count: i64,
    pub opex: OpexBreakdown,
}

/// A stored override of the configured parameters for part of the portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct OpexOverride {
    pub id: Uuid,
    pub scope: RuleScope,
    pub window: EffectiveWindow,
    pub created_at: Option<DateTime<Utc>>,
    pub parameters: OpexParameters,
}

impl OpexOverride {
    pub fn from_records(records: &[OpexParameterRecord]) -> Vec<Self> {
        records
            .iter()
            .filter(|record| record.is_active)
            .map(|record| Self {
                id: record.id,
                scope: RuleScope {
                    org_id: record.org_id,
                    building_id: record.building_id,
                    unit_id: record.unit_id,
                },
                window: EffectiveWindow {
                    start: record.effective_start,
                    end: record.effective_end,
                },
                created_at: record.created_at,
                parameters: OpexParameters {
                    cleaning_per_unit: record.cleaning_per_unit,
                    cleaning_per_room: record.cleaning_per_room,
                    electricity_per_room: record.electricity_per_room,
                    gas_per_room: record.gas_per_room,
                    smart_locks_per_unit: record.smart_locks_per_unit,
                },
            })
            .collect()
    }
}

impl ScopedRule for OpexOverride {
    fn scope(&self) -> RuleScope {
        self.scope
    }

    fn window(&self) -> EffectiveWindow {
        self.window
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn rule_id(&self) -> Uuid {
        self.id
    }
}

/// Estimates monthly opex for every in-scope unit with a room count.
///
/// A duplicated room-count row for the same unit keeps the larger count.
pub fn estimate_unit_opex(
    room_counts: &[RoomCount],
    in_scope_units: &HashSet<Uuid>,
    defaults: &OpexParameters,
    overrides: &[OpexOverride],
    as_of: NaiveDate,
) -> Vec<UnitOpEx> {
    let mut by_unit: HashMap<Uuid, &RoomCount> = HashMap::new();
    for row in room_counts {
        if !in_scope_units.contains(&row.unit_id) {
            continue;
        }
        by_unit
            .entry(row.unit_id)
            .and_modify(|current| {
                if row.room_count > current.room_count {
                    *current = row;
                }
            })
            .or_insert(row);
    }

    let mut out = by_unit
        .into_values()
        .map(|row| {
            let location = Location {
                org_id: row.org_id,
                building_id: row.building_id,
                unit_id: Some(row.unit_id),
            };
            let parameters = select_rule(overrides, &location, as_of)
                .map(|rule| &rule.parameters)
                .unwrap_or(defaults);
            if row.room_count < 0 {
                tracing::warn!(unit_id = %row.unit_id, room_count = row.room_count, "Negative room count treated as zero");
            }
            let room_count = row.room_count.max(0);
            UnitOpEx {
                org_id: row.org_id,
                building_id: row.building_id,
                unit_id: row.unit_id,
                room_count,
                opex: parameters.breakdown(room_count),
            }
        })
        .collect::<Vec<_>>();
    out.sort_by_key(|row| row.unit_id);
    out
}
