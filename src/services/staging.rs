use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    repository::models::{Hierarchy, MappingProfile, Room, TransactionRecord, Unit},
    services::{
        entitlements::{Entitlement, EntitlementResolver, RevenueClass},
        scope::Location,
    },
};

const DASH_CHARACTERS: &[char] = &['-', '\u{2010}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2212}'];

/// A transaction enriched with hierarchy, entitlement and month bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedTransaction {
    pub transaction_id: Uuid,
    pub month: NaiveDate,
    pub amount: f64,
    pub account_name: Option<String>,
    pub revenue_class: Option<String>,
    pub entitlement: Option<Entitlement>,
    pub is_landlord_revenue: bool,
    pub is_management_fee_eligible: bool,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub org_name: Option<String>,
    pub building_name: Option<String>,
    pub unit_name: Option<String>,
    pub room_name: Option<String>,
    pub agreement_type: String,
    pub bedrooms: Option<i64>,
}

/// Lookup maps built once per run from the fetched hierarchy.
pub struct HierarchyIndex<'a> {
    org_names: HashMap<Uuid, &'a str>,
    building_names: HashMap<Uuid, &'a str>,
    units: HashMap<Uuid, &'a Unit>,
    rooms: HashMap<Uuid, &'a Room>,
    room_counts: HashMap<Uuid, i64>,
    rooms_by_name: HashMap<String, &'a Room>,
    rooms_by_normalized_name: HashMap<String, &'a Room>,
}

impl<'a> HierarchyIndex<'a> {
    pub fn new(hierarchy: &'a Hierarchy) -> Self {
        let mut room_counts: HashMap<Uuid, i64> = HashMap::new();
        for row in &hierarchy.room_counts {
            room_counts
                .entry(row.unit_id)
                .and_modify(|count| *count = (*count).max(row.room_count))
                .or_insert(row.room_count);
        }

        // Sorted so a name shared by several rooms always resolves to the same one.
        let mut named_rooms = hierarchy
            .rooms
            .iter()
            .filter(|room| room.name.is_some())
            .collect::<Vec<_>>();
        named_rooms.sort_by_key(|room| room.id);
        let mut rooms_by_name = HashMap::new();
        let mut rooms_by_normalized_name = HashMap::new();
        for room in named_rooms {
            let name = room.name.as_deref().unwrap_or_default().trim();
            rooms_by_name.entry(name.to_string()).or_insert(room);
            rooms_by_normalized_name
                .entry(normalize_room_name(name))
                .or_insert(room);
        }

        Self {
            org_names: hierarchy
                .organizations
                .iter()
                .map(|org| (org.id, org.name.as_str()))
                .collect(),
            building_names: hierarchy
                .buildings
                .iter()
                .map(|building| (building.id, building.name.as_str()))
                .collect(),
            units: hierarchy.units.iter().map(|unit| (unit.id, unit)).collect(),
            rooms: hierarchy.rooms.iter().map(|room| (room.id, room)).collect(),
            room_counts,
            rooms_by_name,
            rooms_by_normalized_name,
        }
    }

    pub fn unit(&self, unit_id: Uuid) -> Option<&'a Unit> {
        self.units.get(&unit_id).copied()
    }

    pub fn room_count(&self, unit_id: Uuid) -> Option<i64> {
        self.room_counts.get(&unit_id).copied()
    }

    /// Matches a raw room label from a source file to a room.
    pub fn resolve_room_label(
        &self,
        label: &str,
        aliases: &RoomAliases,
    ) -> Option<&'a Room> {
        let raw = label.trim();
        if raw.is_empty() {
            return None;
        }
        let normalized = normalize_room_name(raw);

        if let Some(mapped) = aliases.lookup(raw, &normalized) {
            let found = self
                .rooms_by_name
                .get(mapped.trim())
                .or_else(|| self.rooms_by_normalized_name.get(&normalize_room_name(mapped)));
            if let Some(room) = found {
                return Some(*room);
            }
        }

        self.rooms_by_name
            .get(raw)
            .or_else(|| self.rooms_by_name.get(&dash_to_space(raw)))
            .or_else(|| self.rooms_by_normalized_name.get(&normalized))
            .copied()
    }
}

/// Mapping-profile aliases keyed both verbatim and normalised.
#[derive(Debug, Clone, Default)]
pub struct RoomAliases {
    exact: HashMap<String, String>,
    normalized: HashMap<String, String>,
}

impl RoomAliases {
    pub fn from_profile(profile: Option<&MappingProfile>) -> Self {
        let mut aliases = Self::default();
        let Some(profile) = profile else {
            return aliases;
        };
        for (source, target) in &profile.aliases {
            aliases.exact.insert(source.trim().to_string(), target.clone());
            aliases
                .normalized
                .insert(normalize_room_name(source), target.clone());
        }
        aliases
    }

    fn lookup(&self, raw: &str, normalized: &str) -> Option<&str> {
        self.exact
            .get(raw)
            .or_else(|| self.normalized.get(normalized))
            .map(String::as_str)
    }
}

/// Lowercases, turns dash-like characters into spaces and collapses whitespace.
pub fn normalize_room_name(raw: &str) -> String {
    dash_to_space(&raw.to_lowercase())
}

fn dash_to_space(raw: &str) -> String {
    raw.split(|character: char| character.is_whitespace() || DASH_CHARACTERS.contains(&character))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Joins transactions with the hierarchy, filters to in-scope agreements and
/// resolves each transaction's entitlement as of its own month.
pub fn stage_transactions(
    transactions: &[TransactionRecord],
    hierarchy: &Hierarchy,
    resolver: &EntitlementResolver,
    mapping_profile: Option<&MappingProfile>,
    in_scope_agreement_type: &str,
) -> Vec<StagedTransaction> {
    let index = HierarchyIndex::new(hierarchy);
    let aliases = RoomAliases::from_profile(mapping_profile);
    let in_scope = in_scope_agreement_type.trim();

    let mut out = Vec::with_capacity(transactions.len());
    let mut out_of_scope = 0usize;
    let mut unresolved_rooms = 0usize;

    for transaction in transactions {
        let room = match transaction.room_id {
            Some(room_id) => index.rooms.get(&room_id).copied(),
            None => transaction
                .source_room
                .as_deref()
                .and_then(|label| index.resolve_room_label(label, &aliases)),
        };
        let room_id = transaction.room_id.or(room.map(|room| room.id));
        if room_id.is_none() {
            unresolved_rooms += 1;
        }

        let unit_id = transaction
            .unit_id
            .or(room.and_then(|room| room.unit_id));
        let unit = unit_id.and_then(|id| index.unit(id));

        let agreement_type = unit
            .and_then(|unit| unit.agreement_type.as_deref())
            .map(str::trim)
            .unwrap_or_default();
        if !agreement_type.eq_ignore_ascii_case(in_scope) {
            out_of_scope += 1;
            continue;
        }

        let org_id = transaction.org_id.or(unit.and_then(|unit| unit.org_id));
        let building_id = transaction
            .building_id
            .or(unit.and_then(|unit| unit.building_id));
        let month = month_start(transaction.period_month);

        let revenue_class = transaction
            .revenue_class
            .as_deref()
            .and_then(RevenueClass::from_label)
            .or_else(|| {
                transaction
                    .account_name
                    .as_deref()
                    .and_then(RevenueClass::from_label)
            });
        let location = Location {
            org_id,
            building_id,
            unit_id,
        };
        let entitlement = revenue_class
            .as_ref()
            .and_then(|class| resolver.resolve(class, &location, month));

        out.push(StagedTransaction {
            transaction_id: transaction.id,
            month,
            amount: if transaction.amount.is_finite() {
                transaction.amount.abs()
            } else {
                0.0
            },
            account_name: transaction.account_name.clone(),
            revenue_class: revenue_class.map(|class| class.as_str().to_string()),
            entitlement,
            is_landlord_revenue: entitlement == Some(Entitlement::Landlord),
            is_management_fee_eligible: entitlement == Some(Entitlement::ManagementCompany),
            org_id,
            building_id,
            unit_id,
            room_id,
            org_name: org_id
                .and_then(|id| index.org_names.get(&id))
                .map(|name| name.to_string()),
            building_name: building_id
                .and_then(|id| index.building_names.get(&id))
                .map(|name| name.to_string()),
            unit_name: unit.map(|unit| unit.name.clone()),
            room_name: room.and_then(|room| room.name.clone()),
            agreement_type: agreement_type.to_string(),
            bedrooms: unit_id.and_then(|id| index.room_count(id)),
        });
    }

    tracing::debug!(
        staged = out.len(),
        out_of_scope,
        unresolved_rooms,
        "Staged transactions"
    );
    out
}
