use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Raw transaction row as written by ingestion. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub amount: f64,
    pub account_name: Option<String>,
    pub revenue_class: Option<String>,
    pub period_month: NaiveDate,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    /// Room label from the source file, kept when ingestion could not match a room.
    pub source_room: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub id: Uuid,
    pub org_id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: Uuid,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub name: String,
    pub agreement_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: Uuid,
    pub unit_id: Option<Uuid>,
    pub name: Option<String>,
}

/// Max bedrooms seen for a unit during portfolio ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomCount {
    pub unit_id: Uuid,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub room_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hierarchy {
    pub organizations: Vec<Organization>,
    pub buildings: Vec<Building>,
    pub units: Vec<Unit>,
    pub rooms: Vec<Room>,
    pub room_counts: Vec<RoomCount>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementRuleRecord {
    pub id: Uuid,
    pub revenue_class: String,
    pub entitlement: String,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub effective_start: Option<NaiveDate>,
    pub effective_end: Option<NaiveDate>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpexParameterRecord {
    pub id: Uuid,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub effective_start: Option<NaiveDate>,
    pub effective_end: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub cleaning_per_unit: f64,
    pub cleaning_per_room: f64,
    pub electricity_per_room: f64,
    pub gas_per_room: f64,
    pub smart_locks_per_unit: f64,
}

/// Room-name aliases: source label -> canonical room name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingProfile {
    pub name: String,
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KpiName {
    #[serde(rename = "partner_total_revenue")]
    PartnerTotalRevenue,
    #[serde(rename = "partner_management_fee")]
    PartnerManagementFee,
    #[serde(rename = "partner_total_opex")]
    PartnerTotalOpex,
    #[serde(rename = "partner_noi")]
    PartnerNoi,
    #[serde(rename = "internal_gross_revenue")]
    InternalGrossRevenue,
    #[serde(rename = "internal_landlord_revenue")]
    InternalLandlordRevenue,
    #[serde(rename = "internal_roomrs_fee_income")]
    InternalFeeIncome,
    #[serde(rename = "internal_management_fee")]
    InternalManagementFee,
    #[serde(rename = "internal_roomrs_total_revenue")]
    InternalManagementCompanyTotalRevenue,
    #[serde(rename = "internal_take_rate_pct")]
    InternalTakeRate,
}

impl KpiName {
    pub const PARTNER: [KpiName; 4] = [
        Self::PartnerTotalRevenue,
        Self::PartnerManagementFee,
        Self::PartnerTotalOpex,
        Self::PartnerNoi,
    ];

    pub const INTERNAL: [KpiName; 6] = [
        Self::InternalGrossRevenue,
        Self::InternalLandlordRevenue,
        Self::InternalFeeIncome,
        Self::InternalManagementFee,
        Self::InternalManagementCompanyTotalRevenue,
        Self::InternalTakeRate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PartnerTotalRevenue => "partner_total_revenue",
            Self::PartnerManagementFee => "partner_management_fee",
            Self::PartnerTotalOpex => "partner_total_opex",
            Self::PartnerNoi => "partner_noi",
            Self::InternalGrossRevenue => "internal_gross_revenue",
            Self::InternalLandlordRevenue => "internal_landlord_revenue",
            Self::InternalFeeIncome => "internal_roomrs_fee_income",
            Self::InternalManagementFee => "internal_management_fee",
            Self::InternalManagementCompanyTotalRevenue => "internal_roomrs_total_revenue",
            Self::InternalTakeRate => "internal_take_rate_pct",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::PARTNER
            .into_iter()
            .chain(Self::INTERNAL)
            .find(|name| name.as_str() == trimmed)
    }
}

impl fmt::Display for KpiName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted KPI measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiFact {
    pub kpi_name: KpiName,
    pub value: f64,
    pub period_month: NaiveDate,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
}

impl KpiFact {
    /// Room-level identity wins over unit-level; `None` when neither id is set.
    pub fn key(&self) -> Option<KpiFactKey> {
        KpiFactKey::for_ids(self.period_month, self.unit_id, self.room_id)
    }
}

/// Identity a KPI fact is replaced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KpiFactKey {
    Room {
        period_month: NaiveDate,
        room_id: Uuid,
    },
    Unit {
        period_month: NaiveDate,
        unit_id: Uuid,
    },
}

impl KpiFactKey {
    pub fn for_ids(
        period_month: NaiveDate,
        unit_id: Option<Uuid>,
        room_id: Option<Uuid>,
    ) -> Option<Self> {
        match (room_id, unit_id) {
            (Some(room_id), _) => Some(Self::Room {
                period_month,
                room_id,
            }),
            (None, Some(unit_id)) => Some(Self::Unit {
                period_month,
                unit_id,
            }),
            (None, None) => None,
        }
    }

    pub fn period_month(&self) -> NaiveDate {
        match self {
            Self::Room { period_month, .. } | Self::Unit { period_month, .. } => *period_month,
        }
    }

    /// Whether a stored fact falls under this key's scoped delete.
    #[cfg(test)]
    pub fn covers(&self, fact: &KpiFact) -> bool {
        match self {
            Self::Room {
                period_month,
                room_id,
            } => fact.period_month == *period_month && fact.room_id == Some(*room_id),
            Self::Unit {
                period_month,
                unit_id,
            } => fact.period_month == *period_month && fact.unit_id == Some(*unit_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KpiFactFilter {
    pub kpi_names: Vec<KpiName>,
    pub period_month: Option<NaiveDate>,
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
}

impl KpiFactFilter {
    pub fn for_kpi(kpi_name: KpiName) -> Self {
        Self {
            kpi_names: vec![kpi_name],
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn matches(&self, fact: &KpiFact) -> bool {
        (self.kpi_names.is_empty() || self.kpi_names.contains(&fact.kpi_name))
            && self.period_month.map_or(true, |month| fact.period_month == month)
            && self.org_id.map_or(true, |id| fact.org_id == Some(id))
            && self.building_id.map_or(true, |id| fact.building_id == Some(id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: String,
    pub entity_type: String,
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{KpiFact, KpiFactKey, KpiName};

    fn month() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date")
    }

    #[test]
    fn kpi_names_round_trip_through_wire_strings() {
        for name in KpiName::PARTNER.into_iter().chain(KpiName::INTERNAL) {
            assert_eq!(KpiName::parse(name.as_str()), Some(name));
        }
        assert_eq!(KpiName::parse("unknown_kpi"), None);
        assert_eq!(
            serde_json::to_value(KpiName::InternalFeeIncome).expect("serializable"),
            serde_json::json!("internal_roomrs_fee_income")
        );
    }

    #[test]
    fn room_identity_takes_precedence_over_unit() {
        let unit = Uuid::new_v4();
        let room = Uuid::new_v4();
        assert_eq!(
            KpiFactKey::for_ids(month(), Some(unit), Some(room)),
            Some(KpiFactKey::Room {
                period_month: month(),
                room_id: room
            })
        );
        assert_eq!(
            KpiFactKey::for_ids(month(), Some(unit), None),
            Some(KpiFactKey::Unit {
                period_month: month(),
                unit_id: unit
            })
        );
        assert_eq!(KpiFactKey::for_ids(month(), None, None), None);
    }

    #[test]
    fn unit_key_covers_facts_regardless_of_room() {
        let unit = Uuid::new_v4();
        let key = KpiFactKey::Unit {
            period_month: month(),
            unit_id: unit,
        };
        let fact = KpiFact {
            kpi_name: KpiName::PartnerNoi,
            value: 1.0,
            period_month: month(),
            org_id: None,
            building_id: None,
            unit_id: Some(unit),
            room_id: Some(Uuid::new_v4()),
        };
        assert!(key.covers(&fact));

        let other_month = KpiFact {
            period_month: NaiveDate::from_ymd_opt(2025, 4, 1).expect("valid date"),
            ..fact
        };
        assert!(!key.covers(&other_month));
    }
}
