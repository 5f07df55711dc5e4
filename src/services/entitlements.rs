use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    repository::models::EntitlementRuleRecord,
    services::scope::{select_rule, EffectiveWindow, Location, RuleScope, ScopedRule},
};

/// Revenue classes the rule table can be keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RevenueClass {
    RentIncome,
    UtilityFeeIncome,
    BedroomCleaning,
    ConvenienceFee,
    FlexFeeIncome,
    LateFeeIncome,
    LeaseBreakFeeIncome,
    MembershipFeeIncome,
    /// A derived slug that matches no known class. Never entitled.
    Unclassified(String),
}

impl RevenueClass {
    /// Parses a stored class or a GL account name.
    pub fn from_label(raw: &str) -> Option<Self> {
        let slug = normalize_class_label(raw);
        if slug.is_empty() {
            return None;
        }
        Some(match slug.as_str() {
            "rent_income" => Self::RentIncome,
            "utility_fee_income" => Self::UtilityFeeIncome,
            "bedroom_cleaning" => Self::BedroomCleaning,
            "convenience_fee" => Self::ConvenienceFee,
            "flex_fee_income" => Self::FlexFeeIncome,
            "late_fee_income" => Self::LateFeeIncome,
            "lease_break_fee_income" => Self::LeaseBreakFeeIncome,
            "membership_fee_income" => Self::MembershipFeeIncome,
            _ => Self::Unclassified(slug),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RentIncome => "rent_income",
            Self::UtilityFeeIncome => "utility_fee_income",
            Self::BedroomCleaning => "bedroom_cleaning",
            Self::ConvenienceFee => "convenience_fee",
            Self::FlexFeeIncome => "flex_fee_income",
            Self::LateFeeIncome => "late_fee_income",
            Self::LeaseBreakFeeIncome => "lease_break_fee_income",
            Self::MembershipFeeIncome => "membership_fee_income",
            Self::Unclassified(slug) => slug,
        }
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Unclassified(_))
    }
}

impl fmt::Display for RevenueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    Landlord,
    ManagementCompany,
}

impl Entitlement {
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_class_label(raw).as_str() {
            "landlord" => Some(Self::Landlord),
            "roomrs" | "management_company" | "management" => Some(Self::ManagementCompany),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementRule {
    pub id: Uuid,
    pub revenue_class: RevenueClass,
    pub entitlement: Entitlement,
    pub scope: RuleScope,
    pub window: EffectiveWindow,
    pub created_at: Option<DateTime<Utc>>,
}

impl EntitlementRule {
    /// `None` when the stored class or entitlement is not one the resolver understands.
    pub fn from_record(record: &EntitlementRuleRecord) -> Option<Self> {
        let revenue_class = RevenueClass::from_label(&record.revenue_class)?;
        if !revenue_class.is_classified() {
            return None;
        }
        Some(Self {
            id: record.id,
            revenue_class,
            entitlement: Entitlement::parse(&record.entitlement)?,
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
        })
    }
}

impl ScopedRule for EntitlementRule {
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

/// Rule table indexed by revenue class.
#[derive(Debug, Clone, Default)]
pub struct EntitlementResolver {
    rules_by_class: HashMap<RevenueClass, Vec<EntitlementRule>>,
}

impl EntitlementResolver {
    pub fn new(rules: impl IntoIterator<Item = EntitlementRule>) -> Self {
        let mut rules_by_class: HashMap<RevenueClass, Vec<EntitlementRule>> = HashMap::new();
        for rule in rules {
            rules_by_class
                .entry(rule.revenue_class.clone())
                .or_default()
                .push(rule);
        }
        Self { rules_by_class }
    }

    pub fn from_records(records: &[EntitlementRuleRecord]) -> Self {
        let rules = records
            .iter()
            .filter_map(EntitlementRule::from_record)
            .collect::<Vec<_>>();
        let skipped = records.len() - rules.len();
        if skipped > 0 {
            tracing::warn!(skipped, "Ignoring entitlement rules with unknown class or entitlement");
        }
        Self::new(rules)
    }

    pub fn rule_count(&self) -> usize {
        self.rules_by_class.values().map(Vec::len).sum()
    }

    pub fn resolve(
        &self,
        revenue_class: &RevenueClass,
        location: &Location,
        as_of: NaiveDate,
    ) -> Option<Entitlement> {
        let rules = self.rules_by_class.get(revenue_class)?;
        select_rule(rules, location, as_of).map(|rule| rule.entitlement)
    }
}

/// Lowercases and collapses every run of non-alphanumerics into a single `_`.
pub fn normalize_class_label(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for character in raw.trim().chars() {
        if character.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(character.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{normalize_class_label, Entitlement, EntitlementResolver, RevenueClass};
    use crate::{repository::models::EntitlementRuleRecord, services::scope::Location};

    fn record(class: &str, entitlement: &str) -> EntitlementRuleRecord {
        EntitlementRuleRecord {
            id: Uuid::new_v4(),
            revenue_class: class.to_string(),
            entitlement: entitlement.to_string(),
            org_id: None,
            building_id: None,
            unit_id: None,
            effective_start: None,
            effective_end: None,
            created_at: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn location() -> Location {
        Location {
            org_id: Some(Uuid::new_v4()),
            building_id: Some(Uuid::new_v4()),
            unit_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn normalizes_labels_to_snake_case() {
        assert_eq!(normalize_class_label("Rent Income"), "rent_income");
        assert_eq!(normalize_class_label("  Lease-Break  Fee / Income "), "lease_break_fee_income");
        assert_eq!(normalize_class_label("__Late__Fee__"), "late_fee");
        assert_eq!(normalize_class_label("***"), "");
    }

    #[test]
    fn parses_known_and_unknown_classes() {
        assert_eq!(
            RevenueClass::from_label("Convenience Fee"),
            Some(RevenueClass::ConvenienceFee)
        );
        assert_eq!(
            RevenueClass::from_label("Parking Income"),
            Some(RevenueClass::Unclassified("parking_income".to_string()))
        );
        assert_eq!(RevenueClass::from_label("  "), None);
    }

    #[test]
    fn parses_entitlement_labels() {
        assert_eq!(Entitlement::parse("Landlord"), Some(Entitlement::Landlord));
        assert_eq!(Entitlement::parse("roomrs"), Some(Entitlement::ManagementCompany));
        assert_eq!(
            Entitlement::parse("management-company"),
            Some(Entitlement::ManagementCompany)
        );
        assert_eq!(Entitlement::parse("tenant"), None);
    }

    #[test]
    fn unit_rule_wins_regardless_of_insertion_order() {
        let location = location();
        let mut unit_rule = record("rent_income", "landlord");
        unit_rule.unit_id = location.unit_id;
        let mut building_rule = record("rent_income", "roomrs");
        building_rule.building_id = location.building_id;
        let mut org_rule = record("rent_income", "roomrs");
        org_rule.org_id = location.org_id;
        // Narrower window than the unit rule, still loses on scope.
        org_rule.effective_start = Some(date(2025, 3, 1));
        org_rule.effective_end = Some(date(2025, 3, 31));

        let orders = [
            vec![unit_rule.clone(), building_rule.clone(), org_rule.clone()],
            vec![org_rule.clone(), building_rule.clone(), unit_rule.clone()],
            vec![building_rule, org_rule, unit_rule],
        ];
        for records in orders {
            let resolver = EntitlementResolver::from_records(&records);
            assert_eq!(
                resolver.resolve(&RevenueClass::RentIncome, &location, date(2025, 3, 1)),
                Some(Entitlement::Landlord)
            );
        }
    }

    #[test]
    fn expired_specific_rule_falls_back_to_global_default() {
        let location = location();
        let mut unit_rule = record("Late Fee Income", "landlord");
        unit_rule.unit_id = location.unit_id;
        unit_rule.effective_end = Some(date(2024, 12, 31));
        let global = record("late_fee_income", "roomrs");

        let resolver = EntitlementResolver::from_records(&[unit_rule, global]);
        assert_eq!(
            resolver.resolve(&RevenueClass::LateFeeIncome, &location, date(2024, 12, 1)),
            Some(Entitlement::Landlord)
        );
        assert_eq!(
            resolver.resolve(&RevenueClass::LateFeeIncome, &location, date(2025, 1, 1)),
            Some(Entitlement::ManagementCompany)
        );
    }

    #[test]
    fn no_matching_rule_yields_none() {
        let location = location();
        let mut other_unit = record("rent_income", "landlord");
        other_unit.unit_id = Some(Uuid::new_v4());
        let resolver = EntitlementResolver::from_records(&[other_unit]);

        assert_eq!(
            resolver.resolve(&RevenueClass::RentIncome, &location, date(2025, 1, 1)),
            None
        );
        assert_eq!(
            resolver.resolve(
                &RevenueClass::Unclassified("parking_income".to_string()),
                &location,
                date(2025, 1, 1)
            ),
            None
        );
    }

    #[test]
    fn drops_rules_it_cannot_interpret() {
        let resolver = EntitlementResolver::from_records(&[
            record("rent_income", "landlord"),
            record("parking_income", "landlord"),
            record("rent_income", "tenant"),
        ]);
        assert_eq!(resolver.rule_count(), 1);
    }
}
