//! Location-scoped rule selection shared by fee entitlements and opex overrides.
//!
//! A rule is scoped to its most specific non-null id (unit, then building, then
//! organization) or is a global default when it carries none. Selection walks the
//! levels in that order and stops at the first level with a match, so a narrow
//! effective window never beats a more specific scope.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Where a transaction or unit sits in the organization hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScopeLevel {
    Unit,
    Building,
    Organization,
    Global,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleScope {
    pub org_id: Option<Uuid>,
    pub building_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
}

impl RuleScope {
    pub fn level(&self) -> ScopeLevel {
        if self.unit_id.is_some() {
            ScopeLevel::Unit
        } else if self.building_id.is_some() {
            ScopeLevel::Building
        } else if self.org_id.is_some() {
            ScopeLevel::Organization
        } else {
            ScopeLevel::Global
        }
    }

    fn applies_at(&self, level: ScopeLevel, location: &Location) -> bool {
        if self.level() != level {
            return false;
        }
        match level {
            ScopeLevel::Unit => same_id(self.unit_id, location.unit_id),
            ScopeLevel::Building => same_id(self.building_id, location.building_id),
            ScopeLevel::Organization => same_id(self.org_id, location.org_id),
            ScopeLevel::Global => true,
        }
    }
}

/// Inclusive date window; an open side is always active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectiveWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl EffectiveWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| start <= date) && self.end.map_or(true, |end| date <= end)
    }
}

pub trait ScopedRule {
    fn scope(&self) -> RuleScope;
    fn window(&self) -> EffectiveWindow;
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn rule_id(&self) -> Uuid;
}

/// Picks the rule that governs `location` on `as_of`.
///
/// Ties at the same level go to the most recently created rule; rules without a
/// creation timestamp lose to timestamped ones, and the rule id breaks any
/// remaining tie so the result never depends on input order.
pub fn select_rule<'a, R, I>(rules: I, location: &Location, as_of: NaiveDate) -> Option<&'a R>
where
    R: ScopedRule + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let active = rules
        .into_iter()
        .filter(|rule| rule.window().contains(as_of))
        .collect::<Vec<_>>();

    [
        ScopeLevel::Unit,
        ScopeLevel::Building,
        ScopeLevel::Organization,
        ScopeLevel::Global,
    ]
    .into_iter()
    .find_map(|level| {
        active
            .iter()
            .copied()
            .filter(|rule| rule.scope().applies_at(level, location))
            .max_by(|left, right| newest_first(*left, *right))
    })
}

fn newest_first<R: ScopedRule>(left: &R, right: &R) -> Ordering {
    left.created_at()
        .cmp(&right.created_at())
        .then_with(|| left.rule_id().cmp(&right.rule_id()))
}

fn same_id(rule: Option<Uuid>, location: Option<Uuid>) -> bool {
    matches!((rule, location), (Some(left), Some(right)) if left == right)
}
