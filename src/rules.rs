// Numan Thabit 2026
// rules.rs - policy rule descriptors and the static rule store

use std::sync::{PoisonError, RwLock};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// How usage for a rule is accounted against the policy and charging peers.
///
/// Derived from the `(rating_group, monitoring_key)` pair: a rating group
/// means online charging (OCS), a monitoring key means policy usage
/// monitoring (PCRF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingType {
    /// Usage is not reported anywhere.
    NoTracking,
    /// Usage counts against an online charging quota only.
    OnlyOcs,
    /// Usage counts against a policy usage monitor only.
    OnlyPcrf,
    /// Usage counts against both peers.
    OcsAndPcrf,
}

/// A policy-and-charging-control rule descriptor.
///
/// Static rules are registered once in the [`StaticRuleStore`] and referenced
/// from sessions by id; dynamic rules carry this body inside the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule identifier, unique within the gateway.
    pub id: String,
    /// Online-charging rating group, when the rule is charged.
    pub rating_group: Option<u32>,
    /// Usage-monitoring key, when the rule is monitored.
    pub monitoring_key: Option<String>,
    /// Tracking mode derived from the two keys above.
    pub tracking_type: TrackingType,
}

impl PolicyRule {
    /// Builds a rule, normalizing sentinel values (`0` rating group, empty
    /// monitoring key) to absent and deriving the tracking type.
    pub fn new(
        id: impl Into<String>,
        rating_group: Option<u32>,
        monitoring_key: Option<String>,
    ) -> Self {
        let rating_group = rating_group.filter(|group| *group != 0);
        let monitoring_key = monitoring_key.filter(|key| !key.is_empty());
        let tracking_type = match (&rating_group, &monitoring_key) {
            (Some(_), None) => TrackingType::OnlyOcs,
            (None, Some(_)) => TrackingType::OnlyPcrf,
            (Some(_), Some(_)) => TrackingType::OcsAndPcrf,
            (None, None) => TrackingType::NoTracking,
        };
        Self {
            id: id.into(),
            rating_group,
            monitoring_key,
            tracking_type,
        }
    }
}

/// Gateway-wide lookup of static rule id to rule body.
///
/// Inserts happen during configuration; once enforcement starts the store is
/// read-mostly. Writes and reads are serialized by an internal lock so late
/// configuration pushes stay safe.
#[derive(Debug, Default)]
pub struct StaticRuleStore {
    rules: RwLock<AHashMap<String, PolicyRule>>,
}

impl StaticRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule, replacing any previous body with the same id.
    pub fn insert_rule(&self, rule: PolicyRule) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.insert(rule.id.clone(), rule);
    }

    /// Returns a copy of the rule body for `id`, if registered.
    pub fn get_rule(&self, id: &str) -> Option<PolicyRule> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.get(id).cloned()
    }

    /// Returns the ids of every registered rule charged against
    /// `rating_group`, in lexicographic order.
    pub fn rule_ids_for_charging_key(&self, rating_group: u32) -> Vec<String> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = rules
            .values()
            .filter(|rule| rule.rating_group == Some(rating_group))
            .map(|rule| rule.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
