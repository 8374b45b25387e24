// Numan Thabit 2026
// session.rs - per-subscriber aggregate owning credit and monitor trackers

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    api::{
        ChargingCredit, CreateSessionResponse, CreditUsage, MonitorCredit, MonitoringLevel,
        ReAuthResult, ReAuthType, UsageMonitorUpdate,
    },
    credit::{Bucket, SessionCredit},
    monitor::UsageMonitor,
    rules::{PolicyRule, StaticRuleStore},
};

/// Bearer addressing handed in at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub ue_ipv4: String,
    pub spgw_ipv4: String,
}

/// A data-plane command derived from tracker state transitions, executed by
/// the enforcer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    ActivateRules {
        static_rules: Vec<String>,
        dynamic_rules: Vec<PolicyRule>,
    },
    DeactivateRules {
        static_rules: Vec<String>,
        dynamic_rules: Vec<PolicyRule>,
    },
    ScheduleActivation {
        activation_time: u64,
        static_rules: Vec<String>,
        dynamic_rules: Vec<PolicyRule>,
    },
}

/// Everything drained from one session in a collection cycle.
#[derive(Debug, Clone, Default)]
pub struct SessionReports {
    pub updates: Vec<CreditUsage>,
    pub monitor_updates: Vec<UsageMonitorUpdate>,
    pub actions: Vec<SessionAction>,
}

/// Per-subscriber enforcement state: configuration, owned trackers, and the
/// rules installed for the subscriber.
///
/// Sessions are owned exclusively by the enforcer and mutated only on its
/// loop; no tracker outlives its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    sid: String,
    session_id: String,
    config: SessionConfig,
    credits: AHashMap<u32, SessionCredit>,
    monitors: AHashMap<String, UsageMonitor>,
    session_level_key: Option<String>,
    static_rules: Vec<String>,
    dynamic_rules: Vec<PolicyRule>,
    /// Last absolute `(rx, tx)` counter seen per rule; records fold as
    /// deltas against these.
    rule_counters: AHashMap<String, (u64, u64)>,
    pending_termination: bool,
}

impl SessionState {
    pub fn new(
        sid: impl Into<String>,
        session_id: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sid: sid.into(),
            session_id: session_id.into(),
            config,
            credits: AHashMap::new(),
            monitors: AHashMap::new(),
            session_level_key: None,
            static_rules: Vec::new(),
            dynamic_rules: Vec::new(),
            rule_counters: AHashMap::new(),
            pending_termination: false,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_pending_termination(&self) -> bool {
        self.pending_termination
    }

    /// Populates trackers and installed rules from the session-creation
    /// answer. Returns the rule-activation work: one immediate batch (always
    /// present, possibly empty) followed by one scheduled entry per
    /// future-dated rule.
    pub fn init(&mut self, response: &CreateSessionResponse, now: u64) -> Vec<SessionAction> {
        for credit in &response.credits {
            self.apply_credit_grant(credit, now);
        }
        for monitor in &response.usage_monitors {
            self.apply_monitor_grant(monitor);
        }

        let mut immediate_static = Vec::new();
        let mut immediate_dynamic = Vec::new();
        let mut scheduled = Vec::new();

        for install in &response.static_rules {
            if !self.static_rules.contains(&install.rule_id) {
                self.static_rules.push(install.rule_id.clone());
            }
            match install.activation_time {
                Some(at) if at > now => scheduled.push(SessionAction::ScheduleActivation {
                    activation_time: at,
                    static_rules: vec![install.rule_id.clone()],
                    dynamic_rules: Vec::new(),
                }),
                _ => immediate_static.push(install.rule_id.clone()),
            }
        }
        for install in &response.dynamic_rules {
            self.dynamic_rules
                .retain(|rule| rule.id != install.policy_rule.id);
            self.dynamic_rules.push(install.policy_rule.clone());
            match install.activation_time {
                Some(at) if at > now => scheduled.push(SessionAction::ScheduleActivation {
                    activation_time: at,
                    static_rules: Vec::new(),
                    dynamic_rules: vec![install.policy_rule.clone()],
                }),
                _ => immediate_dynamic.push(install.policy_rule.clone()),
            }
        }

        let mut actions = vec![SessionAction::ActivateRules {
            static_rules: immediate_static,
            dynamic_rules: immediate_dynamic,
        }];
        actions.extend(scheduled);
        actions
    }

    /// Applies one charging grant, creating the tracker lazily so credit is
    /// never dropped on the floor.
    pub fn apply_credit_grant(&mut self, credit: &ChargingCredit, now: u64) {
        let tracker = self.credits.entry(credit.charging_key).or_default();
        if credit.success {
            tracker.add_allowance(
                &credit.granted_units,
                credit.is_final,
                credit.validity_time,
                now,
            );
        } else {
            warn!(
                sid = %self.sid,
                charging_key = credit.charging_key,
                "charging peer refused grant; suspending key"
            );
            tracker.mark_exhausted();
        }
    }

    /// Applies one monitoring grant, creating the monitor lazily.
    pub fn apply_monitor_grant(&mut self, grant: &MonitorCredit) {
        if grant.level == MonitoringLevel::SessionLevel && self.session_level_key.is_none() {
            self.session_level_key = Some(grant.monitoring_key.clone());
        }
        let monitor = self
            .monitors
            .entry(grant.monitoring_key.clone())
            .or_insert_with(|| UsageMonitor::new(grant.level));
        if grant.success {
            monitor.add_allowance(&grant.granted_units);
        } else {
            warn!(
                sid = %self.sid,
                monitoring_key = %grant.monitoring_key,
                "policy peer refused monitoring grant; suspending key"
            );
            monitor.mark_exhausted();
        }
    }

    /// Folds one absolute data-plane counter into the trackers the rule is
    /// bound to: its rating-group credit, its own monitor, and the
    /// session-level monitor. Returns `false` when the rule is unknown.
    pub fn absorb_record(
        &mut self,
        rule_store: &StaticRuleStore,
        rule_id: &str,
        bytes_rx: u64,
        bytes_tx: u64,
    ) -> bool {
        let rule = self
            .dynamic_rules
            .iter()
            .find(|rule| rule.id == rule_id)
            .cloned()
            .or_else(|| rule_store.get_rule(rule_id));
        let Some(rule) = rule else {
            return false;
        };

        let (delta_rx, delta_tx) = self.fold_counter(rule_id, bytes_rx, bytes_tx);
        if delta_rx == 0 && delta_tx == 0 {
            return true;
        }

        if let Some(group) = rule.rating_group {
            match self.credits.get_mut(&group) {
                Some(tracker) => tracker.add_usage(delta_rx, delta_tx),
                None => debug!(
                    sid = %self.sid,
                    rule_id,
                    rating_group = group,
                    "usage for rating group without a tracker"
                ),
            }
        }
        if let Some(key) = rule.monitoring_key.as_deref() {
            if let Some(monitor) = self.monitors.get_mut(key) {
                monitor.add_usage(delta_rx, delta_tx);
            }
        }
        if let Some(session_key) = self.session_level_key.clone() {
            if rule.monitoring_key.as_deref() != Some(session_key.as_str()) {
                if let Some(monitor) = self.monitors.get_mut(&session_key) {
                    monitor.add_usage(delta_rx, delta_tx);
                }
            }
        }
        true
    }

    /// Drains every eligible report and the data-plane actions implied by
    /// tracker transitions. A session awaiting termination completion has
    /// nothing left to report.
    pub fn collect_reports(&mut self, rule_store: &StaticRuleStore, now: u64) -> SessionReports {
        let mut reports = SessionReports::default();
        if self.pending_termination {
            return reports;
        }

        let mut charging_keys: Vec<u32> = self.credits.keys().copied().collect();
        charging_keys.sort_unstable();
        for key in charging_keys {
            let (needs_deactivation, restore) = {
                let tracker = self
                    .credits
                    .get_mut(&key)
                    .expect("charging key collected above");
                if let Some(report) = tracker.get_update(now) {
                    reports.updates.push(CreditUsage {
                        sid: self.sid.clone(),
                        charging_key: key,
                        bytes_rx: report.bytes_rx,
                        bytes_tx: report.bytes_tx,
                        update_type: report.update_type,
                    });
                }
                let needs_deactivation = tracker.needs_deactivation();
                if needs_deactivation {
                    tracker.mark_deactivation_fired();
                }
                (needs_deactivation, tracker.take_restore_pending())
            };
            if needs_deactivation {
                let (static_rules, dynamic_rules) = self.rules_for_charging_key(rule_store, key);
                reports.actions.push(SessionAction::DeactivateRules {
                    static_rules,
                    dynamic_rules,
                });
            }
            if restore {
                let (static_rules, dynamic_rules) = self.rules_for_charging_key(rule_store, key);
                reports.actions.push(SessionAction::ActivateRules {
                    static_rules,
                    dynamic_rules,
                });
            }
        }

        let mut monitor_keys: Vec<String> = self.monitors.keys().cloned().collect();
        monitor_keys.sort();
        for key in monitor_keys {
            let monitor = self
                .monitors
                .get_mut(&key)
                .expect("monitor key collected above");
            if let Some((bytes_rx, bytes_tx)) = monitor.get_update() {
                reports.monitor_updates.push(UsageMonitorUpdate {
                    sid: self.sid.clone(),
                    monitoring_key: key,
                    level: monitor.level(),
                    bytes_rx,
                    bytes_tx,
                });
            }
        }

        reports
    }

    /// Marks a charging re-auth. A missing tracker is created empty so the
    /// demanded report goes out on the next cycle.
    pub fn init_reauth(
        &mut self,
        charging_key: Option<u32>,
        reauth_type: ReAuthType,
    ) -> ReAuthResult {
        match reauth_type {
            ReAuthType::SingleService => match charging_key {
                Some(key) => {
                    self.credits.entry(key).or_default().mark_reauth_required();
                    ReAuthResult::UpdateInitiated
                }
                None => ReAuthResult::UpdateNotNeeded,
            },
            ReAuthType::EntireSession => {
                if self.credits.is_empty() {
                    return ReAuthResult::UpdateNotNeeded;
                }
                for tracker in self.credits.values_mut() {
                    tracker.mark_reauth_required();
                }
                ReAuthResult::UpdateInitiated
            }
        }
    }

    /// Converts every tracker into a closing report and parks the session
    /// until `complete_termination`. In-flight reports are preempted.
    pub fn terminate(&mut self) -> (Vec<CreditUsage>, Vec<UsageMonitorUpdate>) {
        let mut charging_keys: Vec<u32> = self.credits.keys().copied().collect();
        charging_keys.sort_unstable();
        let credit_usages = charging_keys
            .into_iter()
            .map(|key| {
                let report = self
                    .credits
                    .get_mut(&key)
                    .expect("charging key collected above")
                    .terminate();
                CreditUsage {
                    sid: self.sid.clone(),
                    charging_key: key,
                    bytes_rx: report.bytes_rx,
                    bytes_tx: report.bytes_tx,
                    update_type: report.update_type,
                }
            })
            .collect();

        let mut monitor_keys: Vec<String> = self.monitors.keys().cloned().collect();
        monitor_keys.sort();
        let monitor_usages = monitor_keys
            .into_iter()
            .map(|key| {
                let monitor = self
                    .monitors
                    .get_mut(&key)
                    .expect("monitor key collected above");
                let (bytes_rx, bytes_tx) = monitor.terminate();
                UsageMonitorUpdate {
                    sid: self.sid.clone(),
                    monitoring_key: key,
                    level: monitor.level(),
                    bytes_rx,
                    bytes_tx,
                }
            })
            .collect();

        self.pending_termination = true;
        (credit_usages, monitor_usages)
    }

    /// Bucket projection for a charging tracker; missing keys read 0.
    pub fn charging_bucket(&self, charging_key: u32, bucket: Bucket) -> u64 {
        self.credits
            .get(&charging_key)
            .map_or(0, |tracker| tracker.bucket(bucket))
    }

    /// Bucket projection for a monitor; missing keys read 0.
    pub fn monitor_bucket(&self, monitoring_key: &str, bucket: Bucket) -> u64 {
        self.monitors
            .get(monitoring_key)
            .map_or(0, |monitor| monitor.bucket(bucket))
    }

    /// All installed rules bound to `charging_key`: static ids from the
    /// gateway store plus this session's dynamic bodies.
    fn rules_for_charging_key(
        &self,
        rule_store: &StaticRuleStore,
        charging_key: u32,
    ) -> (Vec<String>, Vec<PolicyRule>) {
        let static_rules = rule_store.rule_ids_for_charging_key(charging_key);
        let dynamic_rules = self
            .dynamic_rules
            .iter()
            .filter(|rule| rule.rating_group == Some(charging_key))
            .cloned()
            .collect();
        (static_rules, dynamic_rules)
    }

    fn fold_counter(&mut self, rule_id: &str, bytes_rx: u64, bytes_tx: u64) -> (u64, u64) {
        let last = self
            .rule_counters
            .entry(rule_id.to_string())
            .or_insert((0, 0));
        // A regressing counter means the data plane reinstalled the rule;
        // the new absolute value is the delta.
        let delta_rx = if bytes_rx >= last.0 {
            bytes_rx - last.0
        } else {
            bytes_rx
        };
        let delta_tx = if bytes_tx >= last.1 {
            bytes_tx - last.1
        } else {
            bytes_tx
        };
        *last = (bytes_rx, bytes_tx);
        (delta_rx, delta_tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{GrantedUnits, UpdateType};

    fn charging_credit(key: u32, volume: u64) -> ChargingCredit {
        ChargingCredit {
            sid: "IMSI1".into(),
            charging_key: key,
            granted_units: GrantedUnits::total(volume),
            is_final: false,
            validity_time: None,
            success: true,
        }
    }

    fn monitor_credit(key: &str, level: MonitoringLevel, volume: u64) -> MonitorCredit {
        MonitorCredit {
            sid: "IMSI1".into(),
            monitoring_key: key.into(),
            level,
            granted_units: GrantedUnits::total(volume),
            success: true,
        }
    }

    fn session() -> SessionState {
        SessionState::new("IMSI1", "1234", SessionConfig::default())
    }

    #[test]
    fn aggregates_records_per_rating_group() {
        let store = StaticRuleStore::new();
        store.insert_rule(PolicyRule::new("rule1", Some(1), None));
        store.insert_rule(PolicyRule::new("rule2", Some(1), None));
        store.insert_rule(PolicyRule::new("rule3", Some(2), None));

        let mut session = session();
        session.apply_credit_grant(&charging_credit(1, 1024), 0);
        session.apply_credit_grant(&charging_credit(2, 1024), 0);

        assert!(session.absorb_record(&store, "rule1", 10, 20));
        assert!(session.absorb_record(&store, "rule2", 5, 15));
        assert!(session.absorb_record(&store, "rule3", 100, 150));
        assert!(!session.absorb_record(&store, "unknown", 1, 1));

        assert_eq!(session.charging_bucket(1, Bucket::UsedRx), 15);
        assert_eq!(session.charging_bucket(1, Bucket::UsedTx), 35);
        assert_eq!(session.charging_bucket(2, Bucket::UsedRx), 100);
        assert_eq!(session.charging_bucket(2, Bucket::UsedTx), 150);
    }

    #[test]
    fn absolute_counters_fold_as_deltas() {
        let store = StaticRuleStore::new();
        store.insert_rule(PolicyRule::new("rule1", Some(1), None));

        let mut session = session();
        session.apply_credit_grant(&charging_credit(1, 1 << 20), 0);

        session.absorb_record(&store, "rule1", 100, 200);
        session.absorb_record(&store, "rule1", 150, 260);
        assert_eq!(session.charging_bucket(1, Bucket::UsedRx), 150);
        assert_eq!(session.charging_bucket(1, Bucket::UsedTx), 260);

        // Counter reset: the data plane reinstalled the rule.
        session.absorb_record(&store, "rule1", 40, 10);
        assert_eq!(session.charging_bucket(1, Bucket::UsedRx), 190);
        assert_eq!(session.charging_bucket(1, Bucket::UsedTx), 270);
    }

    #[test]
    fn session_level_monitor_sees_all_rules() {
        let store = StaticRuleStore::new();
        store.insert_rule(PolicyRule::new("both_rule", Some(1), Some("1".into())));
        store.insert_rule(PolicyRule::new("ocs_rule", Some(2), None));
        store.insert_rule(PolicyRule::new("pcrf_only", None, Some("3".into())));

        let mut session = session();
        session.apply_monitor_grant(&monitor_credit("1", MonitoringLevel::PccRuleLevel, 1024));
        session.apply_monitor_grant(&monitor_credit("3", MonitoringLevel::PccRuleLevel, 1024));
        session.apply_monitor_grant(&monitor_credit("4", MonitoringLevel::SessionLevel, 1024));

        session.absorb_record(&store, "both_rule", 10, 20);
        session.absorb_record(&store, "ocs_rule", 5, 15);
        session.absorb_record(&store, "pcrf_only", 1024, 1024);

        assert_eq!(session.monitor_bucket("1", Bucket::UsedRx), 10);
        assert_eq!(session.monitor_bucket("3", Bucket::UsedRx), 1024);
        assert_eq!(session.monitor_bucket("4", Bucket::UsedRx), 1039);
        assert_eq!(session.monitor_bucket("4", Bucket::UsedTx), 1059);
    }

    #[test]
    fn init_partitions_rules_by_activation_time() {
        let mut session = session();
        let response = CreateSessionResponse {
            credits: vec![charging_credit(1, 1024)],
            usage_monitors: Vec::new(),
            static_rules: vec![
                crate::api::StaticRuleInstall {
                    rule_id: "now_rule".into(),
                    activation_time: None,
                },
                crate::api::StaticRuleInstall {
                    rule_id: "past_rule".into(),
                    activation_time: Some(900),
                },
                crate::api::StaticRuleInstall {
                    rule_id: "future_rule".into(),
                    activation_time: Some(2_000),
                },
            ],
            dynamic_rules: vec![crate::api::DynamicRuleInstall {
                policy_rule: PolicyRule::new("dyn_future", Some(1), None),
                activation_time: Some(3_000),
            }],
        };

        let actions = session.init(&response, 1_000);
        assert_eq!(actions.len(), 3);
        assert_eq!(
            actions[0],
            SessionAction::ActivateRules {
                static_rules: vec!["now_rule".into(), "past_rule".into()],
                dynamic_rules: Vec::new(),
            }
        );
        assert!(matches!(
            &actions[1],
            SessionAction::ScheduleActivation { activation_time: 2_000, static_rules, .. }
                if static_rules == &vec!["future_rule".to_string()]
        ));
        assert!(matches!(
            &actions[2],
            SessionAction::ScheduleActivation { activation_time: 3_000, dynamic_rules, .. }
                if dynamic_rules.len() == 1
        ));
    }

    #[test]
    fn final_unit_exhaustion_deactivates_group_rules() {
        let store = StaticRuleStore::new();
        store.insert_rule(PolicyRule::new("rule1", Some(1), None));
        store.insert_rule(PolicyRule::new("rule2", Some(1), None));

        let mut session = session();
        let mut credit = charging_credit(1, 1024);
        credit.is_final = true;
        session.apply_credit_grant(&credit, 0);

        session.absorb_record(&store, "rule1", 1024, 2048);
        let reports = session.collect_reports(&store, 0);
        assert!(reports.updates.is_empty());
        assert_eq!(reports.actions.len(), 1);
        assert_eq!(
            reports.actions[0],
            SessionAction::DeactivateRules {
                static_rules: vec!["rule1".into(), "rule2".into()],
                dynamic_rules: Vec::new(),
            }
        );

        // The teardown fires exactly once.
        let reports = session.collect_reports(&store, 0);
        assert!(reports.actions.is_empty());
    }

    #[test]
    fn termination_preempts_and_parks_session() {
        let store = StaticRuleStore::new();
        store.insert_rule(PolicyRule::new("rule1", Some(1), None));

        let mut session = session();
        session.apply_credit_grant(&charging_credit(1, 1024), 0);
        session.apply_credit_grant(&charging_credit(2, 2048), 0);
        session.absorb_record(&store, "rule1", 1024, 2048);
        let reports = session.collect_reports(&store, 0);
        assert_eq!(reports.updates.len(), 1);

        let (credit_usages, _monitors) = session.terminate();
        assert_eq!(credit_usages.len(), 2);
        assert!(credit_usages
            .iter()
            .all(|usage| usage.update_type == UpdateType::Terminated));
        assert_eq!(credit_usages[0].bytes_rx, 1024);
        assert!(session.is_pending_termination());

        // Nothing further is collected while awaiting completion.
        let reports = session.collect_reports(&store, 0);
        assert!(reports.updates.is_empty() && reports.actions.is_empty());
    }
}
