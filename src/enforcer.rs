// Numan Thabit 2026
// enforcer.rs - local enforcement orchestrator

use std::sync::Arc;

use ahash::AHashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    api::{
        ChargingReAuthRequest, CreateSessionResponse, FlowClient, ReAuthResult, RuleRecordTable,
        SessionTerminateRequest, UpdateSessionRequest, UpdateSessionResponse,
    },
    credit::Bucket,
    metrics::Metrics,
    rules::StaticRuleStore,
    schedule::{now_unix, ActivationQueue, ScheduledActivation},
    session::{SessionAction, SessionConfig, SessionState},
};

/// Errors surfaced by enforcement operations.
#[derive(Debug, Error)]
pub enum EnforcerError {
    /// The operation named a subscriber with no session.
    #[error("no session found for subscriber '{0}'")]
    UnknownSubscriber(String),
    /// The data plane rejected an immediate flow activation. The session is
    /// still created; a later cycle re-derives the work.
    #[error("data plane rejected flow activation for subscriber '{sid}'")]
    FlowActivation { sid: String },
}

/// Orchestrates enforcement for every subscriber on the gateway.
///
/// Owns the `sid → session` map exclusively; every operation runs on the
/// caller's single loop thread (see the runtime module). Data-plane failures
/// are logged and counted, never rolled back: the next collection cycle
/// re-derives the same actions from tracker state.
pub struct LocalEnforcer<C: FlowClient> {
    rule_store: Arc<StaticRuleStore>,
    client: C,
    metrics: Arc<Metrics>,
    sessions: AHashMap<String, SessionState>,
    activations: ActivationQueue,
    dropped_records: u64,
}

impl<C: FlowClient> LocalEnforcer<C> {
    pub fn new(rule_store: Arc<StaticRuleStore>, client: C, metrics: Arc<Metrics>) -> Self {
        Self {
            rule_store,
            client,
            metrics,
            sessions: AHashMap::new(),
            activations: ActivationQueue::new(),
            dropped_records: 0,
        }
    }

    /// Creates (or replaces) the session for `sid` from the federation's
    /// answer, activating immediate rules and queueing future-dated ones.
    pub fn init_session_credit(
        &mut self,
        sid: &str,
        session_id: &str,
        config: SessionConfig,
        response: &CreateSessionResponse,
    ) -> Result<(), EnforcerError> {
        let now = now_unix();
        let mut session = SessionState::new(sid, session_id, config);
        let actions = session.init(response, now);

        if self.sessions.insert(sid.to_string(), session).is_some() {
            warn!(sid, session_id, "replacing existing session");
            self.activations.cancel_subscriber(sid);
        }
        self.metrics.sessions_active.set(self.sessions.len() as i64);
        self.metrics
            .grants_applied
            .inc_by((response.credits.len() + response.usage_monitors.len()) as u64);

        let mut activation_failed = false;
        for action in actions {
            activation_failed |= !self.execute_action(sid, action);
        }
        if activation_failed {
            return Err(EnforcerError::FlowActivation { sid: sid.into() });
        }
        Ok(())
    }

    /// Folds a batch of data-plane usage records into the owning sessions.
    /// Records for unknown subscribers or rules are dropped with a warning
    /// and counted.
    pub fn aggregate_records(&mut self, table: &RuleRecordTable) {
        for record in &table.records {
            match self.sessions.get_mut(&record.sid) {
                Some(session) => {
                    let absorbed = session.absorb_record(
                        &self.rule_store,
                        &record.rule_id,
                        record.bytes_rx,
                        record.bytes_tx,
                    );
                    if !absorbed {
                        warn!(
                            sid = %record.sid,
                            rule_id = %record.rule_id,
                            "dropping record for unknown rule"
                        );
                        self.drop_record();
                    }
                }
                None => {
                    warn!(
                        sid = %record.sid,
                        rule_id = %record.rule_id,
                        "dropping record for unknown subscriber"
                    );
                    self.drop_record();
                }
            }
        }
    }

    /// Walks every session, draining eligible reports into one batched
    /// request and executing the data-plane actions derived on the way.
    pub fn collect_updates(&mut self) -> UpdateSessionRequest {
        self.collect_updates_at(now_unix())
    }

    pub(crate) fn collect_updates_at(&mut self, now: u64) -> UpdateSessionRequest {
        let mut request = UpdateSessionRequest::default();
        let mut sids: Vec<String> = self.sessions.keys().cloned().collect();
        sids.sort();

        for sid in sids {
            let reports = match self.sessions.get_mut(&sid) {
                Some(session) => session.collect_reports(&self.rule_store, now),
                None => continue,
            };
            for usage in &reports.updates {
                self.metrics
                    .usage_reports
                    .with_label_values(&[usage.update_type.as_label()])
                    .inc();
            }
            self.metrics
                .monitor_reports
                .inc_by(reports.monitor_updates.len() as u64);
            request.updates.extend(reports.updates);
            request.usage_monitors.extend(reports.monitor_updates);
            for action in reports.actions {
                self.execute_action(&sid, action);
            }
        }
        request
    }

    /// Applies peer grants to the matching trackers. Grants for missing
    /// trackers create them lazily so credit is preserved; grants for
    /// unknown subscribers are logged and skipped.
    pub fn update_session_credit(&mut self, response: &UpdateSessionResponse) {
        let now = now_unix();
        for credit in &response.credits {
            match self.sessions.get_mut(&credit.sid) {
                Some(session) => {
                    session.apply_credit_grant(credit, now);
                    self.metrics.grants_applied.inc();
                }
                None => warn!(
                    sid = %credit.sid,
                    charging_key = credit.charging_key,
                    "credit grant for unknown subscriber"
                ),
            }
        }
        for monitor in &response.usage_monitors {
            match self.sessions.get_mut(&monitor.sid) {
                Some(session) => {
                    session.apply_monitor_grant(monitor);
                    self.metrics.grants_applied.inc();
                }
                None => warn!(
                    sid = %monitor.sid,
                    monitoring_key = %monitor.monitoring_key,
                    "monitor grant for unknown subscriber"
                ),
            }
        }
    }

    /// Emits the closing report for `sid` with every tracker's residual
    /// delta, tears down its flows, and parks the session until
    /// `complete_termination`.
    pub fn terminate_subscriber(
        &mut self,
        sid: &str,
    ) -> Result<SessionTerminateRequest, EnforcerError> {
        let session = self
            .sessions
            .get_mut(sid)
            .ok_or_else(|| EnforcerError::UnknownSubscriber(sid.into()))?;
        let session_id = session.session_id().to_string();
        let (credit_usages, monitor_usages) = session.terminate();

        self.activations.cancel_subscriber(sid);
        self.metrics
            .scheduled_activations_pending
            .set(self.activations.len() as i64);
        self.metrics.terminations.inc();
        self.metrics.flow_deactivations.inc();
        if !self.client.deactivate_all_flows(sid) {
            self.metrics.flow_deactivation_failures.inc();
            warn!(sid, "data plane rejected full flow teardown");
        }

        Ok(SessionTerminateRequest {
            sid: sid.into(),
            session_id,
            credit_usages,
            monitor_usages,
        })
    }

    /// Removes the session iff the ids match and termination was reported.
    /// Idempotent: anything else is a logged no-op.
    pub fn complete_termination(&mut self, sid: &str, session_id: &str) {
        let matches = self.sessions.get(sid).is_some_and(|session| {
            session.is_pending_termination() && session.session_id() == session_id
        });
        if matches {
            self.sessions.remove(sid);
            self.metrics.sessions_active.set(self.sessions.len() as i64);
        } else {
            debug!(sid, session_id, "ignoring unmatched termination completion");
        }
    }

    /// Marks the targeted tracker(s) for an immediate report on the next
    /// collection cycle.
    pub fn init_charging_reauth(&mut self, request: &ChargingReAuthRequest) -> ReAuthResult {
        let result = match self.sessions.get_mut(&request.sid) {
            Some(session) => session.init_reauth(request.charging_key, request.reauth_type),
            None => ReAuthResult::SessionNotFound,
        };
        self.metrics
            .reauth_answers
            .with_label_values(&[result.as_label()])
            .inc();
        result
    }

    /// Fires every scheduled activation whose deadline has passed. Entries
    /// whose session is gone or terminating are dropped.
    pub fn fire_scheduled_activations(&mut self, now: u64) {
        let due = self.activations.pop_due(now);
        self.metrics
            .scheduled_activations_pending
            .set(self.activations.len() as i64);
        for activation in due {
            let ScheduledActivation {
                sid,
                session_id,
                static_rules,
                dynamic_rules,
                ..
            } = activation;
            let alive = self.sessions.get(&sid).is_some_and(|session| {
                !session.is_pending_termination() && session.session_id() == session_id
            });
            if !alive {
                debug!(sid = %sid, "dropping scheduled activation for finished session");
                continue;
            }
            self.execute_action(
                &sid,
                SessionAction::ActivateRules {
                    static_rules,
                    dynamic_rules,
                },
            );
        }
    }

    /// Bucket projection for a charging tracker; unknown entities read 0.
    pub fn get_charging_credit(&self, sid: &str, charging_key: u32, bucket: Bucket) -> u64 {
        self.sessions
            .get(sid)
            .map_or(0, |session| session.charging_bucket(charging_key, bucket))
    }

    /// Bucket projection for a usage monitor; unknown entities read 0.
    pub fn get_monitor_credit(&self, sid: &str, monitoring_key: &str, bucket: Bucket) -> u64 {
        self.sessions
            .get(sid)
            .map_or(0, |session| session.monitor_bucket(monitoring_key, bucket))
    }

    /// Records dropped so far for unknown subscribers or rules.
    pub fn dropped_records(&self) -> u64 {
        self.dropped_records
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Scheduled activations still waiting on their deadline.
    pub fn pending_activations(&self) -> usize {
        self.activations.len()
    }

    fn drop_record(&mut self) {
        self.dropped_records += 1;
        self.metrics.records_dropped.inc();
    }

    /// Issues one data-plane command (or queues a scheduled one). Returns
    /// `false` when the data plane rejected the command; state is never
    /// rolled back.
    fn execute_action(&mut self, sid: &str, action: SessionAction) -> bool {
        match action {
            SessionAction::ActivateRules {
                static_rules,
                dynamic_rules,
            } => {
                let Some(ip_addr) = self
                    .sessions
                    .get(sid)
                    .map(|session| session.config().ue_ipv4.clone())
                else {
                    return true;
                };
                self.metrics.flow_activations.inc();
                let accepted =
                    self.client
                        .activate_flows(sid, &ip_addr, &static_rules, &dynamic_rules);
                if !accepted {
                    self.metrics.flow_activation_failures.inc();
                    warn!(sid, rules = static_rules.len() + dynamic_rules.len(),
                        "data plane rejected flow activation");
                }
                accepted
            }
            SessionAction::DeactivateRules {
                static_rules,
                dynamic_rules,
            } => {
                self.metrics.flow_deactivations.inc();
                let accepted = self
                    .client
                    .deactivate_flows(sid, &static_rules, &dynamic_rules);
                if !accepted {
                    self.metrics.flow_deactivation_failures.inc();
                    warn!(sid, rules = static_rules.len() + dynamic_rules.len(),
                        "data plane rejected flow deactivation");
                }
                accepted
            }
            SessionAction::ScheduleActivation {
                activation_time,
                static_rules,
                dynamic_rules,
            } => {
                let session_id = self
                    .sessions
                    .get(sid)
                    .map(|session| session.session_id().to_string())
                    .unwrap_or_default();
                self.activations.push(ScheduledActivation {
                    sid: sid.into(),
                    session_id,
                    activation_time,
                    static_rules,
                    dynamic_rules,
                });
                self.metrics
                    .scheduled_activations_pending
                    .set(self.activations.len() as i64);
                true
            }
        }
    }
}
