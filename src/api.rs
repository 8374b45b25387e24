// Public enforcement API shared with the policy/charging peers.
// Numan Thabit 2026
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rules::PolicyRule;

/// Scope at which a usage monitor aggregates traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitoringLevel {
    /// The monitor covers the rules that carry its monitoring key.
    PccRuleLevel,
    /// The monitor covers every rule in the session.
    SessionLevel,
}

impl fmt::Display for MonitoringLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitoringLevel::PccRuleLevel => f.write_str("pcc_rule_level"),
            MonitoringLevel::SessionLevel => f.write_str("session_level"),
        }
    }
}

/// Why a credit usage report is being sent to the charging peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    /// The granted quota has been consumed.
    QuotaExhausted,
    /// The peer asked for an immediate usage report.
    ReauthRequired,
    /// The session is terminating; this is the closing report.
    Terminated,
    /// The grant's validity window lapsed before exhaustion.
    ValidityTimerExpired,
}

impl UpdateType {
    /// Stable label used for logging and metrics.
    pub const fn as_label(self) -> &'static str {
        match self {
            UpdateType::QuotaExhausted => "quota_exhausted",
            UpdateType::ReauthRequired => "reauth_required",
            UpdateType::Terminated => "terminated",
            UpdateType::ValidityTimerExpired => "validity_timer_expired",
        }
    }
}

/// Units granted by the charging peer. Absent fields grant nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GrantedUnits {
    pub total: Option<u64>,
    pub rx: Option<u64>,
    pub tx: Option<u64>,
}

impl GrantedUnits {
    /// Grant of `total` octets with no per-direction split.
    pub fn total(total: u64) -> Self {
        Self {
            total: Some(total),
            rx: None,
            tx: None,
        }
    }

    /// The octet volume this grant adds to the allowance. The total field
    /// wins when present; otherwise the directional grants are summed.
    pub fn volume(&self) -> u64 {
        match self.total {
            Some(total) => total,
            None => self.rx.unwrap_or(0).saturating_add(self.tx.unwrap_or(0)),
        }
    }
}

/// A quota grant for one charging key, as delivered by the charging peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingCredit {
    pub sid: String,
    pub charging_key: u32,
    pub granted_units: GrantedUnits,
    /// Marks the grant as the last one; on exhaustion flows must be torn
    /// down rather than reported.
    pub is_final: bool,
    /// Seconds the grant stays valid before usage must be reported anyway.
    pub validity_time: Option<u64>,
    pub success: bool,
}

/// A usage-monitoring grant for one monitoring key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorCredit {
    pub sid: String,
    pub monitoring_key: String,
    pub level: MonitoringLevel,
    pub granted_units: GrantedUnits,
    pub success: bool,
}

/// Reference to a static rule installed into a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRuleInstall {
    pub rule_id: String,
    /// UNIX seconds; absent or past means activate immediately.
    pub activation_time: Option<u64>,
}

/// A dynamic rule pushed by value into a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRuleInstall {
    pub policy_rule: PolicyRule,
    /// UNIX seconds; absent or past means activate immediately.
    pub activation_time: Option<u64>,
}

/// Answer from the policy/charging federation authorizing a new session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub credits: Vec<ChargingCredit>,
    pub usage_monitors: Vec<MonitorCredit>,
    pub static_rules: Vec<StaticRuleInstall>,
    pub dynamic_rules: Vec<DynamicRuleInstall>,
}

/// Byte counters for one rule of one subscriber, as reported by the data
/// plane. Counters are absolute since rule install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub sid: String,
    pub rule_id: String,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
}

/// A batch of usage records pushed by the data plane.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleRecordTable {
    pub records: Vec<RuleRecord>,
}

/// One credit usage report inside an update or termination request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditUsage {
    pub sid: String,
    pub charging_key: u32,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub update_type: UpdateType,
}

/// One monitor usage report, tagged with the monitor's level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMonitorUpdate {
    pub sid: String,
    pub monitoring_key: String,
    pub level: MonitoringLevel,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
}

/// Batched quota and monitor reports emitted towards the peer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateSessionRequest {
    pub updates: Vec<CreditUsage>,
    pub usage_monitors: Vec<UsageMonitorUpdate>,
}

impl UpdateSessionRequest {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.usage_monitors.is_empty()
    }
}

/// Grants returned by the peer in response to an update request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateSessionResponse {
    pub credits: Vec<ChargingCredit>,
    pub usage_monitors: Vec<MonitorCredit>,
}

/// Closing usage report for a terminating session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTerminateRequest {
    pub sid: String,
    pub session_id: String,
    pub credit_usages: Vec<CreditUsage>,
    pub monitor_usages: Vec<UsageMonitorUpdate>,
}

/// Scope of a charging re-authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReAuthType {
    /// Re-authorize a single charging key.
    SingleService,
    /// Re-authorize every charging key in the session.
    EntireSession,
}

/// Peer-initiated request for an immediate usage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingReAuthRequest {
    pub sid: String,
    /// Required for [`ReAuthType::SingleService`], ignored otherwise.
    pub charging_key: Option<u32>,
    pub reauth_type: ReAuthType,
}

/// Outcome reported back for a re-authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReAuthResult {
    UpdateInitiated,
    UpdateNotNeeded,
    SessionNotFound,
}

impl ReAuthResult {
    /// Stable label used for logging and metrics.
    pub const fn as_label(self) -> &'static str {
        match self {
            ReAuthResult::UpdateInitiated => "update_initiated",
            ReAuthResult::UpdateNotNeeded => "update_not_needed",
            ReAuthResult::SessionNotFound => "session_not_found",
        }
    }
}

/// Contract for the data-plane peer that installs and tears down policy
/// flows.
///
/// Calls are best-effort and must return promptly: the boolean result states
/// whether the command was accepted for delivery, not whether the data plane
/// applied it. Implementations deliver wire results out-of-band (logged and
/// counted), carry the configured response deadline, and must preserve the
/// submission order of commands for any one subscriber.
pub trait FlowClient {
    /// Installs flows for the given rules on behalf of `sid`.
    fn activate_flows(
        &mut self,
        sid: &str,
        ip_addr: &str,
        static_rules: &[String],
        dynamic_rules: &[PolicyRule],
    ) -> bool;

    /// Tears down the flows belonging to the given rules.
    fn deactivate_flows(
        &mut self,
        sid: &str,
        static_rules: &[String],
        dynamic_rules: &[PolicyRule],
    ) -> bool;

    /// Tears down every flow installed for `sid`.
    fn deactivate_all_flows(&mut self, sid: &str) -> bool;
}
