// Creditgate session enforcement core public surface.
// Numan Thabit 2026

pub mod api;

pub mod config;

pub mod credit;

pub mod enforcer;

pub mod metrics;

pub mod monitor;

pub mod rules;

#[cfg(feature = "enforcer-api")]
pub mod runtime;

pub mod schedule;

pub mod session;

pub mod store;

pub use config::{Config, ConfigError, EnforcerSettings};

pub use api::{
    ChargingCredit, ChargingReAuthRequest, CreateSessionResponse, CreditUsage, DynamicRuleInstall,
    FlowClient, GrantedUnits, MonitorCredit, MonitoringLevel, ReAuthResult, ReAuthType,
    RuleRecord, RuleRecordTable, SessionTerminateRequest, StaticRuleInstall, UpdateSessionRequest,
    UpdateSessionResponse, UpdateType, UsageMonitorUpdate,
};

pub use credit::{Bucket, CreditState, SessionCredit, UsageReport};

pub use monitor::UsageMonitor;

pub use rules::{PolicyRule, StaticRuleStore, TrackingType};

pub use session::{SessionAction, SessionConfig, SessionReports, SessionState};

pub use enforcer::{EnforcerError, LocalEnforcer};

pub use schedule::{now_unix, ActivationQueue, ScheduledActivation};

#[cfg(feature = "enforcer-api")]
pub use runtime::{
    spawn_enforcer, spawn_enforcer_with_config, EnforcerHandle, EnforcerHandleError,
    EnforcerStopReason, RuntimeConfig, RuntimeEvent,
};

pub use store::{Deserializer, MemoryObjectMap, ObjectMap, Serializer, StoreError};

pub use metrics::{Metrics, MetricsError};
