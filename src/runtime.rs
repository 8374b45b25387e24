#![cfg(feature = "enforcer-api")]

//! Tokio-based runtime scaffolding for driving the [`LocalEnforcer`].
//!
//! This module provides a small executor wrapper around
//! [`LocalEnforcer`](crate::LocalEnforcer) that owns the enforcer on a single
//! task, serializing every operation onto one loop the way the gateway
//! expects. Callers submit work through an [`EnforcerHandle`]; a periodic
//! tick fires due scheduled activations and surfaces non-empty update
//! batches through an asynchronous event channel.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError, Receiver, Sender},
        oneshot,
    },
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{
    api::{
        ChargingReAuthRequest, CreateSessionResponse, FlowClient, ReAuthResult, RuleRecordTable,
        SessionTerminateRequest, UpdateSessionRequest, UpdateSessionResponse,
    },
    config::Config,
    credit::Bucket,
    enforcer::{EnforcerError, LocalEnforcer},
    schedule::now_unix,
    session::SessionConfig,
};

/// Configuration parameters controlling how the enforcer actor is driven.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interval between loop ticks driving scheduled activations.
    pub tick: Duration,
    /// Interval between automatic update-collection cycles.
    pub update_interval: Duration,
    /// Capacity of the command channel used between the handle and actor.
    pub command_buffer: usize,
    /// Capacity of the event channel surfaced to the caller.
    pub event_buffer: usize,
    /// Grace period allowed for the actor task to stop during
    /// [`EnforcerHandle::shutdown`].
    pub shutdown_grace: Duration,
}

impl RuntimeConfig {
    /// Creates a new configuration with the provided tick and default values
    /// for the remaining parameters.
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    /// Derives the runtime parameters from the loaded file configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick: Duration::from_millis(config.enforcer.tick_ms),
            update_interval: Duration::from_secs(config.enforcer.update_interval_secs),
            command_buffer: config.enforcer.command_buffer,
            event_buffer: config.enforcer.event_buffer,
            ..Self::default()
        }
    }

    /// Sets the automatic update-collection interval.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Sets the command channel capacity.
    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity.max(1);
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Sets the grace period used when shutting down the actor task.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    fn normalize(&mut self) {
        if self.command_buffer == 0 {
            self.command_buffer = 1;
        }
        if self.event_buffer == 0 {
            self.event_buffer = 1;
        }
        if self.update_interval < self.tick {
            self.update_interval = self.tick;
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            update_interval: Duration::from_secs(10),
            command_buffer: 512,
            event_buffer: 1024,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

/// Reason why the enforcer actor task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcerStopReason {
    /// The actor shut down after an explicit shutdown request.
    Shutdown,
    /// The handle dropped the command channel without a shutdown request.
    CommandChannelClosed,
    /// The event channel was dropped by the consumer.
    EventChannelClosed,
}

/// Events emitted by the running enforcer task.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A non-empty batch of usage reports ready for the policy peer.
    UpdateRequest(UpdateSessionRequest),
    /// The actor task finished execution.
    Stopped(EnforcerStopReason),
}

/// Errors returned by [`EnforcerHandle`].
#[derive(Debug, Error)]
pub enum EnforcerHandleError {
    /// The runtime task has already exited and the command channel is
    /// closed.
    #[error("enforcer runtime channel closed")]
    ChannelClosed,
    /// The runtime command queue is full.
    #[error("enforcer runtime command channel is full")]
    CommandQueueFull,
    /// The actor stopped before responding to a request.
    #[error("enforcer runtime stopped unexpectedly")]
    ActorStopped,
    /// The enforcement operation itself failed.
    #[error(transparent)]
    Enforcer(#[from] EnforcerError),
    /// Joining the underlying task failed.
    #[error("enforcer runtime join error: {0}")]
    Join(tokio::task::JoinError),
    /// The actor did not stop within the configured grace window.
    #[error("enforcer runtime shutdown timed out")]
    ShutdownTimeout,
}

enum EnforcerCommand {
    InitSession {
        sid: String,
        session_id: String,
        config: SessionConfig,
        response: Box<CreateSessionResponse>,
        resp: oneshot::Sender<Result<(), EnforcerError>>,
    },
    AggregateRecords(RuleRecordTable),
    CollectUpdates(oneshot::Sender<UpdateSessionRequest>),
    UpdateSessionCredit(Box<UpdateSessionResponse>),
    TerminateSubscriber {
        sid: String,
        resp: oneshot::Sender<Result<SessionTerminateRequest, EnforcerError>>,
    },
    CompleteTermination {
        sid: String,
        session_id: String,
    },
    ChargingReauth {
        request: ChargingReAuthRequest,
        resp: oneshot::Sender<ReAuthResult>,
    },
    ChargingBucket {
        sid: String,
        charging_key: u32,
        bucket: Bucket,
        resp: oneshot::Sender<u64>,
    },
    MonitorBucket {
        sid: String,
        monitoring_key: String,
        bucket: Bucket,
        resp: oneshot::Sender<u64>,
    },
    Shutdown,
}

/// Handle used to interact with the spawned enforcer actor.
#[derive(Debug)]
pub struct EnforcerHandle {
    commands: Sender<EnforcerCommand>,
    join: JoinHandle<()>,
    config: Arc<RuntimeConfig>,
}

impl EnforcerHandle {
    /// Returns a reference to the runtime configuration of the actor.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Creates (or replaces) a subscriber session and awaits the result.
    pub async fn init_session(
        &self,
        sid: impl Into<String>,
        session_id: impl Into<String>,
        config: SessionConfig,
        response: CreateSessionResponse,
    ) -> Result<(), EnforcerHandleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EnforcerCommand::InitSession {
                sid: sid.into(),
                session_id: session_id.into(),
                config,
                response: Box::new(response),
                resp: tx,
            })
            .await
            .map_err(|_| EnforcerHandleError::ChannelClosed)?;
        rx.await
            .map_err(|_| EnforcerHandleError::ActorStopped)?
            .map_err(EnforcerHandleError::from)
    }

    /// Queues a data-plane record batch for aggregation.
    pub fn aggregate_records(&self, table: RuleRecordTable) -> Result<(), EnforcerHandleError> {
        self.commands
            .try_send(EnforcerCommand::AggregateRecords(table))
            .map_err(|err| match err {
                TrySendError::Closed(_) => EnforcerHandleError::ChannelClosed,
                TrySendError::Full(_) => EnforcerHandleError::CommandQueueFull,
            })
    }

    /// Collects the current update batch and awaits the result.
    pub async fn collect_updates(&self) -> Result<UpdateSessionRequest, EnforcerHandleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EnforcerCommand::CollectUpdates(tx))
            .await
            .map_err(|_| EnforcerHandleError::ChannelClosed)?;
        rx.await.map_err(|_| EnforcerHandleError::ActorStopped)
    }

    /// Queues peer grants for application to the matching trackers.
    pub fn update_session_credit(
        &self,
        response: UpdateSessionResponse,
    ) -> Result<(), EnforcerHandleError> {
        self.commands
            .try_send(EnforcerCommand::UpdateSessionCredit(Box::new(response)))
            .map_err(|err| match err {
                TrySendError::Closed(_) => EnforcerHandleError::ChannelClosed,
                TrySendError::Full(_) => EnforcerHandleError::CommandQueueFull,
            })
    }

    /// Reports termination usage for a subscriber and awaits the batch.
    pub async fn terminate_subscriber(
        &self,
        sid: impl Into<String>,
    ) -> Result<SessionTerminateRequest, EnforcerHandleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EnforcerCommand::TerminateSubscriber {
                sid: sid.into(),
                resp: tx,
            })
            .await
            .map_err(|_| EnforcerHandleError::ChannelClosed)?;
        rx.await
            .map_err(|_| EnforcerHandleError::ActorStopped)?
            .map_err(EnforcerHandleError::from)
    }

    /// Queues removal of a terminated session.
    pub fn complete_termination(
        &self,
        sid: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<(), EnforcerHandleError> {
        self.commands
            .try_send(EnforcerCommand::CompleteTermination {
                sid: sid.into(),
                session_id: session_id.into(),
            })
            .map_err(|err| match err {
                TrySendError::Closed(_) => EnforcerHandleError::ChannelClosed,
                TrySendError::Full(_) => EnforcerHandleError::CommandQueueFull,
            })
    }

    /// Submits a charging re-auth request and awaits the answer.
    pub async fn init_charging_reauth(
        &self,
        request: ChargingReAuthRequest,
    ) -> Result<ReAuthResult, EnforcerHandleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EnforcerCommand::ChargingReauth { request, resp: tx })
            .await
            .map_err(|_| EnforcerHandleError::ChannelClosed)?;
        rx.await.map_err(|_| EnforcerHandleError::ActorStopped)
    }

    /// Reads a charging-tracker bucket projection.
    pub async fn charging_credit(
        &self,
        sid: impl Into<String>,
        charging_key: u32,
        bucket: Bucket,
    ) -> Result<u64, EnforcerHandleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EnforcerCommand::ChargingBucket {
                sid: sid.into(),
                charging_key,
                bucket,
                resp: tx,
            })
            .await
            .map_err(|_| EnforcerHandleError::ChannelClosed)?;
        rx.await.map_err(|_| EnforcerHandleError::ActorStopped)
    }

    /// Reads a monitor bucket projection.
    pub async fn monitor_credit(
        &self,
        sid: impl Into<String>,
        monitoring_key: impl Into<String>,
        bucket: Bucket,
    ) -> Result<u64, EnforcerHandleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EnforcerCommand::MonitorBucket {
                sid: sid.into(),
                monitoring_key: monitoring_key.into(),
                bucket,
                resp: tx,
            })
            .await
            .map_err(|_| EnforcerHandleError::ChannelClosed)?;
        rx.await.map_err(|_| EnforcerHandleError::ActorStopped)
    }

    /// Signals the enforcer actor to terminate and waits for the join
    /// handle.
    pub async fn shutdown(self) -> Result<(), EnforcerHandleError> {
        let EnforcerHandle {
            commands,
            join,
            config,
        } = self;

        commands
            .send(EnforcerCommand::Shutdown)
            .await
            .map_err(|_| EnforcerHandleError::ChannelClosed)?;

        if config.shutdown_grace.is_zero() {
            join.await.map_err(EnforcerHandleError::Join)?;
            return Ok(());
        }

        match time::timeout(config.shutdown_grace, join).await {
            Ok(result) => result.map_err(EnforcerHandleError::Join),
            Err(_) => Err(EnforcerHandleError::ShutdownTimeout),
        }
    }
}

/// Spawns a Tokio task that exclusively owns and drives the provided
/// enforcer.
///
/// The returned [`EnforcerHandle`] submits operations onto the loop, which
/// serializes them with the periodic tick. Update batches produced by the
/// tick are forwarded over the returned event receiver.
pub fn spawn_enforcer<C>(
    enforcer: LocalEnforcer<C>,
    tick: Duration,
) -> (EnforcerHandle, Receiver<RuntimeEvent>)
where
    C: FlowClient + Send + 'static,
{
    spawn_enforcer_with_config(enforcer, RuntimeConfig::new(tick))
}

/// Spawns a Tokio task using an explicit [`RuntimeConfig`].
pub fn spawn_enforcer_with_config<C>(
    enforcer: LocalEnforcer<C>,
    mut config: RuntimeConfig,
) -> (EnforcerHandle, Receiver<RuntimeEvent>)
where
    C: FlowClient + Send + 'static,
{
    config.normalize();
    let command_capacity = config.command_buffer;
    let event_capacity = config.event_buffer;
    let config = Arc::new(config);
    let (command_tx, command_rx) = mpsc::channel(command_capacity);
    let (event_tx, event_rx) = mpsc::channel(event_capacity);

    let join = tokio::spawn(run_enforcer(
        enforcer,
        Arc::clone(&config),
        command_rx,
        event_tx,
    ));
    let handle = EnforcerHandle {
        commands: command_tx,
        join,
        config,
    };
    (handle, event_rx)
}

async fn run_enforcer<C>(
    mut enforcer: LocalEnforcer<C>,
    config: Arc<RuntimeConfig>,
    mut commands: Receiver<EnforcerCommand>,
    events: Sender<RuntimeEvent>,
) where
    C: FlowClient + Send + 'static,
{
    let mut ticker = time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_collect = Instant::now();

    let exit_reason = loop {
        tokio::select! {
            biased;
            maybe_cmd = commands.recv() => {
                match maybe_cmd {
                    Some(cmd) => {
                        if let Some(reason) = handle_command(&mut enforcer, cmd) {
                            break reason;
                        }
                    }
                    None => break EnforcerStopReason::CommandChannelClosed,
                }
            }
            _ = ticker.tick() => {
                enforcer.fire_scheduled_activations(now_unix());
                if last_collect.elapsed() >= config.update_interval {
                    last_collect = Instant::now();
                    let request = enforcer.collect_updates();
                    if !request.is_empty() {
                        if let Err(reason) =
                            push_event(&events, RuntimeEvent::UpdateRequest(request)).await
                        {
                            break reason;
                        }
                    }
                }
            }
        }
    };

    if let Err(reason) = push_event(&events, RuntimeEvent::Stopped(exit_reason)).await {
        debug!(
            ?exit_reason,
            suppressed = ?reason,
            "failed to deliver final stop event for enforcer runtime"
        );
    }
}

fn handle_command<C>(
    enforcer: &mut LocalEnforcer<C>,
    command: EnforcerCommand,
) -> Option<EnforcerStopReason>
where
    C: FlowClient + Send + 'static,
{
    match command {
        EnforcerCommand::InitSession {
            sid,
            session_id,
            config,
            response,
            resp,
        } => {
            let result = enforcer.init_session_credit(&sid, &session_id, config, &response);
            let _ = resp.send(result);
        }
        EnforcerCommand::AggregateRecords(table) => enforcer.aggregate_records(&table),
        EnforcerCommand::CollectUpdates(resp) => {
            let _ = resp.send(enforcer.collect_updates());
        }
        EnforcerCommand::UpdateSessionCredit(response) => {
            enforcer.update_session_credit(&response);
        }
        EnforcerCommand::TerminateSubscriber { sid, resp } => {
            let _ = resp.send(enforcer.terminate_subscriber(&sid));
        }
        EnforcerCommand::CompleteTermination { sid, session_id } => {
            enforcer.complete_termination(&sid, &session_id);
        }
        EnforcerCommand::ChargingReauth { request, resp } => {
            let _ = resp.send(enforcer.init_charging_reauth(&request));
        }
        EnforcerCommand::ChargingBucket {
            sid,
            charging_key,
            bucket,
            resp,
        } => {
            let _ = resp.send(enforcer.get_charging_credit(&sid, charging_key, bucket));
        }
        EnforcerCommand::MonitorBucket {
            sid,
            monitoring_key,
            bucket,
            resp,
        } => {
            let _ = resp.send(enforcer.get_monitor_credit(&sid, &monitoring_key, bucket));
        }
        EnforcerCommand::Shutdown => return Some(EnforcerStopReason::Shutdown),
    }
    None
}

async fn push_event(
    events: &Sender<RuntimeEvent>,
    event: RuntimeEvent,
) -> Result<(), EnforcerStopReason> {
    match events.try_send(event) {
        Ok(_) => Ok(()),
        Err(TrySendError::Full(event)) => {
            warn!("runtime event channel full; applying backpressure");
            events
                .send(event)
                .await
                .map_err(|_| EnforcerStopReason::EventChannelClosed)
        }
        Err(TrySendError::Closed(_)) => Err(EnforcerStopReason::EventChannelClosed),
    }
}
