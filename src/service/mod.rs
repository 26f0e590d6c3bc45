//! The coordination service: lifecycle, registration and execution.
//!
//! [`RpcService`] is the facade application code talks to. It owns the
//! command registry, the topology listener list and, once started, the
//! live cluster node. The execution engine lives here too: snapshotting
//! the view, broadcasting the command, collecting per-member outcomes and
//! retrying coordinator calls across a failover.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conclave::prelude::*;
//!
//! # async fn run() -> conclave::error::Result<()> {
//! let service = RpcService::new(RpcConfig::default())?;
//! service.register_command(Arc::new(FnCommand::new("ping", |_args| {
//!     Ok(serde_json::json!("pong"))
//! })));
//! service.start().await?;
//!
//! let ping = service.registered("ping").expect("registered above");
//! let outcomes = service
//!     .execute_on_all(&*ping, TimeoutSpec::Sync, vec![])
//!     .await?;
//! for outcome in outcomes {
//!     println!("{outcome:?}");
//! }
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace};

use crate::cluster::ClusterNode;
use crate::command::{CallCommand, CallSpec, CommandRegistry, RemoteCommand};
use crate::config::RpcConfig;
use crate::error::{CommandError, MemberFailure, Result, RpcError};
use crate::topology::{ListenerSet, TopologyChangeListener};
use crate::transport::{client, wire, CallError, Envelope, Reply};
use crate::types::{Member, ServiceState, TimeoutSpec};

/// The per-member result of one command execution: a value (including
/// `Null`) or the captured failure of that member.
pub type Outcome = std::result::Result<Value, MemberFailure>;

/// A group-membership-aware RPC service.
///
/// Commands are registered in any state; execution requires `Started`.
/// Instances are single-use: once stopped, a service stays stopped and a
/// new instance must be constructed to rejoin the cluster.
pub struct RpcService {
    config: RpcConfig,
    registry: Arc<CommandRegistry>,
    listeners: Arc<ListenerSet>,
    state_tx: watch::Sender<ServiceState>,
    state_rx: watch::Receiver<ServiceState>,
    started_tx: watch::Sender<bool>,
    started_rx: watch::Receiver<bool>,
    node: StdRwLock<Option<Arc<ClusterNode>>>,
    /// Serializes start/stop transitions.
    lifecycle: Mutex<()>,
}

impl RpcService {
    /// Build a service from a validated configuration.
    ///
    /// Invalid configuration is a hard failure here, before any socket is
    /// touched.
    pub fn new(config: RpcConfig) -> Result<Self> {
        config.validate()?;
        let (state_tx, state_rx) = watch::channel(ServiceState::Init);
        let (started_tx, started_rx) = watch::channel(false);
        Ok(RpcService {
            config,
            registry: Arc::new(CommandRegistry::new()),
            listeners: Arc::new(ListenerSet::new()),
            state_tx,
            state_rx,
            started_tx,
            started_rx,
            node: StdRwLock::new(None),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    // -------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------

    /// Register a command. Valid in every state; last write wins per id.
    pub fn register_command(&self, command: Arc<dyn RemoteCommand>) -> Arc<dyn RemoteCommand> {
        self.registry.register(command)
    }

    /// Build and register a single-call adapter with the given argument
    /// shape.
    pub fn register_call<F>(
        &self,
        id: impl Into<String>,
        spec: CallSpec,
        handler: F,
    ) -> Result<Arc<dyn RemoteCommand>>
    where
        F: Fn(&[Value]) -> std::result::Result<Value, CommandError> + Send + Sync + 'static,
    {
        let command = CallCommand::new(id, spec, handler)?;
        Ok(self.registry.register(Arc::new(command)))
    }

    /// Remove a command; only the exact registered instance unbinds.
    pub fn unregister_command(&self, command: &Arc<dyn RemoteCommand>) {
        self.registry.unregister(command)
    }

    /// Look up a registered command by id.
    pub fn registered(&self, id: &str) -> Option<Arc<dyn RemoteCommand>> {
        self.registry.get(id)
    }

    // -------------------------------------------------------------------
    // Topology listeners
    // -------------------------------------------------------------------

    /// Register a topology change listener. Valid in every state; events
    /// fired before registration are never replayed.
    pub fn add_topology_listener(&self, listener: Arc<dyn TopologyChangeListener>) {
        self.listeners.add(listener)
    }

    pub fn remove_topology_listener(&self, listener: &Arc<dyn TopologyChangeListener>) {
        self.listeners.remove(listener)
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Bind the transport, join (or form) the cluster and open the
    /// service for execution.
    ///
    /// Only valid from `Init`; commands registered before this call are
    /// guaranteed visible to remote executions afterwards.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let state = self.state();
        if state != ServiceState::Init {
            return Err(RpcError::InvalidState(state));
        }

        let node = ClusterNode::start(
            self.config.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.listeners),
            self.started_rx.clone(),
        )
        .await?;

        *self.node.write().expect("node lock poisoned") = Some(node);
        self.state_tx.send_replace(ServiceState::Started);
        self.started_tx.send_replace(true);
        info!(cluster = %self.config.cluster_name, "service started");
        Ok(())
    }

    /// Leave the cluster and stop.
    ///
    /// Idempotent once stopped; calling it on a never-started service is
    /// a state error. In-flight calls observe the transition and fail
    /// with [`RpcError::Interrupted`].
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        match self.state() {
            ServiceState::Init => Err(RpcError::InvalidState(ServiceState::Init)),
            ServiceState::Stopped => {
                debug!("service already stopped");
                Ok(())
            }
            ServiceState::Started => {
                info!(cluster = %self.config.cluster_name, "stopping the service");
                self.state_tx.send_replace(ServiceState::Stopped);
                self.started_tx.send_replace(false);
                let node = self.node.write().expect("node lock poisoned").take();
                if let Some(node) = node {
                    node.stop().await;
                }
                Ok(())
            }
        }
    }

    /// Whether the local node currently coordinates the cluster.
    pub fn is_coordinator(&self) -> Result<bool> {
        Ok(self.started_node()?.state.is_coordinator())
    }

    /// The local member identity, with the resolved transport address.
    pub fn local_member(&self) -> Result<Member> {
        Ok(self.started_node()?.state.local)
    }

    /// The current membership snapshot.
    pub fn view_members(&self) -> Result<Vec<Member>> {
        Ok(self.started_node()?.state.view().members().to_vec())
    }

    // -------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------

    /// Execute a command on every member of the dispatch-time view.
    ///
    /// Returns one outcome per member, in view order, regardless of reply
    /// arrival order. Per-member failures are captured in their slots and
    /// never abort the other members' collection. `FireAndForget`
    /// dispatches and returns an empty list.
    pub async fn execute_on_all(
        &self,
        command: &dyn RemoteCommand,
        timeout: TimeoutSpec,
        args: Vec<Value>,
    ) -> Result<Vec<Outcome>> {
        let node = self.started_node()?;
        let targets = node.state.view().members().to_vec();
        self.dispatch(&node, targets, command.id(), &args, timeout)
            .await
    }

    /// Execute a command on the coordinator only.
    ///
    /// The single outcome is unwrapped: the value (including `Null`) is
    /// returned, any failure is raised as this call's error. When
    /// failover is allowed and the coordinator left mid-call, the call
    /// parks until a topology change (bounded by the retry timeout) and
    /// retries against the new coordinator.
    pub async fn execute_on_coordinator(
        &self,
        command: &dyn RemoteCommand,
        timeout: TimeoutSpec,
        args: Vec<Value>,
    ) -> Result<Value> {
        loop {
            let node = self.started_node()?;
            let view = node.state.view();
            let coordinator = *view.coordinator().ok_or(RpcError::NoCoordinator)?;
            // Subscribe before dispatching so a view installed while the
            // call is in flight still wakes the retry below.
            let mut installs = node.state.subscribe_installs();
            let seen = *installs.borrow();

            let outcomes = self
                .dispatch(&node, vec![coordinator], command.id(), &args, timeout)
                .await?;
            let Some(outcome) = outcomes.into_iter().next() else {
                // Fire-and-forget has no outcome to unwrap.
                return Ok(Value::Null);
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(failure) if failure.is_member_left() && self.config.allow_failover => {
                    let current = node.state.view();
                    if current.coordinator().map(|c| c.id) == Some(coordinator.id) {
                        trace!(
                            coordinator = %coordinator,
                            "the coordinator did not change yet, waiting for a topology change"
                        );
                        let mut state_rx = self.state_rx.clone();
                        tokio::select! {
                            _ = tokio::time::timeout(
                                self.config.retry_timeout,
                                installs.wait_for(|epoch| *epoch > seen),
                            ) => {}
                            _ = state_rx.wait_for(|s| *s == ServiceState::Stopped) => {
                                return Err(RpcError::Interrupted);
                            }
                        }
                    }
                    trace!("retrying the command against the current coordinator");
                    continue;
                }
                Err(failure) => return Err(failure.into()),
            }
        }
    }

    fn started_node(&self) -> Result<Arc<ClusterNode>> {
        let state = self.state();
        if state != ServiceState::Started {
            return Err(RpcError::InvalidState(state));
        }
        self.node
            .read()
            .expect("node lock poisoned")
            .clone()
            .ok_or(RpcError::InvalidState(state))
    }

    /// Ship the command to every target and collect outcomes in target
    /// order.
    async fn dispatch(
        &self,
        node: &Arc<ClusterNode>,
        targets: Vec<Member>,
        command_id: &str,
        args: &[Value],
        timeout: TimeoutSpec,
    ) -> Result<Vec<Outcome>> {
        let payload = wire::encode_args(args)?;
        let cluster = self.config.cluster_name.clone();

        if matches!(timeout, TimeoutSpec::FireAndForget) {
            for member in targets {
                let envelope = Envelope::Execute {
                    cluster: cluster.clone(),
                    command_id: command_id.to_string(),
                    args: payload.clone(),
                };
                tokio::spawn(async move {
                    if let Err(e) = client::send_only(member.addr, &envelope).await {
                        debug!(member = %member, error = %e, "fire-and-forget dispatch failed");
                    }
                });
            }
            return Ok(Vec::new());
        }

        let bound = match timeout {
            TimeoutSpec::Sync => self.config.default_timeout,
            TimeoutSpec::Bounded(bound) => bound,
            TimeoutSpec::FireAndForget => unreachable!("handled above"),
        };

        trace!(command_id, targets = targets.len(), "dispatching command");
        let mut handles = Vec::with_capacity(targets.len());
        for member in &targets {
            let envelope = Envelope::Execute {
                cluster: cluster.clone(),
                command_id: command_id.to_string(),
                args: payload.clone(),
            };
            handles.push(tokio::spawn(call_member(*member, envelope, bound)));
        }

        let mut state_rx = self.state_rx.clone();
        let mut outcomes: Vec<Outcome> = Vec::with_capacity(handles.len());
        for (member, handle) in targets.iter().zip(handles) {
            tokio::select! {
                joined = handle => {
                    outcomes.push(joined.unwrap_or_else(|e| {
                        Err(MemberFailure::Fatal {
                            id: command_id.to_string(),
                            member: member.to_string(),
                            message: e.to_string(),
                        })
                    }));
                }
                _ = state_rx.wait_for(|s| *s == ServiceState::Stopped) => {
                    return Err(RpcError::Interrupted);
                }
            }
        }

        // A member that timed out and is gone from the current view has
        // verifiably left; report that instead of a plain timeout.
        let view = node.state.view();
        for (member, outcome) in targets.iter().zip(outcomes.iter_mut()) {
            if matches!(outcome, Err(MemberFailure::Timeout { .. })) && !view.contains(member.id) {
                *outcome = Err(MemberFailure::MemberLeft {
                    member: member.to_string(),
                });
            }
        }
        Ok(outcomes)
    }
}

impl std::fmt::Debug for RpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcService")
            .field("cluster", &self.config.cluster_name)
            .field("state", &self.state())
            .finish()
    }
}

/// One member's leg of a broadcast: ship, await, classify.
async fn call_member(member: Member, envelope: Envelope, bound: Duration) -> Outcome {
    let command_id = match &envelope {
        Envelope::Execute { command_id, .. } => command_id.clone(),
        _ => String::new(),
    };

    match client::call(member.addr, &envelope, bound).await {
        Ok(Reply::Outcome(Ok(bytes))) => match wire::decode_value(&bytes) {
            Ok(value) => Ok(value),
            Err(e) => Err(MemberFailure::Execution {
                id: command_id,
                member: member.to_string(),
                message: format!("cannot decode the result: {e}"),
            }),
        },
        Ok(Reply::Outcome(Err(failure))) => Err(failure),
        Ok(Reply::Error(message)) => Err(MemberFailure::Execution {
            id: command_id,
            member: member.to_string(),
            message,
        }),
        Ok(other) => Err(MemberFailure::Execution {
            id: command_id,
            member: member.to_string(),
            message: format!("unexpected reply: {other:?}"),
        }),
        Err(CallError::Elapsed) => Err(MemberFailure::Timeout {
            member: member.to_string(),
        }),
        Err(CallError::Unreachable(_)) => Err(MemberFailure::MemberLeft {
            member: member.to_string(),
        }),
        Err(CallError::Protocol(message)) => Err(MemberFailure::Execution {
            id: command_id,
            member: member.to_string(),
            message,
        }),
    }
}
