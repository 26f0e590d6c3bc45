//! The live cluster node: shared state and background loops.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::failure::FailureDetector;
use super::handler::ClusterHandler;
use crate::command::CommandRegistry;
use crate::config::RpcConfig;
use crate::constants::{CONNECT_TIMEOUT, MAX_JOIN_REDIRECTS};
use crate::error::Result;
use crate::topology::{ListenerSet, TopologyChangeEvent};
use crate::transport::{client, Envelope, Reply, TransportServer};
use crate::types::{Member, MembershipView, NodeId};

/// State shared between the service facade, the inbound handler and the
/// background loops.
pub(crate) struct ClusterState {
    pub config: RpcConfig,
    pub local: Member,
    pub registry: Arc<CommandRegistry>,
    pub listeners: Arc<ListenerSet>,
    /// Signal that `start()` has completed and registered commands are
    /// visible; inbound executions wait on it.
    pub started_rx: watch::Receiver<bool>,
    pub detector: FailureDetector,
    view: ArcSwap<MembershipView>,
    /// Serializes coordinator-side read-modify-write cycles (join, leave,
    /// failure removal) so concurrent admissions cannot compute next
    /// views from the same snapshot and lose one of them.
    pub mutation_lock: Mutex<()>,
    /// Serializes view installs so event delivery is strictly ordered.
    install_lock: Mutex<()>,
    /// Bumped once per successful install; calls parked on a topology
    /// change watch this, not the view id, so forced installs with older
    /// generations still wake them.
    epoch_tx: watch::Sender<u64>,
}

impl ClusterState {
    /// The current view snapshot.
    pub fn view(&self) -> Arc<MembershipView> {
        self.view.load_full()
    }

    pub fn is_coordinator(&self) -> bool {
        self.view
            .load()
            .coordinator()
            .map(|c| c.id == self.local.id)
            .unwrap_or(false)
    }

    /// Subscribe to view installs (for parked failover retries).
    pub fn subscribe_installs(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }

    /// Install a view and fire the topology change event.
    ///
    /// Stale installs (generation not newer than the current one) are
    /// ignored unless `force` is set, which a node uses for views it
    /// obtained by (re)joining a cluster whose generation sequence it
    /// does not share.
    pub async fn install_view(&self, next: MembershipView, force: bool) -> bool {
        let _guard = self.install_lock.lock().await;
        let current = self.view.load_full();
        if !force && next.id() <= current.id() {
            debug!(current = %current.id(), offered = %next.id(), "ignoring stale view install");
            return false;
        }

        let previous_coordinator = current.coordinator().map(|c| c.id);
        let coordinator = next.coordinator().map(|c| c.id);
        let coordinator_has_changed =
            previous_coordinator.is_some() && previous_coordinator != coordinator;
        let is_coordinator = coordinator == Some(self.local.id);

        info!(view = %next, "installing membership view");
        self.view.store(Arc::new(next));
        self.epoch_tx.send_modify(|epoch| *epoch += 1);

        let event = TopologyChangeEvent::new(coordinator_has_changed, is_coordinator);
        self.listeners.notify(&event);
        true
    }

    /// Push a view to every member except the local node and `exclude`.
    pub fn broadcast_view(&self, view: &MembershipView, exclude: &[NodeId]) {
        for member in view.members() {
            if member.id == self.local.id || exclude.contains(&member.id) {
                continue;
            }
            let envelope = Envelope::InstallView {
                cluster: self.config.cluster_name.clone(),
                view: view.clone(),
            };
            let addr = member.addr;
            tokio::spawn(async move {
                if let Err(e) = client::call(addr, &envelope, CONNECT_TIMEOUT).await {
                    debug!(%addr, error = %e, "view push failed");
                }
            });
        }
    }

    fn envelope_heartbeat(&self) -> Envelope {
        Envelope::Heartbeat {
            cluster: self.config.cluster_name.clone(),
            member: self.local,
            view_id: self.view.load().id(),
        }
    }
}

/// A started node: transport listener plus membership loops.
pub(crate) struct ClusterNode {
    pub state: Arc<ClusterState>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ClusterNode {
    /// Bind the transport, join (or form) the cluster and spawn the
    /// membership loops.
    pub async fn start(
        config: RpcConfig,
        registry: Arc<CommandRegistry>,
        listeners: Arc<ListenerSet>,
        started_rx: watch::Receiver<bool>,
    ) -> Result<Arc<Self>> {
        let server = TransportServer::bind(config.bind_addr).await?;
        let advertised = config.advertise_addr.unwrap_or_else(|| server.local_addr());
        let local = Member::new(NodeId::random(), advertised);
        info!(member = %local, cluster = %config.cluster_name, "starting cluster node");

        let (epoch_tx, _epoch_rx) = watch::channel(0u64);
        let state = Arc::new(ClusterState {
            detector: FailureDetector::new(config.failure_window(), config.startup_grace_period),
            config,
            local,
            registry,
            listeners,
            started_rx,
            view: ArcSwap::from_pointee(MembershipView::empty()),
            mutation_lock: Mutex::new(()),
            install_lock: Mutex::new(()),
            epoch_tx,
        });

        let shutdown_tx = server.shutdown_handle();
        let handler = Arc::new(ClusterHandler::new(Arc::clone(&state)));
        let server_task = tokio::spawn(server.run(handler));

        let initial = join_cluster(&state).await;
        state.install_view(initial, true).await;

        let node = Arc::new(ClusterNode {
            state,
            shutdown_tx,
            tasks: StdMutex::new(vec![server_task]),
        });
        node.spawn_heartbeat_loop();
        node.spawn_failure_check_loop();
        Ok(node)
    }

    /// Leave the cluster and stop all background work.
    pub async fn stop(&self) {
        let state = &self.state;
        let view = state.view();
        let cluster = state.config.cluster_name.clone();

        if state.is_coordinator() {
            // Hand the cluster over: push the view without us so the next
            // member in line takes over immediately instead of after a
            // failure detection cycle.
            let survivors = view.without_member(state.local.id);
            if !survivors.is_empty() {
                info!(view = %survivors, "handing the cluster over before stopping");
                for member in survivors.members() {
                    let envelope = Envelope::InstallView {
                        cluster: cluster.clone(),
                        view: survivors.clone(),
                    };
                    if let Err(e) = client::call(member.addr, &envelope, CONNECT_TIMEOUT).await {
                        debug!(member = %member, error = %e, "handover push failed");
                    }
                }
            }
        } else if let Some(coordinator) = view.coordinator() {
            let envelope = Envelope::Leave {
                cluster,
                member: state.local,
            };
            if let Err(e) = client::call(coordinator.addr, &envelope, CONNECT_TIMEOUT).await {
                debug!(error = %e, "leave notification failed");
            }
        }

        let _ = self.shutdown_tx.send(());
        for task in self.tasks.lock().expect("task lock poisoned").drain(..) {
            task.abort();
        }
    }

    /// Members heartbeat the coordinator; persistent silence triggers the
    /// coordinator-failure path.
    fn spawn_heartbeat_loop(&self) {
        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = interval(state.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut misses: u32 = 0;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = ticker.tick() => {}
                }
                if state.is_coordinator() {
                    misses = 0;
                    continue;
                }
                let view = state.view();
                let Some(coordinator) = view.coordinator().copied() else {
                    continue;
                };

                let deadline = state.config.heartbeat_interval * 2;
                match client::call(coordinator.addr, &state.envelope_heartbeat(), deadline).await {
                    Ok(Reply::HeartbeatOk { view: Some(newer) }) => {
                        misses = 0;
                        state.install_view(newer, false).await;
                    }
                    Ok(Reply::HeartbeatOk { view: None }) => {
                        misses = 0;
                    }
                    Ok(Reply::UnknownMember) => {
                        warn!(coordinator = %coordinator, "removed from the view, rejoining");
                        misses = 0;
                        rejoin(&state).await;
                    }
                    Ok(other) => {
                        debug!(?other, "unexpected heartbeat reply");
                        misses += 1;
                    }
                    Err(e) => {
                        debug!(coordinator = %coordinator, error = %e, "heartbeat failed");
                        misses += 1;
                    }
                }

                if misses >= state.config.failure_threshold {
                    misses = 0;
                    on_coordinator_silent(&state, coordinator).await;
                }
            }
        });
        self.tasks.lock().expect("task lock poisoned").push(task);
    }

    /// The coordinator sweeps the heartbeat table and removes members
    /// whose silence exceeds the failure window.
    fn spawn_failure_check_loop(&self) {
        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = interval(state.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = ticker.tick() => {}
                }
                if !state.is_coordinator() {
                    continue;
                }
                let _admission = state.mutation_lock.lock().await;
                let view = state.view();
                state.detector.retain(&view);
                for member in view.members() {
                    if member.id != state.local.id {
                        state.detector.track(member.id);
                    }
                }

                let failed = state.detector.overdue();
                if failed.is_empty() {
                    continue;
                }
                let mut next = (*view).clone();
                for id in failed {
                    if id == state.local.id || !next.contains(id) {
                        continue;
                    }
                    warn!(member = %id, "member failed, removing from the view");
                    state.detector.forget(id);
                    next = next.without_member(id);
                }
                if next.id() != view.id() {
                    state.install_view(next.clone(), false).await;
                    state.broadcast_view(&next, &[]);
                }
            }
        });
        self.tasks.lock().expect("task lock poisoned").push(task);
    }
}

/// React to a coordinator that stopped answering heartbeats.
///
/// The first survivor in view order promotes itself and pushes the new
/// view; everyone else waits for that push and falls back to rejoining
/// through the seeds if the silence persists.
async fn on_coordinator_silent(state: &Arc<ClusterState>, dead: Member) {
    let view = state.view();
    if view.coordinator().map(|c| c.id) != Some(dead.id) {
        // A new view already arrived while we were counting misses.
        return;
    }

    let survivors = view.without_member(dead.id);
    match survivors.coordinator().copied() {
        Some(next) if next.id == state.local.id => {
            info!(dead = %dead, "coordinator failed, promoting local node");
            for member in survivors.members() {
                if member.id != state.local.id {
                    state.detector.track(member.id);
                }
            }
            state.install_view(survivors.clone(), false).await;
            state.broadcast_view(&survivors, &[]);
        }
        Some(next) => {
            debug!(promoting = %next, "coordinator failed, waiting for the first survivor");
            let mut installs = state.subscribe_installs();
            let seen = *installs.borrow();
            let window = state.config.failure_window() * 2;
            let timed_out = timeout(window, installs.wait_for(|epoch| *epoch > seen))
                .await
                .is_err();
            if timed_out {
                warn!("no new view after coordinator failure, rejoining through seeds");
                rejoin(state).await;
            }
        }
        None => {}
    }
}

/// Join through the configured seeds, or form a new singleton cluster.
async fn join_cluster(state: &Arc<ClusterState>) -> MembershipView {
    if let Some(view) = try_join(state, &state.config.seeds).await {
        return view;
    }
    if !state.config.seeds.is_empty() {
        info!("no reachable seed, forming a new cluster");
    }
    MembershipView::bootstrap(state.local)
}

/// Re-enter the cluster after being cut off: try the seeds and the last
/// known members, then fall back to a fresh singleton view that keeps the
/// generation sequence moving.
async fn rejoin(state: &Arc<ClusterState>) {
    let view = state.view();
    let mut targets = state.config.seeds.clone();
    for member in view.members() {
        if member.id != state.local.id && !targets.contains(&member.addr) {
            targets.push(member.addr);
        }
    }

    if let Some(joined) = try_join(state, &targets).await {
        state.install_view(joined, true).await;
    } else {
        let fresh = MembershipView::from_parts(view.id().next(), vec![state.local]);
        state.install_view(fresh, true).await;
    }
}

/// Ask each target in turn to let us in, following coordinator redirects.
async fn try_join(state: &Arc<ClusterState>, targets: &[SocketAddr]) -> Option<MembershipView> {
    for &seed in targets {
        if seed == state.local.addr {
            continue;
        }
        let mut addr = seed;
        for _hop in 0..=MAX_JOIN_REDIRECTS {
            let envelope = Envelope::Join {
                cluster: state.config.cluster_name.clone(),
                member: state.local,
            };
            match client::call(addr, &envelope, CONNECT_TIMEOUT).await {
                Ok(Reply::JoinOk { view }) => {
                    info!(via = %addr, view = %view, "joined the cluster");
                    return Some(view);
                }
                Ok(Reply::JoinRedirect { coordinator }) => {
                    debug!(seed = %addr, %coordinator, "redirected to the coordinator");
                    addr = coordinator;
                }
                Ok(other) => {
                    debug!(seed = %addr, ?other, "join rejected");
                    break;
                }
                Err(e) => {
                    debug!(seed = %addr, error = %e, "seed unreachable");
                    break;
                }
            }
        }
    }
    None
}
