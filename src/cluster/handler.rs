//! Inbound message handling: what each envelope means to this node.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::node::ClusterState;
use crate::error::MemberFailure;
use crate::transport::wire::{decode_args, encode_value};
use crate::transport::{Envelope, InboundHandler, Reply};
use crate::types::{Member, ViewId};

pub(crate) struct ClusterHandler {
    state: Arc<ClusterState>,
}

impl ClusterHandler {
    pub fn new(state: Arc<ClusterState>) -> Self {
        ClusterHandler { state }
    }

    /// A join lands on the coordinator, which appends the member and
    /// pushes the new view everywhere; any other node redirects.
    async fn on_join(&self, member: Member) -> Reply {
        let state = &self.state;
        if !state.is_coordinator() {
            return match state.view().coordinator() {
                Some(coordinator) if coordinator.id != state.local.id => Reply::JoinRedirect {
                    coordinator: coordinator.addr,
                },
                _ => Reply::Error("no coordinator available".to_string()),
            };
        }

        let _admission = state.mutation_lock.lock().await;
        let view = state.view();
        if view.contains(member.id) {
            return Reply::JoinOk {
                view: (*view).clone(),
            };
        }

        let next = view.with_member(member);
        state.detector.track(member.id);
        state.install_view(next.clone(), false).await;
        // The joiner gets the view in the ack; everyone else gets a push.
        state.broadcast_view(&next, &[member.id]);
        Reply::JoinOk { view: next }
    }

    async fn on_leave(&self, member: Member) -> Reply {
        let state = &self.state;
        if !state.is_coordinator() {
            return Reply::Error("not the coordinator".to_string());
        }
        let _admission = state.mutation_lock.lock().await;
        let view = state.view();
        if !view.contains(member.id) {
            return Reply::LeaveOk;
        }
        let next = view.without_member(member.id);
        state.detector.forget(member.id);
        state.install_view(next.clone(), false).await;
        state.broadcast_view(&next, &[member.id]);
        Reply::LeaveOk
    }

    async fn on_heartbeat(&self, member: Member, view_id: ViewId) -> Reply {
        let state = &self.state;
        if !state.is_coordinator() {
            return Reply::Error("not the coordinator".to_string());
        }
        let view = state.view();
        if !view.contains(member.id) {
            return Reply::UnknownMember;
        }
        state.detector.record(member.id);
        if view_id < view.id() {
            // The sender lags behind; catch it up in the ack.
            Reply::HeartbeatOk {
                view: Some((*view).clone()),
            }
        } else {
            Reply::HeartbeatOk { view: None }
        }
    }

    /// Execute a command locally and marshal its outcome back.
    ///
    /// Blocks until the service is fully started so that every command
    /// registered before `start()` is visible to remote callers, then
    /// runs the handler on the blocking pool with panic isolation.
    async fn on_execute(&self, command_id: String, args: bytes::Bytes) -> Reply {
        let mut started = self.state.started_rx.clone();
        if started.wait_for(|up| *up).await.is_err() {
            return Reply::Error("service is shutting down".to_string());
        }

        let member = self.state.local.to_string();
        let Some(command) = self.state.registry.get(&command_id) else {
            debug!(%command_id, "unknown command requested");
            return Reply::Outcome(Err(MemberFailure::UnknownCommand { id: command_id }));
        };

        let args = match decode_args(&args) {
            Ok(args) => args,
            Err(e) => return Reply::Error(format!("cannot decode arguments: {e}")),
        };

        let executed = tokio::task::spawn_blocking(move || {
            catch_unwind(AssertUnwindSafe(|| command.execute(&args)))
        })
        .await;

        match executed {
            Ok(Ok(Ok(value))) => {
                trace!(%command_id, "command executed");
                match encode_value(&value) {
                    Ok(bytes) => Reply::Outcome(Ok(bytes)),
                    Err(e) => Reply::Outcome(Err(MemberFailure::Execution {
                        id: command_id,
                        member,
                        message: format!("cannot encode the result: {e}"),
                    })),
                }
            }
            Ok(Ok(Err(error))) => Reply::Outcome(Err(MemberFailure::Execution {
                id: command_id,
                member,
                message: error.message().to_string(),
            })),
            Ok(Err(panic)) => Reply::Outcome(Err(MemberFailure::Fatal {
                id: command_id,
                member,
                message: panic_message(panic),
            })),
            Err(join_error) => Reply::Outcome(Err(MemberFailure::Fatal {
                id: command_id,
                member,
                message: join_error.to_string(),
            })),
        }
    }
}

#[async_trait]
impl InboundHandler for ClusterHandler {
    async fn handle(&self, envelope: Envelope, remote: SocketAddr) -> Reply {
        if envelope.cluster() != self.state.config.cluster_name {
            debug!(%remote, cluster = %envelope.cluster(), "dropping traffic for a foreign cluster");
            return Reply::Error(format!("foreign cluster '{}'", envelope.cluster()));
        }
        match envelope {
            Envelope::Join { member, .. } => self.on_join(member).await,
            Envelope::Leave { member, .. } => self.on_leave(member).await,
            Envelope::Heartbeat {
                member, view_id, ..
            } => self.on_heartbeat(member, view_id).await,
            Envelope::InstallView { view, .. } => {
                self.state.install_view(view, false).await;
                Reply::ViewOk
            }
            Envelope::Execute {
                command_id, args, ..
            } => self.on_execute(command_id, args).await,
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "command panicked".to_string()
    }
}
