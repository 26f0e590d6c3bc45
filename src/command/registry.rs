//! The command registry: id to executable unit.
//!
//! Registration does not require cluster membership and is valid in every
//! service state. Unknown ids fail at execution time with a per-member
//! unknown-command outcome, never at registration time.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use super::RemoteCommand;

/// Concurrent map of registered commands.
///
/// Mutated by application threads at registration time and read by the
/// transport's inbound tasks for every remote execution.
#[derive(Default)]
pub struct CommandRegistry {
    commands: DashMap<String, Arc<dyn RemoteCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry {
            commands: DashMap::new(),
        }
    }

    /// Register a command under its id, replacing any previous binding.
    ///
    /// Last write wins: a second registration under an id silently
    /// replaces the first, with a warning so the collision is visible in
    /// the logs. Returns the registered command.
    pub fn register(&self, command: Arc<dyn RemoteCommand>) -> Arc<dyn RemoteCommand> {
        let id = command.id().to_string();
        if let Some(previous) = self.commands.insert(id.clone(), Arc::clone(&command)) {
            if !Arc::ptr_eq(&previous, &command) {
                warn!(command_id = %id, "a command was already registered with this id, replacing it");
            }
        }
        command
    }

    /// Remove a command, but only when the exact registered instance is
    /// supplied; a lookalike with the same id leaves the binding intact.
    pub fn unregister(&self, command: &Arc<dyn RemoteCommand>) {
        let id = command.id();
        let removed = self
            .commands
            .remove_if(id, |_, registered| Arc::ptr_eq(registered, command));
        if removed.is_none() {
            warn!(
                command_id = %id,
                "cannot unregister an unknown command, either the id or the instance is unknown"
            );
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RemoteCommand>> {
        self.commands.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.commands.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("len", &self.commands.len())
            .finish()
    }
}
