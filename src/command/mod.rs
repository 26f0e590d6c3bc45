//! Commands and the registry that executes them.
//!
//! A [`RemoteCommand`] is the unit of work the cluster executes: a named,
//! immutable handler taking a variable-length argument array and returning
//! a single value or an error. Commands are registered on each node before
//! the service starts; execution requests carry only the command id and
//! the serialized arguments.
//!
//! Two ways to build a command:
//!
//! - implement [`RemoteCommand`] directly, or wrap a closure with
//!   [`FnCommand`];
//! - use [`CallCommand`](adapter::CallCommand) with a
//!   [`CallSpec`](adapter::CallSpec) when the handler models a fixed
//!   method signature, optionally variadic, and the argument marshaling
//!   should be fixed at registration time.

pub mod adapter;
pub mod registry;

pub use adapter::{CallCommand, CallSpec};
pub use registry::CommandRegistry;

use serde_json::Value;

use crate::error::CommandError;

/// A named executable unit, registered once and executed many times.
///
/// Handlers run concurrently: with each other, with local calls and with
/// inbound remote calls, so implementations must be `Send + Sync` and must
/// not assume exclusive access to shared state.
pub trait RemoteCommand: Send + Sync {
    /// The unique identifier this command is registered and dispatched by.
    fn id(&self) -> &str;

    /// Execute the command with the supplied arguments.
    ///
    /// A returned error is captured as a per-member execution failure on
    /// the node it occurred on; a panic is captured as a fatal failure.
    fn execute(&self, args: &[Value]) -> Result<Value, CommandError>;
}

/// A [`RemoteCommand`] wrapping a plain closure.
pub struct FnCommand {
    id: String,
    handler: Box<dyn Fn(&[Value]) -> Result<Value, CommandError> + Send + Sync>,
}

impl FnCommand {
    pub fn new<F>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        FnCommand {
            id: id.into(),
            handler: Box::new(handler),
        }
    }
}

impl RemoteCommand for FnCommand {
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(&self, args: &[Value]) -> Result<Value, CommandError> {
        (self.handler)(args)
    }
}

impl std::fmt::Debug for FnCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCommand").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fn_command_executes_closure() {
        let cmd = FnCommand::new("sum", |args| {
            let total: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
            Ok(json!(total))
        });
        assert_eq!(cmd.id(), "sum");
        assert_eq!(cmd.execute(&[json!(1), json!(2), json!(3)]).unwrap(), json!(6));
    }

    #[test]
    fn test_fn_command_propagates_errors() {
        let cmd = FnCommand::new("fail", |_args| Err(CommandError::new("nope")));
        let err = cmd.execute(&[]).unwrap_err();
        assert_eq!(err.message(), "nope");
    }
}
