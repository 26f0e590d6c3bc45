//! Single-call command adapters with fixed argument marshaling.
//!
//! A [`CallCommand`] models "call this one method with these arguments"
//! without any runtime reflection: the shape of the target call — how many
//! fixed parameters it takes and whether it is variadic — is captured in a
//! [`CallSpec`] when the command is built, and the marshaling logic derived
//! from it never changes afterwards.

use serde_json::Value;

use super::RemoteCommand;
use crate::error::{CommandError, RpcError};

/// The argument shape of the target call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSpec {
    fixed: usize,
    variadic: bool,
}

impl CallSpec {
    /// A call taking exactly `fixed` arguments.
    pub const fn exact(fixed: usize) -> Self {
        CallSpec {
            fixed,
            variadic: false,
        }
    }

    /// A call taking `fixed` arguments followed by a variadic tail.
    pub const fn variadic(fixed: usize) -> Self {
        CallSpec {
            fixed,
            variadic: true,
        }
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn fixed_params(&self) -> usize {
        self.fixed
    }

    /// Normalize raw call arguments to the shape the handler expects.
    ///
    /// For an exact spec the argument count must match. For a variadic
    /// spec the trailing arguments are packed into a single array argument
    /// at the variadic position, with two pass-through cases preserved
    /// from the call convention:
    ///
    /// - exactly one trailing `Null` stands for "no variadic array at
    ///   all" and is passed through unpacked;
    /// - exactly one trailing array is already packed and is passed
    ///   through as-is.
    ///
    /// Zero trailing arguments produce an empty array.
    pub fn marshal(&self, args: &[Value]) -> Result<Vec<Value>, CommandError> {
        if !self.variadic {
            if args.len() != self.fixed {
                return Err(CommandError::new(format!(
                    "expected {} arguments, got {}",
                    self.fixed,
                    args.len()
                )));
            }
            return Ok(args.to_vec());
        }

        if args.len() < self.fixed {
            return Err(CommandError::new(format!(
                "expected at least {} arguments, got {}",
                self.fixed,
                args.len()
            )));
        }

        if args.len() == self.fixed + 1 {
            match &args[self.fixed] {
                Value::Null | Value::Array(_) => return Ok(args.to_vec()),
                _ => {}
            }
        }

        let mut marshaled = args[..self.fixed].to_vec();
        marshaled.push(Value::Array(args[self.fixed..].to_vec()));
        Ok(marshaled)
    }
}

/// A [`RemoteCommand`] whose handler receives arguments already marshaled
/// according to its [`CallSpec`].
pub struct CallCommand {
    id: String,
    spec: CallSpec,
    handler: Box<dyn Fn(&[Value]) -> Result<Value, CommandError> + Send + Sync>,
}

impl CallCommand {
    /// Build the adapter.
    ///
    /// Fails with [`RpcError::InvalidAdapter`] when the id is blank; the
    /// argument shape itself is validated per call, at execution time.
    pub fn new<F>(id: impl Into<String>, spec: CallSpec, handler: F) -> Result<Self, RpcError>
    where
        F: Fn(&[Value]) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RpcError::InvalidAdapter(
                "the command id cannot be empty".to_string(),
            ));
        }
        Ok(CallCommand {
            id,
            spec,
            handler: Box::new(handler),
        })
    }

    pub fn spec(&self) -> CallSpec {
        self.spec
    }
}

impl RemoteCommand for CallCommand {
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(&self, args: &[Value]) -> Result<Value, CommandError> {
        let marshaled = self.spec.marshal(args)?;
        (self.handler)(&marshaled)
    }
}

impl std::fmt::Debug for CallCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCommand")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exact_spec_rejects_wrong_arity() {
        let spec = CallSpec::exact(2);
        assert!(spec.marshal(&[json!(1)]).is_err());
        assert!(spec.marshal(&[json!(1), json!(2), json!(3)]).is_err());
        assert_eq!(
            spec.marshal(&[json!(1), json!(2)]).unwrap(),
            vec![json!(1), json!(2)]
        );
    }

    #[test]
    fn test_variadic_packs_trailing_arguments() {
        let spec = CallSpec::variadic(1);
        let marshaled = spec.marshal(&[json!("a"), json!(1), json!(2)]).unwrap();
        assert_eq!(marshaled, vec![json!("a"), json!([1, 2])]);
    }

    #[test]
    fn test_variadic_zero_trailing_packs_empty_array() {
        let spec = CallSpec::variadic(1);
        let marshaled = spec.marshal(&[json!("a")]).unwrap();
        assert_eq!(marshaled, vec![json!("a"), json!([])]);
    }

    #[test]
    fn test_variadic_single_null_passes_through_unpacked() {
        let spec = CallSpec::variadic(1);
        let marshaled = spec.marshal(&[json!("a"), Value::Null]).unwrap();
        assert_eq!(marshaled, vec![json!("a"), Value::Null]);
    }

    #[test]
    fn test_variadic_single_array_passes_through() {
        let spec = CallSpec::variadic(1);
        let marshaled = spec.marshal(&[json!("a"), json!([1, 2])]).unwrap();
        assert_eq!(marshaled, vec![json!("a"), json!([1, 2])]);
    }

    #[test]
    fn test_variadic_single_scalar_is_packed() {
        let spec = CallSpec::variadic(1);
        let marshaled = spec.marshal(&[json!("a"), json!(7)]).unwrap();
        assert_eq!(marshaled, vec![json!("a"), json!([7])]);
    }

    #[test]
    fn test_variadic_rejects_too_few_fixed() {
        let spec = CallSpec::variadic(2);
        assert!(spec.marshal(&[json!(1)]).is_err());
    }

    #[test]
    fn test_zero_fixed_variadic() {
        let spec = CallSpec::variadic(0);
        assert_eq!(spec.marshal(&[]).unwrap(), vec![json!([])]);
        assert_eq!(
            spec.marshal(&[json!(1), json!(2)]).unwrap(),
            vec![json!([1, 2])]
        );
    }

    #[test]
    fn test_call_command_rejects_blank_id() {
        let result = CallCommand::new("  ", CallSpec::exact(0), |_| Ok(Value::Null));
        assert!(matches!(result, Err(RpcError::InvalidAdapter(_))));
    }

    #[test]
    fn test_call_command_marshals_before_handler() {
        let cmd = CallCommand::new("join", CallSpec::variadic(1), |args| {
            let sep = args[0].as_str().unwrap_or(",").to_string();
            let parts: Vec<String> = args[1]
                .as_array()
                .map(|a| {
                    a.iter()
                        .map(|v| v.as_str().unwrap_or_default().to_string())
                        .collect()
                })
                .unwrap_or_default();
            Ok(json!(parts.join(&sep)))
        })
        .unwrap();

        let out = cmd
            .execute(&[json!("-"), json!("x"), json!("y"), json!("z")])
            .unwrap();
        assert_eq!(out, json!("x-y-z"));
    }
}
