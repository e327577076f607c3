//! Runtime errors for the OMG VM.
//!
//! Each variant corresponds to one [`ErrorKind`] of the raise taxonomy,
//! carrying a human-readable message. `Invariant` is the one fatal
//! variant: it represents a corrupt machine state (stack underflow,
//! broken frame accounting) and aborts execution instead of unwinding
//! to a handler.

use omg_common::ErrorKind;
use thiserror::Error;

/// Errors that occur during program execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// User-raised error (`panic`, one-argument `raise`, `RAISE 0`).
    #[error("RuntimeError: {0}")]
    Raised(String),

    /// Syntax error surfaced dynamically by compiling code.
    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// Operation applied to an inappropriate type, or arity mismatch.
    #[error("TypeError: {0}")]
    Type(String),

    /// Undefined identifier reference.
    #[error("UndefinedIdentError: {0}")]
    UndefinedIdent(String),

    /// Bad range or invalid argument.
    #[error("ValueError: {0}")]
    Value(String),

    /// Module import (or backing file read) failure.
    #[error("ModuleImportError: {0}")]
    ModuleImport(String),

    /// An `ASSERT` instruction saw a falsy value.
    #[error("AssertionError: {0}")]
    Assertion(String),

    /// List/Str index out of bounds, invalid slice range.
    #[error("IndexError: {0}")]
    Index(String),

    /// Dictionary key not found.
    #[error("KeyError: {0}")]
    Key(String),

    /// Division or modulo by zero.
    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(String),

    /// Internal VM invariant violation. Fatal: skips unwinding.
    #[error("VmInvariant: {0}")]
    Invariant(String),
}

impl RuntimeError {
    /// Build the error matching a raise kind.
    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Generic => RuntimeError::Raised(message),
            ErrorKind::Syntax => RuntimeError::Syntax(message),
            ErrorKind::Type => RuntimeError::Type(message),
            ErrorKind::UndefinedIdent => RuntimeError::UndefinedIdent(message),
            ErrorKind::Value => RuntimeError::Value(message),
            ErrorKind::ModuleImport => RuntimeError::ModuleImport(message),
            ErrorKind::Assertion => RuntimeError::Assertion(message),
            ErrorKind::Index => RuntimeError::Index(message),
            ErrorKind::Key => RuntimeError::Key(message),
            ErrorKind::ZeroDivision => RuntimeError::ZeroDivision(message),
            ErrorKind::VmInvariant => RuntimeError::Invariant(message),
        }
    }

    /// The kind delivered to handlers in the error value's `kind` field.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Raised(_) => ErrorKind::Generic,
            RuntimeError::Syntax(_) => ErrorKind::Syntax,
            RuntimeError::Type(_) => ErrorKind::Type,
            RuntimeError::UndefinedIdent(_) => ErrorKind::UndefinedIdent,
            RuntimeError::Value(_) => ErrorKind::Value,
            RuntimeError::ModuleImport(_) => ErrorKind::ModuleImport,
            RuntimeError::Assertion(_) => ErrorKind::Assertion,
            RuntimeError::Index(_) => ErrorKind::Index,
            RuntimeError::Key(_) => ErrorKind::Key,
            RuntimeError::ZeroDivision(_) => ErrorKind::ZeroDivision,
            RuntimeError::Invariant(_) => ErrorKind::VmInvariant,
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            RuntimeError::Raised(m)
            | RuntimeError::Syntax(m)
            | RuntimeError::Type(m)
            | RuntimeError::UndefinedIdent(m)
            | RuntimeError::Value(m)
            | RuntimeError::ModuleImport(m)
            | RuntimeError::Assertion(m)
            | RuntimeError::Index(m)
            | RuntimeError::Key(m)
            | RuntimeError::ZeroDivision(m)
            | RuntimeError::Invariant(m) => m,
        }
    }

    /// Fatal errors abort the VM without consulting the block stack.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omg_common::ALL_ERROR_KINDS;

    #[test]
    fn kind_roundtrip() {
        for kind in ALL_ERROR_KINDS {
            let err = RuntimeError::from_kind(kind, "m".to_string());
            assert_eq!(err.kind(), kind);
            assert_eq!(err.message(), "m");
        }
    }

    #[test]
    fn display_includes_kind_prefix() {
        assert_eq!(
            RuntimeError::Type("bad operand".to_string()).to_string(),
            "TypeError: bad operand"
        );
        assert_eq!(
            RuntimeError::ZeroDivision("integer division or modulo by zero".to_string())
                .to_string(),
            "ZeroDivisionError: integer division or modulo by zero"
        );
    }

    #[test]
    fn only_invariant_is_fatal() {
        assert!(RuntimeError::Invariant("x".to_string()).is_fatal());
        assert!(!RuntimeError::Raised("x".to_string()).is_fatal());
        assert!(!RuntimeError::Key("x".to_string()).is_fatal());
    }
}
