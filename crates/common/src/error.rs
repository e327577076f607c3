//! Error-kind taxonomy shared between the bytecode format and the VM.

/// Compact enum of error categories used by `RAISE` instructions and
/// serialized into `.omgb` images.
///
/// Kinds 0–9 are raiseable and catchable from OMG code. `VmInvariant`
/// (255) marks an internal fault: it can appear in bytecode, but raising
/// it aborts the VM without unwinding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic user-raised error (`panic`, one-argument `raise`).
    Generic = 0,
    /// Syntax error surfaced dynamically (e.g. by the self-hosted compiler).
    Syntax = 1,
    /// Wrong operand type, bad builtin arguments, arity mismatch.
    Type = 2,
    /// Undefined identifier reference.
    UndefinedIdent = 3,
    /// Bad range or invalid argument value.
    Value = 4,
    /// Module import failure (also file-read failures, which back imports).
    ModuleImport = 5,
    /// `ASSERT` on a falsy value.
    Assertion = 6,
    /// List/Str index out of bounds, invalid slice range.
    Index = 7,
    /// Missing dictionary key.
    Key = 8,
    /// Division or modulo by zero.
    ZeroDivision = 9,
    /// Internal VM invariant violation. Fatal, never caught.
    VmInvariant = 255,
}

/// All kinds, in discriminant order. Useful for exhaustive testing.
pub const ALL_ERROR_KINDS: [ErrorKind; 11] = [
    ErrorKind::Generic,
    ErrorKind::Syntax,
    ErrorKind::Type,
    ErrorKind::UndefinedIdent,
    ErrorKind::Value,
    ErrorKind::ModuleImport,
    ErrorKind::Assertion,
    ErrorKind::Index,
    ErrorKind::Key,
    ErrorKind::ZeroDivision,
    ErrorKind::VmInvariant,
];

impl ErrorKind {
    /// The kind's name, as stored in the `kind` field of a caught error
    /// value and accepted by the two-argument `raise` builtin.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Generic => "Generic",
            ErrorKind::Syntax => "Syntax",
            ErrorKind::Type => "Type",
            ErrorKind::UndefinedIdent => "UndefinedIdent",
            ErrorKind::Value => "Value",
            ErrorKind::ModuleImport => "ModuleImport",
            ErrorKind::Assertion => "Assertion",
            ErrorKind::Index => "Index",
            ErrorKind::Key => "Key",
            ErrorKind::ZeroDivision => "ZeroDivision",
            ErrorKind::VmInvariant => "VmInvariant",
        }
    }

    /// Inverse of [`ErrorKind::name`], restricted to raiseable kinds.
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_ERROR_KINDS
            .into_iter()
            .find(|k| *k != ErrorKind::VmInvariant && k.name() == name)
    }

    /// Fatal kinds abort the VM instead of unwinding to a handler.
    pub fn is_fatal(self) -> bool {
        self == ErrorKind::VmInvariant
    }
}

impl TryFrom<u8> for ErrorKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => ErrorKind::Generic,
            1 => ErrorKind::Syntax,
            2 => ErrorKind::Type,
            3 => ErrorKind::UndefinedIdent,
            4 => ErrorKind::Value,
            5 => ErrorKind::ModuleImport,
            6 => ErrorKind::Assertion,
            7 => ErrorKind::Index,
            8 => ErrorKind::Key,
            9 => ErrorKind::ZeroDivision,
            255 => ErrorKind::VmInvariant,
            other => return Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_kinds() {
        for kind in ALL_ERROR_KINDS {
            assert_eq!(ErrorKind::try_from(kind as u8), Ok(kind));
        }
    }

    #[test]
    fn rejects_unassigned_discriminants() {
        for byte in 10..255u8 {
            assert_eq!(ErrorKind::try_from(byte), Err(byte));
        }
    }

    #[test]
    fn name_roundtrip_for_raiseable_kinds() {
        for kind in ALL_ERROR_KINDS {
            if kind == ErrorKind::VmInvariant {
                continue;
            }
            assert_eq!(ErrorKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn vm_invariant_is_not_raiseable_by_name() {
        assert_eq!(ErrorKind::from_name("VmInvariant"), None);
        assert_eq!(ErrorKind::from_name("Bogus"), None);
    }

    #[test]
    fn only_vm_invariant_is_fatal() {
        for kind in ALL_ERROR_KINDS {
            assert_eq!(kind.is_fatal(), kind == ErrorKind::VmInvariant);
        }
    }
}
