//! Load-time errors for `.omgb` images.
//!
//! Every corruption class has its own variant so the embedder can tell
//! a truncated download from a miscompiled jump table. `ImageError` is
//! fatal: it is never surfaced to OMG code.

use thiserror::Error;

/// Errors produced while decoding and verifying a program image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The first four bytes are not the `OMGB` magic.
    #[error("bad magic (expected \"OMGB\")")]
    BadMagic,

    /// The header version does not match this runtime.
    #[error("unsupported image version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },

    /// The image ends in the middle of a field or operand.
    #[error("truncated image: {context} at byte {offset}")]
    Truncated { offset: usize, context: &'static str },

    /// Unknown constant-pool tag.
    #[error("invalid constant tag {tag:#04x} at byte {offset}")]
    BadConstTag { offset: usize, tag: u8 },

    /// A string constant is not valid UTF-8.
    #[error("invalid UTF-8 in string constant at byte {offset}")]
    InvalidUtf8 { offset: usize },

    /// Unknown opcode byte in the code stream.
    #[error("invalid opcode {opcode:#04x} at code offset {offset}")]
    InvalidOpcode { offset: u32, opcode: u8 },

    /// Constant-pool index out of range.
    #[error("constant index {index} out of range at code offset {offset}")]
    BadConstIndex { offset: u32, index: u16 },

    /// A name operand references a constant that is not a string.
    #[error("constant {index} is not a string at code offset {offset}")]
    ExpectedStrConst { offset: u32, index: u16 },

    /// `RAISE` with an unassigned kind byte.
    #[error("invalid raise kind {kind} at code offset {offset}")]
    BadRaiseKind { offset: u32, kind: u8 },

    /// `CALL`/`TCALL` target index beyond the function table.
    #[error("function index {index} out of range at code offset {offset}")]
    BadFuncIndex { offset: u32, index: u16 },

    /// A jump target does not land on an instruction start.
    #[error("jump target {target} does not address an instruction (code offset {offset})")]
    BadJumpTarget { offset: u32, target: u32 },

    /// A function's entry offset does not land on an instruction start.
    #[error("function '{name}' entry offset {target} does not address an instruction")]
    BadFuncEntry { name: String, target: u32 },

    /// The image entry offset does not land on an instruction start.
    #[error("entry offset {target} does not address an instruction")]
    BadEntryOffset { target: u32 },

    /// A function declares more parameters than locals.
    #[error("function '{name}' declares {param_count} parameters but only {local_count} locals")]
    ParamCountExceedsLocals {
        name: String,
        param_count: usize,
        local_count: usize,
    },

    /// Bytes remain after the entry offset field.
    #[error("{count} trailing bytes after image end")]
    TrailingBytes { count: usize },
}
