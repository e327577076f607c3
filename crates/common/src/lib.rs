//! OMG common types: the value model, the instruction set, and the
//! error-kind taxonomy.
//!
//! This crate is shared by the image loader, the VM, and the CLI:
//!
//! - [`Value`] — tagged runtime values (ints, strings, lists, dicts,
//!   frozen dicts, function references, `none`)
//! - [`Instr`] — the decoded instruction set, with opcode byte values
//!   in [`instr::op`]
//! - [`ErrorKind`] — error categories raiseable from bytecode
//!
//! # Dependencies
//!
//! `indexmap` backs the Dict payload (insertion order is observable
//! program behaviour); there are no other runtime dependencies.

pub mod error;
pub mod instr;
pub mod value;

pub use error::{ErrorKind, ALL_ERROR_KINDS};
pub use instr::Instr;
pub use value::{FuncRef, Globals, Value};
