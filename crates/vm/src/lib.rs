//! OMG virtual machine — executes verified program images.
//!
//! The VM is a stack-based machine with:
//! - An operand stack for intermediate values
//! - A call-frame stack carrying locals and return coordinates
//! - A block stack for structured exception handling
//! - A globals map seeded from the embedder's argument vector
//!
//! # Usage
//!
//! ```
//! use omg_common::Instr;
//! use omg_image::{build, load};
//! use omg_vm::run;
//!
//! let bytes = build::encode(
//!     &[],
//!     &[Instr::PushInt(14), Instr::Emit, Instr::Halt],
//!     0,
//! );
//! let image = load(&bytes).unwrap();
//! let outcome = run(&image, &[]).unwrap();
//! assert_eq!(outcome.stdout, vec!["14".to_string()]);
//! ```

pub mod builtins;
pub mod error;
pub mod execute;
pub mod fs;
pub mod machine;

pub use error::RuntimeError;
pub use fs::{FileIo, Fs, OpenMode, RealFs};
pub use machine::{OutputSink, Vm};

use omg_common::Value;
use omg_image::{Diag, Image};

/// Everything a run produces, surfaced to the embedder.
#[derive(Debug)]
pub struct Outcome {
    /// Lines written by `EMIT`, in order.
    pub stdout: Vec<String>,
    /// Top of the operand stack at halt, or `none`.
    pub return_value: Value,
    /// Load-time notes carried over from the image.
    pub diagnostics: Vec<Diag>,
    /// Number of instructions dispatched.
    pub fuel_used: u64,
}

/// Execute an image to completion.
///
/// This is the primary entry point for embedders that do not need a
/// streaming output sink or a sandboxed filesystem; construct a [`Vm`]
/// directly for those.
///
/// # Errors
///
/// Returns the unhandled [`RuntimeError`] if one escapes every
/// `SETUP_EXCEPT` block (or is fatal).
pub fn run(image: &Image, args: &[String]) -> Result<Outcome, RuntimeError> {
    let mut vm = Vm::new(image, args);
    let return_value = vm.execute()?;
    Ok(Outcome {
        stdout: vm.take_stdout(),
        return_value,
        diagnostics: image.diagnostics.clone(),
        fuel_used: vm.fuel_used(),
    })
}
