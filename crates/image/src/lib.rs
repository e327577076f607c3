//! OMG program images — the `.omgb` binary container.
//!
//! This crate owns both directions of the format:
//!
//! - [`load`] — two-pass decode and verification of untrusted bytes
//!   into an immutable [`Image`]
//! - [`build::encode`] — encoding an instruction vector and function
//!   table back into bytes (tests and tooling)
//!
//! # Usage
//!
//! ```
//! use omg_common::Instr;
//! use omg_image::{build, load};
//!
//! let bytes = build::encode(&[], &[Instr::PushInt(42), Instr::Halt], 0);
//! let image = load(&bytes).unwrap();
//! assert_eq!(image.code.len(), 2);
//! ```

pub mod build;
pub mod error;
pub mod image;
pub mod loader;

pub use error::ImageError;
pub use image::{Diag, FuncEntry, Image};
pub use loader::{load, Constant, IMAGE_VERSION, MAGIC};
