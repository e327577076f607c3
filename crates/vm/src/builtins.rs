//! Built-in function dispatch for the OMG VM.
//!
//! A single entry point maps a builtin name plus an argument slice to a
//! result or an error. It is reachable from the `BUILTIN` instruction,
//! from `CALL_VALUE` on a builtin name, and recursively through the
//! `call_builtin` meta-builtin.
//!
//! File handles are integers issued from a table owned by the VM
//! instance; they are dropped (and flushed) with it. Handles opened in
//! a binary mode (`rb`/`wb`/`ab`) carry lists of byte ints instead of
//! strings. Relative paths resolve against the `current_dir` binding.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use omg_common::{ErrorKind, Value};

use crate::error::RuntimeError;
use crate::fs::{FileIo, OpenMode};
use crate::machine::Vm;

/// The complete builtin catalogue.
pub const BUILTIN_NAMES: [&str; 15] = [
    "length",
    "chr",
    "ascii",
    "hex",
    "binary",
    "freeze",
    "panic",
    "raise",
    "read_file",
    "file_exists",
    "file_open",
    "file_read",
    "file_write",
    "file_close",
    "call_builtin",
];

/// Whether `name` is a builtin (used by `CALL_VALUE` dispatch).
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// One open handle in the per-VM file table.
struct FileEntry {
    io: Box<dyn FileIo>,
    binary: bool,
}

/// Integer-handle table, scoped to a single VM instance.
#[derive(Default)]
pub(crate) struct FileTable {
    entries: HashMap<i64, FileEntry>,
    next: i64,
}

impl FileTable {
    fn insert(&mut self, io: Box<dyn FileIo>, binary: bool) -> i64 {
        let handle = self.next;
        self.next += 1;
        self.entries.insert(handle, FileEntry { io, binary });
        handle
    }
}

fn arity(name: &str, expected: &str) -> RuntimeError {
    RuntimeError::Type(format!("{name}() expects {expected} (arity mismatch)"))
}

impl<'a> Vm<'a> {
    /// Dispatch a builtin by name.
    pub fn call_builtin(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        match name {
            // --- Data / conversion ---
            "length" => match args {
                [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
                [Value::List(list)] => Ok(Value::Int(list.borrow().len() as i64)),
                [Value::Dict(map)] => Ok(Value::Int(map.borrow().len() as i64)),
                [Value::FrozenDict(map)] => Ok(Value::Int(map.len() as i64)),
                [other] => Err(RuntimeError::Type(format!(
                    "length() expects a string, list, or dict, got {}",
                    other.type_name()
                ))),
                _ => Err(arity("length", "one argument")),
            },

            "chr" => match args {
                [Value::Int(n)] => u32::try_from(*n)
                    .ok()
                    .and_then(char::from_u32)
                    .map(|c| Value::Str(c.to_string()))
                    .ok_or_else(|| {
                        RuntimeError::Value(format!(
                            "chr() expects a Unicode scalar value in 0..=0x10FFFF, got {n}"
                        ))
                    }),
                _ => Err(arity("chr", "one integer")),
            },

            "ascii" => match args {
                [Value::Str(s)] => {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Ok(Value::Int(c as i64)),
                        _ => Err(arity("ascii", "a single character")),
                    }
                }
                _ => Err(arity("ascii", "a single character")),
            },

            "hex" => match args {
                [Value::Int(n)] => Ok(Value::Str(format!("0x{n:x}"))),
                _ => Err(arity("hex", "one integer")),
            },

            "binary" => match args {
                [Value::Int(n)] => {
                    if *n < 0 {
                        Ok(Value::Str(format!("-{:b}", n.unsigned_abs())))
                    } else {
                        Ok(Value::Str(format!("{n:b}")))
                    }
                }
                [Value::Int(n), Value::Int(width)] => {
                    if !(1..=64).contains(width) {
                        return Err(RuntimeError::Value(format!(
                            "binary() width must be between 1 and 64, got {width}"
                        )));
                    }
                    let masked = if *width == 64 {
                        *n as u64
                    } else {
                        (*n as u64) & ((1u64 << width) - 1)
                    };
                    Ok(Value::Str(format!("{masked:0w$b}", w = *width as usize)))
                }
                _ => Err(arity("binary", "one or two integers")),
            },

            "freeze" => match args {
                [Value::Dict(map)] => Ok(Value::FrozenDict(Rc::new(map.borrow().clone()))),
                [Value::FrozenDict(map)] => Ok(Value::FrozenDict(Rc::clone(map))),
                _ => Err(arity("freeze", "a dict")),
            },

            // --- Errors ---
            "panic" => match args {
                [message] => Err(RuntimeError::Raised(message.to_string())),
                _ => Err(arity("panic", "one argument")),
            },

            "raise" => match args {
                [message] => Err(RuntimeError::Raised(message.to_string())),
                [Value::Str(kind), message] => match ErrorKind::from_name(kind) {
                    Some(kind) => Err(RuntimeError::from_kind(kind, message.to_string())),
                    None => Err(RuntimeError::Value(format!("unknown error kind '{kind}'"))),
                },
                _ => Err(arity("raise", "a message, or a kind and a message")),
            },

            // --- Filesystem ---
            "read_file" => match args {
                [Value::Str(path)] => {
                    let path = self.resolve_path(path);
                    self.fs.read_to_string(&path).map(Value::Str).map_err(|e| {
                        RuntimeError::ModuleImport(format!(
                            "failed to read '{}': {e}",
                            path.display()
                        ))
                    })
                }
                _ => Err(arity("read_file", "a file path")),
            },

            "file_exists" => match args {
                [Value::Str(path)] => {
                    let path = self.resolve_path(path);
                    Ok(Value::Bool(self.fs.exists(&path)))
                }
                _ => Err(arity("file_exists", "a file path")),
            },

            "file_open" => match args {
                [Value::Str(path), Value::Str(mode)] => {
                    let (open_mode, binary) = OpenMode::parse(mode).ok_or_else(|| {
                        RuntimeError::Value(format!("invalid file mode '{mode}'"))
                    })?;
                    let path = self.resolve_path(path);
                    let io = self.fs.open(&path, open_mode).map_err(|e| {
                        RuntimeError::Value(format!("cannot open '{}': {e}", path.display()))
                    })?;
                    Ok(Value::Int(self.files.insert(io, binary)))
                }
                _ => Err(arity("file_open", "a path and a mode")),
            },

            "file_read" => match args {
                [Value::Int(handle)] => {
                    let entry = self
                        .files
                        .entries
                        .get_mut(handle)
                        .ok_or_else(|| RuntimeError::Value("invalid file handle".to_string()))?;
                    if entry.binary {
                        let bytes = entry
                            .io
                            .read_bytes()
                            .map_err(|e| RuntimeError::Value(e.to_string()))?;
                        Ok(Value::list(
                            bytes.into_iter().map(|b| Value::Int(b as i64)).collect(),
                        ))
                    } else {
                        entry
                            .io
                            .read_text()
                            .map(Value::Str)
                            .map_err(|e| RuntimeError::Value(e.to_string()))
                    }
                }
                _ => Err(arity("file_read", "a handle")),
            },

            "file_write" => match args {
                [Value::Int(handle), data] => {
                    let entry = self
                        .files
                        .entries
                        .get_mut(handle)
                        .ok_or_else(|| RuntimeError::Value("invalid file handle".to_string()))?;
                    let bytes = match (entry.binary, data) {
                        (false, Value::Str(s)) => s.as_bytes().to_vec(),
                        (false, other) => {
                            return Err(RuntimeError::Type(format!(
                                "file_write() text handle expects a string, got {}",
                                other.type_name()
                            )))
                        }
                        (true, Value::List(list)) => list
                            .borrow()
                            .iter()
                            .map(|v| match v {
                                Value::Int(i) if (0..=255).contains(i) => Ok(*i as u8),
                                _ => Err(RuntimeError::Type(
                                    "file_write() expects bytes 0-255".to_string(),
                                )),
                            })
                            .collect::<Result<Vec<u8>, RuntimeError>>()?,
                        (true, other) => {
                            return Err(RuntimeError::Type(format!(
                                "file_write() binary handle expects a list, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    entry
                        .io
                        .write_all(&bytes)
                        .map_err(|e| RuntimeError::Value(e.to_string()))?;
                    Ok(Value::None)
                }
                _ => Err(arity("file_write", "a handle and data")),
            },

            // Closing an unknown (or already-closed) handle is a no-op.
            "file_close" => match args {
                [Value::Int(handle)] => {
                    self.files.entries.remove(handle);
                    Ok(Value::None)
                }
                _ => Err(arity("file_close", "a handle")),
            },

            // --- Meta ---
            "call_builtin" => match args {
                [Value::Str(inner), rest @ ..] => self.call_builtin(inner, rest),
                [other, ..] => Err(RuntimeError::Type(format!(
                    "call_builtin() expects a builtin name, got {}",
                    other.type_name()
                ))),
                [] => Err(arity("call_builtin", "a builtin name")),
            },

            _ => Err(RuntimeError::Type(format!("unknown builtin: {name}"))),
        }
    }

    /// Resolve a path against the `current_dir` binding (locals first,
    /// then globals), normalizing backslashes.
    fn resolve_path(&self, path: &str) -> PathBuf {
        let mut resolved = PathBuf::from(path.replace('\\', "/"));
        if resolved.is_relative() {
            if let Some(Value::Str(dir)) = self.lookup("current_dir") {
                resolved = PathBuf::from(dir.replace('\\', "/")).join(resolved);
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_membership() {
        for name in BUILTIN_NAMES {
            assert!(is_builtin(name));
        }
        assert!(!is_builtin("emit"));
        assert!(!is_builtin(""));
    }
}
