//! `.omgb` encoder — the exact inverse of the loader.
//!
//! The compiler that normally produces images is a separate tool; this
//! module exists for tests and tooling that need to construct images
//! from instruction vectors. Jump, call, and entry targets are given as
//! instruction indices and converted to byte offsets during encoding.
//! Strings are interned into a deduplicated constant pool.
//!
//! Encoding panics on inconsistent input (an index past the end of the
//! code vector); it is a programmer-facing builder, not a parser of
//! untrusted data.

use std::collections::HashMap;

use omg_common::instr::op;
use omg_common::Instr;

use crate::loader::{IMAGE_VERSION, MAGIC};

/// A function to encode into the image's function table.
#[derive(Debug, Clone, Default)]
pub struct FuncSpec {
    pub name: String,
    /// Parameter names, in binding order.
    pub params: Vec<String>,
    /// Additional (non-parameter) local names.
    pub extra_locals: Vec<String>,
    /// Entry point as an instruction index.
    pub entry: usize,
}

impl FuncSpec {
    pub fn new(name: &str, params: &[&str], entry: usize) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            extra_locals: Vec::new(),
            entry,
        }
    }
}

/// String interner backing the constant pool.
#[derive(Default)]
struct Pool {
    strings: Vec<String>,
    index: HashMap<String, u16>,
}

impl Pool {
    fn intern(&mut self, s: &str) -> u16 {
        if let Some(&kidx) = self.index.get(s) {
            return kidx;
        }
        let kidx = u16::try_from(self.strings.len()).expect("constant pool overflow");
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), kidx);
        kidx
    }
}

/// Encode an image from a function table, code vector, and entry index.
pub fn encode(funcs: &[FuncSpec], code: &[Instr], entry: usize) -> Vec<u8> {
    // Instruction byte offsets; one extra slot for "end of code".
    let mut offsets = Vec::with_capacity(code.len() + 1);
    let mut at = 0u32;
    for instr in code {
        offsets.push(at);
        at += instr.encoded_len() as u32;
    }
    offsets.push(at);
    let offset_of = |idx: usize| -> u32 {
        assert!(idx < offsets.len(), "target index {idx} past end of code");
        offsets[idx]
    };

    let mut pool = Pool::default();
    // Function names first keeps small images readable in a hex dump.
    for func in funcs {
        pool.intern(&func.name);
        for param in &func.params {
            pool.intern(param);
        }
        for local in &func.extra_locals {
            pool.intern(local);
        }
    }
    for instr in code {
        match instr {
            Instr::PushStr(s)
            | Instr::Load(s)
            | Instr::Store(s)
            | Instr::StoreGlobal(s)
            | Instr::Attr(s)
            | Instr::AttrSet(s)
            | Instr::Builtin(s, _) => {
                pool.intern(s);
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // flags

    // ---- Constant pool ----
    out.extend_from_slice(&(pool.strings.len() as u32).to_le_bytes());
    for s in &pool.strings {
        out.push(1); // tag: Str
        out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    // ---- Function table ----
    out.extend_from_slice(&(funcs.len() as u32).to_le_bytes());
    for func in funcs {
        out.extend_from_slice(&pool.intern(&func.name).to_le_bytes());
        out.push(u8::try_from(func.params.len()).expect("too many parameters"));
        out.extend_from_slice(&offset_of(func.entry).to_le_bytes());
        let local_count = func.params.len() + func.extra_locals.len();
        out.extend_from_slice(&(local_count as u16).to_le_bytes());
        for name in func.params.iter().chain(&func.extra_locals) {
            out.extend_from_slice(&pool.intern(name).to_le_bytes());
        }
    }

    // ---- Code ----
    out.extend_from_slice(&at.to_le_bytes());
    for instr in code {
        encode_instr(instr, &mut pool, &offset_of, &mut out);
    }

    // ---- Entry ----
    out.extend_from_slice(&offset_of(entry).to_le_bytes());
    out
}

fn encode_instr(instr: &Instr, pool: &mut Pool, offset_of: &dyn Fn(usize) -> u32, out: &mut Vec<u8>) {
    out.push(instr.opcode());
    match instr {
        Instr::PushInt(v) => out.extend_from_slice(&v.to_le_bytes()),
        Instr::PushStr(s)
        | Instr::Load(s)
        | Instr::Store(s)
        | Instr::StoreGlobal(s)
        | Instr::Attr(s)
        | Instr::AttrSet(s) => out.extend_from_slice(&pool.intern(s).to_le_bytes()),
        Instr::PushBool(b) => out.push(u8::from(*b)),
        Instr::BuildList(n) | Instr::BuildDict(n) => out.extend_from_slice(&n.to_le_bytes()),
        Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::SetupExcept(t) => {
            out.extend_from_slice(&offset_of(*t).to_le_bytes())
        }
        Instr::Call(fidx, argc) | Instr::TailCall(fidx, argc) => {
            out.extend_from_slice(&fidx.to_le_bytes());
            out.push(*argc);
        }
        Instr::Builtin(name, argc) => {
            out.extend_from_slice(&pool.intern(name).to_le_bytes());
            out.push(*argc);
        }
        Instr::CallValue(argc) => out.push(*argc),
        Instr::Raise(kind) => out.push(*kind as u8),
        _ => {
            debug_assert_eq!(instr.encoded_len(), 1, "{} has operands", instr.mnemonic());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let bytes = encode(&[], &[Instr::Halt], 0);
        assert_eq!(&bytes[0..4], b"OMGB");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), IMAGE_VERSION);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 0);
    }

    #[test]
    fn strings_are_deduplicated() {
        let code = vec![
            Instr::Load("x".to_string()),
            Instr::Load("x".to_string()),
            Instr::Store("x".to_string()),
            Instr::Halt,
        ];
        let bytes = encode(&[], &code, 0);
        // One pool entry: count(4) + tag(1) + len(4) + "x"(1).
        let pool_count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(pool_count, 1);
    }

    #[test]
    #[should_panic(expected = "past end of code")]
    fn target_past_end_panics() {
        encode(&[], &[Instr::Jump(5), Instr::Halt], 0);
    }
}
