//! `.omgb` decoder and verifier.
//!
//! ## Binary layout (little-endian)
//! ```text
//! HEADER  "OMGB"  version(u16)  flags(u16)
//! CPOOL   u32 count, { u8 tag, payload }*
//!           tag 0 = Int: i64
//!           tag 1 = Str: u32 byte-length, UTF-8 bytes
//! FTABLE  u32 count, { u16 name_kidx, u8 param_count, u32 entry_offset,
//!                      u16 local_count, { u16 name_kidx }* }*
//! CODE    u32 byte-length, opcode stream
//! ENTRY   u32 entry_offset
//! ```
//!
//! Loading is a two-pass decode. Pass one walks the code stream once,
//! decoding every instruction and indexing its start offset. Pass two
//! checks that every jump target, function entry, and the image entry
//! land on an indexed start, and rewrites them to instruction indices.
//! Anything malformed is a specific [`ImageError`]; the loader never
//! panics on hostile input.

use tracing::debug;

use omg_common::instr::op;
use omg_common::{ErrorKind, Instr};

use crate::error::ImageError;
use crate::image::{FuncEntry, Image};

/// Magic bytes at the start of every image.
pub const MAGIC: [u8; 4] = *b"OMGB";

/// Container revision this runtime accepts. Loading requires an exact
/// match.
pub const IMAGE_VERSION: u16 = 2;

/// A constant-pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Str(String),
}

/// Cursor over the raw image bytes with truncation-checked reads.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], ImageError> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(ImageError::Truncated {
                offset: self.pos,
                context,
            }),
        }
    }

    fn u8(&mut self, context: &'static str) -> Result<u8, ImageError> {
        Ok(self.take(1, context)?[0])
    }

    fn u16(&mut self, context: &'static str) -> Result<u16, ImageError> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, context: &'static str) -> Result<u32, ImageError> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self, context: &'static str) -> Result<i64, ImageError> {
        let b = self.take(8, context)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Decode and verify a program image.
pub fn load(bytes: &[u8]) -> Result<Image, ImageError> {
    let mut r = Reader::new(bytes);

    // ---- Header ----
    if r.take(4, "magic")? != MAGIC {
        return Err(ImageError::BadMagic);
    }
    let version = r.u16("version")?;
    if version != IMAGE_VERSION {
        return Err(ImageError::UnsupportedVersion {
            found: version,
            expected: IMAGE_VERSION,
        });
    }
    let _flags = r.u16("flags")?;

    // ---- Constant pool ----
    let pool = read_pool(&mut r)?;

    // ---- Function table (targets still byte offsets) ----
    let raw_funcs = read_ftable(&mut r, &pool)?;

    // ---- Code stream, pass one: decode and index starts ----
    let code_len = r.u32("code length")? as usize;
    let code_bytes = r.take(code_len, "code stream")?;
    let (mut code, offsets) = decode_code(code_bytes, &pool, raw_funcs.len())?;

    let entry_offset = r.u32("entry offset")?;
    if r.remaining() > 0 {
        return Err(ImageError::TrailingBytes {
            count: r.remaining(),
        });
    }

    // ---- Pass two: every target must land on an instruction start ----
    let index_of = |target: u32| -> Option<usize> {
        if target as usize == code_len {
            // Jumping to end of code is a normal halt.
            return Some(offsets.len());
        }
        offsets.binary_search(&target).ok()
    };

    for (idx, instr) in code.iter_mut().enumerate() {
        match instr {
            Instr::Jump(target) | Instr::JumpIfFalse(target) | Instr::SetupExcept(target) => {
                let raw = *target as u32;
                *target = index_of(raw).ok_or(ImageError::BadJumpTarget {
                    offset: offsets[idx],
                    target: raw,
                })?;
            }
            _ => {}
        }
    }

    let funcs = raw_funcs
        .into_iter()
        .map(|f| {
            let entry = index_of(f.entry_offset).ok_or(ImageError::BadFuncEntry {
                name: f.name.clone(),
                target: f.entry_offset,
            })?;
            Ok(FuncEntry {
                name: f.name,
                param_count: f.param_count,
                locals: f.locals,
                entry,
            })
        })
        .collect::<Result<Vec<_>, ImageError>>()?;

    let entry = index_of(entry_offset).ok_or(ImageError::BadEntryOffset {
        target: entry_offset,
    })?;

    debug!(
        consts = pool.len(),
        funcs = funcs.len(),
        instrs = code.len(),
        entry,
        "image loaded"
    );

    Ok(Image::with_offsets(funcs, code, offsets, entry))
}

fn read_pool(r: &mut Reader<'_>) -> Result<Vec<Constant>, ImageError> {
    let count = r.u32("constant count")? as usize;
    let mut pool = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let tag_offset = r.pos;
        let tag = r.u8("constant tag")?;
        match tag {
            0 => pool.push(Constant::Int(r.i64("int constant")?)),
            1 => {
                let len = r.u32("string length")? as usize;
                let str_offset = r.pos;
                let bytes = r.take(len, "string constant")?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| ImageError::InvalidUtf8 { offset: str_offset })?;
                pool.push(Constant::Str(s.to_string()));
            }
            other => {
                return Err(ImageError::BadConstTag {
                    offset: tag_offset,
                    tag: other,
                })
            }
        }
    }
    Ok(pool)
}

/// Function record before entry offsets are resolved to indices.
struct RawFunc {
    name: String,
    param_count: usize,
    locals: Vec<String>,
    entry_offset: u32,
}

fn read_ftable(r: &mut Reader<'_>, pool: &[Constant]) -> Result<Vec<RawFunc>, ImageError> {
    let count = r.u32("function count")? as usize;
    let mut funcs = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name_kidx = r.u16("function name")?;
        let name = pool_str(pool, name_kidx, 0)?;
        let param_count = r.u8("parameter count")? as usize;
        let entry_offset = r.u32("function entry")?;
        let local_count = r.u16("local count")? as usize;
        let mut locals = Vec::with_capacity(local_count.min(256));
        for _ in 0..local_count {
            let kidx = r.u16("local name")?;
            locals.push(pool_str(pool, kidx, 0)?);
        }
        if param_count > locals.len() {
            return Err(ImageError::ParamCountExceedsLocals {
                name,
                param_count,
                local_count: locals.len(),
            });
        }
        funcs.push(RawFunc {
            name,
            param_count,
            locals,
            entry_offset,
        });
    }
    Ok(funcs)
}

fn pool_str(pool: &[Constant], index: u16, offset: u32) -> Result<String, ImageError> {
    match pool.get(index as usize) {
        Some(Constant::Str(s)) => Ok(s.clone()),
        Some(_) => Err(ImageError::ExpectedStrConst { offset, index }),
        None => Err(ImageError::BadConstIndex { offset, index }),
    }
}

/// Pass one: decode the full opcode stream, recording each start offset.
///
/// Jump targets are left as byte offsets inside the decoded variants;
/// the caller rewrites them once all starts are known.
fn decode_code(
    bytes: &[u8],
    pool: &[Constant],
    func_count: usize,
) -> Result<(Vec<Instr>, Vec<u32>), ImageError> {
    let mut r = Reader::new(bytes);
    let mut code = Vec::new();
    let mut offsets = Vec::new();

    while r.remaining() > 0 {
        let offset = r.pos as u32;
        let opcode = r.u8("opcode")?;
        // Reads below map truncation to the operand's context string; a
        // PUSH_BOOL cut short is the rejected legacy bare-bool encoding.
        let instr = match opcode {
            op::PUSH_INT => Instr::PushInt(r.i64("PUSH_INT operand")?),
            op::PUSH_STR => {
                let kidx = r.u16("PUSH_STR operand")?;
                Instr::PushStr(pool_str(pool, kidx, offset)?)
            }
            op::PUSH_BOOL => Instr::PushBool(r.u8("PUSH_BOOL operand")? != 0),
            op::PUSH_NONE => Instr::PushNone,
            op::BUILD_LIST => Instr::BuildList(r.u16("BUILD_LIST operand")?),
            op::BUILD_DICT => Instr::BuildDict(r.u16("BUILD_DICT operand")?),
            op::LOAD => Instr::Load(name_operand(&mut r, pool, offset, "LOAD operand")?),
            op::STORE => Instr::Store(name_operand(&mut r, pool, offset, "STORE operand")?),
            op::STORE_GLOBAL => {
                Instr::StoreGlobal(name_operand(&mut r, pool, offset, "STORE_GLOBAL operand")?)
            }
            op::ADD => Instr::Add,
            op::SUB => Instr::Sub,
            op::MUL => Instr::Mul,
            op::DIV => Instr::Div,
            op::MOD => Instr::Mod,
            op::EQ => Instr::Eq,
            op::NE => Instr::Ne,
            op::LT => Instr::Lt,
            op::LE => Instr::Le,
            op::GT => Instr::Gt,
            op::GE => Instr::Ge,
            op::BAND => Instr::BAnd,
            op::BOR => Instr::BOr,
            op::BXOR => Instr::BXor,
            op::SHL => Instr::Shl,
            op::SHR => Instr::Shr,
            op::BNOT => Instr::BNot,
            op::AND => Instr::And,
            op::OR => Instr::Or,
            op::NOT => Instr::Not,
            op::NEG => Instr::Neg,
            op::INDEX => Instr::Index,
            op::SLICE => Instr::Slice,
            op::INDEX_SET => Instr::IndexSet,
            op::ATTR => Instr::Attr(name_operand(&mut r, pool, offset, "ATTR operand")?),
            op::ATTR_SET => Instr::AttrSet(name_operand(&mut r, pool, offset, "ATTR_SET operand")?),
            op::JMP => Instr::Jump(r.u32("JMP target")? as usize),
            op::JMP_IF_FALSE => Instr::JumpIfFalse(r.u32("JMP_IF_FALSE target")? as usize),
            op::CALL | op::TCALL => {
                let fidx = r.u16("call target")?;
                let argc = r.u8("call arity")?;
                if fidx as usize >= func_count {
                    return Err(ImageError::BadFuncIndex {
                        offset,
                        index: fidx,
                    });
                }
                if opcode == op::CALL {
                    Instr::Call(fidx, argc)
                } else {
                    Instr::TailCall(fidx, argc)
                }
            }
            op::CALL_VALUE => Instr::CallValue(r.u8("CALL_VALUE arity")?),
            op::BUILTIN => {
                let name = name_operand(&mut r, pool, offset, "BUILTIN operand")?;
                let argc = r.u8("BUILTIN arity")?;
                Instr::Builtin(name, argc)
            }
            op::POP => Instr::Pop,
            op::RETURN => Instr::Return,
            op::EMIT => Instr::Emit,
            op::HALT => Instr::Halt,
            op::ASSERT => Instr::Assert,
            op::SETUP_EXCEPT => Instr::SetupExcept(r.u32("SETUP_EXCEPT target")? as usize),
            op::POP_BLOCK => Instr::PopBlock,
            op::RAISE => {
                let kind = r.u8("RAISE kind")?;
                let kind = ErrorKind::try_from(kind)
                    .map_err(|kind| ImageError::BadRaiseKind { offset, kind })?;
                Instr::Raise(kind)
            }
            // Legacy single-byte raise forms from before kind consolidation.
            op::RAISE_SYNTAX => Instr::Raise(ErrorKind::Syntax),
            op::RAISE_TYPE => Instr::Raise(ErrorKind::Type),
            op::RAISE_UNDEFINED => Instr::Raise(ErrorKind::UndefinedIdent),
            op::RAISE_VALUE => Instr::Raise(ErrorKind::Value),
            op::RAISE_MODULE_IMPORT => Instr::Raise(ErrorKind::ModuleImport),
            other => {
                return Err(ImageError::InvalidOpcode {
                    offset,
                    opcode: other,
                })
            }
        };
        code.push(instr);
        offsets.push(offset);
    }

    Ok((code, offsets))
}

fn name_operand(
    r: &mut Reader<'_>,
    pool: &[Constant],
    offset: u32,
    context: &'static str,
) -> Result<String, ImageError> {
    let kidx = r.u16(context)?;
    pool_str(pool, kidx, offset)
}
