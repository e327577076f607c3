//! Integration tests for the `.omgb` loader: round-trips through the
//! encoder plus a corruption matrix of hand-crafted byte streams.

use omg_common::instr::op;
use omg_common::{ErrorKind, Instr};
use omg_image::build::{encode, FuncSpec};
use omg_image::{load, ImageError, IMAGE_VERSION};

// ============================================================
// Raw-byte helpers for corrupt images the encoder cannot produce
// ============================================================

enum Const<'a> {
    Int(i64),
    Str(&'a str),
}

fn header() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(b"OMGB");
    b.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b
}

fn raw_image(pool: &[Const], funcs: &[Vec<u8>], code: &[u8], entry: u32) -> Vec<u8> {
    let mut b = header();
    b.extend_from_slice(&(pool.len() as u32).to_le_bytes());
    for c in pool {
        match c {
            Const::Int(i) => {
                b.push(0);
                b.extend_from_slice(&i.to_le_bytes());
            }
            Const::Str(s) => {
                b.push(1);
                b.extend_from_slice(&(s.len() as u32).to_le_bytes());
                b.extend_from_slice(s.as_bytes());
            }
        }
    }
    b.extend_from_slice(&(funcs.len() as u32).to_le_bytes());
    for f in funcs {
        b.extend_from_slice(f);
    }
    b.extend_from_slice(&(code.len() as u32).to_le_bytes());
    b.extend_from_slice(code);
    b.extend_from_slice(&entry.to_le_bytes());
    b
}

/// Encode one function-table record by hand.
fn raw_func(name_kidx: u16, param_count: u8, entry_offset: u32, local_kidxs: &[u16]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&name_kidx.to_le_bytes());
    b.push(param_count);
    b.extend_from_slice(&entry_offset.to_le_bytes());
    b.extend_from_slice(&(local_kidxs.len() as u16).to_le_bytes());
    for k in local_kidxs {
        b.extend_from_slice(&k.to_le_bytes());
    }
    b
}

// ============================================================
// Round-trips through the encoder
// ============================================================

#[test]
fn minimal_image_loads() {
    let bytes = encode(&[], &[Instr::PushInt(42), Instr::Emit, Instr::Halt], 0);
    let image = load(&bytes).unwrap();
    assert_eq!(
        image.code,
        vec![Instr::PushInt(42), Instr::Emit, Instr::Halt]
    );
    assert_eq!(image.entry, 0);
    assert!(image.diagnostics.is_empty());
}

#[test]
fn function_table_roundtrip() {
    let mut spec = FuncSpec::new("add2", &["a", "b"], 0);
    spec.extra_locals.push("tmp".to_string());
    let code = vec![
        Instr::Load("a".to_string()),
        Instr::Load("b".to_string()),
        Instr::Add,
        Instr::Return,
        Instr::Halt,
    ];
    let image = load(&encode(&[spec], &code, 4)).unwrap();
    assert_eq!(image.funcs.len(), 1);
    let func = &image.funcs[0];
    assert_eq!(func.name, "add2");
    assert_eq!(func.params(), &["a".to_string(), "b".to_string()]);
    assert_eq!(func.locals.len(), 3);
    assert_eq!(func.entry, 0);
    assert_eq!(image.entry, 4);
    assert_eq!(image.func_index("add2"), Some(0));
}

#[test]
fn jump_to_end_of_code_is_accepted() {
    let code = vec![Instr::Jump(2), Instr::Pop, Instr::Halt];
    let image = load(&encode(&[], &code, 0)).unwrap();
    assert_eq!(image.code[0], Instr::Jump(2));

    let code = vec![Instr::Jump(3), Instr::Pop, Instr::Halt];
    let image = load(&encode(&[], &code, 0)).unwrap();
    assert_eq!(image.code[0], Instr::Jump(3));
}

#[test]
fn tail_scan_diagnostic_survives_loading() {
    let funcs = vec![FuncSpec::new("f", &[], 0)];
    let code = vec![
        Instr::TailCall(0, 0),
        Instr::Pop,
        Instr::Return,
        Instr::Halt,
    ];
    let image = load(&encode(&funcs, &code, 3)).unwrap();
    assert_eq!(image.diagnostics.len(), 1);
    assert!(image.diagnostics[0].message.contains("TCALL"));
}

// ============================================================
// Header corruption
// ============================================================

#[test]
fn empty_input_is_truncated() {
    assert!(matches!(load(&[]), Err(ImageError::Truncated { .. })));
}

#[test]
fn bad_magic() {
    let mut bytes = encode(&[], &[Instr::Halt], 0);
    bytes[0] = b'X';
    assert_eq!(load(&bytes), Err(ImageError::BadMagic));
}

#[test]
fn version_mismatch() {
    let mut bytes = encode(&[], &[Instr::Halt], 0);
    bytes[4] = 0xEE;
    bytes[5] = 0xEE;
    assert_eq!(
        load(&bytes),
        Err(ImageError::UnsupportedVersion {
            found: 0xEEEE,
            expected: IMAGE_VERSION,
        })
    );
}

#[test]
fn trailing_bytes_rejected() {
    let mut bytes = encode(&[], &[Instr::Halt], 0);
    bytes.extend_from_slice(&[0, 0, 0]);
    assert_eq!(load(&bytes), Err(ImageError::TrailingBytes { count: 3 }));
}

// ============================================================
// Constant-pool corruption
// ============================================================

#[test]
fn bad_constant_tag() {
    let mut b = header();
    b.extend_from_slice(&1u32.to_le_bytes());
    b.push(7); // unknown tag
    assert!(matches!(load(&b), Err(ImageError::BadConstTag { tag: 7, .. })));
}

#[test]
fn invalid_utf8_in_string_constant() {
    let mut b = header();
    b.extend_from_slice(&1u32.to_le_bytes());
    b.push(1); // Str tag
    b.extend_from_slice(&2u32.to_le_bytes());
    b.extend_from_slice(&[0xFF, 0xFE]);
    b.extend_from_slice(&0u32.to_le_bytes()); // funcs
    b.extend_from_slice(&1u32.to_le_bytes()); // code len
    b.push(op::HALT);
    b.extend_from_slice(&0u32.to_le_bytes()); // entry
    assert!(matches!(load(&b), Err(ImageError::InvalidUtf8 { .. })));
}

#[test]
fn int_constants_are_decoded() {
    let bytes = raw_image(&[Const::Int(-9)], &[], &[op::HALT], 0);
    assert!(load(&bytes).is_ok());
}

// ============================================================
// Code-stream corruption
// ============================================================

#[test]
fn invalid_opcode_byte() {
    let bytes = raw_image(&[], &[], &[200], 0);
    assert_eq!(
        load(&bytes),
        Err(ImageError::InvalidOpcode {
            offset: 0,
            opcode: 200,
        })
    );
}

#[test]
fn legacy_bare_bool_encoding_is_rejected() {
    // A PUSH_BOOL opcode with no operand byte: the pre-consolidation
    // ambiguous form. It must fail the load, not default.
    let bytes = raw_image(&[], &[], &[op::PUSH_BOOL], 0);
    assert!(matches!(
        load(&bytes),
        Err(ImageError::Truncated {
            context: "PUSH_BOOL operand",
            ..
        })
    ));
}

#[test]
fn truncated_push_int_operand() {
    let bytes = raw_image(&[], &[], &[op::PUSH_INT, 1, 2], 0);
    assert!(matches!(load(&bytes), Err(ImageError::Truncated { .. })));
}

#[test]
fn name_operand_out_of_range() {
    let bytes = raw_image(&[], &[], &[op::LOAD, 3, 0, op::HALT], 0);
    assert_eq!(
        load(&bytes),
        Err(ImageError::BadConstIndex {
            offset: 0,
            index: 3,
        })
    );
}

#[test]
fn name_operand_must_reference_a_string() {
    let bytes = raw_image(&[Const::Int(5)], &[], &[op::LOAD, 0, 0, op::HALT], 0);
    assert_eq!(
        load(&bytes),
        Err(ImageError::ExpectedStrConst {
            offset: 0,
            index: 0,
        })
    );
}

#[test]
fn raise_with_unassigned_kind() {
    let bytes = raw_image(&[], &[], &[op::RAISE, 10], 0);
    assert_eq!(
        load(&bytes),
        Err(ImageError::BadRaiseKind {
            offset: 0,
            kind: 10,
        })
    );
}

#[test]
fn legacy_raise_opcodes_decode_to_kinds() {
    let code = [
        op::RAISE_SYNTAX,
        op::RAISE_TYPE,
        op::RAISE_UNDEFINED,
        op::RAISE_VALUE,
        op::RAISE_MODULE_IMPORT,
        op::HALT,
    ];
    let image = load(&raw_image(&[], &[], &code, 0)).unwrap();
    assert_eq!(
        image.code[..5],
        [
            Instr::Raise(ErrorKind::Syntax),
            Instr::Raise(ErrorKind::Type),
            Instr::Raise(ErrorKind::UndefinedIdent),
            Instr::Raise(ErrorKind::Value),
            Instr::Raise(ErrorKind::ModuleImport),
        ]
    );
}

#[test]
fn raise_vm_invariant_kind_decodes() {
    let bytes = raw_image(&[], &[], &[op::RAISE, 255], 0);
    let image = load(&bytes).unwrap();
    assert_eq!(image.code[0], Instr::Raise(ErrorKind::VmInvariant));
}

// ============================================================
// Target verification
// ============================================================

#[test]
fn jump_into_middle_of_instruction() {
    // PUSH_INT occupies offsets 0..9; a jump to 4 lands inside it.
    let mut code = vec![op::PUSH_INT];
    code.extend_from_slice(&0i64.to_le_bytes());
    code.push(op::JMP);
    code.extend_from_slice(&4u32.to_le_bytes());
    code.push(op::HALT);
    let bytes = raw_image(&[], &[], &code, 0);
    assert_eq!(
        load(&bytes),
        Err(ImageError::BadJumpTarget {
            offset: 9,
            target: 4,
        })
    );
}

#[test]
fn jump_past_end_of_code() {
    let mut code = vec![op::JMP];
    code.extend_from_slice(&100u32.to_le_bytes());
    code.push(op::HALT);
    let bytes = raw_image(&[], &[], &code, 0);
    assert!(matches!(
        load(&bytes),
        Err(ImageError::BadJumpTarget { target: 100, .. })
    ));
}

#[test]
fn call_target_out_of_range() {
    let code = [op::CALL, 2, 0, 1, op::HALT];
    let bytes = raw_image(&[], &[], &code, 0);
    assert_eq!(
        load(&bytes),
        Err(ImageError::BadFuncIndex {
            offset: 0,
            index: 2,
        })
    );
}

#[test]
fn entry_offset_mid_instruction() {
    let mut code = vec![op::PUSH_INT];
    code.extend_from_slice(&7i64.to_le_bytes());
    code.push(op::HALT);
    let bytes = raw_image(&[], &[], &code, 3);
    assert_eq!(load(&bytes), Err(ImageError::BadEntryOffset { target: 3 }));
}

#[test]
fn function_entry_out_of_range() {
    let func = raw_func(0, 0, 1000, &[]);
    let bytes = raw_image(&[Const::Str("f")], &[func], &[op::HALT], 0);
    assert!(matches!(
        load(&bytes),
        Err(ImageError::BadFuncEntry { target: 1000, .. })
    ));
}

#[test]
fn param_count_beyond_locals() {
    let func = raw_func(0, 2, 0, &[1]);
    let bytes = raw_image(&[Const::Str("f"), Const::Str("a")], &[func], &[op::HALT], 0);
    assert_eq!(
        load(&bytes),
        Err(ImageError::ParamCountExceedsLocals {
            name: "f".to_string(),
            param_count: 2,
            local_count: 1,
        })
    );
}
