//! Loaded program image: code vector, function table, entry point.

use std::collections::HashMap;

use omg_common::Instr;

/// A record in the function table.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncEntry {
    /// Function name, unique within an image.
    pub name: String,
    /// Number of parameters. Parameters are the first `param_count`
    /// entries of `locals`.
    pub param_count: usize,
    /// All local names declared by the function, parameters first.
    pub locals: Vec<String>,
    /// Entry point as an instruction index into the code vector.
    pub entry: usize,
}

impl FuncEntry {
    /// The declared parameter names, in binding order.
    pub fn params(&self) -> &[String] {
        &self.locals[..self.param_count]
    }
}

/// A load-time note that does not prevent execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diag {
    /// Byte offset into the code stream the note refers to.
    pub offset: u32,
    pub message: String,
}

/// The immutable program image the VM executes.
///
/// Constant-pool references have been resolved (instructions carry
/// their strings) and all jump, call, and entry targets are instruction
/// indices. The original byte offset of every instruction is retained
/// for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Ordered function table.
    pub funcs: Vec<FuncEntry>,
    /// Decoded instruction stream.
    pub code: Vec<Instr>,
    /// Byte offset of each instruction in the encoded form.
    pub offsets: Vec<u32>,
    /// Instruction index where execution starts.
    pub entry: usize,
    /// Load-time notes (e.g. the tail-position scan).
    pub diagnostics: Vec<Diag>,
    by_name: HashMap<String, usize>,
}

impl Image {
    /// Assemble an image from already-decoded parts.
    ///
    /// Byte offsets are recomputed from the instructions' encoded sizes
    /// and the tail-position scan runs here, so images built in memory
    /// behave exactly like loaded ones. Targets are trusted; the loader
    /// is the verifying path.
    pub fn new(funcs: Vec<FuncEntry>, code: Vec<Instr>, entry: usize) -> Self {
        let mut offsets = Vec::with_capacity(code.len());
        let mut at = 0u32;
        for instr in &code {
            offsets.push(at);
            at += instr.encoded_len() as u32;
        }

        let diagnostics = scan_tail_positions(&code, &offsets);
        let by_name = funcs
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        Self {
            funcs,
            code,
            offsets,
            entry,
            diagnostics,
            by_name,
        }
    }

    /// Loader path: keep the byte offsets observed in the actual stream
    /// (legacy opcodes decode to a different width than they re-encode).
    pub(crate) fn with_offsets(
        funcs: Vec<FuncEntry>,
        code: Vec<Instr>,
        offsets: Vec<u32>,
        entry: usize,
    ) -> Self {
        let diagnostics = scan_tail_positions(&code, &offsets);
        let by_name = funcs
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            funcs,
            code,
            offsets,
            entry,
            diagnostics,
            by_name,
        }
    }

    /// Look up a function-table index by name.
    pub fn func_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }
}

/// Tail-position scan: a `TCALL` should be the last thing a function
/// does. The VM trusts placement, so a stray one is only reported.
fn scan_tail_positions(code: &[Instr], offsets: &[u32]) -> Vec<Diag> {
    let mut diags = Vec::new();
    for (idx, instr) in code.iter().enumerate() {
        if matches!(instr, Instr::TailCall(_, _)) && !matches!(code.get(idx + 1), Some(Instr::Return)) {
            diags.push(Diag {
                offset: offsets[idx],
                message: "TCALL not immediately followed by RETURN".to_string(),
            });
        }
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_accumulate_encoded_sizes() {
        let image = Image::new(
            vec![],
            vec![Instr::PushInt(1), Instr::PushBool(true), Instr::Halt],
            0,
        );
        assert_eq!(image.offsets, vec![0, 9, 11]);
    }

    #[test]
    fn func_index_by_name() {
        let image = Image::new(
            vec![FuncEntry {
                name: "fact".to_string(),
                param_count: 1,
                locals: vec!["n".to_string()],
                entry: 0,
            }],
            vec![Instr::Halt],
            0,
        );
        assert_eq!(image.func_index("fact"), Some(0));
        assert_eq!(image.func_index("missing"), None);
    }

    #[test]
    fn tail_scan_reports_misplaced_tcall() {
        let image = Image::new(
            vec![],
            vec![Instr::TailCall(0, 0), Instr::Pop, Instr::Halt],
            0,
        );
        assert_eq!(image.diagnostics.len(), 1);
        assert_eq!(image.diagnostics[0].offset, 0);
    }

    #[test]
    fn tail_scan_accepts_tcall_before_return() {
        let image = Image::new(vec![], vec![Instr::TailCall(0, 0), Instr::Return], 0);
        assert!(image.diagnostics.is_empty());
    }
}
