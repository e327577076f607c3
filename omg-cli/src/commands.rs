//! CLI command implementations.

use std::fs;

use omg_image::Image;
use omg_vm::{OutputSink, Vm};

/// Streams emitted lines straight to stdout.
struct StdoutSink;

impl OutputSink for StdoutSink {
    fn line(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Execute a `.omgb` image.
///
/// Arguments after the image path (with an optional leading `--`) are
/// forwarded to the program; the image path itself becomes `args[0]` so
/// that relative paths in file builtins resolve next to the image.
pub fn run(args: &[String]) -> Result<(), i32> {
    let Some(path) = args.first() else {
        eprintln!("error: run requires an input file");
        eprintln!("Usage: omg run <program.omgb> [--] [args...]");
        return Err(2);
    };

    let trailing = match args.get(1).map(String::as_str) {
        Some("--") => &args[2..],
        _ => &args[1..],
    };
    let mut program_args = Vec::with_capacity(trailing.len() + 1);
    program_args.push(path.clone());
    program_args.extend_from_slice(trailing);

    let image = load_image(path)?;
    for diag in &image.diagnostics {
        eprintln!("note: code offset {}: {}", diag.offset, diag.message);
    }

    let mut vm = Vm::new(&image, &program_args).with_sink(Box::new(StdoutSink));
    match vm.execute() {
        Ok(_) => Ok(()),
        Err(e) => {
            eprintln!("{e}");
            Err(1)
        }
    }
}

/// Load and verify an image without executing it.
pub fn check(args: &[String]) -> Result<(), i32> {
    let Some(path) = args.first() else {
        eprintln!("error: check requires an input file");
        eprintln!("Usage: omg check <program.omgb>");
        return Err(2);
    };

    let image = load_image(path)?;
    for diag in &image.diagnostics {
        eprintln!("note: code offset {}: {}", diag.offset, diag.message);
    }
    println!(
        "OK: {path} ({} instructions, {} functions)",
        image.code.len(),
        image.funcs.len()
    );
    Ok(())
}

fn load_image(path: &str) -> Result<Image, i32> {
    let bytes = fs::read(path).map_err(|e| {
        eprintln!("error: cannot read '{path}': {e}");
        2
    })?;
    omg_image::load(&bytes).map_err(|e| {
        eprintln!("error: {e}");
        2
    })
}
