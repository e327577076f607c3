//! OMG CLI — load and execute `.omgb` program images.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Unhandled runtime error
//! - 2: Image/load error (including usage errors)

mod commands;

use std::process;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(2);
    }

    let result = match args[1].as_str() {
        "run" => commands::run(&args[2..]),
        "check" => commands::check(&args[2..]),
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        "--version" | "-v" => {
            println!("omg {}", env!("CARGO_PKG_VERSION"));
            process::exit(0);
        }
        other => {
            eprintln!("error: unknown command '{other}'");
            eprintln!();
            print_usage();
            process::exit(2);
        }
    };

    if let Err(code) = result {
        process::exit(code);
    }
}

fn print_usage() {
    eprintln!("Usage: omg <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run <program.omgb> [--] [args...]   Execute a program image");
    eprintln!("  check <program.omgb>                Load and verify an image");
}
