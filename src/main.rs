// src/main.rs

//! The main entry point for the gatherd collector.

use gatherd::cli::{ProgramInfo, run_program};

fn main() {
    let code = run_program(ProgramInfo {
        name: "gatherd",
        default_port: 16661,
    });
    std::process::exit(code);
}
