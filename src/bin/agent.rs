// src/bin/agent.rs

//! The main entry point for the gatherd agent: the same runtime as the
//! collector, with leaf-host defaults.

use gatherd::cli::{ProgramInfo, run_program};

fn main() {
    let code = run_program(ProgramInfo {
        name: "gatherd-agent",
        default_port: 16660,
    });
    std::process::exit(code);
}
