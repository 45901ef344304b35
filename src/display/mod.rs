// src/display/mod.rs
//! Front ends for a running tracker

pub mod terminal;

pub use terminal::{run_headless, TerminalDisplay};

/// Whether stdout can host the interactive view
pub fn is_interactive() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}
