//! TUI debugger for the DCPU-16 emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and interrupt queue view
//! - Memory view
//! - Step/run/breakpoint controls
//! - Disassembly view

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
