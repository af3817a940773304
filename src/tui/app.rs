//! Debugger application state and logic.

use crate::asm::disassemble_at;
use crate::cpu::MEMORY_SIZE;
use crate::{Cpu, CpuError};
use std::collections::HashSet;

/// Instructions executed per frame while running.
const INSTRUCTIONS_PER_TICK: usize = 500;

/// Memory words shown per row.
pub const MEM_ROW_WORDS: usize = 8;

const MEM_ROWS: usize = MEMORY_SIZE / MEM_ROW_WORDS;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged, devices attached.
    pub cpu: Cpu,
    /// Program image, reflashed on reset.
    pub program: Vec<u16>,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<u16>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// First memory row shown.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a debugger around a CPU whose memory holds `program`.
    pub fn new(cpu: Cpu, program: Vec<u16>) -> Self {
        Self {
            cpu,
            program,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            mem_scroll: 0,
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if self.cpu.is_on_fire() {
            self.status = format!("CPU halted: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let pc = self.cpu.regs.pc;
        let (text, _) = disassemble_at(&self.cpu.mem, pc);
        match self.execute_one() {
            Ok(()) => self.status = format!("PC={:04x}: {}", pc, text),
            Err(e) => {
                self.status = format!("Error at PC={:04x}: {}", pc, e);
                self.running = false;
            }
        }
    }

    /// Cycle until one instruction has been decoded and its cost paid.
    fn execute_one(&mut self) -> Result<(), CpuError> {
        while self.cpu.cycle()?.is_none() {}
        while self.cpu.sleep_cycles() > 0 {
            self.cpu.cycle()?;
        }
        Ok(())
    }

    /// Run until breakpoint or error.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one frame's worth of continuous execution.
    pub fn tick(&mut self) {
        for _ in 0..INSTRUCTIONS_PER_TICK {
            if !self.running {
                return;
            }

            if self.cpu.is_on_fire() {
                self.running = false;
                self.status = format!("On fire after {} cycles", self.cpu.cycles);
                return;
            }

            self.step();
            let pc = self.cpu.regs.pc;
            if self.running && self.breakpoints.contains(&pc) {
                self.running = false;
                self.status = format!("Breakpoint at PC={:04x}", pc);
                return;
            }
        }
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.regs.pc;
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at PC={:04x}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={:04x}", pc);
        }
    }

    /// Reset CPU to initial state. Devices stay attached.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.running = false;
        self.status = match self.cpu.flash(&self.program) {
            Ok(()) => "Reset. Ready.".into(),
            Err(e) => format!("Reset failed: {}", e),
        };
    }

    pub fn scroll_memory(&mut self, rows: isize) {
        self.mem_scroll = self.mem_scroll.saturating_add_signed(rows).min(MEM_ROWS - 1);
    }

    /// Disassembly from the current PC: (address, text, is_current).
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u16, String, bool)> {
        let pc = self.cpu.regs.pc;
        let mut addr = pc;
        (0..lines)
            .map(|_| {
                let (text, len) = disassemble_at(&self.cpu.mem, addr);
                let line = (addr, text, addr == pc);
                addr = addr.wrapping_add(len);
                line
            })
            .collect()
    }
}

/// Run the debugger on a prepared CPU.
pub fn run_debugger(cpu: Cpu, program: Vec<u16>) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(cpu, program);

    // Main loop
    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        let timeout = if app.running { Duration::ZERO } else { Duration::from_millis(50) };
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => app.scroll_memory(-1),
                        KeyCode::Down => app.scroll_memory(1),
                        KeyCode::PageUp => app.scroll_memory(-16),
                        KeyCode::PageDown => app.scroll_memory(16),
                        _ => {}
                    }
                }
            }
        }

        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble;

    fn app(source: &str) -> DebuggerApp {
        let program = assemble(source).unwrap();
        let mut cpu = Cpu::new();
        cpu.flash(&program).unwrap();
        DebuggerApp::new(cpu, program)
    }

    #[test]
    fn test_step_executes_whole_instruction() {
        let mut app = app("ADD A, 0x100\nSET B, 2");
        app.step();
        assert_eq!(app.cpu.regs.a, 0x100);
        assert_eq!(app.cpu.cycles, 3);
        assert!(app.status.contains("ADD A, 0x0100"));
    }

    #[test]
    fn test_run_stops_at_breakpoint() {
        let mut app = app(":loop ADD A, 1\nSET B, A\nSET PC, loop");
        app.step();
        app.toggle_breakpoint();
        assert!(app.breakpoints.contains(&1));

        app.run();
        app.tick();
        assert!(!app.running);
        assert_eq!(app.cpu.regs.pc, 1);
        assert_eq!(app.cpu.regs.a, 2);
    }

    #[test]
    fn test_reset_reflashes_program() {
        let mut app = app("SET [0x10], 7");
        app.step();
        assert_eq!(app.cpu.mem.read(0x10), 7);

        app.reset();
        assert_eq!(app.cpu.mem.read(0x10), 0);
        assert_eq!(app.cpu.regs.pc, 0);
        assert_eq!(app.cpu.mem.read(0), app.program[0]);
    }

    #[test]
    fn test_disassembly_follows_pc() {
        let app = app("SET A, 0x1234\nSET B, 1");
        let lines = app.get_disassembly(2);
        assert_eq!(lines[0], (0, "SET A, 0x1234".to_string(), true));
        assert_eq!(lines[1], (2, "SET B, 1".to_string(), false));
    }

    #[test]
    fn test_memory_scroll_is_clamped() {
        let mut app = app("SET A, 1");
        app.scroll_memory(-5);
        assert_eq!(app.mem_scroll, 0);
        app.scroll_memory(100_000);
        assert_eq!(app.mem_scroll, MEM_ROWS - 1);
    }
}
