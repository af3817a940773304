//! WebAssembly bindings for the DCPU-16 emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.
//! The wrapped CPU has a clock and a SPED-3 display attached, in that order.

use wasm_bindgen::prelude::*;
use crate::{Cpu, Clock, Display};
use crate::asm::{assemble, disassemble, disassemble_at};
use crate::hw::DeviceHandle;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn js_error(e: impl std::fmt::Display) -> JsError {
    JsError::new(&e.to_string())
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    program: Vec<u16>,
    display: DeviceHandle<Display>,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        let mut cpu = Cpu::new();
        cpu.attach_device(Clock::new());
        let display = cpu.attach_device(Display::new());
        Self {
            cpu,
            program: Vec::new(),
            display,
        }
    }

    /// Load a program from assembly source code. Returns its length in words.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let words = assemble(source).map_err(js_error)?;
        self.load_words(&words)?;
        Ok(words.len())
    }

    /// Load a program image.
    #[wasm_bindgen]
    pub fn load_words(&mut self, words: &[u16]) -> Result<(), JsError> {
        self.cpu.reset();
        self.cpu.flash(words).map_err(js_error)?;
        self.program = words.to_vec();
        Ok(())
    }

    /// Execute one whole instruction. Returns its disassembly.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        let (text, _) = disassemble_at(&self.cpu.mem, self.cpu.regs.pc);
        while self.cpu.cycle().map_err(js_error)?.is_none() {}
        while self.cpu.sleep_cycles() > 0 {
            self.cpu.cycle().map_err(js_error)?;
        }
        Ok(text)
    }

    /// Run up to `max_cycles` cycles, stopping early on fire. Decode errors
    /// are skipped over. Returns the total cycle count.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> u64 {
        for _ in 0..max_cycles {
            if self.cpu.is_on_fire() {
                break;
            }
            let _ = self.cpu.cycle();
        }
        self.cpu.cycles
    }

    /// Queue a software interrupt.
    #[wasm_bindgen]
    pub fn interrupt(&mut self, message: u16) -> Result<(), JsError> {
        self.cpu.interrupt(message).map_err(js_error)
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) -> Result<(), JsError> {
        self.cpu.reset();
        self.cpu.flash(&self.program).map_err(js_error)
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if the interrupt queue overflowed.
    #[wasm_bindgen]
    pub fn is_on_fire(&self) -> bool {
        self.cpu.is_on_fire()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> u16 {
        self.cpu.regs.pc
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Get memory word at an address.
    #[wasm_bindgen]
    pub fn memory_at(&self, addr: u16) -> u16 {
        self.cpu.mem.read(addr)
    }

    /// Copy a memory range; the range is clipped at the end of memory.
    #[wasm_bindgen]
    pub fn memory_range(&self, start: u16, len: usize) -> js_sys::Uint16Array {
        let end = (start as usize + len).min(crate::cpu::MEMORY_SIZE);
        js_sys::Uint16Array::from(&self.cpu.mem.as_slice()[start as usize..end])
    }

    /// Get registers as JSON string.
    #[wasm_bindgen]
    pub fn registers_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.cpu.regs).map_err(js_error)
    }

    /// Get the full machine snapshot as JSON string.
    #[wasm_bindgen]
    pub fn snapshot_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.cpu.snapshot()).map_err(js_error)
    }

    /// Get the vertices the display is projecting, as JSON.
    #[wasm_bindgen]
    pub fn display_json(&self) -> Result<String, JsError> {
        let display = self
            .cpu
            .device(self.display)
            .ok_or_else(|| JsError::new("display detached"))?;
        let vertices = display.vertices(&self.cpu.mem);
        serde_json::to_string(&serde_json::json!({
            "rotation": display.rotation(),
            "vertices": vertices,
        }))
        .map_err(js_error)
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code to memory words.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<Vec<u16>, JsError> {
    assemble(source).map_err(js_error)
}

/// Disassemble a program image.
#[wasm_bindgen]
pub fn wasm_disassemble(words: &[u16]) -> String {
    disassemble(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_reflashes_program() {
        let mut wasm = WasmCpu::new();
        assert!(wasm.load_words(&[0x7c01, 0x0030, 0x7f81, 0x0000]).is_ok());
        wasm.run(6);
        assert_eq!(wasm.cpu.regs.a, 0x30);

        wasm.cpu.mem.write(1, 0x1234);
        assert!(wasm.reset().is_ok());
        assert_eq!(wasm.cpu.regs.a, 0);
        assert_eq!(wasm.memory_at(1), 0x0030);
        assert_eq!(wasm.cycles(), 0);
    }
}
