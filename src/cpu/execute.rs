//! CPU execution engine for the DCPU-16.
//!
//! Implements the fetch-decode-execute cycle, cycle-cost accounting,
//! interrupt delivery and the hardware bus instructions.

use crate::cpu::decode::{self, BasicOp, DecodeError, Instruction, Operand, SpecialOp};
use crate::cpu::interrupt::{InterruptError, InterruptQueue};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::Register;
use crate::cpu::{Memory, Registers};
use crate::hw::{split_u32, Device, DeviceContext, DeviceHandle, DeviceInfo};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// The interrupt queue overflowed. Nothing runs until [`Cpu::reset`].
    OnFire {
        /// The message that did not fit in the queue.
        message: u16,
    },
}

/// Where a resolved operand reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Register(Register),
    Memory(u16),
    Sp,
    Pc,
    Ex,
    /// Writes are silently dropped.
    Literal(u16),
}

/// The DCPU-16.
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Cycles elapsed since construction or reset.
    pub cycles: u64,
    /// Cycles still owed by the instruction in flight.
    sleep_cycles: u16,
    interrupts: InterruptQueue,
    devices: Vec<Box<dyn Device>>,
}

impl Cpu {
    /// Create a new CPU with zeroed state and no hardware.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            sleep_cycles: 0,
            interrupts: InterruptQueue::new(),
            devices: Vec::new(),
        }
    }

    /// Take ownership of a device and plug it into the next free slot.
    pub fn attach_device<D: Device>(&mut self, device: D) -> DeviceHandle<D> {
        let index = self.devices.len();
        debug!(index, name = device.info().name, "attached device");
        self.devices.push(Box::new(device));
        DeviceHandle::new(index)
    }

    /// Borrow an attached device.
    pub fn device<D: Device>(&self, handle: DeviceHandle<D>) -> Option<&D> {
        self.devices.get(handle.index())?.as_any().downcast_ref()
    }

    /// Mutably borrow an attached device.
    pub fn device_mut<D: Device>(&mut self, handle: DeviceHandle<D>) -> Option<&mut D> {
        self.devices.get_mut(handle.index())?.as_any_mut().downcast_mut()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Identity of the device at `index`.
    pub fn device_info(&self, index: usize) -> Option<DeviceInfo> {
        self.devices.get(index).map(|d| d.info())
    }

    /// Load a program image at address 0, replacing all of memory.
    ///
    /// Oversized images are rejected and leave memory untouched.
    pub fn flash(&mut self, image: &[u16]) -> Result<(), CpuError> {
        self.mem.flash(image)?;
        debug!(words = image.len(), "flashed memory");
        Ok(())
    }

    /// Zero registers, memory and the interrupt queue.
    ///
    /// Attached devices keep their state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.interrupts.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.sleep_cycles = 0;
    }

    /// Queue a software interrupt, exactly as `INT` would.
    pub fn interrupt(&mut self, message: u16) -> Result<(), CpuError> {
        self.ensure_running()?;
        self.raise(message);
        self.ensure_running()
    }

    /// Run the `HWI` handler of device `index` against the live machine state.
    pub fn send_hardware_interrupt(&mut self, index: usize) -> Result<(), CpuError> {
        self.ensure_running()?;
        if self.hardware_interrupt(index) {
            Ok(())
        } else {
            Err(CpuError::NoSuchDevice(index))
        }
    }

    /// Advance the machine by one clock cycle.
    ///
    /// Returns the instruction decoded on this cycle, or `None` while an
    /// earlier multi-cycle instruction is still being paid for. A reserved
    /// opcode is skipped and reported as [`CpuError::Decode`]; the CPU stays
    /// usable. Once on fire, every call fails with [`CpuError::OnFire`].
    pub fn cycle(&mut self) -> Result<Option<Instruction>, CpuError> {
        self.ensure_running()?;
        self.cycles += 1;

        let outcome = if self.sleep_cycles > 0 {
            self.sleep_cycles -= 1;
            Ok(None)
        } else {
            let executed = self.step();
            if self.is_running() {
                self.deliver_interrupt();
            }
            executed.map(Some)
        };

        if self.is_running() {
            self.cycle_devices();
        }
        self.ensure_running()?;
        outcome
    }

    /// Run `max_cycles` cycles, stopping at the first error.
    ///
    /// Returns the number of cycles that completed.
    pub fn run_cycles(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        for _ in 0..max_cycles {
            self.cycle()?;
        }
        Ok(self.cycles - start_cycles)
    }

    /// Fetch, decode and execute the instruction at PC.
    fn step(&mut self) -> Result<Instruction, CpuError> {
        let pc = self.regs.pc;
        let word = self.mem.read(pc);

        let instr = match decode::decode(word) {
            Ok(instr) => instr,
            Err(e) => {
                warn!(pc, word, "reserved instruction skipped");
                self.regs.pc = pc.wrapping_add(decode::instruction_len(word));
                return Err(CpuError::Decode(e));
            }
        };
        self.regs.advance_pc();
        trace!(pc, ?instr, "execute");

        let cost = self.execute(instr);
        self.sleep_cycles = cost - 1;

        Ok(instr)
    }

    /// Execute a decoded instruction, returning its total cost in cycles.
    fn execute(&mut self, instr: Instruction) -> u16 {
        let mut cost = instr.cycles();

        match instr {
            Instruction::Basic { op, b, a } => {
                // a is always resolved before b
                let a_loc = self.resolve(a, &mut cost);
                let a_val = self.load(a_loc);
                let b_loc = self.resolve(b, &mut cost);
                let b_val = self.load(b_loc);

                if !self.execute_basic(op, b_loc, b_val, a_val) {
                    cost += self.skip();
                }
            }
            Instruction::Special { op, a } => {
                let a_loc = self.resolve(a, &mut cost);
                let a_val = self.load(a_loc);
                self.execute_special(op, a_loc, a_val);
            }
        }

        cost
    }

    /// Returns false if a conditional failed.
    fn execute_basic(&mut self, op: BasicOp, b_loc: Location, b: u16, a: u16) -> bool {
        match op {
            BasicOp::Set => self.store(b_loc, a),

            BasicOp::Add => {
                let sum = u32::from(b) + u32::from(a);
                self.store(b_loc, sum as u16);
                self.regs.ex = (sum >> 16) as u16;
            }

            BasicOp::Sub => {
                let (diff, borrow) = b.overflowing_sub(a);
                self.store(b_loc, diff);
                self.regs.ex = if borrow { 0xffff } else { 0 };
            }

            BasicOp::Mul => {
                let product = u32::from(b) * u32::from(a);
                self.store(b_loc, product as u16);
                self.regs.ex = (product >> 16) as u16;
            }

            BasicOp::Mli => {
                let product = i32::from(b as i16) * i32::from(a as i16);
                self.store(b_loc, product as u16);
                self.regs.ex = (product >> 16) as u16;
            }

            BasicOp::Div => {
                if a == 0 {
                    self.store(b_loc, 0);
                    self.regs.ex = 0;
                } else {
                    self.store(b_loc, b / a);
                    self.regs.ex = ((u32::from(b) << 16) / u32::from(a)) as u16;
                }
            }

            BasicOp::Dvi => {
                if a == 0 {
                    self.store(b_loc, 0);
                    self.regs.ex = 0;
                } else {
                    let (b, a) = (i64::from(b as i16), i64::from(a as i16));
                    // Integer division rounds towards zero
                    self.store(b_loc, (b / a) as u16);
                    self.regs.ex = ((b << 16) / a) as u16;
                }
            }

            BasicOp::Mod => {
                let result = if a == 0 { 0 } else { b % a };
                self.store(b_loc, result);
            }

            BasicOp::Mdi => {
                let result = if a == 0 { 0 } else { (b as i16).wrapping_rem(a as i16) as u16 };
                self.store(b_loc, result);
            }

            BasicOp::And => self.store(b_loc, b & a),
            BasicOp::Bor => self.store(b_loc, b | a),
            BasicOp::Xor => self.store(b_loc, b ^ a),

            BasicOp::Shr => {
                let wide = u64::from(b) << 16;
                let shifted = if a < 48 { wide >> a } else { 0 };
                self.store(b_loc, (shifted >> 16) as u16);
                self.regs.ex = shifted as u16;
            }

            BasicOp::Asr => {
                let wide = i64::from(b as i16) << 16;
                let shifted = wide >> a.min(63);
                self.store(b_loc, (shifted >> 16) as u16);
                self.regs.ex = shifted as u16;
            }

            BasicOp::Shl => {
                let shifted = if a < 32 { u64::from(b) << a } else { 0 };
                self.store(b_loc, shifted as u16);
                self.regs.ex = (shifted >> 16) as u16;
            }

            BasicOp::Ifb => return b & a != 0,
            BasicOp::Ifc => return b & a == 0,
            BasicOp::Ife => return b == a,
            BasicOp::Ifn => return b != a,
            BasicOp::Ifg => return b > a,
            BasicOp::Ifa => return (b as i16) > (a as i16),
            BasicOp::Ifl => return b < a,
            BasicOp::Ifu => return (b as i16) < (a as i16),

            BasicOp::Adx => {
                let sum = u32::from(b) + u32::from(a) + u32::from(self.regs.ex);
                self.store(b_loc, sum as u16);
                self.regs.ex = u16::from(sum > 0xffff);
            }

            BasicOp::Sbx => {
                let result = i32::from(b) - i32::from(a) + i32::from(self.regs.ex);
                self.store(b_loc, result as u16);
                self.regs.ex = if result < 0 {
                    0xffff
                } else if result > 0xffff {
                    0x0001
                } else {
                    0
                };
            }

            BasicOp::Sti => {
                self.store(b_loc, a);
                self.regs.i = self.regs.i.wrapping_add(1);
                self.regs.j = self.regs.j.wrapping_add(1);
            }

            BasicOp::Std => {
                self.store(b_loc, a);
                self.regs.i = self.regs.i.wrapping_sub(1);
                self.regs.j = self.regs.j.wrapping_sub(1);
            }
        }

        true
    }

    fn execute_special(&mut self, op: SpecialOp, a_loc: Location, a: u16) {
        match op {
            SpecialOp::Jsr => {
                let ret = self.regs.pc;
                self.push(ret);
                self.regs.pc = a;
            }

            SpecialOp::Int => self.raise(a),

            SpecialOp::Iag => self.store(a_loc, self.regs.ia),

            SpecialOp::Ias => self.regs.ia = a,

            SpecialOp::Rfi => {
                self.interrupts.set_queueing(false);
                self.regs.a = self.pop();
                self.regs.pc = self.pop();
            }

            SpecialOp::Iaq => self.interrupts.set_queueing(a != 0),

            SpecialOp::Hwn => self.store(a_loc, self.devices.len() as u16),

            SpecialOp::Hwq => {
                if let Some(info) = self.device_info(usize::from(a)) {
                    (self.regs.a, self.regs.b) = split_u32(info.hardware_id);
                    self.regs.c = info.version;
                    (self.regs.x, self.regs.y) = split_u32(info.manufacturer);
                }
            }

            SpecialOp::Hwi => {
                if !self.hardware_interrupt(usize::from(a)) {
                    debug!(index = a, "HWI to missing device ignored");
                }
            }
        }
    }

    /// Turn an operand into a location, consuming its next word if any.
    fn resolve(&mut self, operand: Operand, cost: &mut u16) -> Location {
        match operand {
            Operand::Register(r) => Location::Register(r),
            Operand::Indirect(r) => Location::Memory(self.regs.get(r)),
            Operand::IndirectOffset(r) => {
                let offset = self.next_word(cost);
                Location::Memory(self.regs.get(r).wrapping_add(offset))
            }
            Operand::Push => Location::Memory(self.regs.push_addr()),
            Operand::Pop => Location::Memory(self.regs.pop_addr()),
            Operand::Peek => Location::Memory(self.regs.sp),
            Operand::Pick => {
                let offset = self.next_word(cost);
                Location::Memory(self.regs.sp.wrapping_add(offset))
            }
            Operand::Sp => Location::Sp,
            Operand::Pc => Location::Pc,
            Operand::Ex => Location::Ex,
            Operand::IndirectNext => Location::Memory(self.next_word(cost)),
            Operand::Next => Location::Literal(self.next_word(cost)),
            Operand::Literal(value) => Location::Literal(value),
        }
    }

    fn next_word(&mut self, cost: &mut u16) -> u16 {
        *cost += 1;
        let addr = self.regs.advance_pc();
        self.mem.read(addr)
    }

    fn load(&self, loc: Location) -> u16 {
        match loc {
            Location::Register(r) => self.regs.get(r),
            Location::Memory(addr) => self.mem.read(addr),
            Location::Sp => self.regs.sp,
            Location::Pc => self.regs.pc,
            Location::Ex => self.regs.ex,
            Location::Literal(value) => value,
        }
    }

    fn store(&mut self, loc: Location, value: u16) {
        match loc {
            Location::Register(r) => self.regs.set(r, value),
            Location::Memory(addr) => self.mem.write(addr, value),
            Location::Sp => self.regs.sp = value,
            Location::Pc => self.regs.pc = value,
            Location::Ex => self.regs.ex = value,
            Location::Literal(_) => {}
        }
    }

    fn push(&mut self, value: u16) {
        let addr = self.regs.push_addr();
        self.mem.write(addr, value);
    }

    fn pop(&mut self) -> u16 {
        let addr = self.regs.pop_addr();
        self.mem.read(addr)
    }

    /// Skip the instruction at PC, and any conditionals chained after it.
    ///
    /// Returns the cycles spent skipping.
    fn skip(&mut self) -> u16 {
        let mut skipped = 0;
        loop {
            let word = self.mem.read(self.regs.pc);
            self.regs.pc = self.regs.pc.wrapping_add(decode::instruction_len(word));
            skipped += 1;
            if !decode::is_conditional_word(word) {
                return skipped;
            }
        }
    }

    /// Queue an interrupt; an overflowing queue sets the CPU on fire.
    fn raise(&mut self, message: u16) {
        match self.interrupts.push(message) {
            Ok(()) => trace!(message, pending = self.interrupts.len(), "interrupt queued"),
            Err(InterruptError::Overflow { message }) => {
                error!(message, pc = self.regs.pc, "interrupt queue overflow, DCPU is on fire");
                self.state = CpuState::OnFire { message };
            }
        }
    }

    /// Deliver at most one queued interrupt.
    fn deliver_interrupt(&mut self) {
        let Some(message) = self.interrupts.next_deliverable() else {
            return;
        };

        if self.regs.ia == 0 {
            trace!(message, "interrupt dropped, IA is zero");
            return;
        }

        debug!(message, ia = self.regs.ia, "delivering interrupt");
        self.interrupts.set_queueing(true);
        let (pc, a) = (self.regs.pc, self.regs.a);
        self.push(pc);
        self.push(a);
        self.regs.pc = self.regs.ia;
        self.regs.a = message;
    }

    fn cycle_devices(&mut self) {
        for index in 0..self.devices.len() {
            if let Some(message) = self.devices[index].cycle() {
                trace!(index, message, "device raised interrupt");
                self.raise(message);
                if !self.is_running() {
                    return;
                }
            }
        }
    }

    /// Returns false if there is no device at `index`.
    fn hardware_interrupt(&mut self, index: usize) -> bool {
        let Some(device) = self.devices.get_mut(index) else {
            return false;
        };
        let mut ctx = DeviceContext {
            regs: &mut self.regs,
            mem: &mut self.mem,
        };
        device.interrupt(&mut ctx);
        true
    }

    fn ensure_running(&self) -> Result<(), CpuError> {
        match self.state {
            CpuState::Running => Ok(()),
            CpuState::OnFire { message } => Err(CpuError::OnFire { message }),
        }
    }

    /// Pending interrupt messages in delivery order.
    pub fn pending_interrupts(&self) -> impl Iterator<Item = u16> + '_ {
        self.interrupts.iter()
    }

    /// True while interrupts are held in the queue rather than delivered.
    pub fn is_queueing(&self) -> bool {
        self.interrupts.is_queueing()
    }

    pub fn sleep_cycles(&self) -> u16 {
        self.sleep_cycles
    }

    pub fn is_on_fire(&self) -> bool {
        matches!(self.state, CpuState::OnFire { .. })
    }

    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Serializable view of everything except memory and device internals.
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            regs: self.regs.clone(),
            state: self.state,
            cycles: self.cycles,
            sleep_cycles: self.sleep_cycles,
            queueing: self.interrupts.is_queueing(),
            pending_interrupts: self.interrupts.iter().collect(),
            devices: self.devices.iter().map(|d| d.info()).collect(),
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("pending_interrupts", &self.interrupts.len())
            .field("devices", &self.devices)
            .finish()
    }
}

/// Point-in-time CPU state, for dumps and front-ends.
#[derive(Debug, Clone, Serialize)]
pub struct CpuSnapshot {
    pub regs: Registers,
    pub state: CpuState,
    pub cycles: u64,
    pub sleep_cycles: u16,
    pub queueing: bool,
    pub pending_interrupts: Vec<u16>,
    pub devices: Vec<DeviceInfo>,
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("the DCPU is on fire (interrupt queue overflowed on message {message:#06x})")]
    OnFire { message: u16 },

    #[error("memory error: {0}")]
    MemoryError(#[from] MemoryError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("no device attached at index {0}")]
    NoSuchDevice(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use crate::cpu::interrupt::INTERRUPT_QUEUE_CAPACITY;
    use crate::hw::{Clock, Floppy, FloppyDisk};
    use proptest::prelude::*;
    use std::any::Any;
    use tracing_test::traced_test;

    fn basic(op: BasicOp, b: Operand, a: Operand) -> u16 {
        encode(&Instruction::Basic { op, b, a })
    }

    fn special(op: SpecialOp, a: Operand) -> u16 {
        encode(&Instruction::Special { op, a })
    }

    fn reg(r: Register) -> Operand {
        Operand::Register(r)
    }

    fn lit(value: u16) -> Operand {
        Operand::short_literal(value).unwrap()
    }

    fn cpu_with(program: &[u16]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.flash(program).unwrap();
        cpu
    }

    /// Cycle until `count` instructions have been decoded.
    fn run_instructions(cpu: &mut Cpu, count: usize) {
        let mut executed = 0;
        while executed < count {
            if cpu.cycle().unwrap().is_some() {
                executed += 1;
            }
        }
    }

    /// Run `op A, B` with the given inputs; returns (A, EX).
    fn binop(op: BasicOp, b: u16, a: u16, ex: u16) -> (u16, u16) {
        let mut cpu = cpu_with(&[basic(op, reg(Register::A), reg(Register::B))]);
        cpu.regs.a = b;
        cpu.regs.b = a;
        cpu.regs.ex = ex;
        run_instructions(&mut cpu, 1);
        (cpu.regs.a, cpu.regs.ex)
    }

    /// Test device raising `message` every `period` cycles, `limit` times.
    #[derive(Debug)]
    struct Beacon {
        period: u32,
        elapsed: u32,
        message: u16,
        limit: u32,
        hits: u32,
    }

    impl Beacon {
        fn new(period: u32, message: u16) -> Self {
            Self { period, elapsed: 0, message, limit: u32::MAX, hits: 0 }
        }

        fn limit(mut self, limit: u32) -> Self {
            self.limit = limit;
            self
        }
    }

    impl Device for Beacon {
        fn info(&self) -> DeviceInfo {
            DeviceInfo {
                hardware_id: 0xbea0_0001,
                version: 7,
                manufacturer: 0x1234_5678,
                name: "Beacon",
            }
        }

        fn interrupt(&mut self, ctx: &mut DeviceContext<'_>) {
            self.hits += 1;
            ctx.regs.b = ctx.regs.a.wrapping_mul(2);
            ctx.mem.write(0x8000, 0xabcd);
        }

        fn cycle(&mut self) -> Option<u16> {
            self.elapsed += 1;
            if self.elapsed == self.period && self.limit > 0 {
                self.elapsed = 0;
                self.limit -= 1;
                Some(self.message)
            } else {
                None
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_set_loop_program() {
        // SET A, 5 / SET B, A / SET PC, 0
        let mut cpu = cpu_with(&[
            basic(BasicOp::Set, reg(Register::A), lit(5)),
            basic(BasicOp::Set, reg(Register::B), reg(Register::A)),
            basic(BasicOp::Set, Operand::Pc, lit(0)),
        ]);

        for _ in 0..3 {
            cpu.cycle().unwrap();
        }
        assert_eq!(cpu.regs.a, 5);
        assert_eq!(cpu.regs.b, 5);
        assert_eq!(cpu.regs.pc, 0);

        for loop_count in 1..=4 {
            cpu.run_cycles(3).unwrap();
            assert_eq!(cpu.regs.pc, 0, "loop {loop_count}");
        }
        assert_eq!(cpu.cycles, 15);
    }

    #[test]
    fn test_arithmetic_ex() {
        let cases = [
            // (op, b, a, ex in, result, ex out)
            (BasicOp::Add, 0xffff, 0x0001, 0, 0x0000, 0x0001),
            (BasicOp::Add, 0x1234, 0x0001, 0, 0x1235, 0x0000),
            (BasicOp::Sub, 0x0000, 0x0001, 0, 0xffff, 0xffff),
            (BasicOp::Sub, 0x0005, 0x0003, 0, 0x0002, 0x0000),
            (BasicOp::Mul, 0xffff, 0xffff, 0, 0x0001, 0xfffe),
            (BasicOp::Mli, 0xffff, 0x0002, 0, 0xfffe, 0xffff),
            (BasicOp::Mli, 0x8000, 0x8000, 0, 0x0000, 0x4000),
            (BasicOp::Div, 0x0001, 0x0002, 0, 0x0000, 0x8000),
            (BasicOp::Div, 0x0007, 0x0000, 9, 0x0000, 0x0000),
            (BasicOp::Dvi, 0xfff9, 0x0002, 0, 0xfffd, 0x8000),
            (BasicOp::Dvi, 0x8000, 0xffff, 0, 0x8000, 0x0000),
            (BasicOp::Mod, 0x0007, 0x0000, 0, 0x0000, 0x0000),
            (BasicOp::Mod, 0x0007, 0x0004, 0, 0x0003, 0x0000),
            (BasicOp::Mdi, 0xfff9, 0x0010, 0, 0xfff9, 0x0000),
            (BasicOp::Shl, 0x8001, 0x0001, 0, 0x0002, 0x0001),
            (BasicOp::Shr, 0x0003, 0x0001, 0, 0x0001, 0x8000),
            (BasicOp::Shr, 0xffff, 0x0040, 0, 0x0000, 0x0000),
            (BasicOp::Asr, 0x8000, 0x0004, 0, 0xf800, 0x0000),
            (BasicOp::Adx, 0xffff, 0x0000, 1, 0x0000, 0x0001),
            (BasicOp::Adx, 0x0001, 0x0001, 1, 0x0003, 0x0000),
            (BasicOp::Sbx, 0x0000, 0x0001, 0, 0xffff, 0xffff),
            (BasicOp::Sbx, 0xffff, 0x0000, 1, 0x0000, 0x0001),
            (BasicOp::And, 0xff0f, 0x0ff0, 0, 0x0f00, 0x0000),
            (BasicOp::Bor, 0xf000, 0x000f, 0, 0xf00f, 0x0000),
            (BasicOp::Xor, 0xffff, 0x0f0f, 0, 0xf0f0, 0x0000),
        ];

        for (op, b, a, ex_in, result, ex_out) in cases {
            assert_eq!(
                binop(op, b, a, ex_in),
                (result, ex_out),
                "{} {b:#06x}, {a:#06x}",
                op.mnemonic()
            );
        }
    }

    proptest! {
        #[test]
        fn prop_add_sub_mul_ex(b: u16, a: u16) {
            let sum = u32::from(b) + u32::from(a);
            prop_assert_eq!(binop(BasicOp::Add, b, a, 0), (sum as u16, (sum >> 16) as u16));

            let expected_ex = if a > b { 0xffff } else { 0 };
            prop_assert_eq!(binop(BasicOp::Sub, b, a, 0), (b.wrapping_sub(a), expected_ex));

            let product = u32::from(b) * u32::from(a);
            prop_assert_eq!(binop(BasicOp::Mul, b, a, 0), (product as u16, (product >> 16) as u16));
        }

        #[test]
        fn prop_shl_shr_keep_all_bits(b: u16, shift in 0u16..16) {
            let (low, ex) = binop(BasicOp::Shl, b, shift, 0);
            prop_assert_eq!((u32::from(ex) << 16) | u32::from(low), u32::from(b) << shift);

            let (high, ex) = binop(BasicOp::Shr, b, shift, 0);
            prop_assert_eq!((u32::from(high) << 16) | u32::from(ex), (u32::from(b) << 16) >> shift);
        }
    }

    #[test]
    fn test_failed_conditional_skips_next_instruction() {
        let mut cpu = cpu_with(&[
            basic(BasicOp::Ife, reg(Register::A), lit(1)),
            basic(BasicOp::Set, reg(Register::B), lit(7)),
            basic(BasicOp::Set, reg(Register::C), lit(9)),
        ]);

        run_instructions(&mut cpu, 1);
        // 2 cycles + 1 for the skipped instruction
        assert_eq!(cpu.sleep_cycles(), 2);
        assert_eq!(cpu.regs.pc, 2);

        run_instructions(&mut cpu, 1);
        assert_eq!(cpu.regs.b, 0);
        assert_eq!(cpu.regs.c, 9);
    }

    #[test]
    fn test_passed_conditional_runs_next_instruction() {
        let mut cpu = cpu_with(&[
            basic(BasicOp::Ifg, reg(Register::A), lit(1)),
            basic(BasicOp::Set, reg(Register::B), lit(7)),
        ]);
        cpu.regs.a = 2;

        run_instructions(&mut cpu, 2);
        assert_eq!(cpu.regs.b, 7);
    }

    #[test]
    fn test_skip_steps_over_next_words() {
        let mut cpu = cpu_with(&[
            basic(BasicOp::Ifn, reg(Register::A), reg(Register::A)),
            basic(BasicOp::Set, Operand::IndirectNext, Operand::Next),
            0x1000,
            0x1234,
            basic(BasicOp::Set, reg(Register::C), lit(1)),
        ]);

        run_instructions(&mut cpu, 2);
        assert_eq!(cpu.mem.read(0x1000), 0);
        assert_eq!(cpu.regs.c, 1);
        assert_eq!(cpu.regs.pc, 5);
    }

    #[test]
    fn test_chained_conditionals_are_skipped_together() {
        let mut cpu = cpu_with(&[
            basic(BasicOp::Ife, reg(Register::A), lit(1)),
            basic(BasicOp::Ife, reg(Register::A), lit(0)),
            basic(BasicOp::Set, reg(Register::B), lit(1)),
            basic(BasicOp::Set, reg(Register::C), lit(1)),
        ]);

        run_instructions(&mut cpu, 1);
        // 2 cycles + 2 skipped instructions
        assert_eq!(cpu.sleep_cycles(), 3);

        run_instructions(&mut cpu, 1);
        assert_eq!(cpu.regs.b, 0);
        assert_eq!(cpu.regs.c, 1);
    }

    #[test]
    fn test_next_word_costs_a_cycle() {
        let mut cpu = cpu_with(&[
            basic(BasicOp::Set, reg(Register::A), Operand::Next),
            0x1234,
            basic(BasicOp::Div, reg(Register::A), Operand::IndirectNext),
            0x0100,
        ]);
        cpu.mem.write(0x0100, 2);

        assert!(cpu.cycle().unwrap().is_some());
        assert_eq!(cpu.regs.a, 0x1234);
        assert!(cpu.cycle().unwrap().is_none());

        // DIV (3) + [next word] (1)
        assert!(cpu.cycle().unwrap().is_some());
        assert_eq!(cpu.sleep_cycles(), 3);
        cpu.run_cycles(3).unwrap();
        assert_eq!(cpu.regs.a, 0x091a);
        assert_eq!(cpu.regs.pc, 4);
        assert_eq!(cpu.cycles, 6);
    }

    #[test]
    fn test_literal_destination_is_ignored() {
        let mut cpu = cpu_with(&[basic(BasicOp::Add, Operand::Next, lit(1)), 0x0005]);
        run_instructions(&mut cpu, 1);
        assert_eq!(cpu.mem.read(1), 0x0005);
        assert_eq!(cpu.regs.ex, 0);
    }

    #[test]
    fn test_stack_push_pop_peek_pick() {
        let mut cpu = cpu_with(&[
            basic(BasicOp::Set, Operand::Push, lit(5)),
            basic(BasicOp::Set, Operand::Push, lit(6)),
            basic(BasicOp::Set, reg(Register::A), Operand::Peek),
            basic(BasicOp::Set, reg(Register::B), Operand::Pick),
            1,
            basic(BasicOp::Set, reg(Register::C), Operand::Pop),
        ]);

        run_instructions(&mut cpu, 5);
        assert_eq!(cpu.regs.a, 6);
        assert_eq!(cpu.regs.b, 5);
        assert_eq!(cpu.regs.c, 6);
        assert_eq!(cpu.regs.sp, 0xffff);
    }

    #[test]
    fn test_jsr_and_return() {
        let mut cpu = cpu_with(&[
            special(SpecialOp::Jsr, lit(4)),
            basic(BasicOp::Set, reg(Register::B), lit(2)),
            basic(BasicOp::Set, Operand::Pc, lit(2)),
            0,
            // subroutine
            basic(BasicOp::Set, reg(Register::A), lit(1)),
            basic(BasicOp::Set, Operand::Pc, Operand::Pop),
        ]);

        run_instructions(&mut cpu, 4);
        assert_eq!(cpu.regs.a, 1);
        assert_eq!(cpu.regs.b, 2);
        assert_eq!(cpu.regs.sp, 0);
    }

    #[test]
    fn test_sti_std() {
        let mut cpu = cpu_with(&[
            basic(BasicOp::Sti, Operand::Indirect(Register::I), reg(Register::A)),
            basic(BasicOp::Std, Operand::Indirect(Register::J), reg(Register::A)),
        ]);
        cpu.regs.a = 0x55;
        cpu.regs.i = 0x100;
        cpu.regs.j = 0x200;

        run_instructions(&mut cpu, 2);
        assert_eq!(cpu.mem.read(0x100), 0x55);
        assert_eq!(cpu.mem.read(0x201), 0x55);
        assert_eq!((cpu.regs.i, cpu.regs.j), (0x100, 0x200));
    }

    /// Handler at 0x10: records A at [I], advances I, returns.
    fn interrupt_recorder() -> Cpu {
        let mut program = vec![basic(BasicOp::Set, Operand::Pc, lit(0))];
        program.resize(0x10, 0);
        program.extend([
            basic(BasicOp::Set, Operand::Indirect(Register::I), reg(Register::A)),
            basic(BasicOp::Add, reg(Register::I), lit(1)),
            special(SpecialOp::Rfi, lit(0)),
        ]);
        let mut cpu = cpu_with(&program);
        cpu.regs.ia = 0x10;
        cpu.regs.i = 0x200;
        cpu
    }

    #[test]
    fn test_interrupt_delivery_pushes_state() {
        let mut cpu = interrupt_recorder();
        cpu.regs.a = 0x7777;
        cpu.interrupt(0x42).unwrap();

        cpu.cycle().unwrap();
        assert_eq!(cpu.regs.pc, 0x10);
        assert_eq!(cpu.regs.a, 0x42);
        assert!(cpu.is_queueing());
        assert_eq!(cpu.regs.sp, 0xfffe);
        assert_eq!(cpu.mem.read(0xffff), 0); // PC after SET PC, 0
        assert_eq!(cpu.mem.read(0xfffe), 0x7777);

        // handler: SET, ADD, RFI
        run_instructions(&mut cpu, 3);
        assert_eq!(cpu.mem.read(0x200), 0x42);
        assert_eq!(cpu.regs.a, 0x7777);
        assert_eq!(cpu.regs.pc, 0);
        assert_eq!(cpu.regs.sp, 0);
        assert!(!cpu.is_queueing());
    }

    #[test]
    fn test_interrupts_delivered_in_fifo_order() {
        let mut cpu = interrupt_recorder();
        cpu.attach_device(Beacon::new(5, 0xb0).limit(4));

        cpu.interrupt(1).unwrap();
        cpu.interrupt(2).unwrap();
        // the first beacon message arrives on cycle 5
        cpu.run_cycles(7).unwrap();
        cpu.interrupt(3).unwrap();
        cpu.run_cycles(200).unwrap();

        assert_eq!(cpu.pending_interrupts().count(), 0);
        let recorded: Vec<u16> = (0x200..cpu.regs.i).map(|addr| cpu.mem.read(addr)).collect();
        assert_eq!(recorded, vec![1, 2, 0xb0, 3, 0xb0, 0xb0, 0xb0]);
    }

    #[test]
    fn test_queue_order_matches_arrival() {
        let mut cpu = cpu_with(&[special(SpecialOp::Iaq, lit(1)), basic(BasicOp::Set, Operand::Pc, lit(1))]);
        cpu.attach_device(Beacon::new(2, 0xb0));

        cpu.interrupt(1).unwrap();
        cpu.run_cycles(2).unwrap();
        cpu.interrupt(2).unwrap();
        cpu.run_cycles(2).unwrap();

        assert_eq!(cpu.pending_interrupts().collect::<Vec<_>>(), vec![1, 0xb0, 2, 0xb0]);
    }

    #[test]
    fn test_interrupt_dropped_when_ia_zero() {
        let mut cpu = cpu_with(&[basic(BasicOp::Set, Operand::Pc, lit(0))]);
        cpu.interrupt(9).unwrap();

        cpu.cycle().unwrap();
        assert_eq!(cpu.pending_interrupts().count(), 0);
        assert_eq!(cpu.regs.pc, 0);
        assert_eq!(cpu.regs.sp, 0);
    }

    #[test]
    fn test_int_instruction_queues_software_interrupt() {
        let mut cpu = interrupt_recorder();
        cpu.flash(&[special(SpecialOp::Int, lit(0x1e))]).unwrap();
        cpu.regs.ia = 0;

        cpu.cycle().unwrap();
        // IA was zero: the message is dropped at delivery
        assert_eq!(cpu.pending_interrupts().count(), 0);
        assert_eq!(cpu.sleep_cycles(), 3);
    }

    #[test]
    fn test_iag_ias() {
        let mut cpu = cpu_with(&[
            special(SpecialOp::Ias, Operand::Next),
            0x4000,
            special(SpecialOp::Iag, reg(Register::B)),
        ]);

        run_instructions(&mut cpu, 2);
        assert_eq!(cpu.regs.ia, 0x4000);
        assert_eq!(cpu.regs.b, 0x4000);
    }

    #[traced_test]
    #[test]
    fn test_queue_overflow_sets_cpu_on_fire() {
        let mut cpu = cpu_with(&[basic(BasicOp::Set, reg(Register::A), lit(1))]);
        for n in 0..INTERRUPT_QUEUE_CAPACITY {
            cpu.interrupt(n as u16).unwrap();
        }

        assert_eq!(cpu.interrupt(0x0bad), Err(CpuError::OnFire { message: 0x0bad }));
        assert!(cpu.is_on_fire());
        assert!(logs_contain("on fire"));

        let regs = cpu.regs.clone();
        let mem = cpu.mem.clone();
        for _ in 0..3 {
            assert_eq!(cpu.cycle(), Err(CpuError::OnFire { message: 0x0bad }));
        }
        assert_eq!(cpu.regs, regs);
        assert_eq!(cpu.mem, mem);
        assert_eq!(cpu.cycles, 0);
        assert_eq!(cpu.interrupt(1), Err(CpuError::OnFire { message: 0x0bad }));
    }

    #[test]
    fn test_int_loop_while_queueing_catches_fire() {
        let mut cpu = cpu_with(&[
            special(SpecialOp::Iaq, lit(1)),
            special(SpecialOp::Int, lit(5)),
            basic(BasicOp::Set, Operand::Pc, lit(1)),
        ]);

        let mut result = Ok(0);
        for _ in 0..2000 {
            result = cpu.cycle().map(|_| 0);
            if result.is_err() {
                break;
            }
        }

        assert_eq!(result, Err(CpuError::OnFire { message: 5 }));
        assert_eq!(cpu.pending_interrupts().count(), INTERRUPT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_device_overflow_catches_fire() {
        let mut cpu = cpu_with(&[
            special(SpecialOp::Iaq, lit(1)),
            basic(BasicOp::Set, Operand::Pc, lit(1)),
        ]);
        cpu.attach_device(Beacon::new(1, 9));

        let mut cycles = 0;
        while !cpu.is_on_fire() && cycles < 2000 {
            let _ = cpu.cycle();
            cycles += 1;
        }

        assert_eq!(cycles, INTERRUPT_QUEUE_CAPACITY + 1);
        assert_eq!(cpu.state, CpuState::OnFire { message: 9 });
        assert_eq!(cpu.pending_interrupts().count(), INTERRUPT_QUEUE_CAPACITY);

        let regs = cpu.regs.clone();
        assert_eq!(cpu.cycle(), Err(CpuError::OnFire { message: 9 }));
        assert_eq!(cpu.regs, regs);
    }

    #[test]
    fn test_reserved_opcode_is_recoverable() {
        let mut cpu = cpu_with(&[0x0018, basic(BasicOp::Set, reg(Register::A), lit(1))]);

        assert!(matches!(cpu.cycle(), Err(CpuError::Decode(DecodeError::InvalidOpcode { .. }))));
        assert!(cpu.is_running());
        assert_eq!(cpu.regs.pc, 1);

        assert!(cpu.cycle().unwrap().is_some());
        assert_eq!(cpu.regs.a, 1);
    }

    #[test]
    fn test_flash_oversized_image_leaves_state() {
        let mut cpu = cpu_with(&[1, 2, 3]);
        let image = vec![0xffff; 0x10001];

        assert!(matches!(cpu.flash(&image), Err(CpuError::MemoryError(_))));
        assert_eq!(cpu.mem.read(2), 3);
    }

    #[test]
    fn test_reset_keeps_devices() {
        let mut cpu = cpu_with(&[
            special(SpecialOp::Iaq, lit(1)),
            basic(BasicOp::Set, Operand::Pc, lit(1)),
        ]);
        let clock = cpu.attach_device(Clock::new());
        cpu.regs.x = 10;
        cpu.send_hardware_interrupt(clock.index()).unwrap();
        cpu.regs.ia = 0x100;
        cpu.interrupt(4).unwrap();
        cpu.run_cycles(3).unwrap();
        assert!(cpu.is_queueing());
        assert_eq!(cpu.pending_interrupts().count(), 1);

        cpu.reset();

        assert_eq!(cpu.regs, Registers::new());
        assert!(cpu.mem.as_slice().iter().all(|w| *w == 0));
        assert_eq!(cpu.pending_interrupts().count(), 0);
        assert!(!cpu.is_queueing());
        assert_eq!(cpu.cycles, 0);
        assert_eq!(cpu.device_count(), 1);
        assert_eq!(cpu.device(clock).map(|c| c.cycles_per_tick()), Some(10));
    }

    #[test]
    fn test_hwn_hwq_hwi() {
        let mut cpu = cpu_with(&[
            special(SpecialOp::Hwn, reg(Register::Z)),
            special(SpecialOp::Hwq, lit(1)),
            basic(BasicOp::Set, reg(Register::A), lit(21)),
            special(SpecialOp::Hwi, lit(1)),
            special(SpecialOp::Hwi, lit(9)),
        ]);
        cpu.attach_device(Clock::new());
        let beacon = cpu.attach_device(Beacon::new(1000, 0));

        run_instructions(&mut cpu, 2);
        assert_eq!(cpu.regs.z, 2);
        assert_eq!((cpu.regs.a, cpu.regs.b), (0x0001, 0xbea0));
        assert_eq!(cpu.regs.c, 7);
        assert_eq!((cpu.regs.x, cpu.regs.y), (0x5678, 0x1234));

        run_instructions(&mut cpu, 3);
        assert_eq!(cpu.regs.b, 42);
        assert_eq!(cpu.mem.read(0x8000), 0xabcd);
        assert_eq!(cpu.device(beacon).map(|b| b.hits), Some(1));
        assert!(cpu.is_running());
    }

    #[test]
    fn test_send_hardware_interrupt_unknown_device() {
        let mut cpu = Cpu::new();
        assert_eq!(cpu.send_hardware_interrupt(0), Err(CpuError::NoSuchDevice(0)));
    }

    #[test]
    fn test_devices_cycle_while_sleeping() {
        let mut cpu = cpu_with(&[basic(BasicOp::Div, reg(Register::A), lit(1))]);
        let clock = cpu.attach_device(Clock::new());
        cpu.regs.x = 3;
        cpu.send_hardware_interrupt(clock.index()).unwrap();

        cpu.run_cycles(3).unwrap();
        assert_eq!(cpu.device(clock).map(|c| c.ticks()), Some(1));
    }

    #[test]
    fn test_clock_interrupt_end_to_end() {
        let mut cpu = cpu_with(&[basic(BasicOp::Set, Operand::Pc, lit(0))]);
        let clock = cpu.attach_device(Clock::new());

        // period = 10 cycles
        cpu.regs.a = 0;
        cpu.regs.x = 10;
        cpu.send_hardware_interrupt(clock.index()).unwrap();
        // interrupt message = 0x42
        cpu.regs.a = 2;
        cpu.regs.x = 0x42;
        cpu.send_hardware_interrupt(clock.index()).unwrap();
        cpu.regs.a = 0;
        cpu.regs.x = 0;
        cpu.regs.ia = 0x100;

        cpu.run_cycles(10).unwrap();
        assert_eq!(cpu.pending_interrupts().collect::<Vec<_>>(), vec![0x42]);
        assert_eq!(cpu.regs.pc, 0);

        cpu.cycle().unwrap();
        assert_eq!(cpu.pending_interrupts().count(), 0);
        assert_eq!(cpu.regs.pc, 0x100);
        assert_eq!(cpu.regs.a, 0x42);
    }

    #[test]
    fn test_floppy_read_end_to_end() {
        let mut cpu = Cpu::new();
        let mut disk = FloppyDisk::blank(false);
        disk.sector_mut(0).unwrap()[..3].copy_from_slice(&[0xaaaa, 0xbbbb, 0xcccc]);
        let floppy = cpu.attach_device(Floppy::with_disk(disk));

        cpu.regs.a = 2;
        cpu.regs.x = 0;
        cpu.regs.y = 0x1000;
        cpu.send_hardware_interrupt(floppy.index()).unwrap();

        assert_eq!(cpu.regs.b, 1);
        let window = cpu.mem.window(0x1000, Floppy::SECTOR_SIZE).unwrap();
        let drive = cpu.device(floppy).unwrap();
        assert_eq!(Some(window), drive.disk().and_then(|d| d.sector(0)));
    }

    #[test]
    fn test_floppy_via_program() {
        // SET A, 2 / SET X, 1 / SET Y, 0x2000 / HWI 0
        let mut cpu = cpu_with(&[
            basic(BasicOp::Set, reg(Register::A), lit(2)),
            basic(BasicOp::Set, reg(Register::X), lit(1)),
            basic(BasicOp::Set, reg(Register::Y), Operand::Next),
            0x2000,
            special(SpecialOp::Hwi, lit(0)),
        ]);
        let mut disk = FloppyDisk::blank(true);
        disk.sector_mut(1).unwrap()[511] = 0x5150;
        cpu.attach_device(Floppy::with_disk(disk));

        run_instructions(&mut cpu, 4);
        assert_eq!(cpu.regs.b, 1);
        assert_eq!(cpu.mem.read(0x2000 + 511), 0x5150);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut cpu = cpu_with(&[basic(BasicOp::Set, reg(Register::A), lit(5))]);
        cpu.attach_device(Clock::new());
        cpu.cycle().unwrap();

        let json = serde_json::to_value(cpu.snapshot()).unwrap();
        assert_eq!(json["regs"]["a"], 5);
        assert_eq!(json["state"], "Running");
        assert_eq!(json["devices"][0]["hardware_id"], 0x12d0_b402);
    }
}
