//! Generic clock.
//!
//! Counts CPU cycles and turns them into ticks at a programmable period,
//! optionally raising an interrupt on every tick.
//!
//! | A | action |
//! |---|--------|
//! | 0 | X = cycles per tick; 0 stops the clock. Resets the tick count. |
//! | 1 | C = ticks since the last read (or since the period was set); resets the count. |
//! | 2 | X != 0 turns tick interrupts on with message X, 0 turns them off. |

use crate::hw::{Device, DeviceContext, DeviceInfo};
use std::any::Any;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Clock {
    /// Zero while the clock is stopped.
    cycles_per_tick: u16,
    /// Cycles since the last tick.
    cycles: u16,
    /// Ticks since the period was set or last read.
    ticks: u16,
    interrupt_message: u16,
}

impl Clock {
    pub const HARDWARE_ID: u32 = 0x12d0_b402;
    pub const VERSION: u16 = 0x0001;
    pub const MANUFACTURER: u32 = 0x0000_0000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycles_per_tick(&self) -> u16 {
        self.cycles_per_tick
    }

    pub fn ticks(&self) -> u16 {
        self.ticks
    }

    pub fn interrupt_message(&self) -> u16 {
        self.interrupt_message
    }
}

impl Device for Clock {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            hardware_id: Self::HARDWARE_ID,
            version: Self::VERSION,
            manufacturer: Self::MANUFACTURER,
            name: "Generic Clock (compatible)",
        }
    }

    fn interrupt(&mut self, ctx: &mut DeviceContext<'_>) {
        match ctx.regs.a {
            0 => {
                debug!(period = ctx.regs.x, "clock period set");
                self.cycles_per_tick = ctx.regs.x;
                self.cycles = 0;
                self.ticks = 0;
            }
            1 => {
                ctx.regs.c = if self.cycles_per_tick == 0 { 0 } else { self.ticks };
                self.ticks = 0;
            }
            2 => {
                debug!(message = ctx.regs.x, "clock interrupt message set");
                self.interrupt_message = ctx.regs.x;
            }
            _ => {}
        }
    }

    fn cycle(&mut self) -> Option<u16> {
        if self.cycles_per_tick == 0 {
            return None;
        }

        self.cycles += 1;
        if self.cycles < self.cycles_per_tick {
            return None;
        }

        self.cycles = 0;
        self.ticks = self.ticks.wrapping_add(1);
        (self.interrupt_message != 0).then_some(self.interrupt_message)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{Memory, Registers};

    fn command(clock: &mut Clock, a: u16, x: u16) -> Registers {
        let mut regs = Registers::new();
        let mut mem = Memory::new();
        regs.a = a;
        regs.x = x;
        clock.interrupt(&mut DeviceContext { regs: &mut regs, mem: &mut mem });
        regs
    }

    #[test]
    fn test_stopped_clock_never_ticks() {
        let mut clock = Clock::new();
        for _ in 0..100 {
            assert_eq!(clock.cycle(), None);
        }
        assert_eq!(command(&mut clock, 1, 0).c, 0);
    }

    #[test]
    fn test_ticks_and_read_resets() {
        let mut clock = Clock::new();
        command(&mut clock, 0, 4);

        for _ in 0..10 {
            clock.cycle();
        }
        assert_eq!(command(&mut clock, 1, 0).c, 2);
        assert_eq!(command(&mut clock, 1, 0).c, 0);

        // the cycle counter was not reset by the read
        clock.cycle();
        clock.cycle();
        assert_eq!(command(&mut clock, 1, 0).c, 1);
    }

    #[test]
    fn test_tick_interrupts() {
        let mut clock = Clock::new();
        command(&mut clock, 0, 3);
        command(&mut clock, 2, 0x42);
        assert_eq!(clock.interrupt_message(), 0x42);

        let raised: Vec<Option<u16>> = (0..6).map(|_| clock.cycle()).collect();
        assert_eq!(raised, vec![None, None, Some(0x42), None, None, Some(0x42)]);

        command(&mut clock, 2, 0);
        assert!((0..6).all(|_| clock.cycle().is_none()));
        assert_eq!(clock.ticks(), 4);
    }

    #[test]
    fn test_setting_period_restarts_counting() {
        let mut clock = Clock::new();
        command(&mut clock, 0, 2);
        clock.cycle();
        clock.cycle();
        clock.cycle();

        command(&mut clock, 0, 2);
        assert_eq!(clock.ticks(), 0);
        clock.cycle();
        assert_eq!(clock.ticks(), 0);
        clock.cycle();
        assert_eq!(clock.ticks(), 1);
    }

    #[test]
    fn test_unknown_command_is_ignored() {
        let mut clock = Clock::new();
        let regs = command(&mut clock, 0xffff, 7);
        assert_eq!(regs.c, 0);
        assert_eq!(clock.cycles_per_tick(), 0);
        assert_eq!(clock.info().hardware_id, Clock::HARDWARE_ID);
    }
}
