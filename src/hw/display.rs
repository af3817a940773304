//! Mackapar SPED-3 suspended particle exciter display.
//!
//! The device projects up to 128 vertices mapped from DCPU memory and turns
//! the projection towards a target angle. Rendering is left to the host;
//! [`Display::vertices`] decodes the mapped region.

use crate::cpu::Memory;
use crate::hw::{Device, DeviceContext, DeviceInfo};
use serde::Serialize;
use std::any::Any;
use tracing::{debug, warn};

pub const MAX_VERTICES: u16 = 128;
/// CPU cycles per degree of rotation (50 degrees per second at 100 kHz).
pub const CYCLES_PER_DEGREE: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DisplayState {
    NoData = 0,
    Running = 1,
    Turning = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DisplayErrorCode {
    None = 0,
    Broken = 0xffff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VertexColor {
    Black,
    Red,
    Green,
    Blue,
}

/// One projected point.
///
/// First word: X in the low byte, Y in the high byte. Second word: Z in the
/// low byte, color in bits 8-9, intensity in bit 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Vertex {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub color: VertexColor,
    pub intense: bool,
}

impl Vertex {
    pub fn from_words(first: u16, second: u16) -> Self {
        let color = match (second >> 8) & 0x3 {
            0 => VertexColor::Black,
            1 => VertexColor::Red,
            2 => VertexColor::Green,
            _ => VertexColor::Blue,
        };
        Self {
            x: first as u8,
            y: (first >> 8) as u8,
            z: second as u8,
            color,
            intense: second & 0x400 != 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Display {
    vertex_addr: u16,
    vertex_count: u16,
    /// Degrees, always below 360.
    rotation: u16,
    target_rotation: u16,
    /// Cycles towards the next degree of turning.
    turn_cycles: u32,
    broken: bool,
}

impl Display {
    pub const HARDWARE_ID: u32 = 0x42ba_bf3c;
    pub const VERSION: u16 = 0x0003;
    pub const MANUFACTURER: u32 = 0x1eb3_7e91;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DisplayState {
        if self.vertex_count == 0 {
            DisplayState::NoData
        } else if self.rotation != self.target_rotation {
            DisplayState::Turning
        } else {
            DisplayState::Running
        }
    }

    /// Mapped region as (address, vertex count).
    pub fn mapping(&self) -> (u16, u16) {
        (self.vertex_addr, self.vertex_count)
    }

    pub fn rotation(&self) -> u16 {
        self.rotation
    }

    pub fn target_rotation(&self) -> u16 {
        self.target_rotation
    }

    /// Decode the mapped vertices. Addresses wrap at the end of memory.
    pub fn vertices(&self, mem: &Memory) -> Vec<Vertex> {
        (0..self.vertex_count)
            .map(|n| {
                let addr = self.vertex_addr.wrapping_add(n * 2);
                Vertex::from_words(mem.read(addr), mem.read(addr.wrapping_add(1)))
            })
            .collect()
    }
}

impl Device for Display {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            hardware_id: Self::HARDWARE_ID,
            version: Self::VERSION,
            manufacturer: Self::MANUFACTURER,
            name: "Mackapar Suspended Particle Exciter Display, Rev 3 (SPED-3)",
        }
    }

    fn interrupt(&mut self, ctx: &mut DeviceContext<'_>) {
        match ctx.regs.a {
            0 => {
                ctx.regs.b = self.state() as u16;
                ctx.regs.c = if std::mem::take(&mut self.broken) {
                    DisplayErrorCode::Broken as u16
                } else {
                    DisplayErrorCode::None as u16
                };
            }
            1 => {
                let (addr, count) = (ctx.regs.x, ctx.regs.y);
                if count > MAX_VERTICES {
                    warn!(count, "vertex count over limit");
                    self.broken = true;
                    return;
                }
                debug!(addr, count, "display region mapped");
                self.vertex_addr = addr;
                self.vertex_count = count;
            }
            2 => {
                self.target_rotation = ctx.regs.x % 360;
                debug!(target = self.target_rotation, "display rotating");
            }
            _ => {}
        }
    }

    fn cycle(&mut self) -> Option<u16> {
        if self.rotation == self.target_rotation {
            self.turn_cycles = 0;
            return None;
        }

        self.turn_cycles += 1;
        if self.turn_cycles < CYCLES_PER_DEGREE {
            return None;
        }
        self.turn_cycles = 0;

        let ahead = (self.target_rotation + 360 - self.rotation) % 360;
        self.rotation = if ahead <= 180 {
            (self.rotation + 1) % 360
        } else {
            (self.rotation + 359) % 360
        };
        None
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
    use crate::cpu::Registers;

    fn send(display: &mut Display, mem: &mut Memory, a: u16, x: u16, y: u16) -> Registers {
        let mut regs = Registers::new();
        regs.a = a;
        regs.x = x;
        regs.y = y;
        display.interrupt(&mut DeviceContext { regs: &mut regs, mem });
        regs
    }

    fn spin(display: &mut Display, cycles: u32) {
        for _ in 0..cycles {
            assert_eq!(display.cycle(), None);
        }
    }

    #[test]
    fn test_vertex_decoding() {
        let vertex = Vertex::from_words(0x2010, 0x0630);
        assert_eq!(
            vertex,
            Vertex { x: 0x10, y: 0x20, z: 0x30, color: VertexColor::Green, intense: true }
        );
        assert_eq!(Vertex::from_words(0, 0x0100).color, VertexColor::Red);
        assert!(!Vertex::from_words(0, 0x0300).intense);
    }

    #[test]
    fn test_map_and_poll() {
        let mut display = Display::new();
        let mut mem = Memory::new();
        assert_eq!(send(&mut display, &mut mem, 0, 0, 0).b, DisplayState::NoData as u16);

        mem.write(0x500, 0x0201);
        mem.write(0x501, 0x0103);
        send(&mut display, &mut mem, 1, 0x500, 2);

        let regs = send(&mut display, &mut mem, 0, 0, 0);
        assert_eq!((regs.b, regs.c), (DisplayState::Running as u16, 0));

        let vertices = display.vertices(&mem);
        assert_eq!(vertices.len(), 2);
        assert_eq!((vertices[0].x, vertices[0].y, vertices[0].z), (1, 2, 3));

        send(&mut display, &mut mem, 1, 0x500, 0);
        assert!(display.vertices(&mem).is_empty());
        assert_eq!(display.state(), DisplayState::NoData);
    }

    #[test]
    fn test_too_many_vertices_breaks() {
        let mut display = Display::new();
        let mut mem = Memory::new();
        send(&mut display, &mut mem, 1, 0x100, 4);
        send(&mut display, &mut mem, 1, 0x900, MAX_VERTICES + 1);

        assert_eq!(display.mapping(), (0x100, 4));
        let regs = send(&mut display, &mut mem, 0, 0, 0);
        assert_eq!(regs.c, DisplayErrorCode::Broken as u16);
        assert_eq!(send(&mut display, &mut mem, 0, 0, 0).c, DisplayErrorCode::None as u16);
    }

    #[test]
    fn test_rotation_speed() {
        let mut display = Display::new();
        let mut mem = Memory::new();
        send(&mut display, &mut mem, 1, 0, 1);
        send(&mut display, &mut mem, 2, 3, 0);
        assert_eq!(display.state(), DisplayState::Turning);

        spin(&mut display, CYCLES_PER_DEGREE - 1);
        assert_eq!(display.rotation(), 0);
        spin(&mut display, 1);
        assert_eq!(display.rotation(), 1);

        spin(&mut display, CYCLES_PER_DEGREE * 2);
        assert_eq!(display.rotation(), 3);
        assert_eq!(display.state(), DisplayState::Running);

        spin(&mut display, CYCLES_PER_DEGREE * 4);
        assert_eq!(display.rotation(), 3);
    }

    #[test]
    fn test_rotation_takes_shorter_way() {
        let mut display = Display::new();
        let mut mem = Memory::new();
        send(&mut display, &mut mem, 2, 358, 0);

        spin(&mut display, CYCLES_PER_DEGREE);
        assert_eq!(display.rotation(), 359);
        spin(&mut display, CYCLES_PER_DEGREE);
        assert_eq!(display.rotation(), 358);
    }

    #[test]
    fn test_target_wraps() {
        let mut display = Display::new();
        let mut mem = Memory::new();
        send(&mut display, &mut mem, 2, 725, 0);
        assert_eq!(display.target_rotation(), 5);
    }
}
