//! Hardware attached to the DCPU-16.
//!
//! Every peripheral implements [`Device`]. The CPU owns its devices and
//! addresses them by attachment index; `HWN`, `HWQ` and `HWI` see nothing
//! else. Devices talk back only through the registers and memory handed to
//! [`Device::interrupt`], or by returning an interrupt message from
//! [`Device::cycle`].

pub mod clock;
pub mod display;
pub mod floppy;

pub use clock::Clock;
pub use display::{Display, Vertex};
pub use floppy::{Floppy, FloppyDisk};

use crate::cpu::{Memory, Registers};
use serde::Serialize;
use std::any::Any;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Identity reported by `HWQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub hardware_id: u32,
    pub version: u16,
    pub manufacturer: u32,
    pub name: &'static str,
}

/// The slice of machine state a device may touch while handling `HWI`.
pub struct DeviceContext<'a> {
    pub regs: &'a mut Registers,
    pub mem: &'a mut Memory,
}

/// A peripheral on the DCPU-16 hardware bus.
pub trait Device: Any + Debug {
    fn info(&self) -> DeviceInfo;

    /// Handle `HWI`. Register A usually selects the command.
    ///
    /// Must accept any register contents; bad arguments are reported through
    /// the device's status registers.
    fn interrupt(&mut self, ctx: &mut DeviceContext<'_>);

    /// Advance by one CPU cycle. A returned message is queued on the CPU.
    fn cycle(&mut self) -> Option<u16>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Typed reference to an attached device, returned by
/// [`Cpu::attach_device`](crate::Cpu::attach_device).
#[derive(Debug)]
pub struct DeviceHandle<D> {
    index: usize,
    _device: PhantomData<fn() -> D>,
}

impl<D> DeviceHandle<D> {
    pub(crate) fn new(index: usize) -> Self {
        Self { index, _device: PhantomData }
    }

    /// Attachment index, as seen by `HWQ`/`HWI`.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<D> Clone for DeviceHandle<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for DeviceHandle<D> {}

/// Split a 32-bit identity into (low, high) words.
pub(crate) fn split_u32(value: u32) -> (u16, u16) {
    (value as u16, (value >> 16) as u16)
}
