//! Mackapar M35FD floppy drive.
//!
//! Transfers are immediate; the drive never reports `BUSY`. Seek time is
//! computed for every transfer but only recorded, not waited on.
//!
//! With an interrupt message set, every change of state or latched error
//! raises it once on the next `cycle()`, including a poll that clears an
//! error. Changes made while the message is zero raise nothing later.

use crate::hw::{Device, DeviceContext, DeviceInfo};
use std::any::Any;
use thiserror::Error;
use tracing::{debug, warn};

pub const SECTOR_SIZE: usize = 512;
pub const SECTORS_PER_TRACK: usize = 18;
pub const TRACKS: usize = 80;
pub const SECTOR_COUNT: usize = SECTORS_PER_TRACK * TRACKS;
/// Words on one disk.
pub const DISK_SIZE: usize = SECTOR_COUNT * SECTOR_SIZE;
pub const SEEK_MICROS_PER_TRACK: u32 = 2400;

/// Drive state reported in B by a poll. `Busy` is never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FloppyState {
    NoMedia = 0,
    Ready = 1,
    ReadyWp = 2,
    Busy = 3,
}

/// Error code reported in C by a poll. `Busy`, `Eject` and `Broken` belong
/// to the drive's protocol but are never latched here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FloppyErrorCode {
    None = 0,
    Busy = 1,
    NoMedia = 2,
    Protected = 3,
    Eject = 4,
    BadSector = 5,
    Broken = 0xffff,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FloppyError {
    #[error("disk image of {size} words exceeds the {capacity}-word disk")]
    ImageTooLarge { size: usize, capacity: usize },
}

/// A 1440-sector disk.
#[derive(Clone, PartialEq, Eq)]
pub struct FloppyDisk {
    words: Vec<u16>,
    write_protected: bool,
}

impl FloppyDisk {
    pub fn blank(write_protected: bool) -> Self {
        Self { words: vec![0; DISK_SIZE], write_protected }
    }

    /// Build a disk from an image; short images are zero-padded.
    pub fn from_words(image: &[u16], write_protected: bool) -> Result<Self, FloppyError> {
        if image.len() > DISK_SIZE {
            return Err(FloppyError::ImageTooLarge { size: image.len(), capacity: DISK_SIZE });
        }
        let mut disk = Self::blank(write_protected);
        disk.words[..image.len()].copy_from_slice(image);
        Ok(disk)
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn sector(&self, sector: usize) -> Option<&[u16]> {
        let start = sector.checked_mul(SECTOR_SIZE)?;
        self.words.get(start..start + SECTOR_SIZE)
    }

    pub fn sector_mut(&mut self, sector: usize) -> Option<&mut [u16]> {
        let start = sector.checked_mul(SECTOR_SIZE)?;
        self.words.get_mut(start..start + SECTOR_SIZE)
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, write_protected: bool) {
        self.write_protected = write_protected;
    }
}

impl std::fmt::Debug for FloppyDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self.words.iter().filter(|&&w| w != 0).count();
        f.debug_struct("FloppyDisk")
            .field("write_protected", &self.write_protected)
            .field("nonzero_words", &used)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Read,
    Write,
}

#[derive(Debug, Default)]
pub struct Floppy {
    disk: Option<FloppyDisk>,
    last_error: Option<FloppyErrorCode>,
    interrupt_message: u16,
    /// State or error changed since the last `cycle()`.
    changed: bool,
    track: usize,
    last_seek_time: u32,
}

impl Floppy {
    pub const HARDWARE_ID: u32 = 0x4fd5_24c5;
    pub const VERSION: u16 = 0x000b;
    pub const MANUFACTURER: u32 = 0x1eb3_7e91;
    pub const SECTOR_SIZE: usize = SECTOR_SIZE;

    /// An empty drive.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disk(disk: FloppyDisk) -> Self {
        Self { disk: Some(disk), ..Self::default() }
    }

    pub fn state(&self) -> FloppyState {
        match &self.disk {
            None => FloppyState::NoMedia,
            Some(disk) if disk.is_write_protected() => FloppyState::ReadyWp,
            Some(_) => FloppyState::Ready,
        }
    }

    /// Error latched since the last poll.
    pub fn last_error(&self) -> FloppyErrorCode {
        self.last_error.unwrap_or(FloppyErrorCode::None)
    }

    pub fn interrupt_message(&self) -> u16 {
        self.interrupt_message
    }

    pub fn disk(&self) -> Option<&FloppyDisk> {
        self.disk.as_ref()
    }

    /// Insert a disk, returning the one it replaces.
    pub fn insert(&mut self, disk: FloppyDisk) -> Option<FloppyDisk> {
        debug!(write_protected = disk.is_write_protected(), "disk inserted");
        self.changed = true;
        self.disk.replace(disk)
    }

    pub fn eject(&mut self) -> Option<FloppyDisk> {
        let disk = self.disk.take();
        if disk.is_some() {
            debug!("disk ejected");
            self.changed = true;
        }
        disk
    }

    /// Track the head currently sits on.
    pub fn track(&self) -> usize {
        self.track
    }

    /// Seek time of the most recent transfer, in microseconds.
    pub fn last_seek_time(&self) -> u32 {
        self.last_seek_time
    }

    fn latch(&mut self, error: Option<FloppyErrorCode>) {
        if self.last_error != error {
            self.last_error = error;
            self.changed = true;
        }
    }

    fn seek(&mut self, sector: usize) {
        let target = sector / SECTORS_PER_TRACK;
        self.last_seek_time = self.track.abs_diff(target) as u32 * SEEK_MICROS_PER_TRACK;
        self.track = target;
    }

    fn transfer(&mut self, kind: Transfer, ctx: &mut DeviceContext<'_>) -> Result<(), FloppyErrorCode> {
        let sector = ctx.regs.x as usize;
        let addr = ctx.regs.y;

        let Some(disk) = self.disk.as_mut() else {
            return Err(FloppyErrorCode::NoMedia);
        };
        if kind == Transfer::Write && disk.is_write_protected() {
            return Err(FloppyErrorCode::Protected);
        }

        let (Some(data), Some(ram)) = (disk.sector_mut(sector), ctx.mem.window_mut(addr, SECTOR_SIZE)) else {
            return Err(FloppyErrorCode::BadSector);
        };
        match kind {
            Transfer::Read => ram.copy_from_slice(data),
            Transfer::Write => data.copy_from_slice(ram),
        }

        self.seek(sector);
        debug!(?kind, sector, addr, seek_us = self.last_seek_time, "floppy transfer");
        Ok(())
    }
}

impl Device for Floppy {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            hardware_id: Self::HARDWARE_ID,
            version: Self::VERSION,
            manufacturer: Self::MANUFACTURER,
            name: "Mackapar 3.5\" Floppy Drive (M35FD)",
        }
    }

    fn interrupt(&mut self, ctx: &mut DeviceContext<'_>) {
        match ctx.regs.a {
            0 => {
                ctx.regs.b = self.state() as u16;
                ctx.regs.c = self.last_error() as u16;
                self.latch(None);
            }
            1 => {
                debug!(message = ctx.regs.x, "floppy interrupt message set");
                self.interrupt_message = ctx.regs.x;
            }
            command @ (2 | 3) => {
                let kind = if command == 2 { Transfer::Read } else { Transfer::Write };
                match self.transfer(kind, ctx) {
                    Ok(()) => ctx.regs.b = 1,
                    Err(error) => {
                        warn!(?kind, ?error, sector = ctx.regs.x, addr = ctx.regs.y, "floppy transfer rejected");
                        self.latch(Some(error));
                        ctx.regs.b = 0;
                    }
                }
            }
            _ => {}
        }
    }

    fn cycle(&mut self) -> Option<u16> {
        if !std::mem::take(&mut self.changed) {
            return None;
        }
        (self.interrupt_message != 0).then_some(self.interrupt_message)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
