//! Memory handling.
//!
//! This module consists of:
//! - [`AddressSpace`]: A flat array of words where each location carries its own [`MemFlags`].
//! - [`MemFlags`]: What a memory location is (RAM, ROM, memory-mapped I/O, breakpoint).
//! - [`MemInit`]: How memory is filled at power-on.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::{Bound, RangeBounds};
use std::path::Path;

use bitflags::bitflags;
use rand::rngs::StdRng;
use rand::Rng;

use crate::err::{DeviceErr, ImageErr};

use super::device::{Device, DeviceArena, DeviceId};
use super::image;

bitflags! {
    /// Attributes of a single memory location.
    ///
    /// A location with no flags set does not exist: it reads as all ones and ignores writes.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct MemFlags: u8 {
        /// The CPU can read this location.
        const READABLE   = 1 << 0;
        /// The CPU can write this location.
        const WRITABLE   = 1 << 1;
        /// The CPU can execute from this location.
        const EXECUTABLE = 1 << 2;
        /// This location belongs to a memory-mapped device.
        const IO         = 1 << 3;
        /// Execution stops before fetching from this location.
        const BREAK      = 1 << 4;
    }
}
impl MemFlags {
    /// Read-write memory.
    pub const RAM: MemFlags = MemFlags::READABLE.union(MemFlags::WRITABLE).union(MemFlags::EXECUTABLE);
    /// Read-only memory.
    pub const ROM: MemFlags = MemFlags::READABLE.union(MemFlags::EXECUTABLE);
}

/// Strategy used to fill memory at power-on.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MemInit {
    /// Fills each word randomly and non-deterministically.
    Unseeded,

    /// Fills each word randomly and deterministically.
    Seeded {
        /// The seed the RNG is initialized with.
        seed: u64
    },

    /// Fills each word with a known value.
    Known {
        /// The value to fill each word with.
        value: u16
    }
}
impl Default for MemInit {
    /// Memory powers on cleared to zero.
    fn default() -> Self {
        MemInit::Known { value: 0 }
    }
}
impl MemInit {
    fn filler(&self) -> Filler {
        use rand::SeedableRng;

        match *self {
            MemInit::Unseeded => Filler::Unseeded,
            MemInit::Seeded { seed } => Filler::Seeded(Box::new(StdRng::seed_from_u64(seed))),
            MemInit::Known { value } => Filler::Known(value),
        }
    }
}

enum Filler {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u16)
}
impl Filler {
    fn generate(&mut self) -> u16 {
        match self {
            Filler::Unseeded  => rand::random(),
            Filler::Seeded(r) => r.gen(),
            Filler::Known(k)  => *k,
        }
    }
}

/// Resolves a range of addresses to a `start..end` index range.
fn resolve(r: impl RangeBounds<u16>) -> (usize, usize) {
    let start = match r.start_bound() {
        Bound::Included(&s) => usize::from(s),
        Bound::Excluded(&s) => usize::from(s) + 1,
        Bound::Unbounded    => 0,
    };
    let end = match r.end_bound() {
        Bound::Included(&e) => usize::from(e) + 1,
        Bound::Excluded(&e) => usize::from(e),
        Bound::Unbounded    => 0x10000,
    };
    (start, end)
}

/// A flat address space.
///
/// Every location stores one word (masked to the width of the space) and one
/// set of [`MemFlags`]. Locations flagged [`MemFlags::IO`] belong to a device
/// owned by the space and CPU accesses to them are forwarded to that device.
///
/// ```
/// use retro_ensemble::sim::mem::{AddressSpace, MemFlags};
///
/// let mut mem = AddressSpace::new("memory", 0x100, 8, MemFlags::empty());
/// mem.set_ram(0x00..0x80);
/// mem.set_rom(0x80..);
///
/// mem.cpu_write(0x10, 0x1FF);
/// assert_eq!(mem.cpu_read(0x10), 0xFF);
///
/// // ROM ignores CPU writes, but not loader writes
/// mem.cpu_write(0x90, 1);
/// assert_eq!(mem.cpu_read(0x90), 0);
/// mem.mem_write(0x90, 1);
/// assert_eq!(mem.cpu_read(0x90), 1);
/// ```
#[derive(Debug)]
pub struct AddressSpace {
    name: &'static str,
    data: Box<[u16]>,
    flags: Box<[MemFlags]>,
    mask: u16,
    devices: DeviceArena,
}

impl AddressSpace {
    /// Creates a space of `size` words that are `width` bits wide, all with the given flags.
    pub fn new(name: &'static str, size: usize, width: u32, flags: MemFlags) -> Self {
        let size = size.min(0x10000);
        let mask = match width {
            16.. => u16::MAX,
            w => (1 << w) - 1,
        };
        Self {
            name,
            data: vec![0; size].into_boxed_slice(),
            flags: vec![flags; size].into_boxed_slice(),
            mask,
            devices: DeviceArena::new(),
        }
    }

    /// The name of this space.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The number of locations.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The mask of valid data bits.
    pub fn word_mask(&self) -> u16 {
        self.mask
    }

    /// The flags of a location. Locations past the end of the space have none.
    pub fn flags(&self, addr: u16) -> MemFlags {
        self.flags.get(usize::from(addr)).copied().unwrap_or_default()
    }

    /// Sets and clears flags over a range of addresses.
    ///
    /// Flags of locations belonging to a device are left alone.
    pub fn set_flags(&mut self, range: impl RangeBounds<u16>, set: MemFlags, clear: MemFlags) {
        let (start, end) = resolve(range);
        let end = end.min(self.flags.len());
        for f in self.flags.get_mut(start..end).into_iter().flatten() {
            if !f.contains(MemFlags::IO) {
                f.remove(clear);
                f.insert(set);
            }
        }
    }

    /// Makes a range of addresses read-write memory.
    pub fn set_ram(&mut self, range: impl RangeBounds<u16>) {
        self.set_flags(range, MemFlags::RAM, MemFlags::empty());
    }

    /// Makes a range of addresses read-only memory.
    pub fn set_rom(&mut self, range: impl RangeBounds<u16>) {
        self.set_flags(range, MemFlags::ROM, MemFlags::WRITABLE);
    }

    /// Whether the location reads as memory.
    pub fn is_readable(&self, addr: u16) -> bool {
        self.flags(addr).contains(MemFlags::READABLE)
    }

    /// Whether the location accepts CPU writes.
    pub fn is_writable(&self, addr: u16) -> bool {
        self.flags(addr).contains(MemFlags::WRITABLE)
    }

    /// Whether the location belongs to a device.
    pub fn is_io(&self, addr: u16) -> bool {
        self.flags(addr).contains(MemFlags::IO)
    }

    /// Whether the location has a breakpoint.
    pub fn is_break(&self, addr: u16) -> bool {
        self.flags(addr).contains(MemFlags::BREAK)
    }

    /// Sets or removes a breakpoint.
    pub fn set_break(&mut self, addr: u16, set: bool) {
        if let Some(f) = self.flags.get_mut(usize::from(addr)) {
            f.set(MemFlags::BREAK, set);
        }
    }

    /// The first breakpoint at or after `start`.
    pub fn find_break(&self, start: u16) -> Option<u16> {
        self.flags.iter()
            .enumerate()
            .skip(usize::from(start))
            .find(|(_, f)| f.contains(MemFlags::BREAK))
            .map(|(a, _)| a as u16)
    }

    /// Removes every breakpoint.
    pub fn clear_breaks(&mut self) {
        self.flags.iter_mut().for_each(|f| f.remove(MemFlags::BREAK));
    }

    /// Reads a location the way the CPU does.
    ///
    /// Device locations are forwarded to the device, memory is returned as stored,
    /// and locations that do not exist read as all ones.
    pub fn cpu_read(&mut self, addr: u16) -> u16 {
        let flags = self.flags(addr);
        if flags.contains(MemFlags::IO) {
            let id = DeviceId(self.data[usize::from(addr)]);
            return match self.devices.get_mut(id) {
                Some(dev) => dev.dev_read(addr) & self.mask,
                None => self.mask,
            };
        }
        match flags.contains(MemFlags::READABLE) {
            true  => self.data[usize::from(addr)],
            false => self.mask,
        }
    }

    /// Writes a location the way the CPU does.
    ///
    /// Writes to ROM and to locations that do not exist are dropped with a warning.
    pub fn cpu_write(&mut self, addr: u16, data: u16) {
        let flags = self.flags(addr);
        if flags.contains(MemFlags::IO) {
            let id = DeviceId(self.data[usize::from(addr)]);
            if let Some(dev) = self.devices.get_mut(id) {
                dev.dev_write(addr, data & self.mask);
            }
        } else if flags.contains(MemFlags::WRITABLE) {
            self.data[usize::from(addr)] = data & self.mask;
        } else {
            tracing::warn!(space = self.name, addr, data, "dropped write to read-only or missing memory");
        }
    }

    /// Reads the stored word, ignoring flags and devices.
    pub fn mem_read(&self, addr: u16) -> u16 {
        match self.is_io(addr) {
            true  => self.mask,
            false => self.data.get(usize::from(addr)).copied().unwrap_or(self.mask),
        }
    }

    /// Stores a word, ignoring flags (so ROM can be loaded).
    ///
    /// Writes to device locations or past the end of the space are dropped.
    pub fn mem_write(&mut self, addr: u16, data: u16) {
        if self.is_io(addr) {
            tracing::warn!(space = self.name, addr, "loader write to a device location ignored");
            return;
        }
        if let Some(w) = self.data.get_mut(usize::from(addr)) {
            *w = data & self.mask;
        }
    }

    /// Installs a memory-mapped device on `count` locations from `base`.
    ///
    /// # Errors
    /// Fails, leaving the space unchanged, if any location already belongs to a
    /// device or lies outside the space.
    pub fn install_device(&mut self, dev: impl Device, base: u16, count: u16) -> Result<DeviceId, DeviceErr> {
        let start = usize::from(base);
        let end = start + usize::from(count);
        if end > self.size() {
            return Err(DeviceErr::OutOfRange { base: base.into(), end: end as u32, space: self.name.into() });
        }
        if let Some(a) = (start..end).find(|&a| self.flags[a].contains(MemFlags::IO)) {
            let owner = self.devices.get(DeviceId(self.data[a]))
                .map_or_else(String::new, |d| d.info().name.clone());
            return Err(DeviceErr::PortConflict { port: a as u16, owner });
        }

        let id = self.devices.insert(Box::new(dev));
        for a in start..end {
            self.flags[a].insert(MemFlags::IO);
            self.data[a] = id.0;
        }
        Ok(id)
    }

    /// Removes a memory-mapped device, returning its locations to plain memory.
    pub fn remove_device(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        let dev = self.devices.remove(id)?;
        for (f, d) in self.flags.iter_mut().zip(self.data.iter_mut()) {
            if f.contains(MemFlags::IO) && *d == id.0 {
                f.remove(MemFlags::IO);
                *d = 0;
            }
        }
        Some(dev)
    }

    /// The device at an address, if any.
    pub fn find_device(&self, addr: u16) -> Option<DeviceId> {
        match self.is_io(addr) {
            true  => Some(DeviceId(self.data[usize::from(addr)])),
            false => None,
        }
    }

    /// The devices mapped into this space.
    pub fn devices(&self) -> &DeviceArena {
        &self.devices
    }

    /// The devices mapped into this space.
    pub fn devices_mut(&mut self) -> &mut DeviceArena {
        &mut self.devices
    }

    fn fill_where(&mut self, init: MemInit, pred: impl Fn(MemFlags) -> bool) {
        let mut filler = init.filler();
        for (d, &f) in self.data.iter_mut().zip(self.flags.iter()) {
            if !f.contains(MemFlags::IO) && pred(f) {
                *d = filler.generate() & self.mask;
            }
        }
    }

    /// Refills all writable memory.
    pub fn clear_ram(&mut self, init: MemInit) {
        self.fill_where(init, |f| f.contains(MemFlags::WRITABLE));
    }

    /// Zeroes all read-only memory.
    pub fn clear_rom(&mut self) {
        self.fill_where(MemInit::Known { value: 0 }, |f| f.contains(MemFlags::READABLE) && !f.contains(MemFlags::WRITABLE));
    }

    /// Fills every memory location (except devices) as at power-on.
    pub fn power_on(&mut self, init: MemInit) {
        self.fill_where(init, |_| true);
    }

    /// Loads a raw binary file at `base`, reading at most `limit` words.
    pub fn load_binary(&mut self, path: impl AsRef<Path>, base: u16, limit: usize) -> Result<usize, ImageErr> {
        image::load_binary(self, File::open(path)?, base, limit)
    }

    /// Saves `count` words from `base` as a raw binary file.
    pub fn save_binary(&self, path: impl AsRef<Path>, base: u16, count: usize) -> Result<usize, ImageErr> {
        image::save_binary(self, BufWriter::new(File::create(path)?), base, count)
    }

    /// Loads an Intel HEX file, adding `offset` to every record address.
    pub fn load_intel(&mut self, path: impl AsRef<Path>, offset: u16) -> Result<usize, ImageErr> {
        image::load_intel(self, BufReader::new(File::open(path)?), offset)
    }

    /// Saves `count` words from `base` as an Intel HEX file.
    pub fn save_intel(&self, path: impl AsRef<Path>, base: u16, count: usize) -> Result<usize, ImageErr> {
        image::save_intel(self, BufWriter::new(File::create(path)?), base, count)
    }

    /// Loads 12-bit words from a pair of Intel HEX files: one with the low
    /// eight bits of each word, one with the high four.
    pub fn load_intel_pair(&mut self, low: impl AsRef<Path>, high: impl AsRef<Path>, offset: u16) -> Result<usize, ImageErr> {
        let low = BufReader::new(File::open(low)?);
        let high = BufReader::new(File::open(high)?);
        image::load_intel_pair(self, low, high, offset)
    }

    /// Saves 12-bit words as a pair of Intel HEX files. See [`AddressSpace::load_intel_pair`].
    pub fn save_intel_pair(&self, low: impl AsRef<Path>, high: impl AsRef<Path>, base: u16, count: usize) -> Result<usize, ImageErr> {
        let low = BufWriter::new(File::create(low)?);
        let high = BufWriter::new(File::create(high)?);
        image::save_intel_pair(self, low, high, base, count)
    }

    /// Loads a DEC BIN format paper tape.
    pub fn load_paper_tape(&mut self, path: impl AsRef<Path>) -> Result<usize, ImageErr> {
        image::load_paper_tape(self, BufReader::new(File::open(path)?))
    }

    /// Saves `count` words from `base` as a DEC BIN format paper tape.
    pub fn save_paper_tape(&self, path: impl AsRef<Path>, base: u16, count: usize) -> Result<usize, ImageErr> {
        image::save_paper_tape(self, BufWriter::new(File::create(path)?), base, count)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::sim::device::{DeviceInfo, Direction};

    struct Latch {
        info: DeviceInfo,
        value: u16,
    }
    impl Device for Latch {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }
        fn dev_read(&mut self, addr: u16) -> u16 {
            self.value + (addr & 1)
        }
        fn dev_write(&mut self, _addr: u16, data: u16) {
            self.value = data;
        }
        fn clear_device(&mut self) {
            self.value = 0;
        }
    }
    fn latch(base: u16) -> Latch {
        Latch { info: DeviceInfo::new("LATCH", "latch", Direction::InOut, base, 2), value: 0 }
    }

    #[test]
    fn test_missing_memory() {
        let mut mem = AddressSpace::new("memory", 0o10000, 12, MemFlags::empty());
        mem.set_ram(0..0o4000);

        assert_eq!(mem.cpu_read(0o5000), 0o7777);
        mem.cpu_write(0o5000, 1);
        assert_eq!(mem.mem_read(0o5000), 0);

        mem.cpu_write(0o100, 0o17777);
        assert_eq!(mem.cpu_read(0o100), 0o7777);
    }

    /// Records the level of every event raised while it is the default subscriber.
    struct Levels(Arc<Mutex<Vec<tracing::Level>>>);
    impl tracing::Subscriber for Levels {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool { true }
        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }
        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}
        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}
        fn event(&self, event: &tracing::Event<'_>) {
            self.0.lock().unwrap().push(*event.metadata().level());
        }
        fn enter(&self, _: &tracing::span::Id) {}
        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn test_dropped_write_warns() {
        let levels = Arc::new(Mutex::new(vec![]));
        let mut mem = AddressSpace::new("memory", 0x100, 8, MemFlags::empty());
        mem.set_rom(0x80..0x100);

        tracing::subscriber::with_default(Levels(Arc::clone(&levels)), || {
            mem.cpu_write(3, 0x55);
            mem.cpu_write(0x90, 0x55);
        });
        assert_eq!(*levels.lock().unwrap(), [tracing::Level::WARN; 2]);
        assert_eq!(mem.mem_read(0x90), 0);
    }

    #[test]
    fn test_flags() {
        let mut mem = AddressSpace::new("memory", 0x100, 8, MemFlags::RAM);
        mem.set_rom(0x80..=0x8F);
        assert!(mem.is_writable(0x7F));
        assert!(!mem.is_writable(0x80));
        assert!(!mem.is_writable(0x8F));
        assert!(mem.is_writable(0x90));
        assert!(mem.is_readable(0x80));

        // out of range addresses have no flags
        assert!(!mem.is_readable(0x100));
    }

    #[test]
    fn test_breakpoints() {
        let mut mem = AddressSpace::new("memory", 0x100, 8, MemFlags::RAM);
        mem.set_break(0x20, true);
        mem.set_break(0x40, true);
        assert_eq!(mem.find_break(0), Some(0x20));
        assert_eq!(mem.find_break(0x21), Some(0x40));
        mem.set_break(0x40, false);
        assert_eq!(mem.find_break(0x21), None);
        mem.clear_breaks();
        assert_eq!(mem.find_break(0), None);
    }

    #[test]
    fn test_memory_mapped_device() {
        let mut mem = AddressSpace::new("memory", 0x100, 8, MemFlags::RAM);
        let id = mem.install_device(latch(0xF0), 0xF0, 2).unwrap();
        assert_eq!(mem.find_device(0xF1), Some(id));

        mem.cpu_write(0xF0, 0x42);
        assert_eq!(mem.cpu_read(0xF0), 0x42);
        assert_eq!(mem.cpu_read(0xF1), 0x43);

        // the loader never reaches the device
        mem.mem_write(0xF0, 7);
        assert_eq!(mem.cpu_read(0xF0), 0x42);

        let err = mem.install_device(latch(0xF1), 0xF1, 2).unwrap_err();
        assert_eq!(err, DeviceErr::PortConflict { port: 0xF1, owner: "LATCH".into() });
        assert!(mem.install_device(latch(0xFF), 0xFF, 2).is_err());

        mem.remove_device(id).unwrap();
        assert_eq!(mem.find_device(0xF0), None);
        assert!(!mem.is_io(0xF1));
    }

    #[test]
    fn test_power_on() {
        let mut a = AddressSpace::new("memory", 0x40, 8, MemFlags::RAM);
        let mut b = AddressSpace::new("memory", 0x40, 8, MemFlags::RAM);
        a.power_on(MemInit::Seeded { seed: 12 });
        b.power_on(MemInit::Seeded { seed: 12 });
        assert_eq!(a.data, b.data);
        assert!(a.data.iter().all(|&w| w <= 0xFF));

        a.set_rom(0x20..);
        a.clear_ram(MemInit::Known { value: 0x55 });
        assert!((0..0x20).all(|i| a.mem_read(i) == 0x55));
        a.clear_rom();
        assert!((0x20..0x40).all(|i| a.mem_read(i) == 0));
    }
}
