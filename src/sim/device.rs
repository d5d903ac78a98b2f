//! Devices connected to a CPU.
//!
//! A device sits on one or more I/O ports, sense lines, flag lines or memory
//! addresses. Devices are owned by a [`DeviceArena`] and everything else
//! (port maps, address spaces, the event queue) refers to them by [`DeviceId`].
//!
//! The core types here are:
//! - [`Device`]: the trait every device implements.
//! - [`DeviceInfo`]: the name, kind and port range of a device.
//! - [`DeviceMap`]: a port → device lookup table.
//! - [`DeviceHandler`]: a CPU's devices, with its input, output, sense and flag maps.
//!
//! This module also provides some devices:
//! - [`NullDevice`]: Reads as all ones, ignores writes.
//! - [`BufferedPort`]: A port that reads from an input buffer and writes to an output buffer.
//! - [`ChannelPort`]: A port whose input and output are crossbeam channels.
//! - [`IntervalTimer`]: A timer that interrupts at a (possibly random) interval.
//! - [`Shared`]: Wraps a device behind an `Arc<Mutex<_>>` so the host can keep a handle to it.

mod buffered;
mod channel;
mod timer;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::err::DeviceErr;

use super::event::HandlerId;
use super::interrupt::IrqLine;
pub use buffered::BufferedPort;
pub use channel::{ChannelEnds, ChannelPort};
pub use timer::IntervalTimer;

/// Which maps a device can be placed in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    /// The device is only read from.
    Input,
    /// The device is only written to.
    Output,
    /// The device is both read from and written to.
    InOut,
}
impl Direction {
    /// Whether the device can be read.
    pub fn is_input(self) -> bool {
        matches!(self, Direction::Input | Direction::InOut)
    }
    /// Whether the device can be written.
    pub fn is_output(self) -> bool {
        matches!(self, Direction::Output | Direction::InOut)
    }
}

/// Identification of a device.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DeviceInfo {
    /// A short unique name (such as `"TTY"`).
    pub name: String,
    /// The kind of device (such as `"serial port"`).
    pub kind: &'static str,
    /// A longer human readable description.
    pub description: String,
    /// Whether the device is read, written or both.
    pub direction: Direction,
    /// The first port (or address) the device occupies.
    pub base: u16,
    /// The number of consecutive ports (or addresses) the device occupies.
    pub count: u16,
}
impl DeviceInfo {
    /// Creates device information with an empty description.
    pub fn new(name: impl Into<String>, kind: &'static str, direction: Direction, base: u16, count: u16) -> Self {
        Self { name: name.into(), kind, description: String::new(), direction, base, count }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The ports (or addresses) this device occupies.
    pub fn ports(&self) -> std::ops::Range<u32> {
        let base = u32::from(self.base);
        base..base + u32::from(self.count)
    }
}

/// A device that can be connected to a CPU.
///
/// Every callback has a default that either does nothing or reports an illegal
/// access, so a device only has to implement the parts it is wired to.
pub trait Device: Send + 'static {
    /// Name, kind and port range of the device.
    fn info(&self) -> &DeviceInfo;

    /// Reads from one of this device's ports or addresses.
    fn dev_read(&mut self, port: u16) -> u16 {
        tracing::warn!(device = %self.info().name, port, "read from a device that has no inputs");
        u16::MAX
    }

    /// Writes to one of this device's ports or addresses.
    fn dev_write(&mut self, port: u16, data: u16) {
        tracing::warn!(device = %self.info().name, port, data, "write to a device that has no outputs");
    }

    /// Puts the device back into its power-on state.
    ///
    /// This may be called any number of times in a row.
    fn clear_device(&mut self);

    /// The event handler identity this device schedules its events under.
    fn event_handler(&self) -> Option<HandlerId> {
        None
    }

    /// Called when one of this device's scheduled events comes due.
    fn event_callback(&mut self, param: isize) {
        tracing::warn!(device = %self.info().name, param, "unexpected event");
    }

    /// Reads a sense (input status) line. Devices not driving the line return `default`.
    fn get_sense(&mut self, _line: u16, default: bool) -> bool {
        default
    }

    /// Sets a flag (output status) line driven by the CPU.
    fn set_flag(&mut self, _line: u16, _value: bool) {}

    /// Executes a PDP-8 style IOT instruction addressed to this device.
    ///
    /// `ir` is the whole instruction. The device may update the accumulator and
    /// skip by incrementing `pc`. Returns `false` if the device does not implement the IOT.
    fn dev_iot(&mut self, _ir: u16, _ac: &mut u16, _pc: &mut u16) -> bool {
        false
    }

    /// The interrupt line this device requests on, if any.
    fn irq(&self) -> Option<&IrqLine> {
        None
    }

    /// The priority level and mask of [`Device::irq`].
    ///
    /// Wrappers that cannot lend out the inner device's line override this instead.
    fn irq_source(&self) -> Option<(u8, u32)> {
        self.irq().map(|l| (l.level(), l.mask()))
    }

    /// Writes a human readable description of the device's state.
    fn show_device(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        let info = self.info();
        writeln!(f, "{} ({}) at {:o}..{:o}", info.name, info.kind, info.ports().start, info.ports().end)
    }
}

/// A handle to a device in a [`DeviceArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct DeviceId(pub(crate) u16);

/// Owner of a set of devices.
#[derive(Default)]
pub struct DeviceArena {
    slots: Vec<Option<Box<dyn Device>>>,
}
impl DeviceArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a device, reusing an empty slot if there is one.
    pub fn insert(&mut self, dev: Box<dyn Device>) -> DeviceId {
        match self.slots.iter().position(Option::is_none) {
            Some(i) => {
                self.slots[i] = Some(dev);
                DeviceId(i as u16)
            },
            None => {
                self.slots.push(Some(dev));
                DeviceId((self.slots.len() - 1) as u16)
            }
        }
    }

    /// Removes a device, handing it back.
    pub fn remove(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        self.slots.get_mut(usize::from(id.0))?.take()
    }

    /// Gets a device.
    pub fn get(&self, id: DeviceId) -> Option<&dyn Device> {
        self.slots.get(usize::from(id.0))?.as_deref()
    }

    /// Gets a device mutably.
    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut (dyn Device + 'static)> {
        self.slots.get_mut(usize::from(id.0))?.as_deref_mut()
    }

    /// All devices with their IDs.
    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &dyn Device)> {
        self.slots.iter()
            .enumerate()
            .filter_map(|(i, d)| Some((DeviceId(i as u16), d.as_deref()?)))
    }

    /// The number of devices held.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether the arena holds no devices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds a device by name, ignoring case.
    pub fn find_name(&self, name: &str) -> Option<DeviceId> {
        self.iter()
            .find(|(_, d)| d.info().name.eq_ignore_ascii_case(name))
            .map(|(id, _)| id)
    }

    /// Finds the device receiving events for this handler.
    pub fn find_handler(&self, handler: HandlerId) -> Option<DeviceId> {
        self.iter()
            .find(|(_, d)| d.event_handler() == Some(handler))
            .map(|(id, _)| id)
    }

    /// Finds the device requesting on this interrupt level and mask.
    pub fn find_interrupt(&self, level: u8, mask: u32) -> Option<DeviceId> {
        self.iter()
            .find(|(_, d)| d.irq_source() == Some((level, mask)))
            .map(|(id, _)| id)
    }

    /// Delivers an event to whichever device owns the handler.
    ///
    /// Returns `false` if no device in this arena owns it.
    pub fn dispatch_event(&mut self, handler: HandlerId, param: isize) -> bool {
        let Some(id) = self.find_handler(handler) else { return false };
        match self.get_mut(id) {
            Some(dev) => {
                dev.event_callback(param);
                true
            },
            None => false,
        }
    }

    /// Clears every device exactly once.
    pub fn clear_all_once(&mut self) {
        self.slots.iter_mut()
            .flatten()
            .for_each(|d| d.clear_device());
    }
}
impl fmt::Debug for DeviceArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(_, d)| &d.info().name))
            .finish()
    }
}

/// A port (or line) to device lookup table.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct DeviceMap {
    ports: BTreeMap<u16, DeviceId>,
}
impl DeviceMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// The device at a port, if there is one.
    pub fn find(&self, port: u16) -> Option<DeviceId> {
        self.ports.get(&port).copied()
    }

    /// The first occupied port in `base..base + count`, with its device.
    pub fn is_installed(&self, base: u16, count: u16) -> Option<(u16, DeviceId)> {
        let end = u32::from(base) + u32::from(count);
        self.ports.range(base..)
            .take_while(|(&p, _)| u32::from(p) < end)
            .map(|(&p, &id)| (p, id))
            .next()
    }

    /// The first port in `base..base + count` that belongs to a device other than `id`.
    ///
    /// With `id` set to `None`, any owned port is a conflict.
    pub fn first_conflict(&self, id: Option<DeviceId>, base: u16, count: u16) -> Option<(u16, DeviceId)> {
        let end = u32::from(base) + u32::from(count);
        self.ports.range(base..)
            .take_while(|(&p, _)| u32::from(p) < end)
            .find(|(_, &o)| Some(o) != id)
            .map(|(&p, &o)| (p, o))
    }

    /// Assigns `count` ports starting at `base` to a device.
    ///
    /// Ports already assigned to the same device are fine; ports assigned to
    /// another device make the call fail without changing the map.
    pub fn install(&mut self, id: DeviceId, base: u16, count: u16) -> Result<(), DeviceErr> {
        let end = u32::from(base) + u32::from(count);
        if end > 0x10000 {
            return Err(DeviceErr::OutOfRange { base: base.into(), end, space: "port".into() });
        }
        if let Some((port, owner)) = self.first_conflict(Some(id), base, count) {
            return Err(DeviceErr::PortConflict { port, owner: format!("device #{}", owner.0) });
        }

        for p in u32::from(base)..end {
            self.ports.insert(p as u16, id);
        }
        Ok(())
    }

    /// Unassigns every port of a device, returning whether it had any.
    pub fn remove(&mut self, id: DeviceId) -> bool {
        let before = self.ports.len();
        self.ports.retain(|_, d| *d != id);
        before != self.ports.len()
    }

    /// The distinct devices in this map.
    pub fn ids(&self) -> BTreeSet<DeviceId> {
        self.ports.values().copied().collect()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.ports.clear();
    }
}

/// The devices of a CPU, and the maps that wire them to its ports and lines.
#[derive(Debug, Default)]
pub struct DeviceHandler {
    arena: DeviceArena,
    inputs: DeviceMap,
    outputs: DeviceMap,
    senses: DeviceMap,
    flags: DeviceMap,
}

impl DeviceHandler {
    /// Creates a handler with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `base..base + count` in one map, naming the owner of the first conflicting port.
    fn check(&self, map: &DeviceMap, id: Option<DeviceId>, base: u16, count: u16) -> Result<(), DeviceErr> {
        match map.first_conflict(id, base, count) {
            Some((port, owner)) => {
                let owner = self.arena.get(owner)
                    .map_or_else(|| format!("device #{}", owner.0), |d| d.info().name.clone());
                Err(DeviceErr::PortConflict { port, owner })
            },
            None => Ok(()),
        }
    }

    /// Installs a device on the ports given by its [`DeviceInfo`].
    ///
    /// An input device goes in the input map, an output device in the output
    /// map, and an in/out device in both. If any port is taken the device is
    /// not installed at all.
    ///
    /// # Errors
    /// Returns [`DeviceErr::PortConflict`] naming the current owner of the first occupied port.
    pub fn install(&mut self, dev: impl Device) -> Result<DeviceId, DeviceErr> {
        self.install_boxed(Box::new(dev))
    }

    /// Installs an already boxed device. See [`DeviceHandler::install`].
    pub fn install_boxed(&mut self, dev: Box<dyn Device>) -> Result<DeviceId, DeviceErr> {
        let info = dev.info().clone();
        let id = self.arena.insert(dev);

        if let Err(e) = self.place(id, &info) {
            self.inputs.remove(id);
            self.outputs.remove(id);
            self.arena.remove(id);
            return Err(e);
        }

        tracing::debug!(device = %info.name, base = info.base, count = info.count, "installed device");
        Ok(id)
    }

    fn place(&mut self, id: DeviceId, info: &DeviceInfo) -> Result<(), DeviceErr> {
        if info.direction.is_input() {
            self.check(&self.inputs, Some(id), info.base, info.count)?;
            self.inputs.install(id, info.base, info.count)?;
        }
        if info.direction.is_output() {
            self.check(&self.outputs, Some(id), info.base, info.count)?;
            self.outputs.install(id, info.base, info.count)?;
        }
        Ok(())
    }

    /// Installs a device that only drives sense lines.
    pub fn install_sense(&mut self, dev: impl Device, line: u16, count: u16) -> Result<DeviceId, DeviceErr> {
        self.check(&self.senses, None, line, count)?;
        let id = self.arena.insert(Box::new(dev));
        self.senses.install(id, line, count)
            .map(|()| id)
            .map_err(|e| {
                self.arena.remove(id);
                e
            })
    }

    /// Installs a device that only receives flag lines.
    pub fn install_flag(&mut self, dev: impl Device, line: u16, count: u16) -> Result<DeviceId, DeviceErr> {
        self.check(&self.flags, None, line, count)?;
        let id = self.arena.insert(Box::new(dev));
        self.flags.install(id, line, count)
            .map(|()| id)
            .map_err(|e| {
                self.arena.remove(id);
                e
            })
    }

    /// Wires sense lines to a device that is already installed.
    pub fn attach_sense(&mut self, id: DeviceId, line: u16, count: u16) -> Result<(), DeviceErr> {
        self.check(&self.senses, Some(id), line, count)?;
        self.senses.install(id, line, count)
    }

    /// Wires flag lines to a device that is already installed.
    pub fn attach_flag(&mut self, id: DeviceId, line: u16, count: u16) -> Result<(), DeviceErr> {
        self.check(&self.flags, Some(id), line, count)?;
        self.flags.install(id, line, count)
    }

    /// Removes a device from every map and hands it back.
    pub fn remove(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        self.inputs.remove(id);
        self.outputs.remove(id);
        self.senses.remove(id);
        self.flags.remove(id);
        self.arena.remove(id)
    }

    /// The arena holding the devices.
    pub fn arena(&self) -> &DeviceArena {
        &self.arena
    }

    /// The arena holding the devices.
    pub fn arena_mut(&mut self) -> &mut DeviceArena {
        &mut self.arena
    }

    /// Gets a device.
    pub fn device(&self, id: DeviceId) -> Option<&dyn Device> {
        self.arena.get(id)
    }

    /// Gets a device mutably.
    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut (dyn Device + 'static)> {
        self.arena.get_mut(id)
    }

    /// The device on an input port.
    pub fn find_input(&self, port: u16) -> Option<DeviceId> {
        self.inputs.find(port)
    }

    /// The device on an output port.
    pub fn find_output(&self, port: u16) -> Option<DeviceId> {
        self.outputs.find(port)
    }

    /// The device driving a sense line.
    pub fn find_sense(&self, line: u16) -> Option<DeviceId> {
        self.senses.find(line)
    }

    /// The device receiving a flag line.
    pub fn find_flag(&self, line: u16) -> Option<DeviceId> {
        self.flags.find(line)
    }

    /// Finds a device by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<DeviceId> {
        self.arena.find_name(name)
    }

    /// Reads an input port. Returns `None` if nothing is installed there.
    pub fn read(&mut self, port: u16) -> Option<u16> {
        let id = self.inputs.find(port)?;
        Some(self.arena.get_mut(id)?.dev_read(port))
    }

    /// Writes an output port. Returns `false` if nothing is installed there.
    pub fn write(&mut self, port: u16, data: u16) -> bool {
        let Some(id) = self.outputs.find(port) else { return false };
        match self.arena.get_mut(id) {
            Some(dev) => {
                dev.dev_write(port, data);
                true
            },
            None => false,
        }
    }

    /// Reads a sense line, giving `default` if no device drives it.
    pub fn sense(&mut self, line: u16, default: bool) -> bool {
        match self.senses.find(line).and_then(|id| self.arena.get_mut(id)) {
            Some(dev) => dev.get_sense(line, default),
            None => default,
        }
    }

    /// Sets a flag line on the device receiving it, if any.
    pub fn set_flag(&mut self, line: u16, value: bool) {
        if let Some(dev) = self.flags.find(line).and_then(|id| self.arena.get_mut(id)) {
            dev.set_flag(line, value);
        }
    }

    /// Sends an IOT to the device with this device code.
    ///
    /// Returns `None` if no device has the code, otherwise whether the device implemented the IOT.
    pub fn iot(&mut self, code: u16, ir: u16, ac: &mut u16, pc: &mut u16) -> Option<bool> {
        let id = self.inputs.find(code).or_else(|| self.outputs.find(code))?;
        Some(self.arena.get_mut(id)?.dev_iot(ir, ac, pc))
    }

    /// Clears every device exactly once, however many maps it is in.
    pub fn clear_all_once(&mut self) {
        self.arena.clear_all_once();
    }
}

/// Does nothing.
///
/// Reads as all ones and ignores writes. This is useful to reserve ports.
#[derive(Clone, Debug)]
pub struct NullDevice(DeviceInfo);
impl NullDevice {
    /// Creates a null device on the given ports.
    pub fn new(name: impl Into<String>, base: u16, count: u16) -> Self {
        Self(DeviceInfo::new(name, "null", Direction::InOut, base, count))
    }
}
impl Device for NullDevice {
    fn info(&self) -> &DeviceInfo {
        &self.0
    }

    fn dev_read(&mut self, _port: u16) -> u16 {
        u16::MAX
    }

    fn dev_write(&mut self, _port: u16, _data: u16) {}

    fn clear_device(&mut self) {}
}

/// A device shared with the host.
///
/// The CPU owns the wrapper, and the host keeps a clone of the inner `Arc` to
/// inspect or drive the device between runs. Each callback blocks on the lock.
///
/// The device's info, event handler and interrupt source are read once, when it is wrapped.
pub struct Shared<D> {
    info: DeviceInfo,
    inner: Arc<Mutex<D>>,
    handler: Option<HandlerId>,
    irq_source: Option<(u8, u32)>,
}
impl<D: Device> Shared<D> {
    /// Wraps a shared device.
    pub fn new(inner: Arc<Mutex<D>>) -> Self {
        let (info, handler, irq_source) = {
            let dev = super::lock(&inner);
            (dev.info().clone(), dev.event_handler(), dev.irq_source())
        };
        Self { info, inner, handler, irq_source }
    }

    /// The shared device.
    pub fn inner(&self) -> &Arc<Mutex<D>> {
        &self.inner
    }
}
impl<D> fmt::Debug for Shared<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared").field("info", &self.info).finish_non_exhaustive()
    }
}
impl<D: Device> Device for Shared<D> {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn dev_read(&mut self, port: u16) -> u16 {
        super::lock(&self.inner).dev_read(port)
    }

    fn dev_write(&mut self, port: u16, data: u16) {
        super::lock(&self.inner).dev_write(port, data)
    }

    fn clear_device(&mut self) {
        super::lock(&self.inner).clear_device()
    }

    fn event_handler(&self) -> Option<HandlerId> {
        self.handler
    }

    fn event_callback(&mut self, param: isize) {
        super::lock(&self.inner).event_callback(param)
    }

    fn irq_source(&self) -> Option<(u8, u32)> {
        self.irq_source
    }

    fn get_sense(&mut self, line: u16, default: bool) -> bool {
        super::lock(&self.inner).get_sense(line, default)
    }

    fn set_flag(&mut self, line: u16, value: bool) {
        super::lock(&self.inner).set_flag(line, value)
    }

    fn dev_iot(&mut self, ir: u16, ac: &mut u16, pc: &mut u16) -> bool {
        super::lock(&self.inner).dev_iot(ir, ac, pc)
    }

    fn show_device(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        super::lock(&self.inner).show_device(f)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sim::interrupt::{PriorityInterrupt, TriggerMode};

    /// Counts how often it is cleared.
    struct Counting {
        info: DeviceInfo,
        clears: Arc<Mutex<u32>>,
        last: u16,
    }
    impl Counting {
        fn new(name: &str, direction: Direction, base: u16, count: u16) -> (Self, Arc<Mutex<u32>>) {
            let clears = Arc::new(Mutex::new(0));
            let dev = Self { info: DeviceInfo::new(name, "test", direction, base, count), clears: clears.clone(), last: 0 };
            (dev, clears)
        }
    }
    impl Device for Counting {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }
        fn dev_read(&mut self, port: u16) -> u16 {
            port + self.last
        }
        fn dev_write(&mut self, _port: u16, data: u16) {
            self.last = data;
        }
        fn clear_device(&mut self) {
            *self.clears.lock().unwrap() += 1;
            self.last = 0;
        }
        fn get_sense(&mut self, _line: u16, _default: bool) -> bool {
            self.last != 0
        }
    }

    #[test]
    fn test_map_find_law() {
        let mut map = DeviceMap::new();
        let id = DeviceId(3);
        map.install(id, 4, 3).unwrap();

        for p in 4..7 {
            assert_eq!(map.find(p), Some(id));
        }
        assert_eq!(map.find(3), None);
        assert_eq!(map.find(7), None);

        map.remove(id);
        for p in 4..7 {
            assert_eq!(map.find(p), None);
        }
    }

    #[test]
    fn test_map_conflict() {
        let mut map = DeviceMap::new();
        map.install(DeviceId(0), 4, 2).unwrap();

        // reinstalling the same device is fine
        map.install(DeviceId(0), 4, 2).unwrap();

        let err = map.install(DeviceId(1), 2, 3).unwrap_err();
        assert_eq!(err, DeviceErr::PortConflict { port: 4, owner: "device #0".into() });
        assert_eq!(map.find(2), None);
        assert_eq!(map.is_installed(0, 5), Some((4, DeviceId(0))));
        assert_eq!(map.is_installed(0, 4), None);
    }

    #[test]
    fn test_handler_install_rollback() {
        let mut h = DeviceHandler::new();
        let (out, _) = Counting::new("OUT", Direction::Output, 3, 1);
        h.install(out).unwrap();

        // the input half would fit, but the output half collides, so neither is installed
        let (io, _) = Counting::new("IO", Direction::InOut, 2, 2);
        let err = h.install(io).unwrap_err();
        assert_eq!(err, DeviceErr::PortConflict { port: 3, owner: "OUT".into() });
        assert_eq!(h.find_input(2), None);
        assert_eq!(h.find("io"), None);
        assert_eq!(h.arena().len(), 1);
    }

    #[test]
    fn test_handler_read_write() {
        let mut h = DeviceHandler::new();
        let (io, _) = Counting::new("IO", Direction::InOut, 1, 2);
        let id = h.install(io).unwrap();
        h.attach_sense(id, 3, 1).unwrap();

        assert_eq!(h.read(0), None);
        assert!(h.write(2, 10));
        assert_eq!(h.read(1), Some(11));
        assert!(h.sense(3, false));
        assert!(h.sense(4, true));
        assert!(!h.sense(4, false));

        let dev = h.remove(id).unwrap();
        assert_eq!(dev.info().name, "IO");
        assert_eq!(h.find_sense(3), None);
        assert_eq!(h.read(1), None);
    }

    #[test]
    fn test_install_sense_and_flag() {
        let mut h = DeviceHandler::new();
        let (a, _) = Counting::new("A", Direction::Input, 0, 0);
        let id = h.install_sense(a, 1, 2).unwrap();
        assert_eq!(h.find_sense(2), Some(id));

        // a fresh device never owns lines yet, so any taken line conflicts
        let (b, _) = Counting::new("B", Direction::Input, 0, 0);
        let err = h.install_sense(b, 2, 2).unwrap_err();
        assert_eq!(err, DeviceErr::PortConflict { port: 2, owner: "A".into() });
        assert_eq!(h.find_sense(3), None);
        assert_eq!(h.arena().len(), 1);

        let (c, _) = Counting::new("C", Direction::Output, 0, 0);
        let flag = h.install_flag(c, 1, 1).unwrap();
        assert_ne!(flag, id);
        assert_eq!(h.find_flag(1), Some(flag));
    }

    #[test]
    fn test_clear_once() {
        let mut h = DeviceHandler::new();
        let (io, clears) = Counting::new("IO", Direction::InOut, 1, 2);
        let id = h.install(io).unwrap();
        h.attach_sense(id, 1, 4).unwrap();
        h.attach_flag(id, 0, 1).unwrap();

        h.clear_all_once();
        assert_eq!(*clears.lock().unwrap(), 1);

        // clearing twice leaves the device in the same state
        h.write(1, 5);
        h.clear_all_once();
        h.clear_all_once();
        assert_eq!(h.read(1), Some(1));
    }

    #[test]
    fn test_shared() {
        let (dev, _) = Counting::new("SHARED", Direction::InOut, 0, 1);
        let inner = Arc::new(Mutex::new(dev));
        let mut h = DeviceHandler::new();
        h.install(Shared::new(inner.clone())).unwrap();

        h.write(0, 9);
        assert_eq!(inner.lock().unwrap().last, 9);
    }

    struct Interrupting {
        info: DeviceInfo,
        irq: IrqLine,
    }
    impl Device for Interrupting {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }
        fn dev_read(&mut self, _port: u16) -> u16 {
            0
        }
        fn dev_write(&mut self, _port: u16, _data: u16) {}
        fn clear_device(&mut self) {}
        fn irq(&self) -> Option<&IrqLine> {
            Some(&self.irq)
        }
    }

    #[test]
    fn test_shared_interrupt_source() {
        let channel = Arc::new(Mutex::new(PriorityInterrupt::new(4, TriggerMode::Level)));
        let mut arena = DeviceArena::new();
        let plain = arena.insert(Box::new(Interrupting {
            info: DeviceInfo::new("PLAIN", "test", Direction::Input, 0, 1),
            irq: IrqLine::attach_level(&channel, 2).unwrap(),
        }));
        let shared = Arc::new(Mutex::new(Interrupting {
            info: DeviceInfo::new("SHARED", "test", Direction::Input, 1, 1),
            irq: IrqLine::attach_level(&channel, 3).unwrap(),
        }));
        let wrapped = arena.insert(Box::new(Shared::new(shared.clone())));

        let mask = shared.lock().unwrap().irq.mask();
        assert_eq!(arena.find_interrupt(3, mask), Some(wrapped));
        assert_eq!(arena.find_interrupt(2, 1), Some(plain));
        assert_eq!(arena.find_interrupt(1, 1), None);
    }

    #[test]
    fn test_show_device() {
        let dev = NullDevice::new("NUL", 0o10, 2);
        let mut s = String::new();
        dev.show_device(&mut s).unwrap();
        assert_eq!(s, "NUL (null) at 10..12\n");
    }
}
