//! Interrupt request channels.
//!
//! An interrupt channel is a wired-OR of request bits. Each device that can
//! interrupt is given one bit of a channel (its *mask*), and asserts or clears
//! that bit to request or withdraw its interrupt.
//!
//! The core types here are:
//! - [`SimpleInterrupt`]: a single channel, either level- or edge-triggered.
//! - [`PriorityInterrupt`]: an ordered set of channels, one per priority level.
//! - [`IrqLine`]: a device's handle to its bit of a channel.

use std::sync::{Arc, Mutex, Weak};

use super::lock;

/// How a channel decides that it is requesting an interrupt.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum TriggerMode {
    /// The channel requests an interrupt as long as any bit is asserted.
    #[default]
    Level,
    /// The channel requests an interrupt once all bits go from clear to
    /// asserted, and keeps requesting until the request is acknowledged.
    Edge,
}

/// A single interrupt request channel.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SimpleInterrupt {
    mode: TriggerMode,
    allocated: u32,
    asserted: u32,
    latched: bool,
}

impl SimpleInterrupt {
    /// Creates a channel with no bits allocated.
    pub fn new(mode: TriggerMode) -> Self {
        Self { mode, ..Default::default() }
    }

    /// The channel's trigger mode.
    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    /// The bits currently handed out to devices.
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// The bits currently asserted.
    pub fn asserted(&self) -> u32 {
        self.asserted
    }

    /// Hands out the lowest unused bit, or `None` if all 32 are taken.
    pub fn allocate_mask(&mut self) -> Option<u32> {
        let bit = (0..u32::BITS)
            .map(|i| 1 << i)
            .find(|b| self.allocated & b == 0)?;
        self.allocated |= bit;
        Some(bit)
    }

    /// Returns bits to the pool, clearing any assertion they held.
    pub fn release_mask(&mut self, mask: u32) {
        self.request(mask, false);
        self.allocated &= !mask;
    }

    /// Asserts (or clears) the bits in `mask`.
    pub fn request(&mut self, mask: u32, asserted: bool) {
        let before = self.asserted;
        match asserted {
            true  => self.asserted |= mask,
            false => self.asserted &= !mask,
        }
        if self.mode == TriggerMode::Edge && before == 0 && self.asserted != 0 {
            self.latched = true;
        }
    }

    /// Whether the channel is requesting an interrupt.
    pub fn is_requested(&self) -> bool {
        match self.mode {
            TriggerMode::Level => self.asserted != 0,
            TriggerMode::Edge  => self.latched,
        }
    }

    /// Whether any of the bits in `mask` are asserted.
    pub fn is_requested_by(&self, mask: u32) -> bool {
        self.asserted & mask != 0
    }

    /// Tells the channel the CPU has taken its interrupt.
    ///
    /// This resets an edge-triggered channel's latch. A level-triggered
    /// channel keeps requesting until its devices clear their bits.
    pub fn acknowledge_request(&mut self) {
        self.latched = false;
    }

    /// Clears every assertion and the edge latch.
    pub fn clear_interrupt(&mut self) {
        self.asserted = 0;
        self.latched = false;
    }
}

/// A set of prioritized interrupt channels.
///
/// Levels are numbered from 1 (lowest) to [`PriorityInterrupt::levels`] (highest).
/// Level 0 means "no request".
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PriorityInterrupt {
    levels: Vec<SimpleInterrupt>,
}

impl PriorityInterrupt {
    /// Creates `levels` channels that all use the given trigger mode.
    pub fn new(levels: u8, mode: TriggerMode) -> Self {
        let levels = levels.min(31);
        Self { levels: vec![SimpleInterrupt::new(mode); usize::from(levels)] }
    }

    /// The number of levels.
    pub fn levels(&self) -> u8 {
        self.levels.len() as u8
    }

    /// The channel at the given level.
    pub fn level(&self, level: u8) -> Option<&SimpleInterrupt> {
        self.levels.get(usize::from(level).checked_sub(1)?)
    }

    /// The channel at the given level.
    pub fn level_mut(&mut self, level: u8) -> Option<&mut SimpleInterrupt> {
        self.levels.get_mut(usize::from(level).checked_sub(1)?)
    }

    /// Hands out an unused bit on the given level.
    pub fn allocate_mask(&mut self, level: u8) -> Option<u32> {
        self.level_mut(level)?.allocate_mask()
    }

    /// Returns bits to the pool on the given level.
    pub fn release_mask(&mut self, level: u8, mask: u32) {
        if let Some(l) = self.level_mut(level) {
            l.release_mask(mask);
        }
    }

    /// Asserts or clears bits on the given level.
    pub fn request(&mut self, level: u8, mask: u32, asserted: bool) {
        if let Some(l) = self.level_mut(level) {
            l.request(mask, asserted);
        }
    }

    /// A bitmap of the levels that are requesting, with bit `n` set for level `n`.
    pub fn get_requests(&self) -> u32 {
        self.levels.iter()
            .zip(1..)
            .filter(|(l, _)| l.is_requested())
            .fold(0, |acc, (_, n)| acc | 1 << n)
    }

    /// The highest requesting level above `priority`, or 0 if there is none.
    pub fn find_request(&self, priority: u8) -> u8 {
        self.find_request_by(|level| level > priority)
    }

    /// The highest requesting level that `accept` allows, or 0 if there is none.
    pub fn find_request_by(&self, accept: impl Fn(u8) -> bool) -> u8 {
        (1..=self.levels())
            .rev()
            .find(|&n| accept(n) && self.levels[usize::from(n) - 1].is_requested())
            .unwrap_or(0)
    }

    /// Acknowledges the request on the given level.
    pub fn acknowledge_request(&mut self, level: u8) {
        if let Some(l) = self.level_mut(level) {
            l.acknowledge_request();
        }
    }

    /// Clears every level.
    pub fn clear_interrupt(&mut self) {
        self.levels.iter_mut().for_each(SimpleInterrupt::clear_interrupt);
    }
}

#[derive(Debug)]
enum LineTarget {
    Simple(Weak<Mutex<SimpleInterrupt>>),
    Priority(Weak<Mutex<PriorityInterrupt>>, u8),
}

/// A device's connection to one bit of an interrupt channel.
///
/// The line only holds a weak reference to its channel, so a device that
/// outlives its CPU simply stops interrupting. Dropping the line releases its bit.
#[derive(Debug)]
pub struct IrqLine {
    target: LineTarget,
    mask: u32,
}

impl IrqLine {
    /// Allocates a bit on a simple channel.
    ///
    /// Returns `None` if every bit of the channel is already in use.
    pub fn attach(channel: &Arc<Mutex<SimpleInterrupt>>) -> Option<Self> {
        let mask = lock(channel).allocate_mask()?;
        Some(Self { target: LineTarget::Simple(Arc::downgrade(channel)), mask })
    }

    /// Allocates a bit on one level of a priority channel.
    pub fn attach_level(channel: &Arc<Mutex<PriorityInterrupt>>, level: u8) -> Option<Self> {
        let mask = lock(channel).allocate_mask(level)?;
        Some(Self { target: LineTarget::Priority(Arc::downgrade(channel), level), mask })
    }

    /// The bit this line owns.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// The priority level this line is attached to (0 for a simple channel).
    pub fn level(&self) -> u8 {
        match self.target {
            LineTarget::Simple(_) => 0,
            LineTarget::Priority(_, level) => level,
        }
    }

    /// Asserts or clears this line.
    pub fn request(&self, asserted: bool) {
        match &self.target {
            LineTarget::Simple(w) => if let Some(c) = w.upgrade() {
                lock(&c).request(self.mask, asserted);
            },
            LineTarget::Priority(w, level) => if let Some(c) = w.upgrade() {
                lock(&c).request(*level, self.mask, asserted);
            },
        }
    }

    /// Asserts this line.
    pub fn assert(&self) {
        self.request(true)
    }

    /// Clears this line.
    pub fn clear(&self) {
        self.request(false)
    }

    /// Whether this line is currently asserted.
    pub fn is_asserted(&self) -> bool {
        match &self.target {
            LineTarget::Simple(w) => w.upgrade()
                .is_some_and(|c| lock(&c).is_requested_by(self.mask)),
            LineTarget::Priority(w, level) => w.upgrade()
                .is_some_and(|c| lock(&c).level(*level).is_some_and(|l| l.is_requested_by(self.mask))),
        }
    }
}

impl Drop for IrqLine {
    fn drop(&mut self) {
        match &self.target {
            LineTarget::Simple(w) => if let Some(c) = w.upgrade() {
                lock(&c).release_mask(self.mask);
            },
            LineTarget::Priority(w, level) => if let Some(c) = w.upgrade() {
                lock(&c).release_mask(*level, self.mask);
            },
        }
    }
}
