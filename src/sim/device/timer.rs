use std::ops::{Bound, RangeBounds};

use rand::rngs::StdRng;
use rand::Rng;

use crate::sim::event::{HandlerId, Scheduler};
use crate::sim::interrupt::IrqLine;

use super::{Device, DeviceInfo, Direction};

#[derive(Clone, Copy)]
struct SampleRange {
    start: u64,
    end: u64,
    end_incl: bool
}
impl SampleRange {
    fn new(r: impl RangeBounds<u64>) -> Self {
        let start = match r.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded    => 0,
        };
        let (end, end_incl) = match r.end_bound() {
            Bound::Included(&s) => (s, true),
            Bound::Excluded(&s) => (s, false),
            Bound::Unbounded => (u64::MAX, true),
        };

        Self { start, end, end_incl }
    }

    fn is_empty(&self) -> bool {
        match self.end_incl {
            true  => self.start > self.end,
            false => self.start >= self.end,
        }
    }
}
impl std::fmt::Debug for SampleRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleRange { start, end, end_incl: true } => (start..=end).fmt(f),
            SampleRange { start, end, end_incl: false } => (start..end).fmt(f),
        }
    }
}
impl RangeBounds<u64> for SampleRange {
    fn start_bound(&self) -> Bound<&u64> {
        Bound::Included(&self.start)
    }

    fn end_bound(&self) -> Bound<&u64> {
        match self.end_incl {
            true => Bound::Included(&self.end),
            false => Bound::Excluded(&self.end),
        }
    }
}

/// A timer device that interrupts after a configured amount (or range) of virtual time.
///
/// The timer has one control port:
/// - Writing sets the enable bit (bit 0) and acknowledges any pending expiry.
/// - Reading returns `expired << 1 | enabled`.
///
/// Each time the timer expires, it asserts its interrupt line and rearms with a
/// new interval drawn from its range.
#[derive(Debug)]
pub struct IntervalTimer {
    info: DeviceInfo,
    scheduler: Scheduler,
    handler: HandlerId,
    generator: Box<StdRng>,
    range: SampleRange,
    irq: Option<IrqLine>,
    enabled: bool,
    expired: bool,
}
impl IntervalTimer {
    /// Creates a new, disabled timer.
    /// - `seed`: Sets the seed for the timer's RNG. This can be `None`
    ///     if the intervals need not be deterministic or if the range is exactly one value.
    /// - `range`: The range of possible intervals, in ns.
    pub fn new(name: impl Into<String>, port: u16, scheduler: &Scheduler, seed: Option<u64>, range: impl RangeBounds<u64>) -> Self {
        use rand::SeedableRng;

        let generator = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            info: DeviceInfo::new(name, "interval timer", Direction::InOut, port, 1),
            scheduler: scheduler.clone(),
            handler: scheduler.new_handler(),
            generator: Box::new(generator),
            range: SampleRange::new(range),
            irq: None,
            enabled: false,
            expired: false,
        }
    }

    /// Connects the timer to an interrupt line.
    pub fn with_irq(mut self, irq: IrqLine) -> Self {
        self.irq = Some(irq);
        self
    }

    /// Gets the range of possible intervals.
    pub fn get_range(&self) -> impl RangeBounds<u64> {
        self.range
    }
    /// Sets the interval to a range of values.
    pub fn set_range(&mut self, r: impl RangeBounds<u64>) -> &mut Self {
        self.range = SampleRange::new(r);
        self
    }
    /// Sets the interval to an exact number of ns.
    pub fn set_exact(&mut self, n: u64) -> &mut Self {
        self.set_range(n..=n)
    }

    /// Whether the timer is running.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Generates a new random interval.
    fn generate_time(&mut self) -> u64 {
        if self.range.is_empty() {
            return self.range.start;
        }
        match self.range {
            SampleRange { start, end, end_incl: true } => self.generator.gen_range(start..=end),
            SampleRange { start, end, end_incl: false } => self.generator.gen_range(start..end),
        }
    }

    fn arm(&mut self) {
        let interval = self.generate_time();
        self.scheduler.cancel(self.handler, 0);
        self.scheduler.schedule(self.handler, 0, interval);
    }

    fn set_irq(&self, asserted: bool) {
        if let Some(irq) = &self.irq {
            irq.request(asserted);
        }
    }
}
impl Device for IntervalTimer {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn dev_read(&mut self, _port: u16) -> u16 {
        u16::from(self.expired) << 1 | u16::from(self.enabled)
    }

    fn dev_write(&mut self, _port: u16, data: u16) {
        self.expired = false;
        self.set_irq(false);

        let enable = data & 1 != 0;
        match (self.enabled, enable) {
            (false, true) => self.arm(),
            (true, false) => {
                self.scheduler.cancel(self.handler, 0);
            },
            _ => {},
        }
        self.enabled = enable;
    }

    fn clear_device(&mut self) {
        self.enabled = false;
        self.expired = false;
        self.set_irq(false);
        self.scheduler.cancel(self.handler, 0);
    }

    fn event_handler(&self) -> Option<HandlerId> {
        Some(self.handler)
    }

    fn event_callback(&mut self, _param: isize) {
        if !self.enabled { return };

        self.expired = true;
        self.set_irq(true);
        self.arm();
    }

    fn irq(&self) -> Option<&IrqLine> {
        self.irq.as_ref()
    }
}
