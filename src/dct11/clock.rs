use crate::sim::device::{Device, DeviceInfo, Direction};
use crate::sim::event::{HandlerId, Scheduler};
use crate::sim::interrupt::IrqLine;

const ENABLE: u16 = 0o100;
const FLAG: u16 = 0o200;

/// A line-frequency clock with one memory-mapped status byte.
///
/// The status byte sits at the device's (even) base address; the odd byte
/// above it reads as zero and ignores writes.
/// - Bit 7 is set on every tick. Writing a 0 there clears it.
/// - Bit 6 enables the interrupt. While it is set, every tick produces a
///     new request edge on the clock's interrupt line.
///
/// The clock ticks whether or not it is enabled.
#[derive(Debug)]
pub struct LineClock {
    info: DeviceInfo,
    scheduler: Scheduler,
    handler: HandlerId,
    period: u64,
    irq: Option<IrqLine>,
    status: u16,
}
impl LineClock {
    /// Creates a clock ticking `hertz` times per virtual second. The first tick is one period away.
    pub fn new(name: impl Into<String>, base: u16, hertz: u64, scheduler: &Scheduler) -> Self {
        let clock = Self {
            info: DeviceInfo::new(name, "line clock", Direction::InOut, base & !1, 2),
            scheduler: scheduler.clone(),
            handler: scheduler.new_handler(),
            period: 1_000_000_000 / hertz.max(1),
            irq: None,
            status: 0,
        };
        clock.scheduler.schedule(clock.handler, 0, clock.period);
        clock
    }

    /// Connects the clock to an interrupt line (normally a CP input of [`Dct11Interrupts`]).
    ///
    /// [`Dct11Interrupts`]: super::Dct11Interrupts
    pub fn with_irq(mut self, irq: IrqLine) -> Self {
        self.irq = Some(irq);
        self
    }

    /// The time between ticks, in ns.
    pub fn period(&self) -> u64 {
        self.period
    }
}
impl Device for LineClock {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn dev_read(&mut self, addr: u16) -> u16 {
        match addr & 1 {
            0 => self.status,
            _ => 0,
        }
    }

    fn dev_write(&mut self, addr: u16, data: u16) {
        if addr & 1 != 0 { return };

        let flag = match data & FLAG {
            0 => 0,
            _ => self.status & FLAG,
        };
        self.status = flag | data & ENABLE;
        if self.status & ENABLE == 0 {
            if let Some(irq) = &self.irq {
                irq.clear();
            }
        }
    }

    fn clear_device(&mut self) {
        self.status = 0;
        if let Some(irq) = &self.irq {
            irq.clear();
        }
        self.scheduler.cancel(self.handler, 0);
        self.scheduler.schedule(self.handler, 0, self.period);
    }

    fn event_handler(&self) -> Option<HandlerId> {
        Some(self.handler)
    }

    fn event_callback(&mut self, _param: isize) {
        self.status |= FLAG;
        if self.status & ENABLE != 0 {
            if let Some(irq) = &self.irq {
                irq.clear();
                irq.assert();
            }
        }
        self.scheduler.schedule(self.handler, 0, self.period);
    }

    fn irq(&self) -> Option<&IrqLine> {
        self.irq.as_ref()
    }

    fn show_device(&self, f: &mut dyn std::fmt::Write) -> std::fmt::Result {
        writeln!(f, "{} (line clock) at {:06o}, {} ns period", self.info.name, self.info.base, self.period)?;
        writeln!(f, "  status {:03o}", self.status)
    }
}
