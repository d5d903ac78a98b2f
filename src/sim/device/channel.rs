use crossbeam_channel as cbc;

use crate::sim::event::{HandlerId, Scheduler};
use crate::sim::interrupt::IrqLine;

use super::{Device, DeviceInfo, Direction};

/// The host's ends of a [`ChannelPort`].
#[derive(Debug, Clone)]
pub struct ChannelEnds {
    /// Bytes sent here are read by the CPU.
    pub input: cbc::Sender<u8>,
    /// Bytes the CPU writes arrive here.
    pub output: cbc::Receiver<u8>,
}

/// A byte-wide port connected to the host through crossbeam channels.
///
/// Unlike a [`BufferedPort`], the host side can live on another thread.
/// The port polls its input channel on a fixed virtual-time interval and holds
/// on to one received byte until the CPU reads it. While a byte is held the
/// port's sense line is set and its interrupt line (if any) is asserted.
///
/// [`BufferedPort`]: super::BufferedPort
#[derive(Debug)]
pub struct ChannelPort {
    info: DeviceInfo,
    scheduler: Scheduler,
    handler: HandlerId,
    poll_ns: u64,
    read_data: cbc::Receiver<u8>,
    write_data: cbc::Sender<u8>,
    held: Option<u8>,
    irq: Option<IrqLine>,
}
impl ChannelPort {
    /// Creates a port on `port` that polls for input every `poll_ns` ns of virtual time.
    ///
    /// The host keeps the returned [`ChannelEnds`].
    pub fn new(name: impl Into<String>, port: u16, scheduler: &Scheduler, poll_ns: u64) -> (Self, ChannelEnds) {
        let (in_tx, in_rx) = cbc::unbounded();
        let (out_tx, out_rx) = cbc::unbounded();

        let info = DeviceInfo::new(name, "channel port", Direction::InOut, port, 1)
            .with_description("byte port backed by crossbeam channels");
        let dev = Self {
            info,
            scheduler: scheduler.clone(),
            handler: scheduler.new_handler(),
            poll_ns,
            read_data: in_rx,
            write_data: out_tx,
            held: None,
            irq: None,
        };
        dev.scheduler.schedule(dev.handler, 0, poll_ns);

        (dev, ChannelEnds { input: in_tx, output: out_rx })
    }

    /// Connects the port to an interrupt line.
    pub fn with_irq(mut self, irq: IrqLine) -> Self {
        self.irq = Some(irq);
        self
    }

    fn poll(&mut self) {
        if self.held.is_none() {
            // a disconnected host just means no more input
            self.held = self.read_data.try_recv().ok();
        }
        if let Some(irq) = &self.irq {
            irq.request(self.held.is_some());
        }
    }
}
impl Device for ChannelPort {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Takes the held byte. No input reads as zero.
    fn dev_read(&mut self, _port: u16) -> u16 {
        self.poll();
        let byte = self.held.take();
        self.poll();
        byte.map_or(0, u16::from)
    }

    fn dev_write(&mut self, _port: u16, data: u16) {
        if self.write_data.send(data as u8).is_err() {
            tracing::warn!(device = %self.info.name, data, "host disconnected, byte dropped");
        }
    }

    fn clear_device(&mut self) {
        self.held = None;
        if let Some(irq) = &self.irq {
            irq.clear();
        }
        self.scheduler.cancel(self.handler, 0);
        self.scheduler.schedule(self.handler, 0, self.poll_ns);
    }

    fn event_handler(&self) -> Option<HandlerId> {
        Some(self.handler)
    }

    fn event_callback(&mut self, _param: isize) {
        self.poll();
        self.scheduler.schedule(self.handler, 0, self.poll_ns);
    }

    fn get_sense(&mut self, _line: u16, _default: bool) -> bool {
        self.poll();
        self.held.is_some()
    }

    fn irq(&self) -> Option<&IrqLine> {
        self.irq.as_ref()
    }
}
