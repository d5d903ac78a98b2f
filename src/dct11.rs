//! Interfaces of the DEC DCT11, a PDP-11 on a chip.
//!
//! There is no DCT11 instruction engine here. This module holds what DCT11
//! peripherals and a host need to agree on:
//! - [`Psw`]: the processor status word and its priority bits.
//! - [`CP_TABLE`]: the vector and bus request level of each coded-priority input.
//! - [`Dct11Interrupts`]: the interrupt controller, resolving HALT, POWERFAIL
//!     and the 15 coded-priority inputs into a [`Trap`].
//! - [`LineClock`]: a line-frequency clock device.
//!
//! ```
//! use retro_ensemble::dct11::{Dct11Interrupts, Psw, Trap};
//!
//! let ints = Dct11Interrupts::new(0o172000);
//! let uart = ints.line(4).unwrap();
//! uart.assert();
//!
//! // BR5 is masked at priority 5 and taken at priority 4
//! assert_eq!(ints.take(Psw::with_priority(5)), None);
//! assert_eq!(ints.take(Psw::with_priority(4)), Some(Trap::Interrupt { cp: 4, vector: 0o134, br: 5 }));
//! ```
mod clock;

pub use clock::LineClock;

use std::sync::{Arc, Mutex};

use crate::sim::interrupt::{IrqLine, PriorityInterrupt, SimpleInterrupt, TriggerMode};
use crate::sim::lock;

/// The PSW loaded by a HALT trap (priority 7).
pub const HALT_PSW: u16 = 0o340;

/// The vector of the power fail trap.
pub const POWERFAIL_VECTOR: u16 = 0o24;

/// The number of coded-priority inputs.
pub const CP_LEVELS: u8 = 15;

/// The processor status word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Psw(pub u16);
impl Psw {
    /// Carry.
    pub const C: u16 = 0o1;
    /// Overflow.
    pub const V: u16 = 0o2;
    /// Zero.
    pub const Z: u16 = 0o4;
    /// Negative.
    pub const N: u16 = 0o10;
    /// Trace trap.
    pub const T: u16 = 0o20;

    /// A PSW with only the given priority set.
    pub fn with_priority(priority: u8) -> Self {
        let mut psw = Psw(0);
        psw.set_priority(priority);
        psw
    }

    /// The processor priority (bits 7..5).
    pub fn priority(self) -> u8 {
        ((self.0 >> 5) & 7) as u8
    }

    /// Sets the processor priority. Only the low three bits of `priority` are used.
    pub fn set_priority(&mut self, priority: u8) {
        self.0 = self.0 & !0o340 | u16::from(priority & 7) << 5;
    }

    /// Whether any of the given condition bits are set.
    pub fn is_set(self, bits: u16) -> bool {
        self.0 & bits != 0
    }
}

/// What a coded-priority input does when it is taken.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CpEntry {
    /// The interrupt vector.
    pub vector: u16,
    /// The bus request level, which must exceed the processor priority.
    pub br: u8,
}

/// The coded-priority inputs CP1..CP15, in order.
pub const CP_TABLE: [CpEntry; CP_LEVELS as usize] = [
    CpEntry { vector: 0o070, br: 4 },
    CpEntry { vector: 0o064, br: 4 },
    CpEntry { vector: 0o060, br: 4 },
    CpEntry { vector: 0o134, br: 5 },
    CpEntry { vector: 0o130, br: 5 },
    CpEntry { vector: 0o124, br: 5 },
    CpEntry { vector: 0o120, br: 5 },
    CpEntry { vector: 0o114, br: 6 },
    CpEntry { vector: 0o110, br: 6 },
    CpEntry { vector: 0o104, br: 6 },
    CpEntry { vector: 0o100, br: 6 },
    CpEntry { vector: 0o154, br: 7 },
    CpEntry { vector: 0o150, br: 7 },
    CpEntry { vector: 0o144, br: 7 },
    CpEntry { vector: 0o140, br: 7 },
];

/// The table entry of a coded-priority input (1..=15).
pub fn cp_entry(cp: u8) -> Option<CpEntry> {
    CP_TABLE.get(usize::from(cp).checked_sub(1)?).copied()
}

/// A trap the processor should take.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Trap {
    /// The HALT input. There is no vector: the PC and PSW are loaded directly.
    Halt {
        /// The restart address plus 2.
        pc: u16,
        /// Always [`HALT_PSW`].
        psw: Psw,
    },
    /// The POWERFAIL input.
    PowerFail {
        /// Always [`POWERFAIL_VECTOR`].
        vector: u16,
    },
    /// A coded-priority interrupt.
    Interrupt {
        /// The input, 1..=15.
        cp: u8,
        /// The interrupt vector.
        vector: u16,
        /// The bus request level.
        br: u8,
    },
}

/// The DCT11 interrupt controller.
///
/// HALT and POWERFAIL are non-maskable and take precedence, in that order.
/// Otherwise the highest requesting CP input whose BR level exceeds the
/// processor priority is taken. All inputs are edge-triggered: a request is
/// latched when its line is asserted and consumed when the trap is taken.
#[derive(Debug)]
pub struct Dct11Interrupts {
    cp: Arc<Mutex<PriorityInterrupt>>,
    halt: Arc<Mutex<SimpleInterrupt>>,
    powerfail: Arc<Mutex<SimpleInterrupt>>,
    restart: u16,
}
impl Dct11Interrupts {
    /// Creates a controller. HALT traps restart at `restart + 2`.
    pub fn new(restart: u16) -> Self {
        Self {
            cp: Arc::new(Mutex::new(PriorityInterrupt::new(CP_LEVELS, TriggerMode::Edge))),
            halt: Arc::new(Mutex::new(SimpleInterrupt::new(TriggerMode::Edge))),
            powerfail: Arc::new(Mutex::new(SimpleInterrupt::new(TriggerMode::Edge))),
            restart,
        }
    }

    /// The restart address.
    pub fn restart(&self) -> u16 {
        self.restart
    }

    /// The coded-priority channel, with level `n` for CP`n`.
    pub fn cp_channel(&self) -> &Arc<Mutex<PriorityInterrupt>> {
        &self.cp
    }

    /// Connects a device to a coded-priority input (1..=15).
    ///
    /// Returns `None` for an input that does not exist or has no free bits.
    pub fn line(&self, cp: u8) -> Option<IrqLine> {
        cp_entry(cp)?;
        IrqLine::attach_level(&self.cp, cp)
    }

    /// Connects a device to the HALT input.
    pub fn halt_line(&self) -> Option<IrqLine> {
        IrqLine::attach(&self.halt)
    }

    /// Connects a device to the POWERFAIL input.
    pub fn powerfail_line(&self) -> Option<IrqLine> {
        IrqLine::attach(&self.powerfail)
    }

    /// A bitmap of latched CP requests, with bit `n` set for CP`n`.
    pub fn pending(&self) -> u32 {
        lock(&self.cp).get_requests()
    }

    /// The trap the processor would take at this PSW, without taking it.
    pub fn find(&self, psw: Psw) -> Option<Trap> {
        if lock(&self.halt).is_requested() {
            return Some(Trap::Halt { pc: self.restart.wrapping_add(2), psw: Psw(HALT_PSW) });
        }
        if lock(&self.powerfail).is_requested() {
            return Some(Trap::PowerFail { vector: POWERFAIL_VECTOR });
        }

        let priority = psw.priority();
        let cp = lock(&self.cp).find_request_by(|cp| cp_entry(cp).is_some_and(|e| e.br > priority));
        let CpEntry { vector, br } = cp_entry(cp)?;
        Some(Trap::Interrupt { cp, vector, br })
    }

    /// Takes the trap the processor should take at this PSW, acknowledging its input.
    pub fn take(&self, psw: Psw) -> Option<Trap> {
        let trap = self.find(psw)?;
        match trap {
            Trap::Halt { .. } => lock(&self.halt).acknowledge_request(),
            Trap::PowerFail { .. } => lock(&self.powerfail).acknowledge_request(),
            Trap::Interrupt { cp, vector, .. } => {
                tracing::debug!(cp, vector, "interrupt acknowledged");
                self.acknowledge(cp);
            },
        }
        Some(trap)
    }

    /// Resets the request latch of one CP input.
    pub fn acknowledge(&self, cp: u8) {
        lock(&self.cp).acknowledge_request(cp);
    }

    /// Drops every pending request, as a processor reset does.
    pub fn reset(&self) {
        lock(&self.cp).clear_interrupt();
        lock(&self.halt).clear_interrupt();
        lock(&self.powerfail).clear_interrupt();
    }
}
