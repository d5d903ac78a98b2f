//! The RCA COSMAC family: CDP1802, and the CDP1804A/1805A extended set.
//!
//! The COSMAC has sixteen 16-bit registers `R0`..`RF`, an 8-bit accumulator `D`
//! with its carry `DF`, and two 4-bit pointers: `P` picks the register used as
//! the program counter and `X` the register used as the memory index.
//!
//! Devices connect to the processor in three ways:
//! - I/O ports 1..7, used by `OUT n` and `INP n`.
//! - Sense lines 1..4, read as the `EF1`..`EF4` flags. An unconnected line reads as
//!     the default configured in [`CosmacConfig::ef_defaults`].
//! - Flag line 0, which follows the `Q` output.
//!
//! A device can also interrupt the processor through the channel from [`Cosmac::irq`].
//!
//! ```
//! use retro_ensemble::sim::{Cpu, StopCode};
//! use retro_ensemble::cosmac::{Cosmac, CosmacReg};
//!
//! let mut cpu = Cosmac::new(Default::default(), Default::default());
//! // LDI #FF; ADI #01; BR .
//! for (addr, byte) in [0xF8, 0xFF, 0xFC, 0x01, 0x30, 0x04].into_iter().enumerate() {
//!     cpu.memory_mut().mem_write(addr as u16, byte);
//! }
//! cpu.set_register(CosmacReg::Ie, 0);
//!
//! assert_eq!(cpu.run(0), StopCode::EndlessLoop);
//! assert_eq!(cpu.get_register(CosmacReg::D), 0x00);
//! assert_eq!(cpu.get_register(CosmacReg::Df), 1);
//! ```
mod alu;
mod counter;
mod extended;

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::err::RegisterErr;
use crate::sim::mem::{AddressSpace, MemFlags};
use crate::sim::interrupt::{SimpleInterrupt, TriggerMode};
use crate::sim::{lock, Core, Cpu, CpuFlags};

pub use counter::{CounterMode, CounterTimer};

/// Clocks in one COSMAC machine cycle.
pub const CLOCKS_PER_CYCLE: u64 = 8;

/// The flag line driven by `Q`.
pub const Q_LINE: u16 = 0;

/// Which processor is simulated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CosmacModel {
    /// The CDP1802, with the basic instruction set.
    #[default]
    Cdp1802,
    /// The CDP1804A, with the extended instruction set and counter/timer.
    Cdp1804,
    /// The CDP1805A, with the extended instruction set and counter/timer.
    Cdp1805,
}
impl CosmacModel {
    /// Whether the model decodes the `68xx` extended opcodes.
    pub fn is_extended(self) -> bool {
        self != CosmacModel::Cdp1802
    }
}

/// Configuration specific to the COSMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CosmacConfig {
    /// Which processor is simulated.
    ///
    /// By default, this is the CDP1802.
    pub model: CosmacModel,

    /// The level read from an `EF` line that no device drives, for `EF1`..`EF4`.
    ///
    /// By default, all unconnected lines read low.
    pub ef_defaults: [bool; 4],
}

/// The COSMAC's registers, by name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CosmacReg {
    /// One of the sixteen scratchpad registers.
    R(u8),
    /// Accumulator.
    D,
    /// Data flag (carry).
    Df,
    /// Program counter designator.
    P,
    /// Index designator.
    X,
    /// Saved `X` and `P` from the last interrupt or `MARK`.
    T,
    /// Scratch register of the extended instructions.
    B,
    /// Master interrupt enable.
    Ie,
    /// The `Q` output.
    Q,
    /// External interrupt enable.
    Xie,
    /// Counter interrupt enable.
    Cie,
    /// Counter interrupt request.
    Ci,
    /// Whether counter underflows toggle `Q`.
    Etq,
    /// The counter.
    Cntr,
    /// The counter reload value.
    Ch,
}
impl std::fmt::Display for CosmacReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CosmacReg::R(n) => write!(f, "R{n:X}"),
            CosmacReg::D    => f.write_str("D"),
            CosmacReg::Df   => f.write_str("DF"),
            CosmacReg::P    => f.write_str("P"),
            CosmacReg::X    => f.write_str("X"),
            CosmacReg::T    => f.write_str("T"),
            CosmacReg::B    => f.write_str("B"),
            CosmacReg::Ie   => f.write_str("IE"),
            CosmacReg::Q    => f.write_str("Q"),
            CosmacReg::Xie  => f.write_str("XIE"),
            CosmacReg::Cie  => f.write_str("CIE"),
            CosmacReg::Ci   => f.write_str("CI"),
            CosmacReg::Etq  => f.write_str("ETQ"),
            CosmacReg::Cntr => f.write_str("CNTR"),
            CosmacReg::Ch   => f.write_str("CH"),
        }
    }
}
impl FromStr for CosmacReg {
    type Err = RegisterErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reg = match s.to_ascii_uppercase().as_str() {
            "D"    => CosmacReg::D,
            "DF"   => CosmacReg::Df,
            "P"    => CosmacReg::P,
            "X"    => CosmacReg::X,
            "T"    => CosmacReg::T,
            "B"    => CosmacReg::B,
            "IE"   => CosmacReg::Ie,
            "Q"    => CosmacReg::Q,
            "XIE"  => CosmacReg::Xie,
            "CIE"  => CosmacReg::Cie,
            "CI"   => CosmacReg::Ci,
            "ETQ"  => CosmacReg::Etq,
            "CNTR" => CosmacReg::Cntr,
            "CH"   => CosmacReg::Ch,
            r => r.strip_prefix('R')
                .filter(|n| n.len() == 1)
                .and_then(|n| u8::from_str_radix(n, 16).ok())
                .map(CosmacReg::R)
                .ok_or_else(|| RegisterErr(s.to_string()))?,
        };
        Ok(reg)
    }
}

/// A simulated COSMAC.
#[derive(Debug)]
pub struct Cosmac {
    core: Core,
    config: CosmacConfig,
    irq: Arc<Mutex<SimpleInterrupt>>,

    r: [u16; 16],
    d: u8,
    df: bool,
    p: u8,
    x: u8,
    t: u8,
    b: u8,
    ie: bool,
    q: bool,
    xie: bool,
    cie: bool,
    ci: bool,
    etq: bool,
    counter: CounterTimer,
}

impl Cosmac {
    /// Creates a processor with 64K of RAM, reset and ready to run from address 0.
    pub fn new(flags: CpuFlags, config: CosmacConfig) -> Self {
        let memory = AddressSpace::new("memory", 0x10000, 8, MemFlags::RAM);
        let mut cpu = Self {
            core: Core::new(flags, CLOCKS_PER_CYCLE, vec![memory]),
            config,
            irq: Arc::new(Mutex::new(SimpleInterrupt::new(TriggerMode::Level))),
            r: [0; 16],
            d: 0,
            df: false,
            p: 0,
            x: 0,
            t: 0,
            b: 0,
            ie: true,
            q: false,
            xie: true,
            cie: true,
            ci: false,
            etq: false,
            counter: CounterTimer::default(),
        };
        cpu.clear_cpu();
        cpu
    }

    /// The configuration.
    pub fn config(&self) -> &CosmacConfig {
        &self.config
    }
    /// The configuration. Changes take effect from the next instruction.
    pub fn config_mut(&mut self) -> &mut CosmacConfig {
        &mut self.config
    }

    /// The processor's memory.
    pub fn memory(&self) -> &AddressSpace {
        &self.core.spaces[0]
    }
    /// The processor's memory.
    pub fn memory_mut(&mut self) -> &mut AddressSpace {
        &mut self.core.spaces[0]
    }

    /// The external interrupt channel. Devices attach to it with [`IrqLine::attach`].
    ///
    /// [`IrqLine::attach`]: crate::sim::interrupt::IrqLine::attach
    pub fn irq(&self) -> &Arc<Mutex<SimpleInterrupt>> {
        &self.irq
    }

    /// The counter/timer.
    pub fn counter(&self) -> &CounterTimer {
        &self.counter
    }

    fn read(&mut self, addr: u16) -> u8 {
        self.core.spaces[0].cpu_read(addr) as u8
    }

    fn write(&mut self, addr: u16, data: u8) {
        self.core.spaces[0].cpu_write(addr, u16::from(data));
    }

    /// Reads M(R(P)) and advances R(P).
    fn fetch(&mut self) -> u8 {
        let pc = self.r[usize::from(self.p)];
        self.r[usize::from(self.p)] = pc.wrapping_add(1);
        self.read(pc)
    }

    fn reg(&self, n: u8) -> u16 {
        self.r[usize::from(n & 0xF)]
    }

    fn reg_mut(&mut self, n: u8) -> &mut u16 {
        &mut self.r[usize::from(n & 0xF)]
    }

    fn inc(&mut self, n: u8) {
        let r = self.reg_mut(n);
        *r = r.wrapping_add(1);
    }

    fn dec(&mut self, n: u8) {
        let r = self.reg_mut(n);
        *r = r.wrapping_sub(1);
    }

    fn set_q(&mut self, q: bool) {
        self.q = q;
        self.core.devices.set_flag(Q_LINE, q);
    }

    /// Reads `EF1`..`EF4`.
    fn ef(&mut self, line: u16) -> bool {
        let default = self.config.ef_defaults[usize::from(line - 1) & 3];
        self.core.devices.sense(line, default)
    }

    fn external_request(&self) -> bool {
        self.xie && lock(&self.irq).is_requested()
    }

    fn counter_request(&self) -> bool {
        self.config.model.is_extended() && self.cie && self.ci
    }

    fn interrupt_pending(&self) -> bool {
        self.ie && (self.external_request() || self.counter_request())
    }

    /// Whether anything could ever end an `IDL`.
    fn can_wake(&self) -> bool {
        let external = self.xie && lock(&self.irq).allocated() != 0;
        let counter = self.config.model.is_extended() && self.cie && (self.ci || self.counter.is_running());
        self.ie && (external || counter)
    }

    /// Advances time, clocking the counter/timer one cycle at a time while it runs.
    fn add_cycles(&mut self, cycles: u64) {
        if !self.config.model.is_extended() || !self.counter.is_running() {
            self.core.add_cycles(cycles);
            return;
        }
        for _ in 0..cycles {
            let ef = match self.counter.source_line() {
                Some(line) => self.ef(line),
                None => false,
            };
            if self.counter.clock(ef) {
                self.counter_underflow();
            }
            self.core.add_cycles(1);
        }
    }

    fn counter_underflow(&mut self) {
        self.ci = true;
        if self.etq {
            self.set_q(!self.q);
        }
    }

    /// Replaces the low byte of R(P) with the immediate byte if `taken`, or skips it.
    fn short_branch(&mut self, taken: bool) {
        let pc = self.reg(self.p);
        match taken {
            true => {
                let target = self.read(pc);
                *self.reg_mut(self.p) = pc & 0xFF00 | u16::from(target);
            },
            false => *self.reg_mut(self.p) = pc.wrapping_add(1),
        }
    }

    /// Replaces R(P) with the two immediate bytes if `taken`, or skips them.
    fn long_branch(&mut self, taken: bool) {
        let pc = self.reg(self.p);
        match taken {
            true => {
                let hi = self.read(pc);
                let lo = self.read(pc.wrapping_add(1));
                *self.reg_mut(self.p) = u16::from_be_bytes([hi, lo]);
            },
            false => *self.reg_mut(self.p) = pc.wrapping_add(2),
        }
    }

    fn long_skip(&mut self, skip: bool) {
        if skip {
            let pc = self.reg(self.p);
            *self.reg_mut(self.p) = pc.wrapping_add(2);
        }
    }

    /// Applies the shared adder to D and the operand.
    fn arith(&mut self, i: u8, n: u8, operand: u8) {
        (self.d, self.df) = alu::add(i, n, self.d, operand, self.df);
    }

    fn idle(&mut self) {
        if !self.can_wake() {
            tracing::warn!(pc = self.core.saved_pc(), "IDL with no interrupt that could wake the processor");
            self.core.set_stop(crate::sim::StopCode::Break);
            return;
        }
        while !self.interrupt_pending()
            && !self.core.stop_code().is_stopped()
            && !self.core.break_requested()
        {
            self.add_cycles(1);
            self.core.do_events();
        }
    }

    fn output(&mut self, port: u8, op: u8) {
        let addr = self.reg(self.x);
        let data = self.read(addr);
        self.inc(self.x);
        if !self.core.devices.write(port.into(), data.into()) {
            self.core.illegal_io(op.into());
        }
    }

    fn input(&mut self, port: u8, op: u8) {
        let data = match self.core.devices.read(port.into()) {
            Some(data) => data as u8,
            None => {
                self.core.illegal_io(op.into());
                0xFF
            },
        };
        let addr = self.reg(self.x);
        self.write(addr, data);
        self.d = data;
    }

    /// `RET` and `DIS`: restores X and P from M(R(X)).
    fn restore(&mut self, ie: bool) {
        let addr = self.reg(self.x);
        let xp = self.read(addr);
        self.inc(self.x);
        self.x = xp >> 4;
        self.p = xp & 0xF;
        self.ie = ie;
    }

    /// Executes one decoded opcode, returning the machine cycles used.
    fn execute(&mut self, op: u8) -> u64 {
        let (i, n) = (op >> 4, op & 0xF);
        match i {
            0x0 => match n {
                0 => self.idle(),
                _ => self.d = self.read(self.reg(n)),
            },
            0x1 => self.inc(n),
            0x2 => self.dec(n),
            0x3 => {
                let cond = match n & 7 {
                    0 => true,
                    1 => self.q,
                    2 => self.d == 0,
                    3 => self.df,
                    ef => self.ef(u16::from(ef - 3)),
                };
                self.short_branch(cond ^ (n & 8 != 0));
            },
            0x4 => {
                self.d = self.read(self.reg(n));
                self.inc(n);
            },
            0x5 => self.write(self.reg(n), self.d),
            0x6 => match n {
                0 => self.inc(self.x),
                1..=7 => self.output(n, op),
                8 => return self.execute_extended(),
                _ => self.input(n & 7, op),
            },
            0x7 => match n {
                0x0 => self.restore(true),
                0x1 => self.restore(false),
                0x2 => {
                    self.d = self.read(self.reg(self.x));
                    self.inc(self.x);
                },
                0x3 => {
                    self.write(self.reg(self.x), self.d);
                    self.dec(self.x);
                },
                0x6 => (self.d, self.df) = alu::shr(self.d, self.df),
                0x8 => self.write(self.reg(self.x), self.t),
                0x9 => {
                    self.t = self.x << 4 | self.p;
                    self.write(self.reg(2), self.t);
                    self.x = self.p;
                    self.dec(2);
                },
                0xA => self.set_q(false),
                0xB => self.set_q(true),
                0xE => (self.d, self.df) = alu::shl(self.d, self.df),
                // ADC, SDB, SMB
                0x4 | 0x5 | 0x7 => {
                    let m = self.read(self.reg(self.x));
                    self.arith(i, n, m);
                },
                // ADCI, SDBI, SMBI
                _ => {
                    let m = self.fetch();
                    self.arith(i, n, m);
                },
            },
            0x8 => self.d = self.reg(n) as u8,
            0x9 => self.d = (self.reg(n) >> 8) as u8,
            0xA => {
                let d = self.d;
                let r = self.reg_mut(n);
                *r = *r & 0xFF00 | u16::from(d);
            },
            0xB => {
                let d = self.d;
                let r = self.reg_mut(n);
                *r = *r & 0x00FF | u16::from(d) << 8;
            },
            0xC => {
                let cond = match n & 3 {
                    0 => true,
                    1 => self.q,
                    2 => self.d == 0,
                    _ => self.df,
                };
                match n {
                    0x4 => {},
                    0xC => self.long_skip(self.ie),
                    _ if n & 4 == 0 => self.long_branch(cond ^ (n & 8 != 0)),
                    _ => self.long_skip(cond ^ (n & 8 == 0)),
                }
                return 3;
            },
            0xD => self.p = n,
            0xE => self.x = n,
            _ => match n {
                0x6 => (self.d, self.df) = alu::shr(self.d, false),
                0xE => (self.d, self.df) = alu::shl(self.d, false),
                _ => {
                    let operand = match n & 8 {
                        0 => self.read(self.reg(self.x)),
                        _ => self.fetch(),
                    };
                    match n & 7 {
                        0 => self.d = operand,
                        1 => self.d |= operand,
                        2 => self.d &= operand,
                        3 => self.d ^= operand,
                        _ => self.arith(i, n, operand),
                    }
                },
            },
        }
        2
    }

    /// Takes an interrupt: saves X and P in T and runs the handler in R1 with X = 2.
    fn interrupt(&mut self, external: bool) {
        tracing::debug!(external, pc = self.reg(self.p), "interrupt acknowledged");
        self.t = self.x << 4 | self.p;
        self.x = 2;
        self.p = 1;
        self.ie = false;
        if external {
            lock(&self.irq).acknowledge_request();
        }
        self.add_cycles(1);
    }
}

impl Cpu for Cosmac {
    type Reg = CosmacReg;

    fn core(&self) -> &Core {
        &self.core
    }

    fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    /// Resets every register to zero, enables interrupts and stops the counter.
    fn clear_cpu(&mut self) {
        self.r = [0; 16];
        self.d = 0;
        self.df = false;
        self.p = 0;
        self.x = 0;
        self.t = 0;
        self.b = 0;
        self.ie = true;
        self.xie = true;
        self.cie = true;
        self.ci = false;
        self.etq = false;
        self.counter.clear();
        self.set_q(false);
    }

    fn pc(&self) -> u16 {
        self.reg(self.p)
    }

    fn set_pc(&mut self, pc: u16) {
        *self.reg_mut(self.p) = pc;
    }

    fn interrupts_enabled(&self) -> bool {
        self.ie
    }

    fn service_interrupts(&mut self) {
        if !self.ie {
            return;
        }
        if self.external_request() {
            self.interrupt(true);
        } else if self.counter_request() {
            self.interrupt(false);
        }
    }

    fn at_breakpoint(&self) -> bool {
        self.memory().is_break(self.pc())
    }

    fn step(&mut self) {
        let pc = self.pc();
        let op = self.fetch();
        tracing::trace!(pc, op, "execute");
        let cycles = self.execute(op);
        self.add_cycles(cycles);
    }

    fn get_register(&self, reg: CosmacReg) -> u32 {
        match reg {
            CosmacReg::R(n) => self.reg(n).into(),
            CosmacReg::D    => self.d.into(),
            CosmacReg::Df   => self.df.into(),
            CosmacReg::P    => self.p.into(),
            CosmacReg::X    => self.x.into(),
            CosmacReg::T    => self.t.into(),
            CosmacReg::B    => self.b.into(),
            CosmacReg::Ie   => self.ie.into(),
            CosmacReg::Q    => self.q.into(),
            CosmacReg::Xie  => self.xie.into(),
            CosmacReg::Cie  => self.cie.into(),
            CosmacReg::Ci   => self.ci.into(),
            CosmacReg::Etq  => self.etq.into(),
            CosmacReg::Cntr => self.counter.cntr.into(),
            CosmacReg::Ch   => self.counter.ch.into(),
        }
    }

    fn set_register(&mut self, reg: CosmacReg, value: u32) {
        let bit = value & 1 != 0;
        match reg {
            CosmacReg::R(n) => *self.reg_mut(n) = value as u16,
            CosmacReg::D    => self.d = value as u8,
            CosmacReg::Df   => self.df = bit,
            CosmacReg::P    => self.p = value as u8 & 0xF,
            CosmacReg::X    => self.x = value as u8 & 0xF,
            CosmacReg::T    => self.t = value as u8,
            CosmacReg::B    => self.b = value as u8,
            CosmacReg::Ie   => self.ie = bit,
            CosmacReg::Q    => self.set_q(bit),
            CosmacReg::Xie  => self.xie = bit,
            CosmacReg::Cie  => self.cie = bit,
            CosmacReg::Ci   => self.ci = bit,
            CosmacReg::Etq  => self.etq = bit,
            CosmacReg::Cntr => self.counter.cntr = value as u8,
            CosmacReg::Ch   => self.counter.ch = value as u8,
        }
    }

    fn register_size(&self, reg: CosmacReg) -> u32 {
        match reg {
            CosmacReg::R(_) => 16,
            CosmacReg::D | CosmacReg::T | CosmacReg::B | CosmacReg::Cntr | CosmacReg::Ch => 8,
            CosmacReg::P | CosmacReg::X => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sim::device::{BufferedPort, Device, DeviceInfo, Direction, IntervalTimer};
    use crate::sim::interrupt::IrqLine;
    use crate::sim::StopCode;

    pub(super) fn load(cpu: &mut Cosmac, base: u16, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            cpu.memory_mut().mem_write(base + i as u16, b.into());
        }
    }

    pub(super) fn cpu_with(model: CosmacModel, bytes: &[u8]) -> Cosmac {
        let mut cpu = Cosmac::new(CpuFlags::default(), CosmacConfig { model, ..Default::default() });
        load(&mut cpu, 0, bytes);
        cpu
    }

    /// A flag line observer and sense line source.
    #[derive(Debug)]
    struct Lines {
        info: DeviceInfo,
        q: Arc<Mutex<bool>>,
        ef: Arc<Mutex<bool>>,
    }
    impl Device for Lines {
        fn info(&self) -> &DeviceInfo { &self.info }
        fn clear_device(&mut self) {}
        fn get_sense(&mut self, _line: u16, _default: bool) -> bool { *lock(&self.ef) }
        fn set_flag(&mut self, _line: u16, value: bool) { *lock(&self.q) = value; }
    }

    #[test]
    fn test_add_immediate() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0xF8, 0x12, 0xFC, 0x34]);
        assert_eq!(cpu.run(2), StopCode::Finished);
        assert_eq!(cpu.get_register(CosmacReg::D), 0o046);
        assert_eq!(cpu.get_register(CosmacReg::Df), 0);
        assert_eq!(cpu.pc(), 4);
        // two cycles of 8 clocks each, at 4 MHz
        assert_eq!(cpu.core().now(), 2 * 2 * 2000);
    }

    #[test]
    fn test_add_carry() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0xF8, 0xFF, 0xFC, 0x01]);
        assert_eq!(cpu.run(2), StopCode::Finished);
        assert_eq!(cpu.get_register(CosmacReg::D), 0);
        assert_eq!(cpu.get_register(CosmacReg::Df), 1);
    }

    #[test]
    fn test_memory_reference() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[
            0xF8, 0x01, 0xB3, // LDI 01; PHI R3
            0xF8, 0x00, 0xA3, // LDI 00; PLO R3
            0x43,             // LDA R3
            0x43,             // LDA R3
            0x03,             // LDN R3
        ]);
        load(&mut cpu, 0x100, &[0x20, 0x05, 0x77]);
        assert_eq!(cpu.run(6), StopCode::Finished);
        assert_eq!(cpu.get_register(CosmacReg::R(3)), 0x0102);
        assert_eq!(cpu.get_register(CosmacReg::D), 0x05);
        cpu.run(1);
        assert_eq!(cpu.get_register(CosmacReg::R(3)), 0x0102);
        assert_eq!(cpu.get_register(CosmacReg::D), 0x77);

        // STR, then GLO/GHI
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0xF8, 0x99, 0x55, 0x85, 0x95]);
        cpu.set_register(CosmacReg::R(5), 0x1234);
        assert_eq!(cpu.run(2), StopCode::Finished);
        assert_eq!(cpu.memory().mem_read(0x1234), 0x99);
        cpu.run(1);
        assert_eq!(cpu.get_register(CosmacReg::D), 0x34);
        cpu.run(1);
        assert_eq!(cpu.get_register(CosmacReg::D), 0x12);
    }

    #[test]
    fn test_short_branches() {
        // BZ taken, then BNZ not taken
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0x32, 0x10]);
        load(&mut cpu, 0x10, &[0x3A, 0x40, 0x38, 0x00, 0x33, 0x50]);
        cpu.run(1);
        assert_eq!(cpu.pc(), 0x10);
        cpu.run(1);
        assert_eq!(cpu.pc(), 0x12);
        // SKP skips one byte
        cpu.run(1);
        assert_eq!(cpu.pc(), 0x14);
        // BDF with DF clear
        cpu.run(1);
        assert_eq!(cpu.pc(), 0x16);
    }

    #[test]
    fn test_long_branches_and_skips() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0xC0, 0x12, 0x34]);
        load(&mut cpu, 0x1234, &[
            0xCA, 0x00, 0x00, // LBNZ (not taken)
            0xCE,             // LSZ (D == 0: skip)
            0x00, 0x00,
            0xC4,             // NOP
            0xCC,             // LSIE (IE set: skip)
            0x00, 0x00,
            0xC5,             // LSNQ (Q clear: skip)
            0x00, 0x00,
            0xC8,             // LSKP
            0x00, 0x00,
            0xC7,             // LSNF (DF clear: skip)
            0x00, 0x00,
            0xCD,             // LSQ (Q clear: no skip)
        ]);
        cpu.run(1);
        assert_eq!(cpu.pc(), 0x1234);
        let expect = [0x1237, 0x123A, 0x123B, 0x123E, 0x1241, 0x1244, 0x1247, 0x1248];
        for pc in expect {
            cpu.run(1);
            assert_eq!(cpu.pc(), pc);
        }
        // a long branch costs three cycles
        assert_eq!(cpu.core().now(), 9 * 3 * 2000);
    }

    #[test]
    fn test_shifts_and_logic() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[
            0xF8, 0x81, // LDI 81
            0xF6,       // SHR
            0x7E,       // SHLC
            0xFA, 0x0F, // ANI 0F
            0xF9, 0xF0, // ORI F0
            0xFB, 0xFF, // XRI FF
            0xFE,       // SHL
        ]);
        cpu.run(2);
        assert_eq!((cpu.get_register(CosmacReg::D), cpu.get_register(CosmacReg::Df)), (0x40, 1));
        cpu.run(1);
        assert_eq!((cpu.get_register(CosmacReg::D), cpu.get_register(CosmacReg::Df)), (0x81, 0));
        cpu.run(3);
        assert_eq!(cpu.get_register(CosmacReg::D), 0x0E);
        cpu.run(1);
        assert_eq!((cpu.get_register(CosmacReg::D), cpu.get_register(CosmacReg::Df)), (0x1C, 0));
    }

    #[test]
    fn test_sep_sex_mark_ret() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[
            0xE5, // SEX 5
            0xD3, // SEP 3
        ]);
        cpu.set_register(CosmacReg::R(3), 0x40);
        cpu.set_register(CosmacReg::R(2), 0x80);
        load(&mut cpu, 0x40, &[0x79, 0x70]);
        cpu.run(3);
        // MARK saved X=5, P=3 in T and at M(R2), and set X=P
        assert_eq!(cpu.get_register(CosmacReg::T), 0x53);
        assert_eq!(cpu.memory().mem_read(0x80), 0x53);
        assert_eq!(cpu.get_register(CosmacReg::R(2)), 0x7F);
        assert_eq!(cpu.get_register(CosmacReg::X), 3);

        // RET with X=2 after an INC R2 restores X and P
        cpu.set_register(CosmacReg::X, 2);
        cpu.set_register(CosmacReg::R(2), 0x80);
        cpu.set_register(CosmacReg::Ie, 0);
        cpu.run(1);
        assert_eq!(cpu.get_register(CosmacReg::X), 5);
        assert_eq!(cpu.get_register(CosmacReg::P), 3);
        assert_eq!(cpu.get_register(CosmacReg::Ie), 1);
        assert_eq!(cpu.get_register(CosmacReg::R(2)), 0x81);
    }

    #[test]
    fn test_io_ports() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[
            0xE1, // SEX 1
            0x62, // OUT 2
            0x6A, // INP 2
            0x63, // OUT 3 (nobody there)
        ]);
        let port = BufferedPort::new("TTY", 2);
        let input = Arc::clone(port.get_input());
        let output = Arc::clone(port.get_output());
        cpu.core_mut().devices.install(port).unwrap();

        cpu.set_register(CosmacReg::R(1), 0x200);
        load(&mut cpu, 0x200, b"Hi");
        input.write().unwrap().push_back(b'!');

        assert_eq!(cpu.run(0), StopCode::IllegalIo);
        assert_eq!(*output.read().unwrap(), b"H");
        assert_eq!(cpu.get_register(CosmacReg::D), u32::from(b'!'));
        assert_eq!(cpu.memory().mem_read(0x201), u16::from(b'!'));
        assert_eq!(cpu.core().saved_pc(), 3);
        assert_eq!(cpu.stop_message(), "illegal I/O instruction at 0003");
    }

    #[test]
    fn test_q_and_ef_lines() {
        let q = Arc::new(Mutex::new(false));
        let ef = Arc::new(Mutex::new(false));
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[
            0x7B,       // SEQ
            0x34, 0x10, // B1 10
            0x35, 0x20, // B2 20
        ]);
        let id = cpu.core_mut().devices.install_flag(Lines {
            info: DeviceInfo::new("LNS", "lines", Direction::InOut, 0, 0),
            q: Arc::clone(&q),
            ef: Arc::clone(&ef),
        }, Q_LINE, 1).unwrap();
        cpu.core_mut().devices.attach_sense(id, 1, 1).unwrap();
        cpu.config_mut().ef_defaults[1] = true;

        cpu.run(1);
        assert!(*lock(&q));
        assert_eq!(cpu.get_register(CosmacReg::Q), 1);

        *lock(&ef) = true;
        cpu.run(1);
        assert_eq!(cpu.pc(), 0x10);

        // EF2 is unconnected and reads as its default
        cpu.set_pc(3);
        cpu.run(1);
        assert_eq!(cpu.pc(), 0x20);

        cpu.clear_cpu();
        assert!(!*lock(&q));
    }

    #[test]
    fn test_external_interrupt() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0xE3, 0x30, 0x01]);
        load(&mut cpu, 0x100, &[0x78, 0x70]);
        cpu.set_register(CosmacReg::R(1), 0x100);
        cpu.set_register(CosmacReg::R(2), 0x80);
        let line = IrqLine::attach(cpu.irq()).unwrap();

        cpu.run(2);
        assert_eq!(cpu.pc(), 0x01);
        line.assert();
        cpu.run(1);
        // the interrupt saved X=3, P=0 and ran SAV at R1
        assert_eq!(cpu.get_register(CosmacReg::P), 1);
        assert_eq!(cpu.get_register(CosmacReg::X), 2);
        assert_eq!(cpu.get_register(CosmacReg::Ie), 0);
        assert_eq!(cpu.get_register(CosmacReg::T), 0x30);
        assert_eq!(cpu.memory().mem_read(0x80), 0x30);

        line.clear();
        cpu.run(1);
        assert_eq!(cpu.get_register(CosmacReg::P), 0);
        assert_eq!(cpu.get_register(CosmacReg::X), 3);
        assert_eq!(cpu.get_register(CosmacReg::Ie), 1);
        assert_eq!(cpu.pc(), 0x01);
    }

    #[test]
    fn test_idle() {
        // IDL with no interrupt source stops at once
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0x00, 0x00]);
        assert_eq!(cpu.run(0), StopCode::Break);
        assert_eq!(cpu.pc(), 1);

        // with a source, IDL waits until the request arrives
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0x00, 0xC4]);
        cpu.set_register(CosmacReg::R(1), 1);
        let sched = cpu.core().events.clone();
        let mut timer = IntervalTimer::new("TMR", 1, &sched, None, 10_000..=10_000)
            .with_irq(IrqLine::attach(cpu.irq()).unwrap());
        timer.dev_write(1, 1);
        cpu.core_mut().devices.install(timer).unwrap();

        assert_eq!(cpu.run(1), StopCode::Finished);
        assert_eq!(cpu.pc(), 1);
        // five idle cycles, then the two of IDL itself
        assert_eq!(cpu.core().now(), 7 * 2000);

        assert_eq!(cpu.run(1), StopCode::Finished);
        assert_eq!(cpu.get_register(CosmacReg::P), 1);
        assert_eq!(cpu.get_register(CosmacReg::T), 0x00);
        assert_eq!(cpu.pc(), 2);
    }

    #[test]
    fn test_endless_loop() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0x71, 0x00, 0x30, 0x02]);
        // DIS: X,P <- M(R0) = 0x00, IE off
        assert_eq!(cpu.run(0), StopCode::EndlessLoop);
        assert_eq!(cpu.core().saved_pc(), 2);
    }

    #[test]
    fn test_registers() {
        let mut cpu = cpu_with(CosmacModel::Cdp1805, &[]);
        cpu.set_register(CosmacReg::P, 0x13);
        assert_eq!(cpu.get_register(CosmacReg::P), 3);
        assert_eq!(cpu.register_size(CosmacReg::R(7)), 16);
        assert_eq!(cpu.register_size(CosmacReg::Cntr), 8);
        assert_eq!(cpu.register_size(CosmacReg::Etq), 1);

        assert_eq!("rA".parse(), Ok(CosmacReg::R(10)));
        assert_eq!("df".parse(), Ok(CosmacReg::Df));
        assert_eq!("R10".parse::<CosmacReg>(), Err(RegisterErr("R10".into())));
        assert_eq!(CosmacReg::R(15).to_string(), "RF");
        assert_eq!(CosmacReg::Cntr.to_string(), "CNTR");
    }

    #[test]
    fn test_illegal_extended_on_1802() {
        let mut cpu = cpu_with(CosmacModel::Cdp1802, &[0x68, 0x0A]);
        assert_eq!(cpu.run(0), StopCode::IllegalOpcode);
        assert_eq!(cpu.pc(), 1);
    }
}
