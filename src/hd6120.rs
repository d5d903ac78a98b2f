//! The Harris HD6120, a PDP-8/E on a chip.
//!
//! Besides the PDP-8 instruction set, the HD6120 has:
//! - A second 32K address space, the *panel* memory, entered by a panel
//!     trap and invisible to programs in main memory.
//! - Two hardware stacks (pointers `SP1` and `SP2`) living in field 0.
//! - Instructions to move between the two spaces (`PR0`..`PR3`, `PEX`, `CPD`, `SPD`).
//!
//! The CPU reads and writes memory through a pair of spaces, *direct* and *indirect*:
//! instruction fetches and direct operands use the first, and indirect operands
//! use the second. Which space is which depends on the `CTRL` (in panel) and
//! `PDF` (panel data) flags:
//!
//! | CTRL | PDF | direct | indirect |
//! |------|-----|--------|----------|
//! | 0    | x   | main   | main     |
//! | 1    | 0   | panel  | main     |
//! | 1    | 1   | panel  | panel    |
//!
//! Devices are addressed by IOTs (`6ddn`): device codes 00 and 20..27 are
//! internal to the CPU, and every other code goes to the device installed
//! on that port (see [`Device::dev_iot`]).
//!
//! [`Device::dev_iot`]: crate::sim::device::Device::dev_iot
mod iot;
mod opr;

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::err::RegisterErr;
use crate::sim::interrupt::{SimpleInterrupt, TriggerMode};
use crate::sim::mem::{AddressSpace, MemFlags};
use crate::sim::{lock, Core, Cpu, CpuFlags};

/// Index of main memory in the processor's address spaces.
pub const MAIN: usize = 0;
/// Index of panel memory in the processor's address spaces.
pub const PANEL: usize = 1;

/// Clocks in one HD6120 cycle count unit.
pub const CLOCKS_PER_CYCLE: u64 = 8;

/// Words in each address space (eight fields of 4K).
const SPACE_SIZE: usize = 0o100000;
const WORD: u16 = 0o7777;

/// Cycles for AND, TAD, DCA and JMS, indexed by `I << 1 | Z`.
const MRI_CYCLES: [u64; 4] = [7, 7, 10, 10];
/// Cycles for ISZ, indexed by `I << 1 | Z`.
const ISZ_CYCLES: [u64; 4] = [9, 9, 12, 12];
/// Cycles for JMP, indexed by `I << 1 | Z`.
const JMP_CYCLES: [u64; 4] = [4, 4, 7, 7];
/// Cycles spent entering either interrupt.
const INTERRUPT_CYCLES: u64 = 4;

/// How GTF and RTF treat the interrupt enable bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum GtfMode {
    /// GTF always reports interrupts as enabled, and RTF enables them only if bit 4 of AC is set.
    #[default]
    Hd6120,
    /// GTF reports the real interrupt enable, and RTF always enables interrupts.
    Pdp8,
}

/// Where the processor starts after a reset.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Startup {
    /// Run main memory from the PC.
    #[default]
    Main,
    /// Take a power-on panel trap before the first instruction.
    Panel,
}

/// Configuration specific to the HD6120.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hd6120Config {
    /// How GTF and RTF treat the interrupt enable bit.
    ///
    /// By default, this is [`GtfMode::Hd6120`].
    pub gtf: GtfMode,

    /// Where the processor starts after a reset.
    ///
    /// By default, this is [`Startup::Main`].
    pub startup: Startup,
}

/// The HD6120's registers, by name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Hd6120Reg {
    /// Accumulator.
    Ac,
    /// Link.
    L,
    /// Multiplier quotient.
    Mq,
    /// Program counter (within the instruction field).
    Pc,
    /// Switch register, read by OSR and written by WSR.
    Sr,
    /// Instruction field.
    If,
    /// Instruction buffer (the field a jump moves to).
    Ib,
    /// Data field.
    Df,
    /// Save field, `IF << 3 | DF` at the last interrupt.
    Sf,
    /// Stack pointer 1.
    Sp1,
    /// Stack pointer 2.
    Sp2,
    /// Interrupt enable.
    Ie,
    /// Interrupt inhibit, set by CIF until the next jump.
    Iiff,
    /// Force fetch, which holds off interrupts for one instruction.
    Ffetch,
    /// Greater than flag.
    Gt,
    /// Running from panel memory.
    Ctrl,
    /// Indirect data comes from panel memory.
    Pdf,
    /// Forces direct accesses to field 0.
    Fz,
    /// Bootstrap panel request.
    Btstrp,
    /// Panel trap request (PR0..PR3).
    Pnltrp,
    /// Power-on panel request.
    Pwron,
    /// Halt panel request.
    Hltflg,
}
impl Hd6120Reg {
    const NAMES: [(Hd6120Reg, &'static str); 22] = [
        (Hd6120Reg::Ac, "AC"),
        (Hd6120Reg::L, "L"),
        (Hd6120Reg::Mq, "MQ"),
        (Hd6120Reg::Pc, "PC"),
        (Hd6120Reg::Sr, "SR"),
        (Hd6120Reg::If, "IF"),
        (Hd6120Reg::Ib, "IB"),
        (Hd6120Reg::Df, "DF"),
        (Hd6120Reg::Sf, "SF"),
        (Hd6120Reg::Sp1, "SP1"),
        (Hd6120Reg::Sp2, "SP2"),
        (Hd6120Reg::Ie, "IE"),
        (Hd6120Reg::Iiff, "IIFF"),
        (Hd6120Reg::Ffetch, "FFETCH"),
        (Hd6120Reg::Gt, "GT"),
        (Hd6120Reg::Ctrl, "CTRL"),
        (Hd6120Reg::Pdf, "PDF"),
        (Hd6120Reg::Fz, "FZ"),
        (Hd6120Reg::Btstrp, "BTSTRP"),
        (Hd6120Reg::Pnltrp, "PNLTRP"),
        (Hd6120Reg::Pwron, "PWRON"),
        (Hd6120Reg::Hltflg, "HLTFLG"),
    ];
}
impl std::fmt::Display for Hd6120Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (_, name) = Self::NAMES.iter()
            .find(|(r, _)| r == self)
            .ok_or(std::fmt::Error)?;
        f.write_str(name)
    }
}
impl FromStr for Hd6120Reg {
    type Err = RegisterErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES.iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|&(r, _)| r)
            .ok_or_else(|| RegisterErr(s.to_string()))
    }
}

/// A simulated HD6120.
#[derive(Debug)]
pub struct Hd6120 {
    core: Core,
    config: Hd6120Config,
    irq: Arc<Mutex<SimpleInterrupt>>,
    cpreq: Arc<Mutex<SimpleInterrupt>>,

    ac: u16,
    l: bool,
    mq: u16,
    pc: u16,
    sr: u16,
    if_: u16,
    ib: u16,
    df: u16,
    sf: u16,
    sp1: u16,
    sp2: u16,
    ieff: bool,
    iiff: bool,
    ffetch: bool,
    gt: bool,
    ctrl: bool,
    pdf: bool,
    fz: bool,
    pex: bool,
    btstrp: bool,
    pnltrp: bool,
    pwron: bool,
    hltflg: bool,

    direct: usize,
    indirect: usize,
}

impl Hd6120 {
    /// Creates a processor with 32K words each of main and panel RAM, reset.
    pub fn new(flags: CpuFlags, config: Hd6120Config) -> Self {
        let main = AddressSpace::new("main", SPACE_SIZE, 12, MemFlags::RAM);
        let panel = AddressSpace::new("panel", SPACE_SIZE, 12, MemFlags::RAM);
        let mut cpu = Self {
            core: Core::new(flags, CLOCKS_PER_CYCLE, vec![main, panel]),
            config,
            irq: Arc::new(Mutex::new(SimpleInterrupt::new(TriggerMode::Level))),
            cpreq: Arc::new(Mutex::new(SimpleInterrupt::new(TriggerMode::Edge))),
            ac: 0,
            l: false,
            mq: 0,
            pc: 0,
            sr: 0,
            if_: 0,
            ib: 0,
            df: 0,
            sf: 0,
            sp1: 0,
            sp2: 0,
            ieff: false,
            iiff: false,
            ffetch: false,
            gt: false,
            ctrl: false,
            pdf: false,
            fz: false,
            pex: false,
            btstrp: false,
            pnltrp: false,
            pwron: false,
            hltflg: false,
            direct: MAIN,
            indirect: MAIN,
        };
        cpu.clear_cpu();
        cpu
    }

    /// The configuration.
    pub fn config(&self) -> &Hd6120Config {
        &self.config
    }
    /// The configuration. Changes take effect from the next instruction.
    pub fn config_mut(&mut self) -> &mut Hd6120Config {
        &mut self.config
    }

    /// Main memory.
    pub fn main_memory(&self) -> &AddressSpace {
        &self.core.spaces[MAIN]
    }
    /// Main memory.
    pub fn main_memory_mut(&mut self) -> &mut AddressSpace {
        &mut self.core.spaces[MAIN]
    }
    /// Panel memory.
    pub fn panel_memory(&self) -> &AddressSpace {
        &self.core.spaces[PANEL]
    }
    /// Panel memory.
    pub fn panel_memory_mut(&mut self) -> &mut AddressSpace {
        &mut self.core.spaces[PANEL]
    }

    /// The main interrupt channel.
    pub fn irq(&self) -> &Arc<Mutex<SimpleInterrupt>> {
        &self.irq
    }
    /// The panel request channel. A request sets `BTSTRP`.
    pub fn cpreq(&self) -> &Arc<Mutex<SimpleInterrupt>> {
        &self.cpreq
    }

    /// Picks the direct and indirect spaces from `CTRL` and `PDF`.
    fn update_memory_pointers(&mut self) {
        (self.direct, self.indirect) = match (self.ctrl, self.pdf) {
            (false, _)    => (MAIN, MAIN),
            (true, false) => (PANEL, MAIN),
            (true, true)  => (PANEL, PANEL),
        };
    }

    /// The field of direct accesses.
    fn ifield(&self) -> u16 {
        match self.fz {
            true  => 0,
            false => self.if_,
        }
    }

    fn read_direct(&mut self, addr: u16) -> u16 {
        let addr = self.ifield() << 12 | addr & WORD;
        self.core.spaces[self.direct].cpu_read(addr)
    }

    fn write_direct(&mut self, addr: u16, data: u16) {
        let addr = self.ifield() << 12 | addr & WORD;
        self.core.spaces[self.direct].cpu_write(addr, data);
    }

    /// Reads an operand: from the instruction field of the direct space,
    /// or the data field of the indirect space.
    fn read_operand(&mut self, addr: u16, indirect: bool) -> u16 {
        match indirect {
            true  => self.core.spaces[self.indirect].cpu_read(self.df << 12 | addr & WORD),
            false => self.read_direct(addr),
        }
    }

    fn write_operand(&mut self, addr: u16, indirect: bool, data: u16) {
        match indirect {
            true  => self.core.spaces[self.indirect].cpu_write(self.df << 12 | addr & WORD, data),
            false => self.write_direct(addr, data),
        }
    }

    /// Pushes onto a stack in field 0 of the direct space.
    fn push(&mut self, stack: u8, data: u16) {
        let sp = match stack {
            1 => &mut self.sp1,
            _ => &mut self.sp2,
        };
        let addr = *sp;
        *sp = sp.wrapping_sub(1) & WORD;
        self.core.spaces[self.direct].cpu_write(addr, data);
    }

    /// Pops from a stack in field 0 of the direct space.
    fn pop(&mut self, stack: u8) -> u16 {
        let sp = match stack {
            1 => &mut self.sp1,
            _ => &mut self.sp2,
        };
        *sp = (*sp + 1) & WORD;
        let addr = *sp;
        self.core.spaces[self.direct].cpu_read(addr)
    }

    /// A jump: the instruction field takes the buffer, and a pending PEX leaves the panel.
    fn transfer(&mut self) {
        self.if_ = self.ib;
        self.fz = false;
        self.iiff = false;
        if self.pex {
            self.pex = false;
            self.ctrl = false;
            self.pdf = false;
            self.ffetch = true;
            self.update_memory_pointers();
            tracing::debug!(pc = self.pc, field = self.if_, "panel exit");
        }
    }

    fn skip(&mut self) {
        self.pc = (self.pc + 1) & WORD;
    }

    fn panel_request(&self) -> bool {
        self.btstrp || self.pnltrp || self.pwron || self.hltflg
    }

    fn enter_panel(&mut self) {
        tracing::debug!(
            pc = self.pc, btstrp = self.btstrp, pnltrp = self.pnltrp,
            pwron = self.pwron, hltflg = self.hltflg, "panel entry"
        );
        self.ctrl = true;
        self.pdf = false;
        self.fz = true;
        self.ib = 0;
        self.update_memory_pointers();
        self.core.spaces[PANEL].cpu_write(0, self.pc);
        self.pc = WORD;
        self.core.add_cycles(INTERRUPT_CYCLES);
    }

    fn main_interrupt(&mut self) {
        tracing::debug!(pc = self.pc, field = self.if_, "interrupt acknowledged");
        self.sf = self.if_ << 3 | self.df;
        self.core.spaces[MAIN].cpu_write(0, self.pc);
        self.if_ = 0;
        self.ib = 0;
        self.df = 0;
        self.pc = 1;
        self.ieff = false;
        lock(&self.irq).acknowledge_request();
        self.core.add_cycles(INTERRUPT_CYCLES);
    }

    /// AND, TAD, ISZ, DCA, JMS and JMP.
    fn memory_reference(&mut self, ir: u16, ipc: u16) -> u64 {
        let indirect = ir & 0o400 != 0;
        let current_page = ir & 0o200 != 0;
        let mode = usize::from(indirect) << 1 | usize::from(current_page);

        let page = match current_page {
            true  => ipc & 0o7600,
            false => 0,
        };
        let mut ea = page | ir & 0o177;
        if indirect {
            if (0o10..=0o17).contains(&ea) {
                let next = (self.read_direct(ea) + 1) & WORD;
                self.write_direct(ea, next);
            }
            ea = self.read_direct(ea);
        }

        match ir >> 9 {
            0 => {
                let m = self.read_operand(ea, indirect);
                self.ac &= m;
            },
            1 => {
                let sum = self.ac + self.read_operand(ea, indirect);
                self.ac = sum & WORD;
                self.l ^= sum > WORD;
            },
            2 => {
                let v = (self.read_operand(ea, indirect) + 1) & WORD;
                self.write_operand(ea, indirect, v);
                if v == 0 {
                    self.skip();
                }
                return ISZ_CYCLES[mode];
            },
            3 => {
                self.write_operand(ea, indirect, self.ac);
                self.ac = 0;
            },
            4 => {
                self.transfer();
                self.write_direct(ea, self.pc);
                self.pc = (ea + 1) & WORD;
            },
            _ => {
                self.transfer();
                self.pc = ea;
                return JMP_CYCLES[mode];
            },
        }
        MRI_CYCLES[mode]
    }
}

impl Cpu for Hd6120 {
    type Reg = Hd6120Reg;

    fn core(&self) -> &Core {
        &self.core
    }

    fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    /// Clears every register and flag and sets the PC to 7777.
    ///
    /// With [`Startup::Panel`], `PWRON` is set so the first step enters the panel.
    fn clear_cpu(&mut self) {
        self.ac = 0;
        self.l = false;
        self.mq = 0;
        self.pc = WORD;
        self.sr = 0;
        self.if_ = 0;
        self.ib = 0;
        self.df = 0;
        self.sf = 0;
        self.sp1 = 0;
        self.sp2 = 0;
        self.ieff = false;
        self.iiff = false;
        self.ffetch = false;
        self.gt = false;
        self.ctrl = false;
        self.pdf = false;
        self.fz = false;
        self.pex = false;
        self.btstrp = false;
        self.pnltrp = false;
        self.pwron = self.config.startup == Startup::Panel;
        self.hltflg = false;
        self.update_memory_pointers();
    }

    fn pc(&self) -> u16 {
        self.pc
    }

    fn set_pc(&mut self, pc: u16) {
        self.pc = pc & WORD;
    }

    fn fetch_address(&self) -> u32 {
        u32::from(self.ctrl) << 15 | u32::from(self.ifield()) << 12 | u32::from(self.pc)
    }

    fn interrupts_enabled(&self) -> bool {
        self.ieff && !self.ctrl
    }

    fn service_interrupts(&mut self) {
        if std::mem::take(&mut self.ffetch) {
            return;
        }
        {
            let mut cpreq = lock(&self.cpreq);
            if cpreq.is_requested() {
                cpreq.acknowledge_request();
                self.btstrp = true;
            }
        }

        if self.iiff || self.ctrl {
            return;
        }
        if self.panel_request() {
            self.enter_panel();
        } else if self.ieff && lock(&self.irq).is_requested() {
            self.main_interrupt();
        }
    }

    fn at_breakpoint(&self) -> bool {
        let addr = self.ifield() << 12 | self.pc;
        self.core.spaces[self.direct].is_break(addr)
    }

    fn step(&mut self) {
        let ipc = self.pc;
        let ir = self.read_direct(ipc);
        self.pc = (ipc + 1) & WORD;
        tracing::trace!(pc = ipc, ir, panel = self.ctrl, "execute");

        let cycles = match ir >> 9 {
            0..=5 => self.memory_reference(ir, ipc),
            6 => self.iot(ir),
            _ => self.operate(ir),
        };
        self.core.add_cycles(cycles);

        if !self.ctrl && !self.iiff && !self.ffetch && self.panel_request() {
            self.enter_panel();
        }
    }

    fn get_register(&self, reg: Hd6120Reg) -> u32 {
        let v = match reg {
            Hd6120Reg::Ac     => self.ac,
            Hd6120Reg::L      => self.l.into(),
            Hd6120Reg::Mq     => self.mq,
            Hd6120Reg::Pc     => self.pc,
            Hd6120Reg::Sr     => self.sr,
            Hd6120Reg::If     => self.if_,
            Hd6120Reg::Ib     => self.ib,
            Hd6120Reg::Df     => self.df,
            Hd6120Reg::Sf     => self.sf,
            Hd6120Reg::Sp1    => self.sp1,
            Hd6120Reg::Sp2    => self.sp2,
            Hd6120Reg::Ie     => self.ieff.into(),
            Hd6120Reg::Iiff   => self.iiff.into(),
            Hd6120Reg::Ffetch => self.ffetch.into(),
            Hd6120Reg::Gt     => self.gt.into(),
            Hd6120Reg::Ctrl   => self.ctrl.into(),
            Hd6120Reg::Pdf    => self.pdf.into(),
            Hd6120Reg::Fz     => self.fz.into(),
            Hd6120Reg::Btstrp => self.btstrp.into(),
            Hd6120Reg::Pnltrp => self.pnltrp.into(),
            Hd6120Reg::Pwron  => self.pwron.into(),
            Hd6120Reg::Hltflg => self.hltflg.into(),
        };
        v.into()
    }

    fn set_register(&mut self, reg: Hd6120Reg, value: u32) {
        let word = value as u16 & WORD;
        let field = value as u16 & 7;
        let bit = value & 1 != 0;
        match reg {
            Hd6120Reg::Ac     => self.ac = word,
            Hd6120Reg::L      => self.l = bit,
            Hd6120Reg::Mq     => self.mq = word,
            Hd6120Reg::Pc     => self.pc = word,
            Hd6120Reg::Sr     => self.sr = word,
            Hd6120Reg::If     => self.if_ = field,
            Hd6120Reg::Ib     => self.ib = field,
            Hd6120Reg::Df     => self.df = field,
            Hd6120Reg::Sf     => self.sf = value as u16 & 0o77,
            Hd6120Reg::Sp1    => self.sp1 = word,
            Hd6120Reg::Sp2    => self.sp2 = word,
            Hd6120Reg::Ie     => self.ieff = bit,
            Hd6120Reg::Iiff   => self.iiff = bit,
            Hd6120Reg::Ffetch => self.ffetch = bit,
            Hd6120Reg::Gt     => self.gt = bit,
            Hd6120Reg::Ctrl   => self.ctrl = bit,
            Hd6120Reg::Pdf    => self.pdf = bit,
            Hd6120Reg::Fz     => self.fz = bit,
            Hd6120Reg::Btstrp => self.btstrp = bit,
            Hd6120Reg::Pnltrp => self.pnltrp = bit,
            Hd6120Reg::Pwron  => self.pwron = bit,
            Hd6120Reg::Hltflg => self.hltflg = bit,
        }
        self.update_memory_pointers();
    }

    fn register_size(&self, reg: Hd6120Reg) -> u32 {
        match reg {
            Hd6120Reg::Ac | Hd6120Reg::Mq | Hd6120Reg::Pc | Hd6120Reg::Sr
            | Hd6120Reg::Sp1 | Hd6120Reg::Sp2 => 12,
            Hd6120Reg::Sf => 6,
            Hd6120Reg::If | Hd6120Reg::Ib | Hd6120Reg::Df => 3,
            _ => 1,
        }
    }

    /// Reports the saved PC in octal, as `field` and address (or `panel` and address).
    fn stop_message(&self) -> String {
        let core = self.core();
        let saved = core.saved_pc();
        match saved & 0o100000 != 0 {
            true  => format!("{} at panel {:05o}", core.stop_code(), saved & 0o77777),
            false => format!("{} at {:05o}", core.stop_code(), saved & 0o77777),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sim::interrupt::IrqLine;
    use crate::sim::StopCode;

    pub(super) fn load(cpu: &mut Hd6120, space: usize, base: u16, words: &[u16]) {
        for (i, &w) in words.iter().enumerate() {
            cpu.core.spaces[space].mem_write(base + i as u16, w);
        }
    }

    pub(super) fn cpu_at(pc: u16, words: &[u16]) -> Hd6120 {
        let mut cpu = Hd6120::new(CpuFlags::default(), Hd6120Config::default());
        load(&mut cpu, MAIN, pc, words);
        cpu.set_pc(pc);
        cpu
    }

    #[test]
    fn test_page_zero_and_tad() {
        let mut cpu = cpu_at(0o20, &[
            0o0010, // AND 10
            0o1010, // TAD 10
        ]);
        load(&mut cpu, MAIN, 0o10, &[0o7777]);
        cpu.set_register(Hd6120Reg::Ac, 0o5252);

        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o5252);
        assert_eq!(cpu.pc(), 0o21);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o5251);
        assert_eq!(cpu.get_register(Hd6120Reg::L), 1);
        // 7 cycles each, at 8 clocks of 4 MHz
        assert_eq!(cpu.core().now(), 14 * 2000);
    }

    #[test]
    fn test_jump_to_self() {
        let mut cpu = cpu_at(0o1000, &[0o5200]);
        assert_eq!(cpu.run(0), StopCode::EndlessLoop);
        assert_eq!(cpu.core().saved_pc(), 0o1000);
        assert_eq!(cpu.stop_message(), "endless loop at 01000");
    }

    #[test]
    fn test_panel_trap() {
        let mut cpu = cpu_at(0o1000, &[0o6206]);
        assert_eq!(cpu.run(1), StopCode::Finished);
        assert_eq!(cpu.get_register(Hd6120Reg::Ctrl), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Fz), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Pdf), 0);
        assert_eq!(cpu.get_register(Hd6120Reg::Pnltrp), 1);
        assert_eq!(cpu.pc(), 0o7777);
        assert_eq!(cpu.panel_memory().mem_read(0), 0o1001);
        assert_eq!(cpu.fetch_address(), 0o107777);
    }

    #[test]
    fn test_auto_index_and_data_field() {
        let mut cpu = cpu_at(0o200, &[
            0o6211, // CDF 1
            0o1410, // TAD I 10
            0o3410, // DCA I 10
        ]);
        load(&mut cpu, MAIN, 0o10, &[0o377]);
        load(&mut cpu, MAIN, 0o10400, &[0o123]);
        cpu.run(2);
        assert_eq!(cpu.main_memory().mem_read(0o10), 0o400);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o123);
        // indirect, page zero
        assert_eq!(cpu.core().now(), (9 + 10) * 2000);

        cpu.run(1);
        assert_eq!(cpu.main_memory().mem_read(0o10), 0o401);
        assert_eq!(cpu.main_memory().mem_read(0o10401), 0o123);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0);
    }

    #[test]
    fn test_isz_jms_jmp() {
        let mut cpu = cpu_at(0o200, &[
            0o2220, // ISZ 220
            0o7402, // HLT (skipped)
            0o4221, // JMS 221
        ]);
        load(&mut cpu, MAIN, 0o220, &[0o7777, 0, 0o7001, 0o5621]);

        cpu.run(1);
        assert_eq!(cpu.main_memory().mem_read(0o220), 0);
        assert_eq!(cpu.pc(), 0o202);
        cpu.run(1);
        assert_eq!(cpu.main_memory().mem_read(0o221), 0o203);
        assert_eq!(cpu.pc(), 0o222);
        // IAC; JMP I 221
        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 1);
        assert_eq!(cpu.pc(), 0o203);
    }

    #[test]
    fn test_cif_holds_interrupts_until_jump() {
        let mut cpu = cpu_at(0o200, &[
            0o6001, // ION
            0o6222, // CIF 2
            0o7000, // NOP
            0o5300, // JMP 300 (into field 2)
        ]);
        load(&mut cpu, MAIN, 0o20300, &[0o7000, 0o7000]);
        let line = IrqLine::attach(cpu.irq()).unwrap();
        line.assert();

        cpu.run(3);
        assert_eq!(cpu.get_register(Hd6120Reg::Iiff), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ib), 2);
        assert_eq!(cpu.get_register(Hd6120Reg::If), 0);
        assert_eq!(cpu.pc(), 0o203);

        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::If), 2);
        assert_eq!(cpu.pc(), 0o300);

        // the interrupt comes before the instruction at 2:0300
        cpu.run(1);
        assert_eq!(cpu.main_memory().mem_read(0), 0o300);
        assert_eq!(cpu.get_register(Hd6120Reg::Sf), 0o20);
        assert_eq!(cpu.get_register(Hd6120Reg::If), 0);
        assert_eq!(cpu.get_register(Hd6120Reg::Ie), 0);
        assert_eq!(cpu.pc(), 2);
    }

    #[test]
    fn test_ion_waits_one_instruction() {
        let mut cpu = cpu_at(0o200, &[0o6001, 0o7001, 0o7001]);
        let line = IrqLine::attach(cpu.irq()).unwrap();
        line.assert();

        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ie), 1);
        cpu.run(1);
        assert_eq!(cpu.main_memory().mem_read(0), 0o202);
        assert_eq!(cpu.pc(), 2);
    }

    #[test]
    fn test_panel_round_trip() {
        let mut cpu = cpu_at(0o1000, &[0o6206, 0o7001]);
        // panel firmware: JMP 7600; PEX; JMP I 0
        load(&mut cpu, PANEL, 0o7777, &[0o5200]);
        load(&mut cpu, PANEL, 0o7600, &[0o6004, 0o5400]);

        cpu.run(1);
        assert_eq!(cpu.pc(), 0o7777);
        cpu.run(2);
        assert_eq!(cpu.pc(), 0o7601);
        assert_eq!(cpu.get_register(Hd6120Reg::Ctrl), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Fz), 0);
        assert_eq!(cpu.get_register(Hd6120Reg::Pnltrp), 0);

        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ctrl), 0);
        assert_eq!(cpu.get_register(Hd6120Reg::Ffetch), 1);
        assert_eq!(cpu.pc(), 0o1001);

        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ffetch), 0);
    }

    #[test]
    fn test_panel_data() {
        let mut cpu = cpu_at(0o1000, &[0o6206]);
        load(&mut cpu, PANEL, 0o7777, &[0o1420]);
        load(&mut cpu, PANEL, 0o20, &[0o300]);
        load(&mut cpu, PANEL, 0o300, &[0o11]);
        load(&mut cpu, MAIN, 0o300, &[0o22]);

        // with PDF clear, indirect data comes from main memory
        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o22);

        // with PDF set, from panel memory
        cpu.set_register(Hd6120Reg::Pdf, 1);
        cpu.set_pc(0o7777);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o33);
    }

    #[test]
    fn test_startup_panel() {
        let mut cpu = Hd6120::new(CpuFlags::default(), Hd6120Config { startup: Startup::Panel, ..Default::default() });
        load(&mut cpu, PANEL, 0o7777, &[0o7001]);
        assert_eq!(cpu.get_register(Hd6120Reg::Pwron), 1);

        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ctrl), 1);
        assert_eq!(cpu.panel_memory().mem_read(0), 0o7777);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 1);
    }

    #[test]
    fn test_cpreq_sets_bootstrap() {
        let mut cpu = cpu_at(0o200, &[0o7000, 0o7000]);
        let line = IrqLine::attach(cpu.cpreq()).unwrap();
        cpu.run(1);
        line.assert();
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Btstrp), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ctrl), 1);
        assert_eq!(cpu.panel_memory().mem_read(0), 0o201);
    }

    #[test]
    fn test_breakpoint_in_field() {
        let mut cpu = cpu_at(0o200, &[0o7000, 0o7000, 0o7000]);
        cpu.main_memory_mut().set_break(0o202, true);
        assert_eq!(cpu.run(0), StopCode::Breakpoint);
        assert_eq!(cpu.core().saved_pc(), 0o202);
        assert_eq!(cpu.stop_message(), "breakpoint at 00202");
    }

    #[test]
    fn test_registers() {
        let mut cpu = cpu_at(0, &[]);
        cpu.set_register(Hd6120Reg::Ac, 0o17777);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o7777);
        cpu.set_register(Hd6120Reg::Df, 9);
        assert_eq!(cpu.get_register(Hd6120Reg::Df), 1);
        assert_eq!(cpu.register_size(Hd6120Reg::Sf), 6);
        assert_eq!(cpu.register_size(Hd6120Reg::Sp2), 12);

        assert_eq!("sp1".parse(), Ok(Hd6120Reg::Sp1));
        assert_eq!("HltFlg".parse(), Ok(Hd6120Reg::Hltflg));
        assert_eq!("R1".parse::<Hd6120Reg>(), Err(RegisterErr("R1".into())));
        assert_eq!(Hd6120Reg::Pnltrp.to_string(), "PNLTRP");
    }
}
