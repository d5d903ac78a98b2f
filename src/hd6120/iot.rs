//! IOT instructions (opcode 6).
//!
//! Device 00 is the processor's own flags, devices 20..27 are memory
//! extension, stack and panel control, and everything else goes to devices.

use super::{GtfMode, Hd6120, WORD};
use crate::sim::lock;

/// Cycles for an IOT.
const IOT_CYCLES: u64 = 9;

impl Hd6120 {
    pub(super) fn iot(&mut self, ir: u16) -> u64 {
        let device = (ir >> 3) & 0o77;
        match device {
            0 => self.iot_internal(ir),
            0o20..=0o27 => self.iot_extended(ir),
            _ => {
                let mut ac = self.ac;
                let mut pc = self.pc;
                match self.core.devices.iot(device, ir, &mut ac, &mut pc) {
                    Some(true) => {
                        self.ac = ac & WORD;
                        self.pc = pc & WORD;
                    },
                    Some(false) | None => self.core.illegal_io(ir),
                }
            },
        }
        IOT_CYCLES
    }

    /// The flags word GTF reads and RTF restores.
    ///
    /// From the top: L, GT, interrupt request, (unused), interrupt enable, (unused), then the save field.
    fn gtf(&self) -> u16 {
        let ie = match self.config.gtf {
            GtfMode::Hd6120 => true,
            GtfMode::Pdp8   => self.ieff,
        };
        u16::from(self.l) << 11
            | u16::from(self.gt) << 10
            | u16::from(lock(&self.irq).is_requested()) << 9
            | u16::from(ie) << 7
            | self.sf
    }

    /// The flags word GCF reads: like GTF, but with the power-on flag and the current fields.
    fn gcf(&self) -> u16 {
        u16::from(self.l) << 11
            | u16::from(self.gt) << 10
            | u16::from(lock(&self.irq).is_requested()) << 9
            | u16::from(self.pwron) << 8
            | u16::from(self.ieff) << 7
            | self.if_ << 3
            | self.df
    }

    fn iot_internal(&mut self, ir: u16) {
        match (ir & 7, self.ctrl) {
            // SKON
            (0, false) => {
                if self.ieff {
                    self.skip();
                }
                self.ieff = false;
            },
            // PRS
            (0, true) => {
                self.ac = u16::from(self.btstrp) << 11
                    | u16::from(self.pnltrp) << 10
                    | u16::from(self.pwron) << 8
                    | u16::from(self.hltflg) << 7;
                self.btstrp = false;
                self.pnltrp = false;
            },
            // ION
            (1, _) => {
                self.ieff = true;
                self.ffetch = true;
            },
            // IOF
            (2, _) => self.ieff = false,
            // SRQ
            (3, false) => {
                if lock(&self.irq).is_requested() {
                    self.skip();
                }
            },
            // PGO
            (3, true) => self.hltflg = false,
            // GTF
            (4, false) => self.ac = self.gtf(),
            // PEX
            (4, true) => {
                self.pex = true;
                self.pwron = false;
                self.pnltrp = false;
            },
            // RTF
            (5, _) => {
                self.l = self.ac & 0o4000 != 0;
                self.gt = self.ac & 0o2000 != 0;
                self.ib = (self.ac >> 3) & 7;
                self.df = self.ac & 7;
                self.ieff = match self.config.gtf {
                    GtfMode::Hd6120 => self.ac & 0o200 != 0,
                    GtfMode::Pdp8   => true,
                };
                self.iiff = true;
            },
            // SGT
            (6, _) => {
                if self.gt {
                    self.skip();
                }
            },
            // CAF
            _ => {
                tracing::debug!(pc = self.pc, "clear all flags");
                self.ac = 0;
                self.l = false;
                self.gt = false;
                self.ieff = false;
                self.core.clear_devices();
            },
        }
    }

    fn iot_extended(&mut self, ir: u16) {
        let n = (ir >> 3) & 7;
        match ir & 7 {
            f @ 1..=3 => {
                // CDF, CIF, CDF CIF
                if f & 1 != 0 {
                    self.df = n;
                }
                if f & 2 != 0 {
                    self.ib = n;
                    self.iiff = true;
                }
            },
            4 => match n {
                // RDF, RIF, RIB, RMF
                1 => self.ac |= self.df << 3,
                2 => self.ac |= self.if_ << 3,
                3 => self.ac |= self.sf,
                4 => {
                    self.ib = self.sf >> 3;
                    self.df = self.sf & 7;
                    self.iiff = true;
                },
                // 6204 and LIF
                _ => self.core.illegal_opcode(ir),
            },
            5 => {
                let stack = match n < 4 {
                    true  => 1,
                    false => 2,
                };
                match n & 3 {
                    // PPCn
                    0 => self.push(stack, (self.pc + 1) & WORD),
                    // PACn
                    1 => self.push(stack, self.ac),
                    // RTNn
                    2 => {
                        self.pc = self.pop(stack);
                        self.transfer();
                    },
                    // POPn
                    _ => self.ac = self.pop(stack),
                }
            },
            6 => match n {
                // PR0..PR3
                0..=3 => {
                    if !self.ctrl {
                        self.pnltrp = true;
                    }
                },
                // WSR
                4 => {
                    self.sr = self.ac;
                    self.ac = 0;
                },
                // GCF
                5 => self.ac = self.gcf(),
                // CPD, SPD
                _ => {
                    self.pdf = n == 7;
                    self.update_memory_pointers();
                },
            },
            7 => match n {
                0 => self.ac = self.sp1,
                1 => {
                    self.sp1 = self.ac;
                    self.ac = 0;
                },
                2 => self.ac = self.sp2,
                3 => {
                    self.sp2 = self.ac;
                    self.ac = 0;
                },
                _ => self.core.illegal_opcode(ir),
            },
            _ => self.core.illegal_opcode(ir),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use crate::hd6120::tests::{cpu_at, load};
    use crate::hd6120::{GtfMode, Hd6120, Hd6120Config, Hd6120Reg, MAIN, PANEL};
    use crate::sim::device::{Device, DeviceInfo, Direction, Shared};
    use crate::sim::interrupt::IrqLine;
    use crate::sim::{Cpu, CpuFlags, StopCode};

    /// A device on code 03 that reads a constant (KRB) and skips on its flag (KSF).
    struct Reader {
        info: DeviceInfo,
        flag: bool,
        cleared: u32,
    }
    impl Device for Reader {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }
        fn clear_device(&mut self) {
            self.flag = false;
            self.cleared += 1;
        }
        fn dev_iot(&mut self, ir: u16, ac: &mut u16, pc: &mut u16) -> bool {
            match ir & 7 {
                1 => {
                    if self.flag {
                        *pc += 1;
                    }
                    true
                },
                6 => {
                    *ac = 0o301;
                    self.flag = false;
                    true
                },
                _ => false,
            }
        }
    }

    #[test]
    fn test_device_iot() {
        let mut cpu = cpu_at(0o200, &[0o6031, 0o6036, 0o6031, 0o6035]);
        cpu.core_mut().devices.install(Reader {
            info: DeviceInfo::new("kbd", "reader", Direction::Input, 0o3, 1),
            flag: true,
            cleared: 0,
        }).unwrap();

        cpu.run(1);
        assert_eq!(cpu.pc(), 0o202);
        cpu.set_pc(0o201);
        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o301);
        assert_eq!(cpu.pc(), 0o203);

        // the device does not implement 6035
        assert_eq!(cpu.run(1), StopCode::IllegalIo);
        assert_eq!(cpu.stop_message(), "illegal I/O instruction at 00203");
    }

    #[test]
    fn test_missing_device() {
        let mut cpu = cpu_at(0o200, &[0o6041, 0o7001]);
        assert_eq!(cpu.run(0), StopCode::IllegalIo);

        let mut cpu = cpu_at(0o200, &[0o6041, 0o7001]);
        cpu.core_mut().set_flags(CpuFlags { stop_on_illegal_io: false, ..Default::default() });
        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 1);
    }

    #[test]
    fn test_skon_srq_sgt() {
        let mut cpu = cpu_at(0o200, &[
            0o6000, // SKON
            0o7000,
            0o6000, // SKON
            0o6003, // SRQ
            0o6006, // SGT
            0o7000,
        ]);
        cpu.set_register(Hd6120Reg::Ie, 1);
        cpu.run(1);
        assert_eq!(cpu.pc(), 0o202);
        assert_eq!(cpu.get_register(Hd6120Reg::Ie), 0);
        cpu.run(1);
        assert_eq!(cpu.pc(), 0o203);

        let line = IrqLine::attach(cpu.irq()).unwrap();
        line.assert();
        cpu.set_register(Hd6120Reg::Gt, 1);
        cpu.run(1);
        assert_eq!(cpu.pc(), 0o205);
        cpu.set_pc(0o204);
        cpu.run(1);
        assert_eq!(cpu.pc(), 0o206);
    }

    #[test]
    fn test_gtf_rtf_hd6120() {
        let mut cpu = cpu_at(0o200, &[0o6004, 0o6005]);
        cpu.set_register(Hd6120Reg::L, 1);
        cpu.set_register(Hd6120Reg::Sf, 0o25);

        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o4225);

        // RTF with the enable bit clear leaves interrupts off
        cpu.set_register(Hd6120Reg::Ac, 0o2013);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::L), 0);
        assert_eq!(cpu.get_register(Hd6120Reg::Gt), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ib), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Df), 3);
        assert_eq!(cpu.get_register(Hd6120Reg::Ie), 0);
        assert_eq!(cpu.get_register(Hd6120Reg::Iiff), 1);
    }

    #[test]
    fn test_gtf_rtf_pdp8() {
        let config = Hd6120Config { gtf: GtfMode::Pdp8, ..Default::default() };
        let mut cpu = Hd6120::new(CpuFlags::default(), config);
        load(&mut cpu, MAIN, 0o200, &[0o6004, 0o6005]);
        cpu.set_pc(0o200);
        cpu.set_register(Hd6120Reg::Sf, 0o25);

        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o0025);

        cpu.set_register(Hd6120Reg::Ac, 0o0013);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ie), 1);
    }

    #[test]
    fn test_caf() {
        let mut cpu = cpu_at(0o200, &[0o6007]);
        let reader = Arc::new(Mutex::new(Reader {
            info: DeviceInfo::new("kbd", "reader", Direction::Input, 0o3, 1),
            flag: true,
            cleared: 0,
        }));
        cpu.core_mut().devices.install(Shared::new(Arc::clone(&reader))).unwrap();
        cpu.set_register(Hd6120Reg::Ac, 0o1234);
        cpu.set_register(Hd6120Reg::L, 1);
        cpu.set_register(Hd6120Reg::Ie, 1);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0);
        assert_eq!(cpu.get_register(Hd6120Reg::L), 0);
        assert_eq!(cpu.get_register(Hd6120Reg::Ie), 0);

        let reader = reader.lock().unwrap();
        assert_eq!(reader.cleared, 1);
        assert!(!reader.flag);
    }

    #[test]
    fn test_field_reads() {
        let mut cpu = cpu_at(0o200, &[
            0o6231, // CDF 3
            0o6214, // RDF
            0o6224, // RIF
            0o6234, // RIB
            0o6244, // RMF
        ]);
        cpu.set_register(Hd6120Reg::Sf, 0o52);
        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o30);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o30);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o72);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ib), 5);
        assert_eq!(cpu.get_register(Hd6120Reg::Df), 2);
        assert_eq!(cpu.get_register(Hd6120Reg::Iiff), 1);
    }

    #[test]
    fn test_lif_is_illegal() {
        let mut cpu = cpu_at(0o200, &[0o6254]);
        assert_eq!(cpu.run(1), StopCode::IllegalOpcode);
        let mut cpu = cpu_at(0o200, &[0o6200]);
        assert_eq!(cpu.run(1), StopCode::IllegalOpcode);
    }

    #[test]
    fn test_stacks() {
        let mut cpu = cpu_at(0o200, &[
            0o7201, // CLA IAC
            0o6217, // LSP1 (SP1 <- 1)
            0o7200, // CLA
            0o1220, // TAD 220
            0o6255, // PAC2
            0o6215, // PAC1
            0o6217, // LSP1
            0o6235, // POP1
        ]);
        load(&mut cpu, MAIN, 0o220, &[0o4321]);
        cpu.set_register(Hd6120Reg::Sp2, 0o100);
        cpu.set_register(Hd6120Reg::Df, 5);

        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Sp1), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0);

        cpu.run(4);
        // stacks live in field 0 whatever DF is
        assert_eq!(cpu.main_memory().mem_read(0o100), 0o4321);
        assert_eq!(cpu.main_memory().mem_read(1), 0o4321);
        assert_eq!(cpu.get_register(Hd6120Reg::Sp2), 0o77);
        assert_eq!(cpu.get_register(Hd6120Reg::Sp1), 0);

        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Sp1), 0o4321);
        // SP1 <- 4321; POP1 reads 4322
        load(&mut cpu, MAIN, 0o4322, &[0o17]);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o17);
        assert_eq!(cpu.get_register(Hd6120Reg::Sp1), 0o4322);
    }

    #[test]
    fn test_sp_reads_and_lsp2() {
        let mut cpu = cpu_at(0o200, &[0o6237, 0o6227, 0o6207]);
        cpu.set_register(Hd6120Reg::Ac, 0o55);
        cpu.set_register(Hd6120Reg::Sp1, 0o11);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Sp2), 0o55);
        assert_eq!(cpu.get_register(Hd6120Reg::Sp1), 0o11);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o55);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o11);
    }

    #[test]
    fn test_subroutine_on_stack() {
        let mut cpu = cpu_at(0o200, &[
            0o6205, // PPC1
            0o5300, // JMP 300
            0o7001, // IAC (return point)
        ]);
        load(&mut cpu, MAIN, 0o300, &[0o7001, 0o6225]); // IAC; RTN1
        cpu.set_register(Hd6120Reg::Sp1, 0o7000);

        cpu.run(4);
        assert_eq!(cpu.main_memory().mem_read(0o7000), 0o202);
        assert_eq!(cpu.pc(), 0o202);
        assert_eq!(cpu.get_register(Hd6120Reg::Sp1), 0o7000);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 2);
    }

    #[test]
    fn test_panel_only_iots() {
        let mut cpu = cpu_at(0o1000, &[0o6206]);
        load(&mut cpu, PANEL, 0o7777, &[0o6000]); // PRS
        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o2000);
        assert_eq!(cpu.get_register(Hd6120Reg::Pnltrp), 0);

        // PR0 in the panel does nothing
        let mut cpu = cpu_at(0o1000, &[0o6206]);
        load(&mut cpu, PANEL, 0o7777, &[0o6206]);
        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Pnltrp), 1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ctrl), 1);
        assert_eq!(cpu.pc(), 0);
    }

    #[test]
    fn test_wsr_gcf_spd() {
        let mut cpu = cpu_at(0o200, &[
            0o6246, // WSR
            0o7404, // OSR
            0o6256, // GCF
            0o6276, // SPD
            0o6266, // CPD
        ]);
        cpu.set_register(Hd6120Reg::Ac, 0o707);
        cpu.run(2);
        assert_eq!(cpu.get_register(Hd6120Reg::Sr), 0o707);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o707);

        cpu.set_register(Hd6120Reg::If, 0);
        cpu.set_register(Hd6120Reg::Df, 6);
        cpu.set_register(Hd6120Reg::L, 1);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Ac), 0o4006);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Pdf), 1);
        cpu.run(1);
        assert_eq!(cpu.get_register(Hd6120Reg::Pdf), 0);
    }
}
