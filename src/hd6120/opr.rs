//! Operate microinstructions (opcode 7).

use super::{Hd6120, WORD};
use crate::sim::StopCode;

/// Cycles for an operate instruction.
const OPR_CYCLES: u64 = 6;
/// Cycles for the double rotates (RTL, RTR, R3L).
const OPR_ROTATE2_CYCLES: u64 = 8;

const CLA: u16 = 0o200;

impl Hd6120 {
    pub(super) fn operate(&mut self, ir: u16) -> u64 {
        match (ir & 0o400 != 0, ir & 1 != 0) {
            (false, _)    => self.group1(ir),
            (true, false) => self.group2(ir),
            (true, true)  => self.group3(ir),
        }
    }

    fn group1(&mut self, ir: u16) -> u64 {
        if ir & CLA != 0 { self.ac = 0; }
        if ir & 0o100 != 0 { self.l = false; }
        if ir & 0o040 != 0 { self.ac ^= WORD; }
        if ir & 0o020 != 0 { self.l = !self.l; }
        if ir & 0o001 != 0 {
            self.ac = (self.ac + 1) & WORD;
            self.l ^= self.ac == 0;
        }

        // RAR, RAL, BSW
        match (ir >> 1) & 7 {
            0 => OPR_CYCLES,
            1 => {
                self.ac = (self.ac << 6 | self.ac >> 6) & WORD;
                OPR_CYCLES
            },
            2 => {
                self.rotate_left();
                OPR_CYCLES
            },
            3 => {
                self.rotate_left();
                self.rotate_left();
                OPR_ROTATE2_CYCLES
            },
            4 => {
                self.rotate_right();
                OPR_CYCLES
            },
            5 => {
                self.rotate_right();
                self.rotate_right();
                OPR_ROTATE2_CYCLES
            },
            6 => {
                // R3L leaves the link alone
                self.ac = (self.ac << 3 | self.ac >> 9) & WORD;
                OPR_ROTATE2_CYCLES
            },
            _ => {
                self.core.illegal_opcode(ir);
                OPR_CYCLES
            },
        }
    }

    /// Rotates L:AC left one bit.
    fn rotate_left(&mut self) {
        let l = self.ac & 0o4000 != 0;
        self.ac = (self.ac << 1 | u16::from(self.l)) & WORD;
        self.l = l;
    }

    /// Rotates L:AC right one bit.
    fn rotate_right(&mut self) {
        let l = self.ac & 1 != 0;
        self.ac = self.ac >> 1 | u16::from(self.l) << 11;
        self.l = l;
    }

    fn group2(&mut self, ir: u16) -> u64 {
        let sma = ir & 0o100 != 0 && self.ac & 0o4000 != 0;
        let sza = ir & 0o040 != 0 && self.ac == 0;
        let snl = ir & 0o020 != 0 && self.l;
        let reverse = ir & 0o010 != 0;
        if (sma || sza || snl) != reverse {
            self.skip();
        }

        if ir & CLA != 0 { self.ac = 0; }
        if ir & 0o004 != 0 { self.ac |= self.sr; }
        if ir & 0o002 != 0 {
            match self.core.flags.stop_on_halt {
                true  => self.core.set_stop(StopCode::Halt),
                false => self.hltflg = true,
            }
        }
        OPR_CYCLES
    }

    fn group3(&mut self, ir: u16) -> u64 {
        if ir & CLA != 0 { self.ac = 0; }
        match (ir & 0o100 != 0, ir & 0o020 != 0) {
            (true, true) => std::mem::swap(&mut self.ac, &mut self.mq),
            (true, false) => self.ac |= self.mq,
            (false, true) => {
                self.mq = self.ac;
                self.ac = 0;
            },
            (false, false) => {},
        }
        if ir & 0o056 != 0 {
            self.core.illegal_opcode(ir);
        }
        OPR_CYCLES
    }
}
