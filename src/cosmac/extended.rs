//! The CDP1804/1805 extended instructions (the `68` prefix).

use super::{alu, CounterMode, Cosmac};

impl Cosmac {
    /// Executes the opcode following a `68` prefix, returning the machine cycles used.
    ///
    /// On a CDP1802 the prefix itself is illegal and the next byte is not fetched.
    pub(super) fn execute_extended(&mut self) -> u64 {
        if !self.config.model.is_extended() {
            self.core.illegal_opcode(0x68);
            return 2;
        }

        let op = self.fetch();
        let (i, n) = (op >> 4, op & 0xF);
        match (i, n) {
            (0x0, 0x0) => {
                let ef = self.counter_line();
                self.counter.set_mode(CounterMode::Stopped, ef);
            },
            (0x0, 0x1) => {
                if self.counter.decrement() {
                    self.counter_underflow();
                }
            },
            (0x0, 0x2) => self.start_counter(CounterMode::Pulse2),
            (0x0, 0x3) => self.start_counter(CounterMode::Event2),
            (0x0, 0x4) => self.start_counter(CounterMode::Pulse1),
            (0x0, 0x5) => self.start_counter(CounterMode::Event1),
            (0x0, 0x6) => {
                if !self.counter.is_running() {
                    self.etq = false;
                }
                self.counter.load(self.d);
                self.ci = false;
            },
            (0x0, 0x7) => self.start_counter(CounterMode::Timer),
            (0x0, 0x8) => self.d = self.counter.cntr,
            (0x0, 0x9) => self.etq = true,
            (0x0, 0xA) => self.xie = true,
            (0x0, 0xB) => self.xie = false,
            (0x0, 0xC) => self.cie = true,
            (0x0, 0xD) => self.cie = false,

            // DBNZ
            (0x2, _) => {
                self.dec(n);
                let nonzero = self.reg(n) != 0;
                self.long_branch(nonzero);
                return 5;
            },
            // BCI
            (0x3, 0xE) => {
                let ci = std::mem::take(&mut self.ci);
                self.short_branch(ci);
            },
            // BXI
            (0x3, 0xF) => {
                let xi = self.external_request();
                self.short_branch(xi);
            },
            // RLXA
            (0x6, _) => {
                let hi = self.read(self.reg(self.x));
                self.inc(self.x);
                let lo = self.read(self.reg(self.x));
                self.inc(self.x);
                *self.reg_mut(n) = u16::from_be_bytes([hi, lo]);
                return 5;
            },
            // DADC, DSMB, DADD, DSM
            (0x7 | 0xF, 0x4 | 0x7) => {
                let m = self.read(self.reg(self.x));
                self.decimal(i, n, m);
                return 4;
            },
            // DACI, DSBI, DADI, DSMI
            (0x7 | 0xF, 0xC | 0xF) => {
                let m = self.fetch();
                self.decimal(i, n, m);
                return 4;
            },
            // DSAV
            (0x7, 0x6) => {
                self.dec(self.x);
                self.write(self.reg(self.x), self.t);
                self.dec(self.x);
                self.write(self.reg(self.x), self.d);
                self.dec(self.x);
                (self.d, self.df) = alu::shr(self.d, self.df);
                self.write(self.reg(self.x), self.d);
                return 6;
            },
            // SCAL
            (0x8, _) => {
                let link = self.reg(n);
                let [hi, lo] = link.to_be_bytes();
                self.write(self.reg(self.x), lo);
                self.dec(self.x);
                self.write(self.reg(self.x), hi);
                self.dec(self.x);

                let pc = self.reg(self.p);
                self.b = self.read(pc);
                let lo = self.read(pc.wrapping_add(1));
                *self.reg_mut(self.p) = u16::from_be_bytes([self.b, lo]);
                *self.reg_mut(n) = pc.wrapping_add(2);
                return 10;
            },
            // SRET
            (0x9, _) => {
                *self.reg_mut(self.p) = self.reg(n);
                self.inc(self.x);
                self.b = self.read(self.reg(self.x));
                self.inc(self.x);
                let lo = self.read(self.reg(self.x));
                *self.reg_mut(n) = u16::from_be_bytes([self.b, lo]);
                return 8;
            },
            // RSXD
            (0xA, _) => {
                let [hi, lo] = self.reg(n).to_be_bytes();
                self.write(self.reg(self.x), lo);
                self.dec(self.x);
                self.write(self.reg(self.x), hi);
                self.dec(self.x);
                return 5;
            },
            // RNX
            (0xB, _) => {
                let r = self.reg(n);
                *self.reg_mut(self.x) = r;
                return 4;
            },
            // RLDI
            (0xC, _) => {
                let hi = self.fetch();
                let lo = self.fetch();
                *self.reg_mut(n) = u16::from_be_bytes([hi, lo]);
                return 5;
            },
            _ => {
                self.core.illegal_opcode(0x6800 | u16::from(op));
            },
        }
        3
    }

    /// The level of the EF line the counter watches, or low if it watches none.
    fn counter_line(&mut self) -> bool {
        match self.counter.source_line() {
            Some(line) => self.ef(line),
            None => false,
        }
    }

    fn start_counter(&mut self, mode: CounterMode) {
        self.counter.mode = mode;
        let ef = self.counter_line();
        self.counter.set_mode(mode, ef);
    }

    /// The decimal forms of ADD/ADC/SM/SMB.
    fn decimal(&mut self, i: u8, n: u8, m: u8) {
        let cin = match i {
            0x7 => self.df,
            _ => n & 7 == 7,
        };
        (self.d, self.df) = match n & 7 {
            4 => alu::decimal_add(self.d, m, cin),
            _ => alu::decimal_sub(self.d, m, cin),
        };
    }
}
