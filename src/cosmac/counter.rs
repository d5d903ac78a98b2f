//! The CDP1804/1805 counter/timer.

/// What drives the counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CounterMode {
    /// The counter does not count.
    #[default]
    Stopped,
    /// Counts machine cycles through a divide-by-32 prescaler.
    Timer,
    /// Counts falling edges of EF1.
    Event1,
    /// Counts falling edges of EF2.
    Event2,
    /// Counts cycles while EF1 is high.
    Pulse1,
    /// Counts cycles while EF2 is high.
    Pulse2,
}

/// Cycles per timer-mode count.
pub const PRESCALE: u8 = 32;

/// The counter/timer registers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CounterTimer {
    /// What drives the counter.
    pub mode: CounterMode,
    /// The count.
    pub cntr: u8,
    /// The reload value.
    pub ch: u8,
    prescale: u8,
    last_ef: bool,
}
impl CounterTimer {
    /// Stops the counter and zeroes it.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether the counter counts anything.
    pub fn is_running(&self) -> bool {
        self.mode != CounterMode::Stopped
    }

    /// The EF line the current mode samples, if any.
    pub fn source_line(&self) -> Option<u16> {
        match self.mode {
            CounterMode::Event1 | CounterMode::Pulse1 => Some(1),
            CounterMode::Event2 | CounterMode::Pulse2 => Some(2),
            CounterMode::Stopped | CounterMode::Timer => None,
        }
    }

    /// Changes mode. The prescaler restarts and the edge detector takes the line's current level.
    pub fn set_mode(&mut self, mode: CounterMode, ef: bool) {
        self.mode = mode;
        self.prescale = 0;
        self.last_ef = ef;
    }

    /// LDC: loads the reload register, and the count too if the counter is stopped.
    pub fn load(&mut self, d: u8) {
        self.ch = d;
        if !self.is_running() {
            self.cntr = d;
        }
    }

    /// Counts once. Returns whether the count reached zero (and was reloaded).
    pub fn decrement(&mut self) -> bool {
        self.cntr = self.cntr.wrapping_sub(1);
        match self.cntr {
            0 => {
                self.cntr = self.ch;
                true
            },
            _ => false,
        }
    }

    /// Advances the counter by one machine cycle.
    ///
    /// `ef` is the level of the line named by [`CounterTimer::source_line`]
    /// (it is ignored in timer mode). Returns whether the count reached zero.
    pub fn clock(&mut self, ef: bool) -> bool {
        let count = match self.mode {
            CounterMode::Stopped => false,
            CounterMode::Timer => {
                self.prescale += 1;
                match self.prescale >= PRESCALE {
                    true => {
                        self.prescale = 0;
                        true
                    },
                    false => false,
                }
            },
            CounterMode::Event1 | CounterMode::Event2 => self.last_ef && !ef,
            CounterMode::Pulse1 | CounterMode::Pulse2 => ef,
        };
        self.last_ef = ef;

        count && self.decrement()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_timer_prescale() {
        let mut ct = CounterTimer::default();
        ct.load(2);
        assert_eq!(ct.cntr, 2);
        ct.set_mode(CounterMode::Timer, false);

        for _ in 0..31 {
            assert!(!ct.clock(false));
        }
        assert_eq!(ct.cntr, 2);
        assert!(!ct.clock(false));
        assert_eq!(ct.cntr, 1);

        // the second count reaches zero and reloads
        let fired = (0..32).filter(|_| ct.clock(false)).count();
        assert_eq!(fired, 1);
        assert_eq!(ct.cntr, 2);

        // loading while running only changes the reload value
        ct.load(9);
        assert_eq!((ct.cntr, ct.ch), (2, 9));
    }

    #[test]
    fn test_event_counts_falling_edges() {
        let mut ct = CounterTimer { cntr: 3, ch: 3, ..Default::default() };
        ct.set_mode(CounterMode::Event2, true);
        assert_eq!(ct.source_line(), Some(2));

        let levels = [true, false, false, true, true, false, true];
        let fired = levels.iter().filter(|&&ef| ct.clock(ef)).count();
        assert_eq!(fired, 0);
        assert_eq!(ct.cntr, 1);

        assert!(!ct.clock(true));
        assert!(ct.clock(false));
        assert_eq!(ct.cntr, 3);
    }

    #[test]
    fn test_pulse_counts_while_high() {
        let mut ct = CounterTimer { cntr: 5, ch: 5, ..Default::default() };
        ct.set_mode(CounterMode::Pulse1, false);
        for ef in [true, true, false, true] {
            ct.clock(ef);
        }
        assert_eq!(ct.cntr, 2);

        ct.set_mode(CounterMode::Stopped, false);
        assert!(!ct.clock(true));
        assert_eq!(ct.cntr, 2);
        assert_eq!(ct.source_line(), None);
    }
}
