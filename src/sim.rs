//! The machinery shared by every simulated processor.
//!
//! This module consists of:
//! - [`Cpu`]: The trait every processor family implements. It provides the common run loop.
//! - [`Core`]: The state every processor carries (event queue, devices, address spaces, stop state).
//! - [`event`]: The virtual-time event queue.
//! - [`interrupt`]: Interrupt channels and the lines devices use to drive them.
//! - [`mem`]: Address spaces.
//! - [`device`]: The device contract, device maps and some generic devices.
//! - [`image`]: Loaders and savers for program images.
//!
//! # Usage
//!
//! A processor is created from a [`CpuFlags`] and its family's own configuration.
//! Once memory is loaded, [`Cpu::run`] executes instructions until something stops it:
//!
//! ```
//! use retro_ensemble::sim::{Cpu, StopCode};
//! use retro_ensemble::cosmac::{Cosmac, CosmacReg};
//!
//! let mut cpu = Cosmac::new(Default::default(), Default::default());
//! // LDI #12; ADI #34
//! for (addr, byte) in [0xF8, 0x12, 0xFC, 0x34].into_iter().enumerate() {
//!     cpu.memory_mut().mem_write(addr as u16, byte);
//! }
//!
//! assert_eq!(cpu.run(2), StopCode::Finished);
//! assert_eq!(cpu.get_register(CosmacReg::D), 0x46);
//! assert_eq!(cpu.pc(), 4);
//! ```
//!
//! ## Flags
//!
//! The common settings of a processor live in [`CpuFlags`]:
//!
//! ```
//! # use retro_ensemble::sim::CpuFlags;
//! let flags = CpuFlags { crystal_hz: 2_000_000, stop_on_halt: false, ..Default::default() };
//! ```
//!
//! Changes to the flags (through [`Core::set_flags`]) apply from the next instruction on.
//!
//! ## Stopping
//!
//! [`Cpu::run`] returns a [`StopCode`] saying why the run ended.
//! Another thread can end a run early through a [`BreakHandle`]:
//!
//! ```
//! # use retro_ensemble::sim::{Cpu, StopCode};
//! # use retro_ensemble::cosmac::Cosmac;
//! let mut cpu = Cosmac::new(Default::default(), Default::default());
//! let brk = cpu.core().break_handle();
//!
//! brk.request();
//! assert_eq!(cpu.run(0), StopCode::Break);
//! ```
pub mod event;
pub mod interrupt;
pub mod mem;
pub mod device;
pub mod image;

use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use self::device::DeviceHandler;
use self::event::Scheduler;
use self::mem::{AddressSpace, MemInit};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why a run stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopCode {
    /// Nothing has stopped the processor.
    #[default]
    None,
    /// The requested number of instructions was executed.
    Finished,
    /// The processor executed a halt instruction.
    Halt,
    /// The processor reached an address with a breakpoint.
    Breakpoint,
    /// The processor decoded a reserved opcode.
    IllegalOpcode,
    /// The processor addressed a port or IOT that nothing answers.
    IllegalIo,
    /// The processor jumped to itself with interrupts disabled.
    EndlessLoop,
    /// The operator asked the processor to stop (or it idled with no way to wake up).
    Break,
}
impl StopCode {
    /// Whether this code stops a run.
    pub fn is_stopped(self) -> bool {
        self != StopCode::None
    }
}
impl std::fmt::Display for StopCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopCode::None          => f.write_str("no stop"),
            StopCode::Finished      => f.write_str("run count exhausted"),
            StopCode::Halt          => f.write_str("halt instruction"),
            StopCode::Breakpoint    => f.write_str("breakpoint"),
            StopCode::IllegalOpcode => f.write_str("illegal opcode"),
            StopCode::IllegalIo     => f.write_str("illegal I/O instruction"),
            StopCode::EndlessLoop   => f.write_str("endless loop"),
            StopCode::Break         => f.write_str("break requested"),
        }
    }
}

/// Configuration common to every processor.
///
/// All of these can be changed between runs with [`Core::set_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuFlags {
    /// The crystal frequency, in Hz. Cycle counts are converted to virtual time through this.
    ///
    /// By default, this is 4 MHz.
    pub crystal_hz: u64,

    /// Whether a halt instruction stops the run.
    ///
    /// By default, this flag is `true`.
    pub stop_on_halt: bool,

    /// Whether a reserved opcode stops the run. If not, it executes as a no-op.
    ///
    /// By default, this flag is `true`.
    pub stop_on_illegal_opcode: bool,

    /// Whether addressing a missing device stops the run. If not, the access does nothing.
    ///
    /// By default, this flag is `true`.
    pub stop_on_illegal_io: bool,

    /// How RAM is filled at power-on.
    ///
    /// By default, RAM is zeroed.
    pub mem_init: MemInit,
}
impl Default for CpuFlags {
    fn default() -> Self {
        Self {
            crystal_hz: 4_000_000,
            stop_on_halt: true,
            stop_on_illegal_opcode: true,
            stop_on_illegal_io: true,
            mem_init: MemInit::default(),
        }
    }
}

/// A handle that asks a running processor to stop.
///
/// The handle can be cloned and sent to another thread.
/// The processor checks it between instructions and stops with [`StopCode::Break`].
#[derive(Debug, Default, Clone)]
pub struct BreakHandle(Arc<AtomicBool>);
impl BreakHandle {
    /// Asks the processor to stop.
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    /// Whether a stop has been requested and not yet seen.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
    /// Consumes a pending request.
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// The state shared by every processor family.
#[derive(Debug)]
pub struct Core {
    /// This processor's event queue.
    pub events: Scheduler,
    /// Devices on I/O ports, sense lines and flag lines.
    pub devices: DeviceHandler,
    /// The processor's address spaces. Which index is which depends on the family.
    pub spaces: Vec<AddressSpace>,
    /// Configuration.
    pub flags: CpuFlags,
    /// The number of instructions executed since creation.
    pub instructions_run: u64,

    stop: StopCode,
    brk: BreakHandle,
    saved_pc: u32,
    clocks_per_cycle: u64,
    // fractional ns carried between add_cycles calls, in units of 1/crystal_hz ns
    ns_remainder: u128,
}
impl Core {
    /// Creates the shared state with a fresh event queue and no devices.
    ///
    /// Every space is filled according to `flags.mem_init`.
    pub fn new(flags: CpuFlags, clocks_per_cycle: u64, mut spaces: Vec<AddressSpace>) -> Self {
        for s in &mut spaces {
            s.power_on(flags.mem_init);
        }
        Self {
            events: Scheduler::new(),
            devices: DeviceHandler::new(),
            spaces,
            flags,
            instructions_run: 0,
            stop: StopCode::None,
            brk: BreakHandle::default(),
            saved_pc: 0,
            clocks_per_cycle,
            ns_remainder: 0,
        }
    }

    /// Replaces the configuration.
    pub fn set_flags(&mut self, flags: CpuFlags) {
        if flags.crystal_hz != self.flags.crystal_hz {
            self.ns_remainder = 0;
        }
        self.flags = flags;
    }

    /// The current stop code.
    pub fn stop_code(&self) -> StopCode {
        self.stop
    }
    /// Sets the stop code. The first stop of a step wins.
    pub fn set_stop(&mut self, code: StopCode) {
        if !self.stop.is_stopped() {
            self.stop = code;
        }
    }
    /// Clears the stop code.
    pub fn clear_stop(&mut self) {
        self.stop = StopCode::None;
    }

    /// The fetch address of the last instruction started.
    pub fn saved_pc(&self) -> u32 {
        self.saved_pc
    }
    pub(crate) fn set_saved_pc(&mut self, pc: u32) {
        self.saved_pc = pc;
    }

    /// A handle that can stop this processor from another thread.
    pub fn break_handle(&self) -> BreakHandle {
        self.brk.clone()
    }

    /// Whether a break has been requested and not yet seen by the run loop.
    pub fn break_requested(&self) -> bool {
        self.brk.is_requested()
    }

    /// The current virtual time, in ns.
    pub fn now(&self) -> u64 {
        self.events.now()
    }

    /// Converts a cycle count to ns at the configured crystal frequency.
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        let hz = u128::from(self.flags.crystal_hz.max(1));
        let clocks = u128::from(cycles) * u128::from(self.clocks_per_cycle);
        (clocks * 1_000_000_000 / hz) as u64
    }

    /// Advances virtual time by some cycles.
    ///
    /// The part of a ns that does not divide evenly is carried to the next call,
    /// so virtual time never falls behind the cycle count.
    pub fn add_cycles(&mut self, cycles: u64) {
        let hz = u128::from(self.flags.crystal_hz.max(1));
        let scaled = u128::from(cycles) * u128::from(self.clocks_per_cycle) * 1_000_000_000 + self.ns_remainder;
        self.ns_remainder = scaled % hz;
        self.events.add_time((scaled / hz) as u64);
    }

    /// Runs every event that has come due.
    ///
    /// Each event goes to the device whose handler matches: first the port
    /// devices, then the memory-mapped devices of each space.
    pub fn do_events(&mut self) {
        let Core { events, devices, spaces, .. } = self;
        events.do_events(|ev| {
            if devices.arena_mut().dispatch_event(ev.handler, ev.param) {
                return;
            }
            for space in spaces.iter_mut() {
                if space.devices_mut().dispatch_event(ev.handler, ev.param) {
                    return;
                }
            }
            tracing::warn!(handler = ?ev.handler, param = ev.param, "event for a device that no longer exists");
        });
    }

    /// Clears every device exactly once.
    pub fn clear_devices(&mut self) {
        self.devices.clear_all_once();
        for space in &mut self.spaces {
            space.devices_mut().clear_all_once();
        }
    }

    /// Cancels every event and resets virtual time.
    pub fn clear_events(&mut self) {
        self.events.lock().clear_events();
        self.ns_remainder = 0;
    }

    /// Reports a reserved opcode.
    pub fn illegal_opcode(&mut self, opcode: u16) {
        tracing::warn!(pc = self.saved_pc, opcode, "illegal opcode");
        if self.flags.stop_on_illegal_opcode {
            self.set_stop(StopCode::IllegalOpcode);
        }
    }

    /// Reports an access to a port or IOT that nothing answers.
    pub fn illegal_io(&mut self, opcode: u16) {
        tracing::warn!(pc = self.saved_pc, opcode, "no device answers I/O instruction");
        if self.flags.stop_on_illegal_io {
            self.set_stop(StopCode::IllegalIo);
        }
    }
}

/// A simulated processor.
///
/// Each family supplies decode and execute ([`Cpu::step`]), interrupt
/// delivery ([`Cpu::service_interrupts`]) and register access.
/// The run loop itself is shared.
pub trait Cpu {
    /// The family's register names.
    type Reg: Copy + Debug + Display;

    /// The shared state.
    fn core(&self) -> &Core;
    /// The shared state.
    fn core_mut(&mut self) -> &mut Core;

    /// Resets the architectural state to its power-on values.
    ///
    /// Devices, memory and virtual time are left alone.
    fn clear_cpu(&mut self);

    /// Resets the processor, cancels every event (resetting virtual time) and clears every device.
    fn master_clear(&mut self) {
        self.core_mut().clear_events();
        self.core_mut().clear_devices();
        self.clear_cpu();
    }

    /// The program counter.
    fn pc(&self) -> u16;
    /// Sets the program counter.
    fn set_pc(&mut self, pc: u16);

    /// The full address the next instruction is fetched from.
    ///
    /// This is used for breakpoints, endless-loop detection and the saved PC.
    fn fetch_address(&self) -> u32 {
        u32::from(self.pc())
    }

    /// Whether the processor can currently take an interrupt.
    fn interrupts_enabled(&self) -> bool;

    /// Delivers a pending interrupt, if one can be taken.
    fn service_interrupts(&mut self);

    /// Whether the next instruction's address has a breakpoint.
    fn at_breakpoint(&self) -> bool;

    /// Fetches and executes one instruction.
    fn step(&mut self);

    /// Reads a register.
    fn get_register(&self, reg: Self::Reg) -> u32;
    /// Writes a register. Bits past the register's size are dropped.
    fn set_register(&mut self, reg: Self::Reg, value: u32);
    /// The size of a register, in bits.
    fn register_size(&self, reg: Self::Reg) -> u32;

    /// The operator message for the current stop.
    fn stop_message(&self) -> String {
        let core = self.core();
        format!("{} at {:04X}", core.stop_code(), core.saved_pc())
    }

    /// Runs until a stop condition occurs or `tripwire` returns false (which stops with [`StopCode::Finished`]).
    ///
    /// The tripwire is checked after every instruction.
    fn run_while(&mut self, mut tripwire: impl FnMut(&mut Self) -> bool) -> StopCode
        where Self: Sized
    {
        self.core_mut().clear_stop();
        let mut first = true;

        loop {
            if self.core().brk.take() {
                self.core_mut().set_stop(StopCode::Break);
                break;
            }

            self.core_mut().do_events();
            if self.core().stop_code().is_stopped() { break };

            self.service_interrupts();

            let fetch = self.fetch_address();
            if !first && self.at_breakpoint() {
                let core = self.core_mut();
                core.set_saved_pc(fetch);
                core.set_stop(StopCode::Breakpoint);
                break;
            }
            first = false;

            self.core_mut().set_saved_pc(fetch);
            self.step();
            self.core_mut().instructions_run += 1;
            if self.core().stop_code().is_stopped() { break };

            if self.fetch_address() == fetch && !self.interrupts_enabled() {
                self.core_mut().set_stop(StopCode::EndlessLoop);
                break;
            }

            if !tripwire(self) {
                self.core_mut().set_stop(StopCode::Finished);
                break;
            }
        }

        self.core().stop_code()
    }

    /// Runs `count` instructions, or until something else stops the processor.
    ///
    /// A count of 0 runs until something stops the processor.
    fn run(&mut self, count: u64) -> StopCode
        where Self: Sized
    {
        match count {
            0 => self.run_while(|_| true),
            n => {
                let mut left = n;
                self.run_while(|_| {
                    left -= 1;
                    left != 0
                })
            }
        }
    }

    /// Executes one instruction.
    fn step_in(&mut self) -> StopCode
        where Self: Sized
    {
        self.run(1)
    }
}
