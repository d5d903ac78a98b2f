//! Simulator cores for vintage microprocessors.
//!
//! This crate simulates, at the architectural level, three processor families:
//! - [`cosmac`]: the RCA COSMAC CDP1802, and the CDP1804A/1805A with their extended instruction set.
//! - [`hd6120`]: the Harris HD6120, a PDP-8 on a chip with a control panel memory and two stacks.
//! - [`dct11`]: the interrupt controller and line clock interfaces of the DEC DCT11 (a PDP-11 on a chip).
//!
//! Every family is built from the same parts (see the [`sim`] module): a virtual-time
//! event queue, interrupt channels, address spaces and devices.
//!
//! # Usage
//!
//! Create a processor, load a program into its memory, and run it:
//! ```
//! use retro_ensemble::sim::{Cpu, StopCode};
//! use retro_ensemble::hd6120::{Hd6120, Hd6120Reg};
//!
//! let mut cpu = Hd6120::new(Default::default(), Default::default());
//! let main = cpu.main_memory_mut();
//! main.mem_write(0o200, 0o7001); // IAC
//! main.mem_write(0o201, 0o7001); // IAC
//! main.mem_write(0o202, 0o5202); // JMP .
//!
//! cpu.set_pc(0o200);
//! assert_eq!(cpu.run(0), StopCode::EndlessLoop);
//! assert_eq!(cpu.get_register(Hd6120Reg::Ac), 2);
//! assert_eq!(cpu.stop_message(), "endless loop at 00202");
//! ```
//!
//! Programs can also be loaded from files (see [`sim::mem::AddressSpace::load_intel`] and its siblings).
#![warn(missing_docs)]

pub mod sim;
pub mod err;
pub mod cosmac;
pub mod hd6120;
pub mod dct11;
