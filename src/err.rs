//! Error interface for this crate.
//!
//! Run-loop failures never come through here: they are reported as a
//! [`StopCode`] written into the CPU. This module holds the errors of the
//! calls that can fail outright:
//! - [`DeviceErr`]: installing a device on ports or addresses.
//! - [`ImageErr`]: loading or saving a memory image.
//! - [`RegisterErr`]: parsing a register name.
//!
//! [`StopCode`]: crate::sim::StopCode

use thiserror::Error;

/// Errors raised while installing or removing devices.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DeviceErr {
    /// A port (or memory-mapped address) in the requested range already belongs to another device.
    #[error("port {port:o} is already assigned to {owner}")]
    PortConflict {
        /// The first conflicting port.
        port: u16,
        /// Name of the device that owns the port.
        owner: String,
    },
    /// The requested range runs past the end of the port or address space.
    #[error("ports {base:o}..{end:o} are outside the {space} space")]
    OutOfRange {
        /// First port of the requested range.
        base: u32,
        /// One past the last port of the requested range.
        end: u32,
        /// Name of the space the range was checked against.
        space: String,
    },
}

/// Errors raised while loading or saving a memory image.
#[derive(Debug, Error)]
pub enum ImageErr {
    /// The underlying file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A HEX line could not be decoded.
    #[error("line {line}: malformed hex record")]
    Malformed {
        /// 1-based line number.
        line: usize,
    },
    /// A HEX record's checksum did not sum to zero.
    #[error("line {line}: checksum error (record sums to {sum:02X})")]
    Checksum {
        /// 1-based line number.
        line: usize,
        /// The byte sum of the whole record, which should have been zero.
        sum: u8,
    },
    /// A HEX record used a type other than data or end-of-file.
    #[error("line {line}: unsupported record type {kind:02X}")]
    Unsupported {
        /// 1-based line number.
        line: usize,
        /// Record type byte.
        kind: u8,
    },
    /// The HEX file ended without an end-of-file record.
    #[error("missing end-of-file record")]
    MissingEof,
    /// The paper tape ended in the middle of a frame or before its trailer.
    #[error("paper tape ended unexpectedly")]
    TapeTruncated,
    /// The paper tape checksum did not match the data read.
    #[error("paper tape checksum error (computed {computed:04o}, tape has {found:04o})")]
    TapeChecksum {
        /// The checksum computed over the frames read.
        computed: u16,
        /// The checksum word punched at the end of the tape.
        found: u16,
    },
}

/// A register name was not recognized.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("unknown register {0:?}")]
pub struct RegisterErr(pub String);
