//! Loading and saving memory images.
//!
//! Supported formats:
//! - raw binary: one byte per location.
//! - Intel HEX: data (`00`) and end-of-file (`01`) records only.
//! - a pair of Intel HEX files holding 12-bit words, the low eight bits in one
//!     file and the high four in the other.
//! - DEC BIN paper tape, with field settings.
//!
//! Loaders write with [`AddressSpace::mem_write`], so they can fill ROM, and
//! they return the number of words transferred.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use logos::{Lexer, Logos};

use crate::err::ImageErr;

use super::mem::AddressSpace;

/// Intel HEX records are written with this many data bytes.
const RECORD_LEN: usize = 16;

/// Paper tape leader and trailer frame.
const LEADER: u8 = 0o200;
/// Paper tape rubout. Everything between two rubouts is ignored.
const RUBOUT: u8 = 0o377;
/// Paper tape leader/trailer length written by the punch routine.
const LEADER_LEN: usize = 64;

/// Loads raw bytes at `base`, reading at most `limit` of them.
///
/// Data that runs past `limit` or the end of the space is dropped with a warning.
pub fn load_binary(space: &mut AddressSpace, mut reader: impl Read, base: u16, limit: usize) -> Result<usize, ImageErr> {
    let room = space.size().saturating_sub(usize::from(base)).min(limit);
    let mut buf = vec![];
    reader.by_ref().take(room as u64).read_to_end(&mut buf)?;

    for (a, &b) in (usize::from(base)..).zip(&buf) {
        space.mem_write(a as u16, u16::from(b));
    }
    if reader.read(&mut [0])? != 0 {
        tracing::warn!(space = space.name(), words = buf.len(), "binary image truncated");
    }
    Ok(buf.len())
}

/// Saves the low byte of `count` words from `base`.
pub fn save_binary(space: &AddressSpace, mut writer: impl Write, base: u16, count: usize) -> Result<usize, ImageErr> {
    let count = count.min(space.size().saturating_sub(usize::from(base)));
    let bytes: Vec<u8> = (usize::from(base)..)
        .take(count)
        .map(|a| space.mem_read(a as u16) as u8)
        .collect();
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(count)
}

/// Why a HEX token was rejected.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum RecordErr {
    #[default]
    Unexpected,
    OddLength,
}

/// A line of an Intel HEX file.
#[derive(Debug, Logos, PartialEq, Eq)]
#[logos(skip r"[ \t\r]+", error = RecordErr)]
enum HexToken {
    /// A record, decoded to its bytes (count, address, type, data and checksum).
    #[regex(r":[0-9A-Fa-f]*", lex_record)]
    Record(Vec<u8>),

    #[token("\n")]
    NewLine,
}

fn lex_record(lx: &Lexer<'_, HexToken>) -> Result<Vec<u8>, RecordErr> {
    let digits = &lx.slice()[1..];
    if digits.len() % 2 != 0 {
        return Err(RecordErr::OddLength);
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| RecordErr::Unexpected))
        .collect()
}

/// Parses an Intel HEX file, passing each data byte and its address to `store`.
fn parse_intel(text: &str, mut store: impl FnMut(u16, u8)) -> Result<usize, ImageErr> {
    let mut line = 1;
    let mut count = 0;

    for token in HexToken::lexer(text) {
        let bytes = match token {
            Ok(HexToken::NewLine) => {
                line += 1;
                continue;
            },
            Ok(HexToken::Record(bytes)) => bytes,
            Err(_) => return Err(ImageErr::Malformed { line }),
        };

        let &[len, hi, lo, kind, ..] = &bytes[..] else {
            return Err(ImageErr::Malformed { line });
        };
        if bytes.len() != usize::from(len) + 5 {
            return Err(ImageErr::Malformed { line });
        }
        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Err(ImageErr::Checksum { line, sum });
        }

        match kind {
            0x00 => {
                let addr = u16::from_be_bytes([hi, lo]);
                for (i, &b) in (0..).zip(&bytes[4..4 + usize::from(len)]) {
                    store(addr.wrapping_add(i), b);
                }
                count += usize::from(len);
            },
            0x01 => return Ok(count),
            kind => return Err(ImageErr::Unsupported { line, kind }),
        }
    }

    Err(ImageErr::MissingEof)
}

/// Writes one Intel HEX record.
fn write_record(writer: &mut impl Write, addr: u16, kind: u8, data: &[u8]) -> std::io::Result<()> {
    let [hi, lo] = addr.to_be_bytes();
    let sum = [data.len() as u8, hi, lo, kind].iter()
        .chain(data)
        .fold(0u8, |acc, &b| acc.wrapping_add(b));

    write!(writer, ":{:02X}{addr:04X}{kind:02X}", data.len())?;
    for b in data {
        write!(writer, "{b:02X}")?;
    }
    writeln!(writer, "{:02X}", sum.wrapping_neg())
}

fn write_intel(mut writer: impl Write, base: u16, bytes: &[u8]) -> Result<(), ImageErr> {
    for (i, chunk) in bytes.chunks(RECORD_LEN).enumerate() {
        let addr = base.wrapping_add((i * RECORD_LEN) as u16);
        write_record(&mut writer, addr, 0x00, chunk)?;
    }
    write_record(&mut writer, 0, 0x01, &[])?;
    writer.flush()?;
    Ok(())
}

/// Loads an Intel HEX file, adding `offset` to every record address.
pub fn load_intel(space: &mut AddressSpace, mut reader: impl Read, offset: u16) -> Result<usize, ImageErr> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_intel(&text, |addr, b| space.mem_write(addr.wrapping_add(offset), u16::from(b)))
}

/// Saves the low byte of `count` words from `base` as Intel HEX.
pub fn save_intel(space: &AddressSpace, writer: impl Write, base: u16, count: usize) -> Result<usize, ImageErr> {
    let count = count.min(space.size().saturating_sub(usize::from(base)));
    let bytes: Vec<u8> = (usize::from(base)..)
        .take(count)
        .map(|a| space.mem_read(a as u16) as u8)
        .collect();
    write_intel(writer, base, &bytes)?;
    Ok(count)
}

/// Loads 12-bit words from a low-byte HEX file and a high-nibble HEX file.
///
/// A location present in only one of the files gets zero for the missing half.
pub fn load_intel_pair(space: &mut AddressSpace, mut low: impl Read, mut high: impl Read, offset: u16) -> Result<usize, ImageErr> {
    let mut words: BTreeMap<u16, u16> = BTreeMap::new();

    let mut text = String::new();
    low.read_to_string(&mut text)?;
    parse_intel(&text, |addr, b| *words.entry(addr).or_default() |= u16::from(b))?;

    text.clear();
    high.read_to_string(&mut text)?;
    parse_intel(&text, |addr, b| *words.entry(addr).or_default() |= u16::from(b & 0xF) << 8)?;

    for (&addr, &w) in &words {
        space.mem_write(addr.wrapping_add(offset), w);
    }
    Ok(words.len())
}

/// Saves `count` 12-bit words from `base` as a low-byte and high-nibble HEX file pair.
pub fn save_intel_pair(space: &AddressSpace, low: impl Write, high: impl Write, base: u16, count: usize) -> Result<usize, ImageErr> {
    let count = count.min(space.size().saturating_sub(usize::from(base)));
    let words: Vec<u16> = (usize::from(base)..)
        .take(count)
        .map(|a| space.mem_read(a as u16))
        .collect();

    let lows: Vec<u8> = words.iter().map(|&w| w as u8).collect();
    let highs: Vec<u8> = words.iter().map(|&w| (w >> 8) as u8 & 0xF).collect();
    write_intel(low, base, &lows)?;
    write_intel(high, base, &highs)?;
    Ok(count)
}

/// Position and running checksum of a paper tape being loaded.
#[derive(Default)]
struct TapeState {
    field: u16,
    addr: u16,
    sum: u16,
    count: usize,
    /// The newest data word and its frame sum. It is the checksum if the trailer follows it.
    pending: Option<(u16, u16)>,
}
impl TapeState {
    /// Stores the pending data word now that it is known not to be the checksum.
    fn commit(&mut self, space: &mut AddressSpace) {
        if let Some((word, frame_sum)) = self.pending.take() {
            self.sum = self.sum.wrapping_add(frame_sum);
            space.mem_write(self.field << 12 | self.addr, word);
            self.addr = (self.addr + 1) & 0o7777;
            self.count += 1;
        }
    }
}

/// Loads a DEC BIN paper tape.
///
/// Addresses on the tape are combined with the current field setting
/// (`field << 12 | address`). The last data word before the trailer is the
/// checksum: the 12-bit sum of every origin and data frame byte.
pub fn load_paper_tape(space: &mut AddressSpace, mut reader: impl Read) -> Result<usize, ImageErr> {
    let mut tape = vec![];
    reader.read_to_end(&mut tape)?;

    let mut frames = tape.into_iter();
    let mut state = TapeState::default();
    let mut started = false;
    let mut rubout = false;

    while let Some(b) = frames.next() {
        if b == RUBOUT {
            rubout = !rubout;
            continue;
        }
        if rubout { continue };

        match b {
            LEADER if !started => {},
            LEADER => {
                let (found, _) = state.pending.ok_or(ImageErr::TapeTruncated)?;
                let computed = state.sum & 0o7777;
                return match computed == found {
                    true  => Ok(state.count),
                    false => Err(ImageErr::TapeChecksum { computed, found }),
                };
            },
            b if b & 0o300 == 0o300 => {
                state.commit(space);
                state.field = u16::from(b >> 3) & 7;
            },
            b if b & 0o200 != 0 => {},
            b => {
                started = true;
                let b2 = frames.next().ok_or(ImageErr::TapeTruncated)?;
                state.commit(space);

                let word = u16::from(b & 0o77) << 6 | u16::from(b2 & 0o77);
                let frame_sum = u16::from(b) + u16::from(b2);
                match b & 0o100 != 0 {
                    true => {
                        state.addr = word;
                        state.sum = state.sum.wrapping_add(frame_sum);
                    },
                    false => state.pending = Some((word, frame_sum)),
                }
            },
        }
    }

    Err(ImageErr::TapeTruncated)
}

/// Saves `count` words from the 15-bit address `base` as a DEC BIN paper tape.
pub fn save_paper_tape(space: &AddressSpace, mut writer: impl Write, base: u16, count: usize) -> Result<usize, ImageErr> {
    let count = count.min(space.size().saturating_sub(usize::from(base)));
    let mut tape = vec![LEADER; LEADER_LEN];
    let mut sum = 0u16;
    let mut field = None;
    let mut next = None;

    let frame = |tape: &mut Vec<u8>, tag: u8, word: u16| -> u16 {
        let b1 = tag | (word >> 6) as u8 & 0o77;
        let b2 = word as u8 & 0o77;
        tape.extend([b1, b2]);
        u16::from(b1) + u16::from(b2)
    };

    for phys in (usize::from(base)..).take(count) {
        let f = (phys >> 12) as u8 & 7;
        let a = phys as u16 & 0o7777;
        if field != Some(f) {
            tape.push(0o300 | f << 3);
            field = Some(f);
            next = None;
        }
        if next != Some(a) {
            sum = sum.wrapping_add(frame(&mut tape, 0o100, a));
        }
        sum = sum.wrapping_add(frame(&mut tape, 0, space.mem_read(phys as u16)));
        next = Some(a + 1);
    }
    frame(&mut tape, 0, sum & 0o7777);
    tape.extend([LEADER; LEADER_LEN]);

    writer.write_all(&tape)?;
    writer.flush()?;
    Ok(count)
}
