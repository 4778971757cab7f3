/*
MIT License

Copyright (c) 2021 Philipp Schuster

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/
//! Encoding and decoding of the individual fields of a Tar header.
//!
//! Numbers are stored as zero/space padded octal ASCII. GNU tar falls back to a
//! big-endian binary ("base-256") encoding for values that don't fit, which is
//! flagged by the high bit of the first byte. Strings are NUL terminated unless
//! they use the full field width. Timestamps are seconds since the Unix epoch,
//! either as octal integers in the fixed-width fields or as decimal numbers with
//! an optional fraction in PAX records.

use crate::{Result, TarError};
use core::time::Duration;
use encoding_rs::WINDOWS_1252;
use num_traits::{CheckedAdd, CheckedMul, Zero};
use std::time::{SystemTime, UNIX_EPOCH};

/// Resolution of PAX timestamps in nanoseconds.
const NANOS_PER_TICK: u32 = 100;

/// Digits of a PAX timestamp fraction at [`NANOS_PER_TICK`] resolution.
const FRACTION_DIGITS: usize = 7;

/// Marker bit of the GNU base-256 encoding.
const BASE256_FLAG: u8 = 0x80;

/// Returns the payload of a string field: everything before the first NUL
/// byte, without trailing spaces.
pub fn trim_field(field: &[u8]) -> &[u8] {
    let end = memchr::memchr(0, field).unwrap_or(field.len());
    let mut field = &field[..end];
    while let [rest @ .., b' '] = field {
        field = rest;
    }
    field
}

fn trim_number(field: &[u8]) -> &[u8] {
    let is_blank = |b: &u8| *b == 0 || *b == b' ';
    let start = field.iter().position(|b| !is_blank(b)).unwrap_or(field.len());
    let end = field.iter().rposition(|b| !is_blank(b)).map_or(start, |i| i + 1);
    &field[start..end]
}

/// Parses an octal ASCII field. Leading and trailing NUL and space bytes are
/// ignored and a blank field is zero.
///
/// # Errors
/// Returns [`TarError::InvalidField`] for non-octal digits or if the value
/// overflows `T`.
pub fn parse_octal<T>(field: &[u8], name: &'static str) -> Result<T>
where
    T: Zero + CheckedMul + CheckedAdd + From<u8>,
{
    let eight = T::from(8);
    trim_number(field).iter().try_fold(T::zero(), |value, &byte| {
        if !(b'0'..=b'7').contains(&byte) {
            return Err(TarError::invalid_field(
                name,
                format!("{:?} is not an octal digit", char::from(byte)),
            ));
        }
        value
            .checked_mul(&eight)
            .and_then(|value| value.checked_add(&T::from(byte - b'0')))
            .ok_or_else(|| TarError::invalid_field(name, "numeric overflow"))
    })
}

/// Parses an unsigned numeric field that is either octal or GNU base-256.
pub fn parse_numeric(field: &[u8], name: &'static str) -> Result<u64> {
    match field.first() {
        Some(&first) if first & BASE256_FLAG != 0 => {
            if first == 0xff {
                return Err(TarError::invalid_field(name, "negative value"));
            }
            let head = u64::from(first & !BASE256_FLAG);
            field[1..].iter().try_fold(head, |value, &byte| {
                value
                    .checked_mul(256)
                    .and_then(|value| value.checked_add(u64::from(byte)))
                    .ok_or_else(|| TarError::invalid_field(name, "numeric overflow"))
            })
        }
        _ => parse_octal::<u64>(field, name),
    }
}

/// Parses a signed numeric field (timestamps). Negative values only exist in
/// the base-256 encoding, as two's complement.
pub fn parse_signed_numeric(field: &[u8], name: &'static str) -> Result<i64> {
    match field.first() {
        Some(&0xff) => {
            let overflow = || TarError::invalid_field(name, "numeric overflow");
            let significant = field.len().saturating_sub(8);
            if field[..significant].iter().any(|&b| b != 0xff) {
                return Err(overflow());
            }
            let mut bytes = [0xff_u8; 8];
            let tail = &field[significant..];
            bytes[8 - tail.len()..].copy_from_slice(tail);
            let value = i64::from_be_bytes(bytes);
            if value >= 0 {
                return Err(overflow());
            }
            Ok(value)
        }
        _ => {
            let value = parse_numeric(field, name)?;
            i64::try_from(value).map_err(|_| TarError::invalid_field(name, "numeric overflow"))
        }
    }
}

/// Largest value that fits into an octal field of `width` bytes, keeping one
/// byte for the terminating NUL.
pub const fn octal_max(width: usize) -> u64 {
    let digits = width - 1;
    if digits >= 22 {
        u64::MAX
    } else {
        (1 << (3 * digits)) - 1
    }
}

/// Writes `value` as zero padded octal followed by a NUL byte. Returns `false`
/// and leaves the field untouched if the value doesn't fit.
pub fn write_octal(field: &mut [u8], value: u64) -> bool {
    if value > octal_max(field.len()) {
        return false;
    }
    let digits = field.len() - 1;
    let text = format!("{value:0digits$o}");
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
    true
}

/// Writes `value` in the GNU base-256 encoding.
pub fn write_base256(field: &mut [u8], value: u64) {
    field.fill(0);
    let bytes = value.to_be_bytes();
    let len = field.len();
    let n = bytes.len().min(len - 1);
    field[len - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    field[0] |= BASE256_FLAG;
}

/// Decodes a string field. PAX headers are UTF-8; the older formats carry
/// whatever bytes the archiver's locale produced, which is UTF-8 on any recent
/// system and decoded as Windows-1252 otherwise.
pub fn decode_string(bytes: &[u8], utf8_only: bool) -> String {
    match core::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) if utf8_only => String::from_utf8_lossy(bytes).into_owned(),
        Err(_) => WINDOWS_1252
            .decode_without_bom_handling(bytes)
            .0
            .into_owned(),
    }
}

/// Copies `value` into a string field. The field must be zeroed. Returns
/// `false` and writes a truncated value if it doesn't fit.
pub fn write_string(field: &mut [u8], value: &[u8]) -> bool {
    let n = value.len().min(field.len());
    field[..n].copy_from_slice(&value[..n]);
    n == value.len()
}

/// Converts a Unix timestamp in whole seconds.
pub fn from_unix_seconds(seconds: i64) -> SystemTime {
    let magnitude = Duration::from_secs(seconds.unsigned_abs());
    if seconds >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

/// Whole seconds since the Unix epoch, rounded towards negative infinity.
pub fn to_unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(before) => {
            let d = before.duration();
            let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
            if d.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

/// Whether `time` carries information below whole seconds.
pub fn has_subseconds(time: SystemTime) -> bool {
    let d = match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d,
        Err(before) => before.duration(),
    };
    d.subsec_nanos() >= NANOS_PER_TICK
}

/// Parses a PAX timestamp such as `1700000000.1234567` or `-12.5`.
pub fn parse_pax_time(value: &str, name: &'static str) -> Result<SystemTime> {
    let invalid = || TarError::invalid_field(name, format!("{value:?} is not a timestamp"));
    let (negative, magnitude) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (seconds, fraction) = magnitude.split_once('.').unwrap_or((magnitude, ""));
    if seconds.is_empty()
        || !seconds.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }
    let seconds: u64 = seconds.parse().map_err(|_| invalid())?;
    let ticks = fraction
        .bytes()
        .chain(core::iter::repeat(b'0'))
        .take(FRACTION_DIGITS)
        .fold(0_u32, |ticks, digit| ticks * 10 + u32::from(digit - b'0'));
    let duration = Duration::new(seconds, ticks * NANOS_PER_TICK);
    let time = if negative {
        UNIX_EPOCH.checked_sub(duration)
    } else {
        UNIX_EPOCH.checked_add(duration)
    };
    time.ok_or_else(|| TarError::invalid_field(name, "timestamp out of range"))
}

/// Formats a timestamp for a PAX record, exact to 100 nanoseconds.
pub fn format_pax_time(time: SystemTime) -> String {
    let (sign, d) = match time.duration_since(UNIX_EPOCH) {
        Ok(d) => ("", d),
        Err(before) => ("-", before.duration()),
    };
    let ticks = d.subsec_nanos() / NANOS_PER_TICK;
    if ticks == 0 {
        format!("{sign}{}", d.as_secs())
    } else {
        let fraction = format!("{ticks:0width$}", width = FRACTION_DIGITS);
        format!("{sign}{}.{}", d.as_secs(), fraction.trim_end_matches('0'))
    }
}
