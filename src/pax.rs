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
//! PAX extended attribute records (POSIX.1-2001).
//!
//! The payload of an `x` or `g` entry is a sequence of `"%d %s=%s\n"` records
//! where the leading decimal number is the length of the whole record,
//! including the number itself and the trailing newline.

use crate::tar_format_types::parse_pax_time;
use crate::{Result, TarError, TarHeader};
use std::collections::BTreeMap;

pub(crate) const PATH: &str = "path";
pub(crate) const LINKPATH: &str = "linkpath";
pub(crate) const SIZE: &str = "size";
pub(crate) const MTIME: &str = "mtime";
pub(crate) const ATIME: &str = "atime";
pub(crate) const CTIME: &str = "ctime";
pub(crate) const UID: &str = "uid";
pub(crate) const GID: &str = "gid";
pub(crate) const UNAME: &str = "uname";
pub(crate) const GNAME: &str = "gname";

/// Parses the payload of an extended attributes entry.
///
/// # Errors
/// Returns [`TarError::InvalidPaxRecord`] if a record is truncated, its length
/// prefix is wrong or it lacks the `=` separator.
pub fn parse_records(mut data: &[u8]) -> Result<BTreeMap<String, String>> {
    let mut attributes = BTreeMap::new();
    // some archivers pad the payload with NUL bytes
    while !data.is_empty() && data[0] != 0 {
        let space = memchr::memchr(b' ', data)
            .ok_or_else(|| TarError::InvalidPaxRecord("missing length".into()))?;
        let length = core::str::from_utf8(&data[..space])
            .ok()
            .and_then(|len| len.parse::<usize>().ok())
            .filter(|len| *len > space + 1 && *len <= data.len())
            .ok_or_else(|| {
                TarError::InvalidPaxRecord(format!(
                    "bad record length {:?}",
                    String::from_utf8_lossy(&data[..space])
                ))
            })?;
        let (record, rest) = data.split_at(length);
        let body = record[space + 1..]
            .strip_suffix(b"\n")
            .ok_or_else(|| TarError::InvalidPaxRecord("record is not newline terminated".into()))?;
        let equals = memchr::memchr(b'=', body)
            .ok_or_else(|| TarError::InvalidPaxRecord("missing '=' separator".into()))?;
        let key = String::from_utf8_lossy(&body[..equals]).into_owned();
        let value = String::from_utf8_lossy(&body[equals + 1..]).into_owned();
        attributes.insert(key, value);
        data = rest;
    }
    Ok(attributes)
}

/// Formats a single record: "len key=value\n".
pub fn format_record(key: &str, value: &str) -> String {
    // length includes: digits of length + space + key + "=" + value + "\n"
    let base_len = key.len() + value.len() + 3;
    let mut total_len = base_len + 1;
    loop {
        let expected = base_len + total_len.to_string().len();
        if expected == total_len {
            break;
        }
        total_len = expected;
    }
    format!("{total_len} {key}={value}\n")
}

/// Serializes attributes to the payload of an extended attributes entry.
pub fn format_records(attributes: &BTreeMap<String, String>) -> Vec<u8> {
    attributes
        .iter()
        .flat_map(|(key, value)| format_record(key, value).into_bytes())
        .collect()
}

fn parse_decimal<T: core::str::FromStr>(value: &str, key: &'static str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TarError::invalid_field(key, format!("{value:?} is not a decimal number")))
}

impl TarHeader {
    /// Overlays PAX extended attributes onto the fixed-width fields. The
    /// attributes win over the values of the header block. Attributes without a
    /// dedicated field are kept in [`TarHeader::extended_attributes`].
    ///
    /// # Errors
    /// Fails if a numeric or timestamp attribute can't be parsed.
    pub fn apply_extended_attributes(&mut self, attributes: BTreeMap<String, String>) -> Result<()> {
        for (key, value) in attributes {
            match key.as_str() {
                PATH => self.name = value,
                LINKPATH => self.link_name = value,
                SIZE => self.size = parse_decimal(&value, SIZE)?,
                MTIME => self.mtime = parse_pax_time(&value, MTIME)?,
                ATIME => self.atime = Some(parse_pax_time(&value, ATIME)?),
                CTIME => self.ctime = Some(parse_pax_time(&value, CTIME)?),
                UID => self.uid = parse_decimal(&value, UID)?,
                GID => self.gid = parse_decimal(&value, GID)?,
                UNAME => self.uname = value,
                GNAME => self.gname = value,
                _ => {
                    self.extended_attributes.insert(key, value);
                }
            }
        }
        Ok(())
    }
}
