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
//! Serialization of [`TarHeader`]s into header blocks.
//!
//! One logical entry becomes one to three physical headers: GNU archives put
//! `K` (long link) and `L` (long name) records in front of the entry when a
//! name doesn't fit, PAX archives put an `x` record with extended attributes
//! in front of it when any value doesn't fit or can't be represented in the
//! fixed-width fields.

use crate::header::{
    PosixHeader, GNU_MAGIC, GNU_VERSION, NAME_LEN, OWNER_NAME_LEN, PREFIX_LEN, USTAR_MAGIC,
    USTAR_VERSION,
};
use crate::helpers::padding;
use crate::tar_format_types::{
    format_pax_time, has_subseconds, octal_max, to_unix_seconds, write_base256, write_octal,
    write_string,
};
use crate::{pax, Format, Result, TarError, TarHeader, TypeFlag, BLOCKSIZE};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zerocopy::FromZeros;

/// Name GNU tar uses for long name and long link records.
const GNU_LONGLINK_NAME: &str = "././@LongLink";

/// Checks that `header` can be written as an entry of `format`.
pub(crate) fn validate(header: &TarHeader, format: Format) -> Result<()> {
    let type_flag = header.type_flag;
    // the writer synthesizes these on its own
    let synthesized = type_flag.is_metadata() && type_flag != TypeFlag::XGLTYPE;
    if synthesized || !format.supports(type_flag) {
        return Err(TarError::UnsupportedEntryType {
            type_flag: type_flag as u8,
            format,
        });
    }
    if type_flag.is_link() && header.link_name.is_empty() {
        return Err(TarError::MissingLinkTarget(type_flag));
    }
    Ok(())
}

/// Encodes all header blocks of one entry: metadata records (with their
/// payload and padding) followed by the entry's own header block.
pub(crate) fn encode_header(header: &TarHeader, format: Format) -> Result<Vec<u8>> {
    validate(header, format)?;
    let mut out = Vec::with_capacity(BLOCKSIZE);
    match format {
        Format::Pax => {
            let attributes = pax_attributes(header);
            if !attributes.is_empty() {
                let name = extended_header_name(&header.name);
                let payload = pax::format_records(&attributes);
                append_metadata_entry(&mut out, &name, TypeFlag::XHDTYPE, &payload, header.mtime)?;
            }
        }
        Format::Gnu => {
            if header.link_name.len() > NAME_LEN {
                append_gnu_long_entry(&mut out, TypeFlag::LONGLINK, &header.link_name)?;
            }
            if header.name.len() > NAME_LEN {
                append_gnu_long_entry(&mut out, TypeFlag::LONGNAME, &header.name)?;
            }
        }
        Format::V7 | Format::Ustar => {}
    }
    out.extend_from_slice(encode_primary(header, format)?.as_slice());
    Ok(out)
}

/// Encodes a PAX global extended attributes entry including its payload.
/// `sequence` numbers the global entries of one archive.
pub(crate) fn encode_global(header: &TarHeader, sequence: u32) -> Result<Vec<u8>> {
    let name = global_header_name(&std::env::temp_dir(), sequence);
    let payload = pax::format_records(&header.extended_attributes);
    let mut out = Vec::with_capacity(2 * BLOCKSIZE + payload.len());
    append_metadata_entry(
        &mut out,
        &name,
        TypeFlag::XGLTYPE,
        &payload,
        header.mtime,
    )?;
    Ok(out)
}

/// Name of a global extended attributes record. Only the directory part is
/// shortened to fit the name field, the sequence number always survives.
fn global_header_name(dir: &Path, sequence: u32) -> String {
    let file_name = format!("GlobalHead.{}.{}", std::process::id(), sequence);
    let dir = dir.to_string_lossy();
    let dir = dir.trim_end_matches('/');
    match NAME_LEN.checked_sub(file_name.len() + 1) {
        Some(room) if !dir.is_empty() && room > 0 => {
            format!("{}/{}", truncate(dir, room), file_name)
        }
        _ => file_name,
    }
}

/// Encodes only the header block of the entry itself.
pub(crate) fn encode_primary(header: &TarHeader, format: Format) -> Result<[u8; BLOCKSIZE]> {
    let overflow = |field| TarError::FieldOverflow { field, format };
    let mut raw = PosixHeader::new_zeroed();

    // names
    let name = header.name.as_bytes();
    match (format, split_ustar_path(name)) {
        (Format::Ustar | Format::Pax, Some((prefix, name))) => {
            write_string(raw.prefix_mut(), prefix);
            write_string(&mut raw.name, name);
        }
        (Format::V7 | Format::Ustar, _) if name.len() > NAME_LEN => return Err(overflow("name")),
        // PAX: the `path` record holds the full name, GNU: the long name record
        _ => {
            write_string(&mut raw.name, name);
        }
    }
    let fits = write_string(&mut raw.linkname, header.link_name.as_bytes());
    if !fits && matches!(format, Format::V7 | Format::Ustar) {
        return Err(overflow("linkname"));
    }

    // numbers
    if !write_octal(&mut raw.mode, u64::from(header.mode)) {
        return Err(overflow("mode"));
    }
    write_number(&mut raw.uid, u64::from(header.uid), format, "uid")?;
    write_number(&mut raw.gid, u64::from(header.gid), format, "gid")?;
    write_number(&mut raw.size, header.size, format, "size")?;
    write_time(&mut raw.mtime, header.mtime, format, "mtime")?;
    raw.typeflag = header.type_flag as u8;

    if format != Format::V7 {
        (raw.magic, raw.version) = match format {
            Format::Gnu => (*GNU_MAGIC, *GNU_VERSION),
            _ => (*USTAR_MAGIC, *USTAR_VERSION),
        };
        for (field, value, name) in [
            (&mut raw.uname, &header.uname, "uname"),
            (&mut raw.gname, &header.gname, "gname"),
        ] {
            if !write_string(field, value.as_bytes()) && format != Format::Pax {
                return Err(overflow(name));
            }
        }
        write_device(&mut raw.dev_major, header.dev_major, format, "devmajor")?;
        write_device(&mut raw.dev_minor, header.dev_minor, format, "devminor")?;
    }

    if format == Format::Gnu {
        let (atime, ctime) = raw.gnu_times_mut();
        if let Some(time) = header.atime {
            write_time(atime, time, format, "atime")?;
        }
        if let Some(time) = header.ctime {
            write_time(ctime, time, format, "ctime")?;
        }
        if let Some(extra) = &header.gnu_extra {
            raw.gnu_extra_mut().copy_from_slice(extra.as_slice());
        }
    }

    raw.update_checksum();
    Ok(*raw.as_block())
}

/// Writes an octal number. Values that don't fit use the base-256 encoding in
/// GNU archives and are left to the extended attributes in PAX archives.
fn write_number(field: &mut [u8], value: u64, format: Format, name: &'static str) -> Result<()> {
    if write_octal(field, value) {
        return Ok(());
    }
    match format {
        Format::Gnu => {
            write_base256(field, value);
            Ok(())
        }
        Format::Pax => {
            write_octal(field, 0);
            Ok(())
        }
        Format::V7 | Format::Ustar => Err(TarError::FieldOverflow { field: name, format }),
    }
}

/// Device numbers have no PAX attribute, so only GNU can go beyond octal.
fn write_device(field: &mut [u8], value: u32, format: Format, name: &'static str) -> Result<()> {
    let value = u64::from(value);
    if format == Format::Gnu || write_octal(field, value) {
        return write_number(field, value, format, name);
    }
    Err(TarError::FieldOverflow { field: name, format })
}

fn write_time(field: &mut [u8], time: SystemTime, format: Format, name: &'static str) -> Result<()> {
    match u64::try_from(to_unix_seconds(time)) {
        Ok(seconds) => write_number(field, seconds, format, name),
        Err(_) if format == Format::Pax => {
            write_octal(field, 0);
            Ok(())
        }
        Err(_) => Err(TarError::FieldOverflow { field: name, format }),
    }
}

/// Splits a path into Ustar `prefix` and `name` at a `/`. Returns `None` if
/// the path can't be stored that way.
fn split_ustar_path(path: &[u8]) -> Option<(&[u8], &[u8])> {
    if path.len() <= NAME_LEN {
        return Some((&[], path));
    }
    // a trailing slash of directories stays with the name
    let limit = (path.len() - 1).min(PREFIX_LEN + 1);
    let pos = path[..limit].iter().rposition(|&b| b == b'/')?;
    let (prefix, name) = (&path[..pos], &path[pos + 1..]);
    if prefix.is_empty() || name.is_empty() || name.len() > NAME_LEN {
        return None;
    }
    Some((prefix, name))
}

/// Extended attributes needed to represent `header` in a PAX archive: the
/// caller's attributes plus every value the fixed-width fields can't hold.
fn pax_attributes(header: &TarHeader) -> BTreeMap<String, String> {
    let mut attributes: BTreeMap<String, String> = header
        .extended_attributes
        .iter()
        .filter(|(key, _)| !is_field_attribute(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let mut set = |key: &str, value: String| {
        attributes.insert(key.to_owned(), value);
    };

    let name = &header.name;
    if !name.is_ascii() || split_ustar_path(name.as_bytes()).is_none() {
        set(pax::PATH, name.clone());
    }
    let link = &header.link_name;
    if !link.is_ascii() || link.len() > NAME_LEN {
        set(pax::LINKPATH, link.clone());
    }
    if header.size > octal_max(12) {
        set(pax::SIZE, header.size.to_string());
    }
    if u64::from(header.uid) > octal_max(8) {
        set(pax::UID, header.uid.to_string());
    }
    if u64::from(header.gid) > octal_max(8) {
        set(pax::GID, header.gid.to_string());
    }
    for (key, value) in [(pax::UNAME, &header.uname), (pax::GNAME, &header.gname)] {
        if !value.is_ascii() || value.len() > OWNER_NAME_LEN {
            set(key, value.clone());
        }
    }
    let seconds = to_unix_seconds(header.mtime);
    let mtime_fits = u64::try_from(seconds).is_ok_and(|s| s <= octal_max(12));
    if has_subseconds(header.mtime) || !mtime_fits {
        set(pax::MTIME, format_pax_time(header.mtime));
    }
    if let Some(atime) = header.atime {
        set(pax::ATIME, format_pax_time(atime));
    }
    if let Some(ctime) = header.ctime {
        set(pax::CTIME, format_pax_time(ctime));
    }
    attributes
}

fn is_field_attribute(key: &str) -> bool {
    [
        pax::PATH,
        pax::LINKPATH,
        pax::SIZE,
        pax::MTIME,
        pax::ATIME,
        pax::CTIME,
        pax::UID,
        pax::GID,
        pax::UNAME,
        pax::GNAME,
    ]
    .contains(&key)
}

/// Name of the `x` record of an entry, the way GNU tar builds it:
/// `<dir>/PaxHeaders.<pid>/<file>`.
fn extended_header_name(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let (dir, file) = trimmed.rsplit_once('/').unwrap_or((".", trimmed));
    let name = format!("{dir}/PaxHeaders.{}/{file}", std::process::id());
    truncate(&name, NAME_LEN).to_owned()
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn append_metadata_entry(
    out: &mut Vec<u8>,
    name: &str,
    type_flag: TypeFlag,
    payload: &[u8],
    mtime: SystemTime,
) -> Result<()> {
    let mut header = TarHeader::new(name, type_flag);
    header.size = payload.len() as u64;
    header.mtime = if mtime < UNIX_EPOCH { UNIX_EPOCH } else { mtime };
    out.extend_from_slice(&encode_primary(&header, Format::Pax)?);
    append_payload(out, payload);
    Ok(())
}

fn append_gnu_long_entry(out: &mut Vec<u8>, type_flag: TypeFlag, value: &str) -> Result<()> {
    let mut payload = Vec::with_capacity(value.len() + 1);
    payload.extend_from_slice(value.as_bytes());
    payload.push(0);
    let mut header = TarHeader::new(GNU_LONGLINK_NAME, type_flag);
    header.size = payload.len() as u64;
    header.mtime = UNIX_EPOCH;
    out.extend_from_slice(&encode_primary(&header, Format::Gnu)?);
    append_payload(out, &payload);
    Ok(())
}

fn append_payload(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(payload);
    let pad = padding(payload.len() as u64) as usize;
    out.resize(out.len() + pad, 0);
}
