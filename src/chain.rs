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
//! Resolution of metadata chains into one logical entry.
//!
//! GNU archives may put a long link (`K`) and/or a long name (`L`) record in
//! front of an entry, PAX archives an extended attributes (`x`) record. Each of
//! these is a header block followed by a payload; the header after them is the
//! entry they describe. A PAX global attributes (`g`) record is an entry on its
//! own.
//!
//! [`MetadataChain`] is fed one header (and payload, when asked) at a time and
//! answers with the next [`Step`] the reader must take.

use crate::tar_format_types::decode_string;
use crate::{pax, Format, Result, TarError, TarHeader, TypeFlag};
use std::collections::BTreeMap;

/// Upper limit of a metadata payload (long name, long link, PAX attributes)
/// that is read into memory.
pub const MAX_METADATA_SIZE: u64 = 1 << 20;

/// What the reader has to do next.
#[derive(Debug)]
pub(crate) enum Step {
    /// Read the next header block.
    NeedHeader,
    /// Read a payload of this many bytes (plus its padding) and pass it to
    /// [`MetadataChain::push_payload`].
    NeedPayload(u64),
    /// The chain is complete.
    Resolved(TarHeader),
}

#[derive(Debug, Default)]
enum State {
    /// Nothing read yet.
    #[default]
    AwaitingPrimary,
    /// The payload of this marker is next.
    AwaitingPayload(TarHeader, Overrides),
    /// After an `x` record. The next header is the entry.
    AwaitingExtendedEntry(BTreeMap<String, String>),
    /// After a single `L` or `K` record. The next header is either the entry
    /// or the other kind of GNU marker.
    AwaitingPairedMarker(Overrides),
    /// After both GNU markers. The next header is the entry.
    AwaitingEntry(Overrides),
}

/// Values of GNU long name/link records collected so far.
#[derive(Debug, Default)]
struct Overrides {
    name: Option<String>,
    link_name: Option<String>,
}

impl Overrides {
    fn has(&self, type_flag: TypeFlag) -> bool {
        match type_flag {
            TypeFlag::LONGNAME => self.name.is_some(),
            TypeFlag::LONGLINK => self.link_name.is_some(),
            _ => false,
        }
    }

    fn is_complete(&self) -> bool {
        self.name.is_some() && self.link_name.is_some()
    }

    fn apply(self, header: &mut TarHeader) {
        if let Some(name) = self.name {
            header.name = name;
        }
        if let Some(link_name) = self.link_name {
            header.link_name = link_name;
        }
    }
}

/// State machine that turns a sequence of physical headers into one entry.
#[derive(Debug, Default)]
pub(crate) struct MetadataChain {
    state: State,
}

impl MetadataChain {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether a marker was read whose entry is still missing.
    pub(crate) const fn is_pending(&self) -> bool {
        !matches!(self.state, State::AwaitingPrimary)
    }

    /// Feeds the next header block.
    ///
    /// # Errors
    /// [`TarError::UnexpectedMetadata`] if a marker shows up where the entry
    /// is expected, [`TarError::MetadataTooLarge`] if a marker's payload
    /// exceeds [`MAX_METADATA_SIZE`].
    pub(crate) fn push_header(&mut self, mut header: TarHeader) -> Result<Step> {
        let type_flag = header.type_flag;
        match std::mem::take(&mut self.state) {
            State::AwaitingPrimary if type_flag.is_metadata() => {
                self.await_payload(header, Overrides::default())
            }
            State::AwaitingPrimary => Ok(Step::Resolved(header)),
            State::AwaitingExtendedEntry(attributes) => {
                reject_metadata(type_flag)?;
                header.apply_extended_attributes(attributes)?;
                header.format = Format::Pax;
                log::debug!("Resolved PAX extended header chain of {:?}", header.name);
                Ok(Step::Resolved(header))
            }
            State::AwaitingPairedMarker(overrides)
                if matches!(type_flag, TypeFlag::LONGNAME | TypeFlag::LONGLINK)
                    && !overrides.has(type_flag) =>
            {
                self.await_payload(header, overrides)
            }
            State::AwaitingPairedMarker(overrides) | State::AwaitingEntry(overrides) => {
                reject_metadata(type_flag)?;
                overrides.apply(&mut header);
                log::debug!("Resolved GNU long name chain of {:?}", header.name);
                Ok(Step::Resolved(header))
            }
            State::AwaitingPayload(marker, _) => Err(TarError::UnexpectedMetadata(marker.type_flag)),
        }
    }

    fn await_payload(&mut self, marker: TarHeader, overrides: Overrides) -> Result<Step> {
        if marker.size > MAX_METADATA_SIZE {
            return Err(TarError::MetadataTooLarge {
                size: marker.size,
                limit: MAX_METADATA_SIZE,
            });
        }
        let size = marker.size;
        self.state = State::AwaitingPayload(marker, overrides);
        Ok(Step::NeedPayload(size))
    }

    /// Feeds the payload requested by [`Step::NeedPayload`].
    ///
    /// # Errors
    /// Fails if PAX records can't be parsed.
    pub(crate) fn push_payload(&mut self, payload: &[u8]) -> Result<Step> {
        let State::AwaitingPayload(mut marker, mut overrides) = std::mem::take(&mut self.state)
        else {
            return Ok(Step::NeedHeader);
        };
        match marker.type_flag {
            TypeFlag::XHDTYPE => {
                self.state = State::AwaitingExtendedEntry(pax::parse_records(payload)?);
            }
            TypeFlag::XGLTYPE => {
                marker.extended_attributes = pax::parse_records(payload)?;
                return Ok(Step::Resolved(marker));
            }
            TypeFlag::LONGNAME | TypeFlag::LONGLINK => {
                let end = memchr::memchr(0, payload).unwrap_or(payload.len());
                let value = decode_string(&payload[..end], false);
                if marker.type_flag == TypeFlag::LONGNAME {
                    overrides.name = Some(value);
                } else {
                    overrides.link_name = Some(value);
                }
                self.state = if overrides.is_complete() {
                    State::AwaitingEntry(overrides)
                } else {
                    State::AwaitingPairedMarker(overrides)
                };
            }
            other => return Err(TarError::UnexpectedMetadata(other)),
        }
        Ok(Step::NeedHeader)
    }
}

fn reject_metadata(type_flag: TypeFlag) -> Result<()> {
    if type_flag.is_metadata() {
        return Err(TarError::UnexpectedMetadata(type_flag));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &str, type_flag: TypeFlag, size: u64) -> TarHeader {
        let mut header = TarHeader::new(name, type_flag);
        header.size = size;
        header
    }

    fn expect_payload(step: Step) -> u64 {
        match step {
            Step::NeedPayload(size) => size,
            other => panic!("expected payload request, got {other:?}"),
        }
    }

    fn expect_resolved(step: Step) -> TarHeader {
        match step {
            Step::Resolved(header) => header,
            other => panic!("expected resolved entry, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_entry() {
        let mut chain = MetadataChain::new();
        let entry = expect_resolved(chain.push_header(header("a", TypeFlag::REGTYPE, 3)).unwrap());
        assert_eq!(entry.name, "a");
        assert!(!chain.is_pending());
    }

    #[test]
    fn test_pax_chain() {
        let payload = pax::format_record(pax::PATH, "a/very/long/name");
        let mut chain = MetadataChain::new();
        let size = expect_payload(
            chain
                .push_header(header("PaxHeaders.0/name", TypeFlag::XHDTYPE, payload.len() as u64))
                .unwrap(),
        );
        assert_eq!(size, payload.len() as u64);
        assert!(matches!(
            chain.push_payload(payload.as_bytes()).unwrap(),
            Step::NeedHeader
        ));
        assert!(chain.is_pending());

        let mut primary = header("name", TypeFlag::REGTYPE, 0);
        primary.format = Format::Ustar;
        let entry = expect_resolved(chain.push_header(primary).unwrap());
        assert_eq!(entry.name, "a/very/long/name");
        assert_eq!(entry.format, Format::Pax);
    }

    #[test]
    fn test_pax_chain_rejects_metadata() {
        let mut chain = MetadataChain::new();
        chain.push_header(header("x", TypeFlag::XHDTYPE, 0)).unwrap();
        chain.push_payload(b"").unwrap();
        let err = chain
            .push_header(header("g", TypeFlag::XGLTYPE, 0))
            .unwrap_err();
        assert!(matches!(err, TarError::UnexpectedMetadata(TypeFlag::XGLTYPE)));
    }

    #[test]
    fn test_gnu_paired_markers() {
        let long_name = "n".repeat(150);
        let long_link = "l".repeat(150);
        let mut chain = MetadataChain::new();

        chain.push_header(header("././@LongLink", TypeFlag::LONGLINK, 151)).unwrap();
        chain.push_payload(format!("{long_link}\0").as_bytes()).unwrap();
        chain.push_header(header("././@LongLink", TypeFlag::LONGNAME, 151)).unwrap();
        chain.push_payload(format!("{long_name}\0").as_bytes()).unwrap();

        let mut primary = header("truncated", TypeFlag::SYMTYPE, 0);
        primary.link_name = "truncated".to_owned();
        let entry = expect_resolved(chain.push_header(primary).unwrap());
        assert_eq!(entry.name, long_name);
        assert_eq!(entry.link_name, long_link);
    }

    #[test]
    fn test_gnu_single_marker() {
        let mut chain = MetadataChain::new();
        chain.push_header(header("././@LongLink", TypeFlag::LONGNAME, 5)).unwrap();
        chain.push_payload(b"long\0").unwrap();
        let entry = expect_resolved(
            chain
                .push_header(header("lo", TypeFlag::REGTYPE, 0))
                .unwrap(),
        );
        assert_eq!(entry.name, "long");
    }

    #[test]
    fn test_gnu_repeated_marker_is_rejected() {
        let mut chain = MetadataChain::new();
        chain.push_header(header("././@LongLink", TypeFlag::LONGNAME, 2)).unwrap();
        chain.push_payload(b"a\0").unwrap();
        let err = chain
            .push_header(header("././@LongLink", TypeFlag::LONGNAME, 2))
            .unwrap_err();
        assert!(matches!(err, TarError::UnexpectedMetadata(TypeFlag::LONGNAME)));
    }

    #[test]
    fn test_gnu_marker_after_pair_is_rejected() {
        let mut chain = MetadataChain::new();
        chain.push_header(header("././@LongLink", TypeFlag::LONGNAME, 2)).unwrap();
        chain.push_payload(b"a\0").unwrap();
        chain.push_header(header("././@LongLink", TypeFlag::LONGLINK, 2)).unwrap();
        chain.push_payload(b"b\0").unwrap();
        assert!(chain
            .push_header(header("x", TypeFlag::XHDTYPE, 2))
            .is_err());
    }

    #[test]
    fn test_global_attributes_are_an_entry() {
        let payload = pax::format_record("comment", "archive wide");
        let mut chain = MetadataChain::new();
        chain
            .push_header(header("GlobalHead.1", TypeFlag::XGLTYPE, payload.len() as u64))
            .unwrap();
        let entry = expect_resolved(chain.push_payload(payload.as_bytes()).unwrap());
        assert!(entry.is_global_extended_attributes());
        assert_eq!(entry.extended_attributes["comment"], "archive wide");
    }

    #[test]
    fn test_metadata_size_limit() {
        let mut chain = MetadataChain::new();
        let err = chain
            .push_header(header("x", TypeFlag::XHDTYPE, MAX_METADATA_SIZE + 1))
            .unwrap_err();
        assert!(matches!(err, TarError::MetadataTooLarge { .. }));
    }
}
