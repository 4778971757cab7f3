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
//! Error type of this crate.
//!
//! Errors fall into three kinds: data-format errors (the archive bytes are not a
//! valid Tar archive or a value cannot be encoded), capability errors (the
//! underlying stream cannot do what the operation needs) and resource-lifetime
//! errors (something was used after it was disposed).

use crate::{Format, TypeFlag};
use std::io;
use thiserror::Error;

/// All errors that reading or writing an archive may produce.
#[derive(Debug, Error)]
pub enum TarError {
    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The checksum stored in a header does not match its content.
    #[error("header checksum mismatch: stored {stored:#o}, computed {computed:#o}")]
    ChecksumMismatch {
        /// Checksum stored in the header.
        stored: u32,
        /// Checksum computed over the header block.
        computed: u32,
    },

    /// The magic/version bytes don't belong to any known format.
    #[error("unknown header format: magic={magic:02x?} version={version:02x?}")]
    UnknownFormat {
        /// Raw magic bytes.
        magic: [u8; 6],
        /// Raw version bytes.
        version: [u8; 2],
    },

    /// The type flag is unknown or not allowed in the given format.
    #[error("entry type {:?} is not supported by the {format} format", flag_char(.type_flag))]
    UnsupportedEntryType {
        /// Raw type flag byte.
        type_flag: u8,
        /// Format of the header.
        format: Format,
    },

    /// A metadata marker showed up where the entry it describes was expected.
    #[error("unexpected metadata entry {0:?} in metadata chain")]
    UnexpectedMetadata(TypeFlag),

    /// A header field can't be decoded.
    #[error("invalid `{field}` field: {reason}")]
    InvalidField {
        /// Name of the field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A value doesn't fit into its header field in the given format.
    #[error("value of `{field}` does not fit into a {format} header")]
    FieldOverflow {
        /// Name of the field.
        field: &'static str,
        /// Format that was written.
        format: Format,
    },

    /// A PAX extended attribute record is malformed.
    #[error("invalid PAX extended attribute record: {0}")]
    InvalidPaxRecord(String),

    /// A metadata payload (long name, long link, PAX attributes) is too large.
    #[error("metadata entry of {size} bytes exceeds the limit of {limit} bytes")]
    MetadataTooLarge {
        /// Announced size of the payload.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// The stream ended in the middle of a header or an entry.
    #[error("unexpected end of archive: {0} more bytes expected")]
    UnexpectedEof(u64),

    /// Hard links and symbolic links need a target.
    #[error("{0:?} entries require a non-empty link target")]
    MissingLinkTarget(TypeFlag),

    /// The operation needs random access but the stream is sequential.
    #[error("operation requires a seekable stream: {0}")]
    NotSeekable(&'static str),

    /// The object was already disposed.
    #[error("{0} has already been disposed")]
    Disposed(&'static str),
}

/// Result type alias for this crate.
pub type Result<T> = core::result::Result<T, TarError>;

impl TarError {
    /// Whether this error means that the archive data is malformed or can't be
    /// represented in the requested format.
    pub const fn is_data_format(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::UnknownFormat { .. }
                | Self::UnsupportedEntryType { .. }
                | Self::UnexpectedMetadata(_)
                | Self::InvalidField { .. }
                | Self::FieldOverflow { .. }
                | Self::InvalidPaxRecord(_)
                | Self::MetadataTooLarge { .. }
                | Self::UnexpectedEof(_)
        )
    }

    /// Whether this error is a missing stream capability.
    pub const fn is_capability(&self) -> bool {
        matches!(self, Self::NotSeekable(_))
    }

    pub(crate) fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Unwraps a [`TarError`] that travelled through an [`io::Error`], e.g.
    /// when it was raised inside a [`std::io::Read`] implementation.
    pub(crate) fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<TarError>()) {
            return match err.kind() {
                io::ErrorKind::UnexpectedEof => Self::UnexpectedEof(0),
                _ => Self::Io(err),
            };
        }
        match err.into_inner().map(|inner| inner.downcast::<TarError>()) {
            Some(Ok(tar_err)) => *tar_err,
            Some(Err(inner)) => Self::Io(io::Error::other(inner)),
            None => Self::Io(io::Error::other("I/O error without payload")),
        }
    }
}

fn flag_char(type_flag: &u8) -> char {
    char::from(*type_flag)
}

impl From<TarError> for io::Error {
    fn from(err: TarError) -> Self {
        match err {
            TarError::Io(err) => err,
            TarError::NotSeekable(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            other => io::Error::other(other),
        }
    }
}
