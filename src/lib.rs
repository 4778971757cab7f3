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
//! Library to read and write Tar archives as streams.
//!
//! Archives are processed entry by entry, without ever holding a whole archive
//! in memory. The reader understands the V7, Ustar, PAX and GNU formats,
//! including GNU long names and links (`L`/`K` entries) and PAX extended and
//! global attributes (`x`/`g` entries). Metadata entries are folded into the
//! entry they describe, so callers only see the logical entries.
//!
//! - [`TarReader`] yields [`TarEntry`]s. Each entry exposes its payload as an
//!   [`EntryData`] view. On seekable streams ([`TarReader::seekable`]) views
//!   stay usable after the reader moved on, on sequential streams they are
//!   disposed when the next entry is requested.
//! - [`TarWriter`] writes entries in one [`Format`], adding long name or PAX
//!   records where a value does not fit the header fields.
//! - [`unpack`] extracts an archive into a directory.
//! - With the `async` feature, `async_io` provides the same over tokio's
//!   `AsyncRead`/`AsyncWrite`.
//!
//! [This link](https://www.gnu.org/software/tar/manual/html_section/Formats.html) gives a good
//! overview over possible archive formats and their limitations.
//!
//! # Example
//! ```rust
//! use std::io::Read;
//! use tar_stream::{Format, TarHeader, TarReader, TarWriter, TypeFlag};
//!
//! let mut header = TarHeader::new("hello.txt", TypeFlag::REGTYPE);
//! header.size = 12;
//! let mut writer = TarWriter::new(Vec::new(), Format::Pax);
//! writer.write_entry(&header, &b"Hello World\n"[..]).unwrap();
//! let archive = writer.into_inner().unwrap().into_inner();
//!
//! let mut reader = TarReader::new(&archive[..]);
//! while let Some(mut entry) = reader.next_entry().unwrap() {
//!     let mut content = String::new();
//!     entry.read_to_string(&mut content).unwrap();
//!     println!("{}: {content:?}", entry.name());
//! }
//! ```

#![deny(rustdoc::all)]
#![allow(rustdoc::missing_doc_code_examples)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations)]

/// Each Archive Entry (either Header or Data Block) is a block of 512 bytes.
pub const BLOCKSIZE: usize = 512;

mod archive;
#[cfg(feature = "async")]
pub mod async_io;
mod chain;
mod encode;
mod entry_data;
mod error;
mod header;
mod helpers;
pub mod pax;
mod stream;
pub mod tar_format_types;
mod unpack;
mod writer;

pub use archive::*;
pub use chain::MAX_METADATA_SIZE;
pub use entry_data::*;
pub use error::*;
pub use header::*;
pub use helpers::{
    apply_directory_metadata, padding, set_mode, set_mtime, ApplyMetadata, DirectoryMetadata,
    PendingDirectories,
};
pub use stream::*;
pub use unpack::*;
pub use writer::*;
