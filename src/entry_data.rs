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
//! Bounded view over the payload of one entry.

use crate::stream::ArchiveStream;
use crate::TarError;
use core::fmt::{Debug, Formatter};
use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom};
use std::rc::Weak;

/// The payload of an entry, readable as if it were a stream of its own that
/// starts at position zero.
///
/// On a seekable archive the view can be read in any order and keeps working
/// after the reader moved on to later entries. On a sequential archive it can
/// only be read front to back and becomes unusable as soon as the reader moves
/// past the entry.
///
/// Reading from a view that was closed, or whose reader was dropped, fails
/// with [`TarError::Disposed`] wrapped in an [`io::Error`].
pub struct EntryData<S> {
    stream: Weak<RefCell<S>>,
    /// Absolute offset of the payload in the archive stream.
    start: u64,
    len: u64,
    pos: u64,
    seekable: bool,
    disposed: bool,
}

impl<S> EntryData<S> {
    pub(crate) const fn new(stream: Weak<RefCell<S>>, start: u64, len: u64, seekable: bool) -> Self {
        Self {
            stream,
            start,
            len,
            pos: 0,
            seekable,
            disposed: false,
        }
    }

    /// Size of the payload.
    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current offset relative to the start of the payload.
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes left until the end of the payload.
    pub const fn remaining(&self) -> u64 {
        self.len - self.pos
    }

    /// Whether [`Seek`] is supported.
    pub const fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Releases the view. Every later operation fails.
    pub fn close(&mut self) {
        self.disposed = true;
        self.stream = Weak::new();
    }

    fn check_disposed(&self) -> io::Result<()> {
        if self.disposed {
            return Err(TarError::Disposed("entry data").into());
        }
        Ok(())
    }
}

impl<S: Read + ArchiveStream> Read for EntryData<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_disposed()?;
        let stream = self
            .stream
            .upgrade()
            .ok_or(TarError::Disposed("archive reader"))?;
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let mut stream = stream.try_borrow_mut().map_err(io::Error::other)?;

        let expected = self.start + self.pos;
        if self.seekable {
            // another view may have moved the stream
            stream.seek_to(expected)?;
        } else if stream.position() != expected {
            // the reader already skipped this entry
            self.disposed = true;
            return Err(TarError::Disposed("entry data").into());
        }

        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(TarError::UnexpectedEof(remaining).into());
        }
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S> Seek for EntryData<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check_disposed()?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
        };
        if !self.seekable {
            // `stream_position` works on sequential views
            if target == Some(self.pos) {
                return Ok(self.pos);
            }
            return Err(TarError::NotSeekable("seeking in entry data").into());
        }
        match target {
            Some(target) if target <= self.len => {
                self.pos = target;
                Ok(target)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {pos:?} leaves the entry data of {} bytes", self.len),
            )),
        }
    }
}

impl<S> Debug for EntryData<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EntryData")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .field("seekable", &self.seekable)
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Seekable, Sequential};
    use std::io::Cursor;
    use std::rc::Rc;

    const DATA: &[u8] = b"0123456789abcdefghij";

    fn seekable() -> Rc<RefCell<Seekable<Cursor<&'static [u8]>>>> {
        Rc::new(RefCell::new(Seekable::new(Cursor::new(DATA)).unwrap()))
    }

    #[test]
    fn test_seekable_view_is_bounded() {
        let stream = seekable();
        let mut view = EntryData::new(Rc::downgrade(&stream), 5, 10, true);
        let mut out = String::new();
        view.read_to_string(&mut out).unwrap();
        assert_eq!(out, "56789abcde");
        assert_eq!(view.remaining(), 0);

        view.seek(SeekFrom::Start(3)).unwrap();
        let mut buf = [0; 4];
        view.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"89ab");
        assert_eq!(view.seek(SeekFrom::End(-1)).unwrap(), 9);
        assert_eq!(view.seek(SeekFrom::Current(-9)).unwrap(), 0);

        assert!(view.seek(SeekFrom::Start(11)).is_err());
        assert!(view.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_seekable_views_resync_parent() {
        let stream = seekable();
        let mut first = EntryData::new(Rc::downgrade(&stream), 0, 5, true);
        let mut second = EntryData::new(Rc::downgrade(&stream), 10, 5, true);
        let mut buf = [0; 2];
        first.read_exact(&mut buf).unwrap();
        second.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ab");
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"23");
    }

    #[test]
    fn test_sequential_view() {
        let stream = Rc::new(RefCell::new(Sequential::new(DATA)));
        let mut view = EntryData::new(Rc::downgrade(&stream), 0, 4, false);
        let mut buf = [0; 3];
        view.read_exact(&mut buf).unwrap();
        assert_eq!(view.stream_position().unwrap(), 3);
        let err = view.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        // the parent moves past the view
        stream.borrow_mut().read_exact(&mut [0; 2]).unwrap();
        let err = view.read(&mut buf).unwrap_err();
        assert!(matches!(TarError::from_io(err), TarError::Disposed(_)));
    }

    #[test]
    fn test_truncated_stream() {
        let stream = seekable();
        let mut view = EntryData::new(Rc::downgrade(&stream), 15, 10, true);
        let mut out = Vec::new();
        let err = view.read_to_end(&mut out).unwrap_err();
        assert_eq!(out, b"fghij");
        assert!(matches!(TarError::from_io(err), TarError::UnexpectedEof(5)));
    }

    #[test]
    fn test_disposed() {
        let stream = seekable();
        let mut view = EntryData::new(Rc::downgrade(&stream), 0, 5, true);
        view.close();
        let err = view.read(&mut [0; 1]).unwrap_err();
        assert!(matches!(TarError::from_io(err), TarError::Disposed("entry data")));
        assert!(view.seek(SeekFrom::Start(0)).is_err());

        let mut orphan = EntryData::new(Rc::downgrade(&stream), 0, 5, true);
        drop(stream);
        let err = orphan.read(&mut [0; 1]).unwrap_err();
        assert!(matches!(TarError::from_io(err), TarError::Disposed("archive reader")));
    }
}
