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
//! TAR header definition taken from <https://www.gnu.org/software/tar/manual/html_node/Standard.html>.
//! A Tar-archive is a collection of 512-byte sized blocks. Unfortunately there are several
//! TAR-like archive specifications. An Overview can be found here:
//! <https://www.gnu.org/software/tar/manual/html_node/Formats.html#Formats>
//!
//! [`PosixHeader`] is the raw block layout shared by all formats, [`TarHeader`]
//! is its decoded form that callers work with.

#![allow(non_upper_case_globals)]

use crate::tar_format_types::{
    decode_string, from_unix_seconds, parse_numeric, parse_octal, parse_signed_numeric,
    trim_field,
};
use crate::{Result, TarError, BLOCKSIZE};
use core::fmt::{Display, Formatter};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Maximum length of the `name` and `linkname` fields.
pub const NAME_LEN: usize = 100;

/// Maximum length of the Ustar `prefix` field.
pub const PREFIX_LEN: usize = 155;

/// Length of the `uname` and `gname` fields.
pub const OWNER_NAME_LEN: usize = 32;

/// Byte range of the checksum field inside a header block.
pub(crate) const CHECKSUM_RANGE: core::ops::Range<usize> = 148..156;

pub(crate) const USTAR_MAGIC: &[u8; 6] = b"ustar\0";
pub(crate) const USTAR_VERSION: &[u8; 2] = b"00";
pub(crate) const GNU_MAGIC: &[u8; 6] = b"ustar ";
pub(crate) const GNU_VERSION: &[u8; 2] = b" \0";

/// Length of the GNU fields after `ctime` that are carried through unchanged
/// (offset, longnames, sparse map, isextended, realsize).
pub(crate) const GNU_EXTRA_LEN: usize = 126;

/// Header of the TAR format as specified by POSIX (POSIX 1003.1-1990).
///
/// Each file is started by such a header, that describes the size and
/// the file name. After that, the file content stands in chunks of 512 bytes.
/// The number of bytes can be derived from the file size.
///
/// The first 345 bytes are shared by all formats. The remaining bytes hold the
/// Ustar `prefix` or the GNU `atime`/`ctime`/sparse fields, see
/// [`PosixHeader::prefix`] and [`PosixHeader::gnu_atime`].
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PosixHeader {
    pub name: [u8; NAME_LEN],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    // confusing; size is stored as ASCII string
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub cksum: [u8; 8],
    pub typeflag: u8,
    pub linkname: [u8; NAME_LEN],
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub uname: [u8; OWNER_NAME_LEN],
    pub gname: [u8; OWNER_NAME_LEN],
    pub dev_major: [u8; 8],
    pub dev_minor: [u8; 8],
    pub tail: [u8; 167],
}

impl PosixHeader {
    /// Interprets a block as header.
    pub fn from_block(block: &[u8; BLOCKSIZE]) -> &Self {
        zerocopy::transmute_ref!(block)
    }

    /// The raw bytes of this header.
    pub fn as_block(&self) -> &[u8; BLOCKSIZE] {
        zerocopy::transmute_ref!(self)
    }

    /// Ustar path prefix.
    pub fn prefix(&self) -> &[u8] {
        &self.tail[..PREFIX_LEN]
    }

    pub fn prefix_mut(&mut self) -> &mut [u8] {
        &mut self.tail[..PREFIX_LEN]
    }

    /// GNU access time.
    pub fn gnu_atime(&self) -> &[u8] {
        &self.tail[..12]
    }

    /// GNU change time.
    pub fn gnu_ctime(&self) -> &[u8] {
        &self.tail[12..24]
    }

    pub fn gnu_times_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let (atime, rest) = self.tail.split_at_mut(12);
        (atime, &mut rest[..12])
    }

    /// GNU sparse map and friends, carried through unchanged.
    pub fn gnu_extra(&self) -> &[u8] {
        &self.tail[24..24 + GNU_EXTRA_LEN]
    }

    pub fn gnu_extra_mut(&mut self) -> &mut [u8] {
        &mut self.tail[24..24 + GNU_EXTRA_LEN]
    }

    /// A Tar archive is terminated, if an end-of-archive entry, which consists
    /// of two 512 blocks of zero bytes, is found.
    pub fn is_zero_block(&self) -> bool {
        self.as_block().iter().all(|x| *x == 0)
    }

    /// Computes the checksum of the block, with the checksum field counted as
    /// ASCII spaces. Returns the unsigned and the (historic) signed sum.
    pub fn compute_checksums(&self) -> (u32, i32) {
        let block = self.as_block();
        let mut unsigned = 0u32;
        let mut signed = 0i32;
        for (i, &byte) in block.iter().enumerate() {
            let byte = if CHECKSUM_RANGE.contains(&i) { b' ' } else { byte };
            unsigned += u32::from(byte);
            signed += i32::from(byte as i8);
        }
        (unsigned, signed)
    }

    /// Writes the checksum in the `cksum` field like GNU tar: six octal digits,
    /// a NUL and a space.
    pub fn update_checksum(&mut self) {
        let (checksum, _) = self.compute_checksums();
        let text = format!("{checksum:06o}\0 ");
        self.cksum.copy_from_slice(text.as_bytes());
    }

    /// Detects the format from the magic and version bytes.
    pub fn format(&self) -> Result<Format> {
        if &self.magic == GNU_MAGIC {
            Ok(Format::Gnu)
        } else if &self.magic == USTAR_MAGIC {
            Ok(Format::Ustar)
        } else if self.magic.iter().chain(&self.version).all(|b| *b == 0) {
            Ok(Format::V7)
        } else {
            Err(TarError::UnknownFormat {
                magic: self.magic,
                version: self.version,
            })
        }
    }
}

/// The four on-disk variants of the Tar format.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Unix V7 archive, the common subset of all formats.
    V7,
    /// POSIX.1-1988 Ustar with owner names, devices and a path prefix.
    Ustar,
    /// POSIX.1-2001 Ustar plus extended attribute records.
    #[default]
    Pax,
    /// GNU tar with long name/link records and extra timestamps.
    Gnu,
}

/// Entry types each format can represent, including the metadata markers that
/// only show up inside an archive.
static FORMAT_TYPES: [(Format, &[TypeFlag]); 4] = [
    (
        Format::V7,
        &[
            TypeFlag::AREGTYPE,
            TypeFlag::REGTYPE,
            TypeFlag::LINK,
            TypeFlag::SYMTYPE,
            TypeFlag::DIRTYPE,
        ],
    ),
    (
        Format::Ustar,
        &[
            TypeFlag::AREGTYPE,
            TypeFlag::REGTYPE,
            TypeFlag::LINK,
            TypeFlag::SYMTYPE,
            TypeFlag::CHRTYPE,
            TypeFlag::BLKTYPE,
            TypeFlag::DIRTYPE,
            TypeFlag::FIFOTYPE,
            TypeFlag::CONTTYPE,
        ],
    ),
    (
        Format::Pax,
        &[
            TypeFlag::AREGTYPE,
            TypeFlag::REGTYPE,
            TypeFlag::LINK,
            TypeFlag::SYMTYPE,
            TypeFlag::CHRTYPE,
            TypeFlag::BLKTYPE,
            TypeFlag::DIRTYPE,
            TypeFlag::FIFOTYPE,
            TypeFlag::CONTTYPE,
            TypeFlag::XHDTYPE,
            TypeFlag::XGLTYPE,
        ],
    ),
    (
        Format::Gnu,
        &[
            TypeFlag::AREGTYPE,
            TypeFlag::REGTYPE,
            TypeFlag::LINK,
            TypeFlag::SYMTYPE,
            TypeFlag::CHRTYPE,
            TypeFlag::BLKTYPE,
            TypeFlag::DIRTYPE,
            TypeFlag::FIFOTYPE,
            TypeFlag::CONTTYPE,
            TypeFlag::LONGNAME,
            TypeFlag::LONGLINK,
            TypeFlag::DUMPDIR,
            TypeFlag::MULTIVOL,
            TypeFlag::SPARSE,
            TypeFlag::VOLHDR,
        ],
    ),
];

impl Format {
    /// All entry types this format can represent.
    pub fn entry_types(self) -> &'static [TypeFlag] {
        match FORMAT_TYPES.iter().find(|(format, _)| *format == self) {
            Some(&(_, types)) => types,
            None => &[],
        }
    }

    /// Whether entries of type `type_flag` can be stored in this format.
    pub fn supports(self, type_flag: TypeFlag) -> bool {
        self.entry_types().contains(&type_flag)
    }

    /// Whether string fields of this format are UTF-8.
    pub(crate) const fn is_utf8(self) -> bool {
        matches!(self, Self::Pax)
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::V7 => "V7",
            Self::Ustar => "Ustar",
            Self::Pax => "PAX",
            Self::Gnu => "GNU",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Eq)]
pub struct InvalidTypeFlagError(u8);

impl InvalidTypeFlagError {
    /// The raw type flag byte.
    pub const fn byte(self) -> u8 {
        self.0
    }
}

impl Display for InvalidTypeFlagError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{:x} is not a valid TypeFlag", self.0))
    }
}

impl std::error::Error for InvalidTypeFlagError {}

/// Describes the kind of payload, that follows after a
/// [`PosixHeader`]. The properties of this payload are
/// described inside the header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeFlag {
    /// Represents a regular file. In order to be compatible with older versions of tar, a typeflag
    /// value of AREGTYPE should be silently recognized as a regular file. New archives should be
    /// created using REGTYPE. Also, for backward compatibility, tar treats a regular file whose
    /// name ends with a slash as a directory.
    REGTYPE = b'0',
    /// Regular file of Unix V7 archives.
    AREGTYPE = b'\0',
    /// This flag represents a file linked to another file, of any type, previously archived. Such
    /// files are identified in Unix by each file having the same device and inode number. The
    /// linked-to name is specified in the linkname field with a trailing null.
    LINK = b'1',
    /// This represents a symbolic link to another file. The linked-to name is specified in the
    /// linkname field with a trailing null.
    SYMTYPE = b'2',
    /// Represents character special files and block special files respectively. In this case the
    /// devmajor and devminor fields will contain the major and minor device numbers respectively.
    /// Operating systems may map the device specifications to their own local specification, or
    /// may ignore the entry.
    CHRTYPE = b'3',
    /// See [`TypeFlag::CHRTYPE`].
    BLKTYPE = b'4',
    /// This flag specifies a directory or sub-directory. The directory name in the name field
    /// should end with a slash. On systems where disk allocation is performed on a directory
    /// basis, the size field will contain the maximum number of bytes (which may be rounded to
    /// the nearest disk block allocation unit) which the directory may hold. A size field of zero
    /// indicates no such limiting. Systems which do not support limiting in this manner should
    /// ignore the size field.
    DIRTYPE = b'5',
    /// This specifies a FIFO special file. Note that the archiving of a FIFO file archives the
    /// existence of this file and not its contents.
    FIFOTYPE = b'6',
    /// This specifies a contiguous file, which is the same as a normal file except that, in
    /// operating systems which support it, all its space is allocated contiguously on the disk.
    /// Operating systems which do not allow contiguous allocation should silently treat this type
    /// as a normal file.
    CONTTYPE = b'7',
    /// Extended header referring to the next file in the archive
    XHDTYPE = b'x',
    /// Global extended header
    XGLTYPE = b'g',
    /// GNU: the payload is the path of the next entry.
    LONGNAME = b'L',
    /// GNU: the payload is the link target of the next entry.
    LONGLINK = b'K',
    /// GNU: directory listing of an incremental dump.
    DUMPDIR = b'D',
    /// GNU: continuation of a file from the previous volume.
    MULTIVOL = b'M',
    /// GNU: sparse file.
    SPARSE = b'S',
    /// GNU: volume label.
    VOLHDR = b'V',
}

impl TypeFlag {
    /// Whether we have a regular file.
    pub fn is_regular_file(self) -> bool {
        // Equivalent, see POSIX.1-1988.
        self == Self::AREGTYPE || self == Self::REGTYPE
    }

    /// Whether this is a hard link or a symbolic link.
    pub fn is_link(self) -> bool {
        self == Self::LINK || self == Self::SYMTYPE
    }

    /// Whether this type only carries metadata of the archive or of the next
    /// entry (GNU long name/link, PAX extended attributes).
    pub fn is_metadata(self) -> bool {
        matches!(
            self,
            Self::XHDTYPE | Self::XGLTYPE | Self::LONGNAME | Self::LONGLINK
        )
    }

    /// Whether entries of this type are followed by payload data that belongs
    /// to the entry.
    pub fn has_data(self) -> bool {
        matches!(
            self,
            Self::REGTYPE | Self::AREGTYPE | Self::CONTTYPE | Self::SPARSE | Self::MULTIVOL
        )
    }
}

impl TryFrom<u8> for TypeFlag {
    type Error = InvalidTypeFlagError;

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        match value {
            b'0' => Ok(Self::REGTYPE),
            b'\0' => Ok(Self::AREGTYPE),
            b'1' => Ok(Self::LINK),
            b'2' => Ok(Self::SYMTYPE),
            b'3' => Ok(Self::CHRTYPE),
            b'4' => Ok(Self::BLKTYPE),
            b'5' => Ok(Self::DIRTYPE),
            b'6' => Ok(Self::FIFOTYPE),
            b'7' => Ok(Self::CONTTYPE),
            b'x' => Ok(Self::XHDTYPE),
            b'g' => Ok(Self::XGLTYPE),
            b'L' => Ok(Self::LONGNAME),
            b'K' => Ok(Self::LONGLINK),
            b'D' => Ok(Self::DUMPDIR),
            b'M' => Ok(Self::MULTIVOL),
            b'S' => Ok(Self::SPARSE),
            b'V' => Ok(Self::VOLHDR),
            e => Err(InvalidTypeFlagError(e)),
        }
    }
}

bitflags::bitflags! {
    /// UNIX file permissions in octal format.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModeFlags: u32 {
        /// Set UID on execution.
        const SetUID = 0o4000;
        /// Set GID on execution.
        const SetGID = 0o2000;
        /// Reserved.
        const TSVTX = 0o1000;
        /// Owner read.
        const OwnerRead = 0o400;
        /// Owner write.
        const OwnerWrite = 0o200;
        /// Owner execute.
        const OwnerExec = 0o100;
        /// Group read.
        const GroupRead = 0o040;
        /// Group write.
        const GroupWrite = 0o020;
        /// Group execute.
        const GroupExec = 0o010;
        /// Others read.
        const OthersRead = 0o004;
        /// Others read.
        const OthersWrite = 0o002;
        /// Others execute.
        const OthersExec = 0o001;
    }
}

/// Decoded header of one logical entry.
///
/// For entries read from an archive, GNU long names/links and PAX extended
/// attributes are already applied. PAX attributes without a dedicated field end
/// up in [`TarHeader::extended_attributes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
    /// Path of the entry.
    pub name: String,
    /// Target of hard links and symbolic links.
    pub link_name: String,
    /// Permission bits.
    pub mode: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Owner user name (not in V7).
    pub uname: String,
    /// Owner group name (not in V7).
    pub gname: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Modification time.
    pub mtime: SystemTime,
    /// Access time (PAX and GNU only).
    pub atime: Option<SystemTime>,
    /// Change time (PAX and GNU only).
    pub ctime: Option<SystemTime>,
    /// Kind of the entry.
    pub type_flag: TypeFlag,
    /// Device major number of character/block devices.
    pub dev_major: u32,
    /// Device minor number of character/block devices.
    pub dev_minor: u32,
    /// Format the header was read in. Ignored when writing, the writer uses
    /// its own format.
    pub format: Format,
    /// Checksum stored in the header block. Zero for headers not read from an
    /// archive.
    pub checksum: u32,
    /// PAX extended attributes. For global extended attribute entries this
    /// holds all attributes, otherwise those without a dedicated field.
    pub extended_attributes: BTreeMap<String, String>,
    pub(crate) gnu_extra: Option<Box<[u8; GNU_EXTRA_LEN]>>,
}

impl TarHeader {
    /// Creates a header with default metadata: mode `0o644` (`0o755` for
    /// directories), root ownership and the current time.
    pub fn new(name: impl Into<String>, type_flag: TypeFlag) -> Self {
        let mode = if type_flag == TypeFlag::DIRTYPE {
            0o755
        } else {
            0o644
        };
        Self {
            name: name.into(),
            link_name: String::new(),
            mode,
            uid: 0,
            gid: 0,
            uname: String::new(),
            gname: String::new(),
            size: 0,
            mtime: SystemTime::now(),
            atime: None,
            ctime: None,
            type_flag,
            dev_major: 0,
            dev_minor: 0,
            format: Format::default(),
            checksum: 0,
            extended_attributes: BTreeMap::new(),
            gnu_extra: None,
        }
    }

    /// Creates a PAX global extended attributes header. Its attributes apply to
    /// the remainder of the archive rather than one entry.
    pub fn new_global(attributes: BTreeMap<String, String>) -> Self {
        let mut header = Self::new("", TypeFlag::XGLTYPE);
        header.mtime = UNIX_EPOCH;
        header.extended_attributes = attributes;
        header
    }

    /// Permission bits as [`ModeFlags`].
    pub fn mode_flags(&self) -> ModeFlags {
        ModeFlags::from_bits_truncate(self.mode)
    }

    /// Whether this is a PAX global extended attributes header.
    pub fn is_global_extended_attributes(&self) -> bool {
        self.type_flag == TypeFlag::XGLTYPE
    }

    /// Decodes a single header block.
    ///
    /// Returns `Ok(None)` for an all-zero block, which is a (possible) end of
    /// archive marker.
    ///
    /// # Errors
    /// Fails with a data-format error if the checksum is wrong, the format is
    /// unknown, the type flag isn't supported by the format or a field can't be
    /// decoded.
    pub fn from_block(block: &[u8; BLOCKSIZE]) -> Result<Option<Self>> {
        let raw = PosixHeader::from_block(block);
        if raw.is_zero_block() {
            return Ok(None);
        }

        let stored = parse_octal::<u32>(&raw.cksum, "cksum")?;
        let (unsigned, signed) = raw.compute_checksums();
        if stored != unsigned && i64::from(stored) != i64::from(signed) {
            return Err(TarError::ChecksumMismatch {
                stored,
                computed: unsigned,
            });
        }

        let mut format = raw.format()?;
        let type_flag = TypeFlag::try_from(raw.typeflag).map_err(|e| {
            TarError::UnsupportedEntryType {
                type_flag: e.byte(),
                format,
            }
        })?;
        // extended attribute markers use the plain ustar magic
        if format == Format::Ustar && matches!(type_flag, TypeFlag::XHDTYPE | TypeFlag::XGLTYPE)
        {
            format = Format::Pax;
        }
        if !format.supports(type_flag) {
            return Err(TarError::UnsupportedEntryType {
                type_flag: raw.typeflag,
                format,
            });
        }

        let utf8 = format.is_utf8();
        let text = |field: &[u8]| decode_string(trim_field(field), utf8);
        let mut header = Self::new(text(&raw.name), type_flag);
        header.format = format;
        header.checksum = stored;
        header.mode = parse_octal::<u32>(&raw.mode, "mode")?;
        header.uid = numeric_u32(&raw.uid, "uid")?;
        header.gid = numeric_u32(&raw.gid, "gid")?;
        header.size = parse_numeric(&raw.size, "size")?;
        header.mtime = from_unix_seconds(parse_signed_numeric(&raw.mtime, "mtime")?);
        header.link_name = text(&raw.linkname);

        if format != Format::V7 {
            header.uname = text(&raw.uname);
            header.gname = text(&raw.gname);
            header.dev_major = numeric_u32(&raw.dev_major, "devmajor")?;
            header.dev_minor = numeric_u32(&raw.dev_minor, "devminor")?;
        }
        match format {
            Format::Ustar | Format::Pax => {
                let prefix = trim_field(raw.prefix());
                if !prefix.is_empty() {
                    header.name = format!("{}/{}", text(prefix), header.name);
                }
            }
            Format::Gnu => {
                header.atime = gnu_time(raw.gnu_atime(), "atime")?;
                header.ctime = gnu_time(raw.gnu_ctime(), "ctime")?;
                if raw.gnu_extra().iter().any(|b| *b != 0) {
                    let mut extra = Box::new([0u8; GNU_EXTRA_LEN]);
                    extra.copy_from_slice(raw.gnu_extra());
                    header.gnu_extra = Some(extra);
                }
            }
            Format::V7 => {}
        }

        log::trace!(
            "decoded {:?} header of {:?} in {} format, size={}",
            header.type_flag,
            header.name,
            header.format,
            header.size
        );
        Ok(Some(header))
    }
}

fn numeric_u32(field: &[u8], name: &'static str) -> Result<u32> {
    let value = parse_numeric(field, name)?;
    u32::try_from(value).map_err(|_| TarError::invalid_field(name, "numeric overflow"))
}

fn gnu_time(field: &[u8], name: &'static str) -> Result<Option<SystemTime>> {
    if field.iter().all(|b| *b == 0) {
        return Ok(None);
    }
    parse_signed_numeric(field, name).map(|secs| Some(from_unix_seconds(secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;
    use zerocopy::FromZeros;

    fn ustar_block(name: &str, type_flag: u8) -> [u8; BLOCKSIZE] {
        let mut raw = PosixHeader::new_zeroed();
        raw.name[..name.len()].copy_from_slice(name.as_bytes());
        raw.mode.copy_from_slice(b"0000644\0");
        raw.uid.copy_from_slice(b"0001750\0");
        raw.gid.copy_from_slice(b"0001750\0");
        raw.size.copy_from_slice(b"00000001001\0");
        raw.mtime.copy_from_slice(b"14543720004\0");
        raw.typeflag = type_flag;
        raw.magic = *USTAR_MAGIC;
        raw.version = *USTAR_VERSION;
        raw.uname[..4].copy_from_slice(b"phip");
        raw.update_checksum();
        *raw.as_block()
    }

    #[test]
    fn test_size() {
        assert_eq!(BLOCKSIZE, size_of::<PosixHeader>());
    }

    #[test]
    fn test_parse_tar_header_filename() {
        let block = ustar_block("bye_world_513b.txt", b'0');
        let header = TarHeader::from_block(&block).unwrap().unwrap();
        assert_eq!(header.type_flag, TypeFlag::REGTYPE, "the first entry is a regular file!");
        assert_eq!(header.name, "bye_world_513b.txt");
        assert_eq!(header.size, 513);
        assert_eq!(header.uid, 1000);
        assert_eq!(header.uname, "phip");
        assert_eq!(header.format, Format::Ustar);
        assert_eq!(
            header.mode_flags(),
            ModeFlags::OwnerRead | ModeFlags::OwnerWrite | ModeFlags::GroupRead | ModeFlags::OthersRead
        );
        assert_eq!(
            header.mtime,
            UNIX_EPOCH + core::time::Duration::from_secs(0o14543720004)
        );
    }

    #[test]
    fn test_zero_block_is_no_header() {
        assert!(TarHeader::from_block(&[0; BLOCKSIZE]).unwrap().is_none());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut block = ustar_block("hello_world.txt", b'0');
        block[0] = b'j';
        assert!(matches!(
            TarHeader::from_block(&block),
            Err(TarError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_signed_checksum_is_accepted() {
        let mut block = ustar_block("hello_world.txt", b'0');
        // a name byte above 0x7f makes the signed and unsigned sums differ
        block[20] = 0xe4;
        let raw = PosixHeader::from_block(&block);
        let (_, signed) = raw.compute_checksums();
        let text = format!("{:06o}\0 ", signed);
        block[CHECKSUM_RANGE].copy_from_slice(text.as_bytes());
        assert!(TarHeader::from_block(&block).unwrap().is_some());
    }

    #[test]
    fn test_show_tar_header_magics() {
        let mut raw = PosixHeader::new_zeroed();
        assert_eq!(raw.format().unwrap(), Format::V7);
        raw.magic = *GNU_MAGIC;
        raw.version = *GNU_VERSION;
        assert_eq!(raw.format().unwrap(), Format::Gnu);
        raw.magic = *USTAR_MAGIC;
        raw.version = *USTAR_VERSION;
        assert_eq!(raw.format().unwrap(), Format::Ustar);
        raw.magic = *b"nope\0\0";
        assert!(matches!(raw.format(), Err(TarError::UnknownFormat { .. })));
    }

    #[test]
    fn test_unsupported_type_for_format() {
        // a GNU long name marker doesn't belong in a ustar archive
        let block = ustar_block("././@LongLink", b'L');
        let err = TarHeader::from_block(&block).unwrap_err();
        assert!(matches!(
            err,
            TarError::UnsupportedEntryType {
                type_flag: b'L',
                format: Format::Ustar
            }
        ));

        let block = ustar_block("what", b'Z');
        assert!(TarHeader::from_block(&block).unwrap_err().is_data_format());
    }

    #[test]
    fn test_extended_header_marker_is_pax() {
        let block = ustar_block("PaxHeaders.0/file", b'x');
        let header = TarHeader::from_block(&block).unwrap().unwrap();
        assert_eq!(header.format, Format::Pax);
        assert_eq!(header.type_flag, TypeFlag::XHDTYPE);
    }

    #[test]
    fn test_ustar_prefix_is_joined() {
        let mut block = ustar_block("file.txt", b'0');
        let raw = PosixHeader::mut_from_bytes(&mut block[..]).unwrap();
        raw.prefix_mut()[..9].copy_from_slice(b"some/path");
        raw.update_checksum();
        let header = TarHeader::from_block(&block).unwrap().unwrap();
        assert_eq!(header.name, "some/path/file.txt");
    }

    #[test]
    fn test_format_table() {
        assert!(Format::V7.supports(TypeFlag::AREGTYPE));
        assert!(!Format::V7.supports(TypeFlag::FIFOTYPE));
        assert!(Format::Ustar.supports(TypeFlag::CHRTYPE));
        assert!(!Format::Ustar.supports(TypeFlag::XHDTYPE));
        assert!(Format::Pax.supports(TypeFlag::XGLTYPE));
        assert!(!Format::Pax.supports(TypeFlag::LONGNAME));
        assert!(Format::Gnu.supports(TypeFlag::LONGLINK));
        assert!(!Format::Gnu.supports(TypeFlag::XHDTYPE));
    }
}
