//! Records and constants from the ZIP format (PKWARE APPNOTE.TXT)
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`write`] modules.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::io::{Read, Seek, SeekFrom, Write};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use log::*;
use memchr::memmem;

use crate::arch;
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number
const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// Size of a local file header, minus its name and extra field
pub const LOCAL_FILE_HEADER_SIZE: usize = 30;
/// Size of a central directory header, minus its name, extra field, and comment
pub const CENTRAL_DIRECTORY_HEADER_SIZE: usize = 46;
/// Size of the end of central directory record, minus its comment
pub const EOCDR_SIZE: usize = 22;

/// How far from the end of the archive we look for the EOCDR by default.
pub const DEFAULT_EOCD_SEARCH_WINDOW: usize = 1024;
/// The furthest the EOCDR can be from the end: a maximum-length comment.
pub const MAX_EOCD_SEARCH_WINDOW: usize = EOCDR_SIZE + u16::MAX as usize;

/// Offset of the CRC-32 field within a local file header.
/// The compressed and uncompressed sizes follow it.
const LOCAL_HEADER_CRC_OFFSET: u64 = 14;

/// Bit 0: If set, indicates that the file is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1;
/// Bit 3: crc-32, compressed size and uncompressed size
/// are (also) written in a data descriptor after the compressed data.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// Bit 11: Language encoding flag (EFS).
pub const FLAG_UTF8: u16 = 1 << 11;
/// Bits 1 and 2: DEFLATE compression option.
pub const FLAG_DEFLATE_OPTION_MASK: u16 = 0b110;

/// We only need version 2.0 features: DEFLATE, folders, and traditional encryption.
pub const VERSION_NEEDED_TO_EXTRACT: u16 = 20;
/// Upper byte 3 (UNIX) so readers know the external attributes hold a mode.
pub const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_NEEDED_TO_EXTRACT;

/// The OS a file in the archive was compressed with.
/// Used to decode additional metadata like permissions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum System {
    Dos,
    Unix,
    Unknown,
}

impl System {
    pub fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information.  If the external file attributes
        // are compatible with MS-DOS and can be read by PKZIP for
        // DOS version 2.04g then this value will be zero.  If these
        // attributes are not compatible, then this value will
        // identify the host system on which the attributes are
        // compatible.
        //
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX
        //  (others omitted)
        match source_version >> 8 {
            0 => System::Dos,
            3 => System::Unix,
            _ => System::Unknown,
        }
    }
}

// Straight from the Rust docs:

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Splits `len` bytes off the front of the provided slice,
/// or complains that the record is truncated.
fn read_bytes<'a>(input: &mut &'a [u8], len: usize, what: &'static str) -> ZipResult<&'a [u8]> {
    if input.len() < len {
        return Err(ZipError::InvalidArchive(what));
    }
    let (bytes, rest) = input.split_at(len);
    *input = rest;
    Ok(bytes)
}

fn write_u32(output: &mut Vec<u8>, value: u32) {
    output.extend_from_slice(&value.to_le_bytes());
}

fn write_u16(output: &mut Vec<u8>, value: u16) {
    output.extend_from_slice(&value.to_le_bytes());
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is in whatever encoding the archive was configured with.
pub fn is_utf8(flags: u16) -> bool {
    flags & FLAG_UTF8 != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    flags & FLAG_ENCRYPTED != 0
}

/// Extracts the "are sizes in a trailing data descriptor?" bit from the flags field.
pub fn has_data_descriptor(flags: u16) -> bool {
    flags & FLAG_DATA_DESCRIPTOR != 0
}

/// Data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// We write it twice: once with zeroed sizes before the contents,
/// then patch the sizes in once they're known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    /// Reads a local file header from the current position of `reader`.
    ///
    /// Returns the header and how many bytes it took up.
    /// The name and extra field can differ in length from the central
    /// directory's copy, so they're read with their own lengths.
    pub fn read_from<R: Read>(reader: &mut R) -> ZipResult<(Self, usize)> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let mut fixed = [0u8; LOCAL_FILE_HEADER_SIZE];
        reader.read_exact(&mut fixed)?;
        if fixed[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid local file header"));
        }
        let mut header = &fixed[4..];
        let minimum_extract_version = read_u16(&mut header);
        let flags = read_u16(&mut header);
        let compression_method = read_u16(&mut header);
        let last_modified_time = read_u16(&mut header);
        let last_modified_date = read_u16(&mut header);
        let crc32 = read_u32(&mut header);
        let compressed_size = read_u32(&mut header);
        let uncompressed_size = read_u32(&mut header);
        let file_name_length = usize::from(read_u16(&mut header));
        let extra_field_length = usize::from(read_u16(&mut header));

        let mut file_name = vec![0; file_name_length];
        reader.read_exact(&mut file_name)?;
        let mut extra_field = vec![0; extra_field_length];
        reader.read_exact(&mut extra_field)?;

        let header = Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name,
            extra_field,
        };
        Ok((
            header,
            LOCAL_FILE_HEADER_SIZE + file_name_length + extra_field_length,
        ))
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let file_name_length = arch::u16(self.file_name.len(), "file name length")?;
        let extra_field_length = arch::u16(self.extra_field.len(), "extra field length")?;

        let mut out = Vec::with_capacity(
            LOCAL_FILE_HEADER_SIZE + self.file_name.len() + self.extra_field.len(),
        );
        out.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        write_u16(&mut out, self.minimum_extract_version);
        write_u16(&mut out, self.flags);
        write_u16(&mut out, self.compression_method);
        write_u16(&mut out, self.last_modified_time);
        write_u16(&mut out, self.last_modified_date);
        write_u32(&mut out, self.crc32);
        write_u32(&mut out, self.compressed_size);
        write_u32(&mut out, self.uncompressed_size);
        write_u16(&mut out, file_name_length);
        write_u16(&mut out, extra_field_length);
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra_field);
        Ok(out)
    }
}

/// Data from a data descriptor
///
/// Trails an entry's compressed bytes when its sizes weren't known
/// by the time its local file header was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl DataDescriptor {
    /// The three fields, without the (optional) signature.
    fn fields(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.crc32.to_le_bytes());
        out[4..8].copy_from_slice(&self.compressed_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // 4.3.9.3 Although not originally assigned a signature, the value
        // 0x08074b50 has commonly been adopted as a signature value
        // for the data descriptor record.  Implementers SHOULD be
        // aware that ZIP files MAY be encountered with or without this
        // signature marking data descriptors and SHOULD account for
        // either case when reading ZIP files to ensure compatibility.
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&DATA_DESCRIPTOR_MAGIC);
        out.extend_from_slice(&self.fields());
        out
    }
}

/// Data from a central directory entry
///
/// Each of these records contians information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    /// Parses the record starting at `offset` in the in-memory central directory.
    ///
    /// Returns the header and how many bytes it took up,
    /// so the caller can advance to the next record.
    pub fn parse(central_directory: &[u8], offset: usize) -> ZipResult<(Self, usize)> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let mut entry = central_directory
            .get(offset..)
            .ok_or(ZipError::InvalidArchive("Central directory is truncated"))?;
        let start_len = entry.len();

        let magic = read_bytes(
            &mut entry,
            CENTRAL_DIRECTORY_HEADER_SIZE,
            "Central directory entry is truncated",
        )?;
        if magic[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid central directory entry"));
        }
        let mut fixed = &magic[4..];
        let source_version = read_u16(&mut fixed);
        let minimum_extract_version = read_u16(&mut fixed);
        let flags = read_u16(&mut fixed);
        let compression_method = read_u16(&mut fixed);
        let last_modified_time = read_u16(&mut fixed);
        let last_modified_date = read_u16(&mut fixed);
        let crc32 = read_u32(&mut fixed);
        let compressed_size = read_u32(&mut fixed);
        let uncompressed_size = read_u32(&mut fixed);
        let file_name_length = usize::from(read_u16(&mut fixed));
        let extra_field_length = usize::from(read_u16(&mut fixed));
        let file_comment_length = usize::from(read_u16(&mut fixed));
        let disk_number = read_u16(&mut fixed);
        let internal_file_attributes = read_u16(&mut fixed);
        let external_file_attributes = read_u32(&mut fixed);
        let header_offset = read_u32(&mut fixed);

        const TRUNCATED: &str = "Central directory entry's variable fields are truncated";
        let file_name = read_bytes(&mut entry, file_name_length, TRUNCATED)?.to_vec();
        let extra_field = read_bytes(&mut entry, extra_field_length, TRUNCATED)?.to_vec();
        let file_comment = read_bytes(&mut entry, file_comment_length, TRUNCATED)?.to_vec();

        let header = Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            file_name,
            extra_field,
            file_comment,
        };
        Ok((header, start_len - entry.len()))
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let file_name_length = arch::u16(self.file_name.len(), "file name length")?;
        let extra_field_length = arch::u16(self.extra_field.len(), "extra field length")?;
        let file_comment_length = arch::u16(self.file_comment.len(), "file comment length")?;

        let mut out = Vec::with_capacity(
            CENTRAL_DIRECTORY_HEADER_SIZE
                + self.file_name.len()
                + self.extra_field.len()
                + self.file_comment.len(),
        );
        out.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        write_u16(&mut out, self.source_version);
        write_u16(&mut out, self.minimum_extract_version);
        write_u16(&mut out, self.flags);
        write_u16(&mut out, self.compression_method);
        write_u16(&mut out, self.last_modified_time);
        write_u16(&mut out, self.last_modified_date);
        write_u32(&mut out, self.crc32);
        write_u32(&mut out, self.compressed_size);
        write_u32(&mut out, self.uncompressed_size);
        write_u16(&mut out, file_name_length);
        write_u16(&mut out, extra_field_length);
        write_u16(&mut out, file_comment_length);
        write_u16(&mut out, self.disk_number);
        write_u16(&mut out, self.internal_file_attributes);
        write_u32(&mut out, self.external_file_attributes);
        write_u32(&mut out, self.header_offset);
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra_field);
        out.extend_from_slice(&self.file_comment);
        Ok(out)
    }
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Parses the record from `eocdr`, which runs from the signature
    /// to the end of the archive.
    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        // .ZIP file comment       (variable size)
        if eocdr.len() < EOCDR_SIZE || eocdr[..4] != EOCDR_MAGIC {
            return Err(ZipError::InvalidArchive(
                "Invalid End Of Central Directory Record",
            ));
        }
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = usize::from(read_u16(&mut eocdr));
        // Whatever's left had better be the comment.
        if comment_length != eocdr.len() {
            return Err(ZipError::InvalidArchive(
                "End Of Central Directory Record comment length doesn't match the bytes after it",
            ));
        }

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment: eocdr.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let comment_length = arch::u16(self.file_comment.len(), "archive comment length")?;

        let mut out = Vec::with_capacity(EOCDR_SIZE + self.file_comment.len());
        out.extend_from_slice(&EOCDR_MAGIC);
        write_u16(&mut out, self.disk_number);
        write_u16(&mut out, self.disk_with_central_directory);
        write_u16(&mut out, self.entries_on_this_disk);
        write_u16(&mut out, self.entries);
        write_u32(&mut out, self.central_directory_size);
        write_u32(&mut out, self.central_directory_offset);
        write_u16(&mut out, comment_length);
        out.extend_from_slice(&self.file_comment);
        Ok(out)
    }
}

/// Searches backward through `tail` (the last bytes of the archive)
/// to find the End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
/// The comment can contain the signature too, so we take the match
/// closest to the end whose comment length accounts for every byte after it.
pub fn find_eocdr(tail: &[u8]) -> ZipResult<usize> {
    let mut saw_signature = false;
    for posit in memmem::rfind_iter(tail, &EOCDR_MAGIC) {
        saw_signature = true;
        let candidate = &tail[posit..];
        if candidate.len() < EOCDR_SIZE {
            trace!("EOCDR signature at {} is too close to the end", posit);
            continue;
        }
        let comment_length = usize::from(u16::from_le_bytes([candidate[20], candidate[21]]));
        if comment_length == candidate.len() - EOCDR_SIZE {
            return Ok(posit);
        }
        trace!(
            "EOCDR signature at {} claims a {} byte comment, but {} bytes follow",
            posit,
            comment_length,
            candidate.len() - EOCDR_SIZE
        );
    }
    if saw_signature {
        Err(ZipError::InvalidArchive(
            "End Of Central Directory Record comment length doesn't match the bytes after it",
        ))
    } else {
        Err(ZipError::InvalidArchive(
            "Couldn't find End Of Central Directory Record",
        ))
    }
}

/// Reads the End of central directory record from the back of `stream`,
/// looking through at most `search_window` trailing bytes.
///
/// Returns the record and its absolute offset in the stream.
pub fn read_end_of_central_directory<R: Read + Seek>(
    stream: &mut R,
    search_window: usize,
) -> ZipResult<(EndOfCentralDirectory, u64)> {
    let stream_length = stream.seek(SeekFrom::End(0))?;
    let window = search_window.clamp(EOCDR_SIZE, MAX_EOCD_SEARCH_WINDOW) as u64;
    let tail_length = stream_length.min(window);
    let tail_start = stream_length - tail_length;

    stream.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0; arch::usize(tail_length)?];
    stream.read_exact(&mut tail)?;

    let posit = find_eocdr(&tail)?;
    let eocdr = EndOfCentralDirectory::parse(&tail[posit..])?;
    Ok((eocdr, tail_start + posit as u64))
}

/// Reads the whole central directory in one go and walks it record by record.
///
/// `eocdr_offset` is where the End of central directory record was found;
/// the central directory has to end at or before it.
pub fn read_central_directory<R: Read + Seek>(
    stream: &mut R,
    eocdr: &EndOfCentralDirectory,
    eocdr_offset: u64,
) -> ZipResult<Vec<CentralDirectoryHeader>> {
    let offset = u64::from(eocdr.central_directory_offset);
    let size = u64::from(eocdr.central_directory_size);
    if offset + size > eocdr_offset {
        return Err(ZipError::InvalidArchive(
            "Invalid central directory size or offset",
        ));
    }

    stream.seek(SeekFrom::Start(offset))?;
    let mut central_directory = vec![0; arch::usize(size)?];
    stream.read_exact(&mut central_directory)?;

    let mut headers = Vec::with_capacity(usize::from(eocdr.entries));
    let mut posit = 0;
    for _ in 0..eocdr.entries {
        let (header, consumed) = CentralDirectoryHeader::parse(&central_directory, posit)?;
        trace!("{:?}", header);
        posit += consumed;
        headers.push(header);
    }
    if posit != central_directory.len() {
        debug!(
            "{} unused bytes at the end of the central directory",
            central_directory.len() - posit
        );
    }
    Ok(headers)
}

/// Writes `header` at the end of `stream` with its CRC and sizes zeroed,
/// returning the offset it was written at.
///
/// [`patch_local_file_header_sizes()`] fills the real values in later.
pub fn write_local_file_header_placeholder<W: Write + Seek>(
    stream: &mut W,
    header: &LocalFileHeader,
) -> ZipResult<u64> {
    let offset = stream.seek(SeekFrom::End(0))?;
    let placeholder = LocalFileHeader {
        crc32: 0,
        compressed_size: 0,
        uncompressed_size: 0,
        ..header.clone()
    };
    stream.write_all(&placeholder.to_bytes()?)?;
    Ok(offset)
}

/// Overwrites the CRC and sizes of the local file header at `offset`,
/// then returns to the end of the stream.
pub fn patch_local_file_header_sizes<W: Write + Seek>(
    stream: &mut W,
    offset: u64,
    sizes: &DataDescriptor,
) -> ZipResult<()> {
    stream.seek(SeekFrom::Start(offset + LOCAL_HEADER_CRC_OFFSET))?;
    stream.write_all(&sizes.fields())?;
    stream.seek(SeekFrom::End(0))?;
    Ok(())
}

pub fn write_data_descriptor<W: Write>(stream: &mut W, sizes: &DataDescriptor) -> ZipResult<()> {
    stream.write_all(&sizes.to_bytes())?;
    Ok(())
}

/// Appends every record to the end of `stream`.
///
/// Returns the offset of the first record and the directory's total size,
/// which the End of central directory record needs.
pub fn write_central_directory<W: Write + Seek>(
    stream: &mut W,
    records: &[CentralDirectoryHeader],
) -> ZipResult<(u64, u64)> {
    let offset = stream.seek(SeekFrom::End(0))?;
    let mut size = 0u64;
    for record in records {
        let bytes = record.to_bytes()?;
        stream.write_all(&bytes)?;
        size += bytes.len() as u64;
    }
    Ok((offset, size))
}

pub fn write_end_of_central_directory<W: Write>(
    stream: &mut W,
    eocdr: &EndOfCentralDirectory,
) -> ZipResult<()> {
    stream.write_all(&eocdr.to_bytes()?)?;
    Ok(())
}

/// Converts an MS-DOS time and date to a timestamp.
///
/// Out-of-range fields (a zeroed date, say) are clamped into range;
/// a day past the end of its month becomes the first.
pub fn parse_msdos(time: u16, date: u16) -> NaiveDateTime {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    let months = months.clamp(1, 12);
    let date = NaiveDate::from_ymd_opt(years, months, days.max(1))
        .or_else(|| NaiveDate::from_ymd_opt(years, months, 1))
        .expect("first of a month between 1980 and 2107");
    date.and_hms_opt(hours.min(23), minutes.min(59), seconds.min(59))
        .expect("clamped time of day")
}

/// Converts a timestamp to an MS-DOS `(time, date)` pair.
///
/// Anything before 1980 becomes 1980-01-01 00:00:00,
/// and anything after 2107 becomes the last representable second.
pub fn to_msdos(timestamp: NaiveDateTime) -> (u16, u16) {
    if timestamp.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    if timestamp.year() > 2107 {
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }
    let time = (timestamp.hour() << 11) | (timestamp.minute() << 5) | (timestamp.second() / 2);
    let date = ((timestamp.year() as u32 - 1980) << 9) | (timestamp.month() << 5) | timestamp.day();
    (time as u16, date as u16)
}

/// One record from an "extra field"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraField<'a> {
    pub header_id: u16,
    pub data: &'a [u8],
}

/// Splits the "extra fields" found in central directory entries
/// and local file headers into their records.
///
/// Stops quietly at the first truncated record.
pub fn extra_fields(mut extra_field: &[u8]) -> Vec<ExtraField<'_>> {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let mut fields = Vec::new();
    while extra_field.len() >= 4 {
        let header_id = read_u16(&mut extra_field);
        let data_size = usize::from(read_u16(&mut extra_field));
        if data_size > extra_field.len() {
            debug!("Extra field {:#06x} is truncated", header_id);
            break;
        }
        let (data, rest) = extra_field.split_at(data_size);
        fields.push(ExtraField { header_id, data });
        extra_field = rest;
    }
    fields
}
