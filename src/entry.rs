//! Metadata for the files and directories in an archive

use std::borrow::Cow;

use camino::Utf8Path;
use chrono::NaiveDateTime;
use codepage_437::{BorrowFromCp437, ToCp437, CP437_CONTROL};

use crate::result::*;
use crate::spec::{self, CentralDirectoryHeader, ExtraField, System};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(code: u16) -> Self {
        match code {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            c => CompressionMethod::Unsupported(c),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(c) => c,
        }
    }
}

/// How hard to try when compressing an entry
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Store the file as-is.
    NoCompression,
    Fastest,
    #[default]
    Default,
    Optimal,
}

impl CompressionLevel {
    /// Recovers the level from the compression method
    /// and the DEFLATE option bits of the general purpose flags.
    pub fn from_header(method: CompressionMethod, flags: u16) -> Self {
        if method != CompressionMethod::Deflate {
            return CompressionLevel::NoCompression;
        }
        // 4.4.4 (For Methods 8 and 9 - Deflating)
        // Bit 2  Bit 1
        //   0      0    Normal (-en) compression option was used.
        //   0      1    Maximum (-exx/-ex) compression option was used.
        //   1      0    Fast (-ef) compression option was used.
        //   1      1    Super Fast (-es) compression option was used.
        match (flags & spec::FLAG_DEFLATE_OPTION_MASK) >> 1 {
            0 => CompressionLevel::Default,
            1 => CompressionLevel::Optimal,
            _ => CompressionLevel::Fastest,
        }
    }

    /// The DEFLATE option bits to set in the general purpose flags
    pub fn flag_bits(self) -> u16 {
        match self {
            CompressionLevel::Optimal => 1 << 1,
            CompressionLevel::Fastest => 2 << 1,
            CompressionLevel::Default | CompressionLevel::NoCompression => 0,
        }
    }

    pub fn compression_method(self) -> CompressionMethod {
        match self {
            CompressionLevel::NoCompression => CompressionMethod::None,
            _ => CompressionMethod::Deflate,
        }
    }

    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::NoCompression => flate2::Compression::none(),
            CompressionLevel::Fastest => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Optimal => flate2::Compression::best(),
        }
    }
}

const S_IFMT: u16 = 0o170000;
const S_IFSOCK: u16 = 0o140000;
const S_IFLNK: u16 = 0o120000;
const S_IFREG: u16 = 0o100000;
const S_IFBLK: u16 = 0o060000;
const S_IFDIR: u16 = 0o040000;
const S_IFCHR: u16 = 0o020000;
const S_IFIFO: u16 = 0o010000;

/// MS-DOS directory attribute, in the low byte of the external attributes
const DOS_DIRECTORY: u32 = 0x10;

/// What kind of file an entry holds, from its Unix mode
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    Regular,
    Directory,
    Symlink,
    CharacterDevice,
    BlockDevice,
    Socket,
    Fifo,
    /// Mode bits we don't recognize
    Unknown(u16),
}

impl FileType {
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => FileType::Regular,
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            S_IFCHR => FileType::CharacterDevice,
            S_IFBLK => FileType::BlockDevice,
            S_IFSOCK => FileType::Socket,
            S_IFIFO => FileType::Fifo,
            other => FileType::Unknown(other),
        }
    }

    pub fn mode_bits(self) -> u16 {
        match self {
            FileType::Regular => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
            FileType::CharacterDevice => S_IFCHR,
            FileType::BlockDevice => S_IFBLK,
            FileType::Socket => S_IFSOCK,
            FileType::Fifo => S_IFIFO,
            FileType::Unknown(bits) => bits & S_IFMT,
        }
    }

    /// Packs the type and permission bits into the external file attributes.
    ///
    /// The Unix mode goes in the upper 16 bits;
    /// directories also get the MS-DOS directory bit.
    pub fn external_attributes(self, permissions: u16) -> u32 {
        let mode = u32::from(self.mode_bits() | (permissions & 0o7777));
        let dos = if self == FileType::Directory {
            DOS_DIRECTORY
        } else {
            0
        };
        (mode << 16) | dos
    }
}

/// How names and comments without the UTF-8 flag are encoded
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// [Code page 437](https://en.wikipedia.org/wiki/Code_page_437),
    /// the original IBM PC character set and what most
    /// non-UTF-8 ZIP archives use.
    Cp437,
}

impl TextEncoding {
    /// Decodes a name or comment.
    ///
    /// If the UTF-8 flag is set, that wins over the configured encoding.
    pub fn decode<'a>(self, bytes: &'a [u8], flags: u16) -> ZipResult<Cow<'a, str>> {
        if spec::is_utf8(flags) || self == TextEncoding::Utf8 {
            Ok(Cow::Borrowed(std::str::from_utf8(bytes)?))
        } else {
            Ok(Cow::borrow_from_cp437(bytes, &CP437_CONTROL))
        }
    }

    pub fn encode<'a>(self, text: &'a str) -> ZipResult<Cow<'a, [u8]>> {
        match self {
            TextEncoding::Utf8 => Ok(Cow::Borrowed(text.as_bytes())),
            TextEncoding::Cp437 => {
                let encoded: Cow<[u8]> = text
                    .to_cp437(&CP437_CONTROL)
                    .map_err(|_| ZipError::UnrepresentableName(text.to_owned()))?;
                Ok(encoded)
            }
        }
    }

    /// The general purpose flag to set for text in this encoding
    pub fn flag_bits(self) -> u16 {
        match self {
            TextEncoding::Utf8 => spec::FLAG_UTF8,
            TextEncoding::Cp437 => 0,
        }
    }
}

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    header: CentralDirectoryHeader,
    full_name: String,
    comment: String,
    compression_method: CompressionMethod,
    compression_level: CompressionLevel,
    last_modified: NaiveDateTime,
    file_type: FileType,
    permissions: u16,
}

impl ZipEntry {
    /// Extracts an entry from a central directory header,
    /// decoding its name and comment with `encoding` unless the UTF-8 flag is set.
    pub(crate) fn from_central_directory(
        header: CentralDirectoryHeader,
        encoding: TextEncoding,
    ) -> ZipResult<Self> {
        let full_name = encoding.decode(&header.file_name, header.flags)?.into_owned();
        let comment = encoding
            .decode(&header.file_comment, header.flags)?
            .into_owned();

        if header.disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                full_name, header.disk_number,
            )));
        }

        let compression_method = CompressionMethod::from_u16(header.compression_method);
        let compression_level = CompressionLevel::from_header(compression_method, header.flags);

        // Archivers on other systems don't put a mode in the upper bits,
        // so fall back to the MS-DOS directory bit and the trailing slash.
        let mode = (header.external_file_attributes >> 16) as u16;
        let from_unix = System::from_source_version(header.source_version) == System::Unix;
        let file_type = if mode & S_IFMT != 0 {
            FileType::from_mode(mode)
        } else if full_name.ends_with('/') || header.external_file_attributes & DOS_DIRECTORY != 0
        {
            FileType::Directory
        } else {
            FileType::Regular
        };
        let permissions = if from_unix || mode != 0 {
            mode & 0o7777
        } else if file_type == FileType::Directory {
            0o755
        } else {
            0o644
        };

        Ok(Self {
            last_modified: spec::parse_msdos(header.last_modified_time, header.last_modified_date),
            full_name,
            comment,
            compression_method,
            compression_level,
            file_type,
            permissions,
            header,
        })
    }

    /// The full path of the entry in the archive, as stored
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The last component of the entry's path
    pub fn name(&self) -> &str {
        Utf8Path::new(&self.full_name)
            .file_name()
            .unwrap_or(&self.full_name)
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Uncompressed size of the file in bytes
    pub fn size(&self) -> u64 {
        u64::from(self.header.uncompressed_size)
    }

    /// Compressed size of the file in bytes,
    /// including the encryption header of encrypted files
    pub fn compressed_size(&self) -> u64 {
        u64::from(self.header.compressed_size)
    }

    /// The CRC-32 of the decompressed file
    pub fn crc32(&self) -> u32 {
        self.header.crc32
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.compression_level
    }

    /// The date and time the file was last modified, to two-second precision
    pub fn last_modified(&self) -> NaiveDateTime {
        self.last_modified
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Unix permission bits (no file type)
    pub fn permissions(&self) -> u16 {
        self.permissions
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::Regular
    }

    pub fn is_encrypted(&self) -> bool {
        spec::is_encrypted(self.header.flags)
    }

    /// The general purpose bit flags
    pub fn flags(&self) -> u16 {
        self.header.flags
    }

    /// The records in the entry's central directory extra field
    pub fn extra_fields(&self) -> Vec<ExtraField<'_>> {
        spec::extra_fields(&self.header.extra_field)
    }

    /// The offset of the local file header in the archive
    pub fn header_offset(&self) -> u64 {
        u64::from(self.header.header_offset)
    }

    pub(crate) fn header(&self) -> &CentralDirectoryHeader {
        &self.header
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn header(name: &[u8], flags: u16, external: u32, source_version: u16) -> CentralDirectoryHeader {
        CentralDirectoryHeader {
            source_version,
            minimum_extract_version: 20,
            flags,
            compression_method: 8,
            last_modified_time: 0,
            last_modified_date: (1 << 5) | 1,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_number: 0,
            internal_file_attributes: 0,
            external_file_attributes: external,
            header_offset: 0,
            file_name: name.to_vec(),
            extra_field: Vec::new(),
            file_comment: Vec::new(),
        }
    }

    #[test]
    fn compression_levels_from_flags() {
        let deflate = CompressionMethod::Deflate;
        assert_eq!(
            CompressionLevel::from_header(deflate, 0),
            CompressionLevel::Default
        );
        assert_eq!(
            CompressionLevel::from_header(deflate, 0b010),
            CompressionLevel::Optimal
        );
        assert_eq!(
            CompressionLevel::from_header(deflate, 0b100),
            CompressionLevel::Fastest
        );
        assert_eq!(
            CompressionLevel::from_header(deflate, 0b110),
            CompressionLevel::Fastest
        );
        assert_eq!(
            CompressionLevel::from_header(CompressionMethod::None, 0b010),
            CompressionLevel::NoCompression
        );
        for level in [
            CompressionLevel::Fastest,
            CompressionLevel::Default,
            CompressionLevel::Optimal,
        ] {
            assert_eq!(
                CompressionLevel::from_header(deflate, level.flag_bits()),
                level
            );
        }
    }

    #[test]
    fn names() {
        let entry = ZipEntry::from_central_directory(
            header(b"some/dir/file.txt", spec::FLAG_UTF8, 0o100600 << 16, 0x314),
            TextEncoding::Cp437,
        )
        .unwrap();
        assert_eq!(entry.full_name(), "some/dir/file.txt");
        assert_eq!(entry.name(), "file.txt");
        assert_eq!(entry.file_type(), FileType::Regular);
        assert_eq!(entry.permissions(), 0o600);

        let dir = ZipEntry::from_central_directory(
            header(b"some/dir/", 0, 0, 20),
            TextEncoding::Cp437,
        )
        .unwrap();
        assert_eq!(dir.name(), "dir");
        assert!(dir.is_dir());
        assert_eq!(dir.permissions(), 0o755);
    }

    #[test]
    fn cp437_names() {
        // 0x82 is é in code page 437
        let entry = ZipEntry::from_central_directory(
            header(b"caf\x82", 0, 0, 20),
            TextEncoding::Cp437,
        )
        .unwrap();
        assert_eq!(entry.full_name(), "café");

        // Without the UTF-8 flag, the configured encoding decides.
        assert!(matches!(
            ZipEntry::from_central_directory(header(b"caf\x82", 0, 0, 20), TextEncoding::Utf8),
            Err(ZipError::Encoding(_))
        ));

        assert_eq!(
            &*TextEncoding::Cp437.encode("café").unwrap(),
            b"caf\x82"
        );
        assert!(matches!(
            TextEncoding::Cp437.encode("日本"),
            Err(ZipError::UnrepresentableName(_))
        ));
    }

    #[test]
    fn file_types() {
        for file_type in [
            FileType::Regular,
            FileType::Directory,
            FileType::Symlink,
            FileType::CharacterDevice,
            FileType::BlockDevice,
            FileType::Socket,
            FileType::Fifo,
        ] {
            assert_eq!(FileType::from_mode(file_type.mode_bits() | 0o644), file_type);
        }
        assert_eq!(
            FileType::Directory.external_attributes(0o755),
            (0o040755 << 16) | 0x10
        );
        assert_eq!(
            FileType::Regular.external_attributes(0o100644),
            0o100644 << 16
        );

        let link = ZipEntry::from_central_directory(
            header(b"link", 0, 0o120777 << 16, 0x314),
            TextEncoding::Utf8,
        )
        .unwrap();
        assert_eq!(link.file_type(), FileType::Symlink);
        assert!(!link.is_file());
    }

    #[test]
    fn multi_disk_entries_are_rejected() {
        let mut on_disk_two = header(b"a", 0, 0, 20);
        on_disk_two.disk_number = 2;
        assert!(matches!(
            ZipEntry::from_central_directory(on_disk_two, TextEncoding::Cp437),
            Err(ZipError::UnsupportedArchive(_))
        ));
    }
}
