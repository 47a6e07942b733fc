//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, first create a [`ZipArchive`] from any
//! seekable stream (a [`File`], a [`Cursor`] over bytes in memory, ...).
//! Its central directory is loaded up front,
//! then entries are opened one at a time with [`ZipArchive::open()`].
//!
//! [`ZipArchive`]: struct.ZipArchive.html
//! [`ZipArchive::open()`]: struct.ZipArchive.html#method.open
//! [`File`]: std::fs::File
//! [`Cursor`]: std::io::Cursor

use std::io::{self, Read, Seek, SeekFrom};

use log::*;

use crate::arch;
use crate::codec::{EntryResult, InflateCodec, StoreCodec, CODEC_BUFFER_SIZE};
use crate::crypto::{CipherReader, ENCRYPTION_HEADER_SIZE};
use crate::entry::{CompressionMethod, TextEncoding, ZipEntry};
use crate::result::*;
use crate::spec::{self, CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader};

/// Options for opening an archive
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// How to decode names and comments that don't have the UTF-8 flag set
    pub encoding: TextEncoding,
    /// How many bytes at the end of the archive to search
    /// for the End of central directory record.
    ///
    /// Archive comments longer than this (minus 22 bytes)
    /// will hide the record. Clamped to 22..=65557.
    pub eocd_search_window: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::Cp437,
            eocd_search_window: spec::DEFAULT_EOCD_SEARCH_WINDOW,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ReaderState {
    Closed,
    Open { index: usize },
}

/// A ZIP archive to be read
pub struct ZipArchive<R> {
    inner: R,
    end_of_central_directory: EndOfCentralDirectory,
    /// A list of entries from the ZIP's central directory
    entries: Vec<ZipEntry>,
    state: ReaderState,
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Reads a ZIP archive's central directory from the given stream.
    ///
    /// ```no_run
    /// # use std::fs::File;
    /// # use ziprw::*;
    /// let archive = ZipArchive::new(File::open("foo.zip")?)?;
    /// for entry in archive.entries() {
    ///     println!("{} ({} bytes)", entry.full_name(), entry.size());
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(inner: R) -> ZipResult<Self> {
        Self::with_options(inner, ReadOptions::default())
    }

    pub fn with_options(mut inner: R, options: ReadOptions) -> ZipResult<Self> {
        let (eocdr, eocdr_posit) =
            spec::read_end_of_central_directory(&mut inner, options.eocd_search_window)?;
        trace!("{:?} at {}", eocdr, eocdr_posit);

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }

        let headers = spec::read_central_directory(&mut inner, &eocdr, eocdr_posit)?;
        let mut entries = Vec::with_capacity(headers.len());
        for header in headers {
            let entry = ZipEntry::from_central_directory(header, options.encoding)?;
            debug!("{:?}", entry);
            entries.push(entry);
        }

        Ok(Self {
            inner,
            end_of_central_directory: eocdr,
            entries,
            state: ReaderState::Closed,
        })
    }

    /// Returns the entries found in the ZIP archive's central directory,
    /// in the order they appear there.
    ///
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry by its full name.
    ///
    /// If the archive has duplicates, the first one wins.
    pub fn entry(&self, full_name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.full_name() == full_name)
    }

    fn index_of(&self, full_name: &str) -> ZipResult<usize> {
        self.entries
            .iter()
            .position(|e| e.full_name() == full_name)
            .ok_or_else(|| ZipError::NoSuchEntry(full_name.to_owned()))
    }

    /// The archive comment, as raw bytes
    pub fn comment(&self) -> &[u8] {
        &self.end_of_central_directory.file_comment
    }

    /// Opens the entry at `index` (into [`entries()`](#method.entries)) for reading.
    ///
    /// Only one entry can be open at a time.
    /// A password is required for encrypted entries
    /// and ignored (with a warning) for unencrypted ones.
    ///
    /// An incorrect password isn't detected here:
    /// ZipCrypto's single check byte can't be trusted to catch it,
    /// so reading will produce garbage, fail to inflate,
    /// or fail its checksum at the end.
    pub fn open(&mut self, index: usize, password: Option<&[u8]>) -> ZipResult<EntryReader<'_, R>> {
        if let ReaderState::Open { index } = self.state {
            debug!("Entry {} is still open", index);
            return Err(ZipError::EntryAlreadyOpen);
        }
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| ZipError::NoSuchEntry(format!("#{}", index)))?;

        let compression_method = entry.compression_method();
        if let CompressionMethod::Unsupported(code) = compression_method {
            return Err(ZipError::UnsupportedCompressionMethod(code));
        }

        let password = match (entry.is_encrypted(), password.filter(|p| !p.is_empty())) {
            (true, None) => return Err(ZipError::PasswordRequired(entry.full_name().to_owned())),
            (true, Some(password)) => Some(password),
            (false, Some(_)) => {
                warn!(
                    "{} isn't encrypted; ignoring the provided password",
                    entry.full_name()
                );
                None
            }
            (false, None) => None,
        };

        self.inner.seek(SeekFrom::Start(entry.header_offset()))?;
        let (local_header, local_header_size) = LocalFileHeader::read_from(&mut self.inner)?;
        trace!("{:?} ({} bytes)", local_header, local_header_size);
        if cfg!(feature = "check-local-metadata") {
            check_local_header(entry.header(), &local_header)?;
        }
        debug!("Reading {}", entry.full_name());

        let (source, payload_size, header_check) = match password {
            Some(password) => {
                let payload_size = entry
                    .compressed_size()
                    .checked_sub(ENCRYPTION_HEADER_SIZE as u64)
                    .ok_or(ZipError::InvalidArchive(
                        "Encrypted entry is smaller than its encryption header",
                    ))?;
                let (reader, check_byte) = CipherReader::new(&mut self.inner, password)?;
                let header = entry.header();
                // With a data descriptor, the CRC isn't known when the header is written,
                // so writers check against the modification time instead.
                let expected = if spec::has_data_descriptor(header.flags) {
                    (header.last_modified_time >> 8) as u8
                } else {
                    (header.crc32 >> 24) as u8
                };
                if check_byte != expected {
                    warn!(
                        "Encryption header check failed for {}; the password is probably wrong",
                        entry.full_name()
                    );
                }
                (
                    EntrySource::Ciphered(reader),
                    payload_size,
                    Some(check_byte == expected),
                )
            }
            None => (
                EntrySource::Plain(&mut self.inner),
                entry.compressed_size(),
                None,
            ),
        };

        let decoder = match compression_method {
            CompressionMethod::None => {
                if payload_size != entry.size() {
                    return Err(ZipError::InvalidArchive(
                        "Stored entry's compressed and uncompressed sizes differ",
                    ));
                }
                Decoder::Store(StoreCodec::with_limit(entry.size()))
            }
            _ => Decoder::Inflate(InflateCodec::new(payload_size)),
        };

        self.state = ReaderState::Open { index };
        Ok(EntryReader {
            source,
            decoder,
            state: &mut self.state,
            expected_crc32: entry.crc32(),
            expected_size: entry.size(),
            header_check,
            finished: false,
            failed: false,
        })
    }

    /// Opens the first entry named `full_name` for reading.
    pub fn open_by_name(
        &mut self,
        full_name: &str,
        password: Option<&[u8]>,
    ) -> ZipResult<EntryReader<'_, R>> {
        let index = self.index_of(full_name)?;
        self.open(index, password)
    }

    /// Reads the entry at `index` into memory, verifying its checksum.
    pub fn read_to_vec(&mut self, index: usize, password: Option<&[u8]>) -> ZipResult<Vec<u8>> {
        let mut reader = self.open(index, password)?;
        // Don't trust a (possibly corrupt) size with a huge allocation up front.
        let mut contents = Vec::with_capacity(arch::usize(reader.expected_size.min(1 << 24))?);
        let mut buf = [0u8; CODEC_BUFFER_SIZE];
        loop {
            let count = reader.read_chunk(&mut buf)?;
            if count == 0 {
                break;
            }
            contents.extend_from_slice(&buf[..count]);
        }
        Ok(contents)
    }

    /// Returns the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Checks that the local file header agrees with the central directory.
///
/// Sizes and CRC are only compared if the local header has them;
/// with a data descriptor they're left zeroed (or were patched in later).
fn check_local_header(central: &CentralDirectoryHeader, local: &LocalFileHeader) -> ZipResult<()> {
    let sizes_match = spec::has_data_descriptor(local.flags)
        || (local.crc32 == central.crc32
            && local.compressed_size == central.compressed_size
            && local.uncompressed_size == central.uncompressed_size);
    if local.file_name != central.file_name
        || local.compression_method != central.compression_method
        || spec::is_encrypted(local.flags) != spec::is_encrypted(central.flags)
        || !sizes_match
    {
        return Err(ZipError::InvalidArchive(
            "Central directory entry doesn't match local file header",
        ));
    }
    Ok(())
}

/// Where an entry's compressed bytes come from
enum EntrySource<'a, R> {
    Plain(&'a mut R),
    Ciphered(CipherReader<&'a mut R>),
}

impl<R: Read> Read for EntrySource<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntrySource::Plain(r) => r.read(buf),
            EntrySource::Ciphered(r) => r.read(buf),
        }
    }
}

enum Decoder {
    Store(StoreCodec),
    Inflate(InflateCodec),
}

impl Decoder {
    fn result(&self) -> EntryResult {
        match self {
            Decoder::Store(codec) => codec.result(),
            Decoder::Inflate(codec) => codec.result(),
        }
    }
}

/// Reads a single entry's decompressed contents out of a [`ZipArchive`].
///
/// The checksum is verified when the end of the entry is reached.
/// Dropping the reader closes the entry so another can be opened.
pub struct EntryReader<'a, R> {
    source: EntrySource<'a, R>,
    decoder: Decoder,
    state: &'a mut ReaderState,
    expected_crc32: u32,
    expected_size: u64,
    header_check: Option<bool>,
    finished: bool,
    /// Set once a read fails, so retries can't mistake the entry for a clean EOF.
    failed: bool,
}

impl<R: Read> EntryReader<'_, R> {
    /// Reads the next chunk, returning 0 once the whole entry has been read.
    fn read_chunk(&mut self, buf: &mut [u8]) -> ZipResult<usize> {
        if self.failed {
            return Err(ZipError::InvalidArgument(String::from(
                "Entry already failed to read",
            )));
        }
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let read = self.next_chunk(buf);
        self.failed = read.is_err();
        read
    }

    fn next_chunk(&mut self, buf: &mut [u8]) -> ZipResult<usize> {
        let (count, done) = match &mut self.decoder {
            Decoder::Store(codec) => codec.copy_chunk(&mut self.source, buf)?,
            Decoder::Inflate(codec) => codec.decompress_chunk(&mut self.source, buf)?,
        };
        let so_far = self.decoder.result();
        if so_far.uncompressed_size > self.expected_size {
            return Err(ZipError::EntryTooLong);
        }
        if done {
            self.verify(&so_far)?;
            self.finished = true;
        }
        Ok(count)
    }

    fn verify(&self, result: &EntryResult) -> ZipResult<()> {
        if result.uncompressed_size != self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Entry ended after {} of its {} bytes",
                    result.uncompressed_size, self.expected_size
                ),
            )
            .into());
        }
        if result.crc32 != self.expected_crc32 {
            return Err(ZipError::ChecksumMismatch {
                expected: self.expected_crc32,
                actual: result.crc32,
            });
        }
        Ok(())
    }

    /// Reads (and discards) whatever is left of the entry,
    /// returning its totals once the checksum has been verified.
    pub fn finish(mut self) -> ZipResult<EntryResult> {
        let mut buf = [0u8; CODEC_BUFFER_SIZE];
        while self.read_chunk(&mut buf)? != 0 {}
        Ok(self.decoder.result())
    }

    /// The uncompressed size from the central directory
    pub fn size(&self) -> u64 {
        self.expected_size
    }

    /// For encrypted entries, whether the encryption header's check byte
    /// matched what we expected. `None` for unencrypted entries.
    ///
    /// A mismatch almost certainly means a wrong password,
    /// but a match doesn't mean the password is right
    /// (one in 256 wrong passwords will pass).
    pub fn header_check_matched(&self) -> Option<bool> {
        self.header_check
    }
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_chunk(buf)?)
    }
}

impl<R> Drop for EntryReader<'_, R> {
    fn drop(&mut self) {
        *self.state = ReaderState::Closed;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    use crate::write::{EntryOptions, ZipWriter};

    fn archive_with(entries: &[(&str, &[u8], EntryOptions)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, options) in entries {
            writer.add_bytes(name, data, options.clone()).unwrap();
        }
        writer.into_inner().unwrap().into_inner()
    }

    #[test]
    fn one_entry_at_a_time() {
        let bytes = archive_with(&[
            ("a", b"first", EntryOptions::default()),
            ("b", b"second", EntryOptions::default()),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let reader = archive.open(0, None).unwrap();
        // The borrow checker keeps us from opening another while `reader` lives,
        // but leaking it leaves the archive marked as busy.
        std::mem::forget(reader);
        assert!(matches!(archive.open(1, None), Err(ZipError::EntryAlreadyOpen)));
        archive.state = ReaderState::Closed;

        {
            let mut reader = archive.open(1, None).unwrap();
            let mut contents = String::new();
            reader.read_to_string(&mut contents).unwrap();
            assert_eq!(contents, "second");
        }
        // Dropped readers close their entry.
        assert_eq!(archive.read_to_vec(0, None).unwrap(), b"first");
    }

    #[test]
    fn lookups() {
        let bytes = archive_with(&[("dir/a.txt", b"aaa", EntryOptions::default())]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.entry("dir/a.txt").unwrap().name(), "a.txt");
        assert!(archive.entry("a.txt").is_none());
        assert!(matches!(
            archive.open_by_name("nope", None),
            Err(ZipError::NoSuchEntry(_))
        ));
        assert!(matches!(archive.open(5, None), Err(ZipError::NoSuchEntry(_))));
        let mut reader = archive.open_by_name("dir/a.txt", None).unwrap();
        assert_eq!(reader.size(), 3);
        assert_eq!(reader.header_check_matched(), None);
        let result = reader.finish().unwrap();
        assert_eq!(result.uncompressed_size, 3);
        assert_eq!(result.crc32, crc32fast::hash(b"aaa"));
    }

    #[test]
    fn passwords() {
        let bytes = archive_with(&[
            ("plain", b"not secret", EntryOptions::default()),
            (
                "locked",
                b"secret",
                EntryOptions::default().password("open sesame"),
            ),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        // Passwords on unencrypted entries are ignored.
        assert_eq!(
            archive.read_to_vec(0, Some(b"whatever")).unwrap(),
            b"not secret"
        );
        assert!(matches!(
            archive.open(1, None),
            Err(ZipError::PasswordRequired(name)) if name == "locked"
        ));
        {
            let reader = archive.open(1, Some(b"open sesame")).unwrap();
            assert_eq!(reader.header_check_matched(), Some(true));
        }
        assert_eq!(
            archive.read_to_vec(1, Some(b"open sesame")).unwrap(),
            b"secret"
        );
    }

    #[test]
    fn corrupted_contents_fail_the_checksum() {
        let data = b"stored contents, not compressed";
        let mut bytes = archive_with(&[(
            "stored",
            data,
            EntryOptions::default()
                .compression_level(crate::entry::CompressionLevel::NoCompression),
        )]);
        let start = spec::LOCAL_FILE_HEADER_SIZE + "stored".len();
        bytes[start + 3] ^= 0x20;

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            archive.read_to_vec(0, None),
            Err(ZipError::ChecksumMismatch { .. })
        ));

        let mut contents = Vec::new();
        let mut reader = archive.open(0, None).unwrap();
        let err = reader.read_to_end(&mut contents).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        // Trying again mustn't look like a clean end of the entry.
        let mut buf = [0u8; 16];
        assert!(reader.read(&mut buf).is_err());
        assert!(reader.finish().is_err());
    }

    /// Where the central directory starts, for an archive without a comment
    fn central_directory_offset(bytes: &[u8]) -> usize {
        let eocdr = bytes.len() - spec::EOCDR_SIZE;
        u32::from_le_bytes(bytes[eocdr + 16..eocdr + 20].try_into().unwrap()) as usize
    }

    #[test]
    fn unsupported_methods_fail_on_open() {
        let mut bytes = archive_with(&[("a", b"contents", EntryOptions::default())]);
        // Claim it's bzip2 (method 12) in both headers.
        let central = central_directory_offset(&bytes);
        bytes[8] = 12;
        bytes[central + 10] = 12;

        // Listing is fine...
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.entries()[0].full_name(), "a");
        assert_eq!(
            archive.entries()[0].compression_method(),
            CompressionMethod::Unsupported(12)
        );
        // ...but we can't read it.
        assert!(matches!(
            archive.open(0, None),
            Err(ZipError::UnsupportedCompressionMethod(12))
        ));
    }

    #[test]
    fn entries_longer_than_declared() {
        let mut bytes = archive_with(&[(
            "long",
            b"This entry is quite a bit longer than the ten bytes it claims to be.",
            EntryOptions::default(),
        )]);
        // Only the central directory lies. The data descriptor flag means
        // the local header's sizes aren't compared with it.
        let central = central_directory_offset(&bytes);
        assert!(spec::has_data_descriptor(u16::from_le_bytes([
            bytes[central + 8],
            bytes[central + 9]
        ])));
        bytes[central + 24..central + 28].copy_from_slice(&10u32.to_le_bytes());

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.entries()[0].size(), 10);
        assert!(matches!(
            archive.read_to_vec(0, None),
            Err(ZipError::EntryTooLong)
        ));
    }

    #[test]
    fn mismatched_local_header() {
        let mut bytes = archive_with(&[("name", b"data", EntryOptions::default())]);
        // Rename the entry in its local header only.
        bytes[spec::LOCAL_FILE_HEADER_SIZE] = b'N';
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let result = archive.open(0, None);
        if cfg!(feature = "check-local-metadata") {
            assert!(matches!(result, Err(ZipError::InvalidArchive(_))));
        } else {
            assert!(result.is_ok());
        }
    }

    #[test]
    fn not_a_zip() {
        let junk = vec![0x42u8; 2048];
        assert!(matches!(
            ZipArchive::new(Cursor::new(junk)),
            Err(ZipError::InvalidArchive(_))
        ));
        assert!(ZipArchive::new(Cursor::new(Vec::new())).is_err());
    }
}
