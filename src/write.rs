//! Tools for writing a ZIP archive.
//!
//! A [`ZipWriter`] appends entries one at a time to a seekable stream.
//! Each entry's local header is written with zeroed sizes,
//! its contents are compressed (and optionally encrypted) straight to the stream,
//! then we seek back to patch in the real sizes and append a data descriptor.
//! [`ZipWriter::finalize()`] writes the central directory once all entries are in.
//!
//! ```no_run
//! # use std::fs::File;
//! # use std::io::Write;
//! # use ziprw::*;
//! let mut writer = ZipWriter::new(File::create("foo.zip")?);
//! let mut entry = writer.create_entry("hello.txt", EntryOptions::default())?;
//! entry.write_all(b"Hello, world!")?;
//! entry.finish()?;
//! writer.finalize()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! [`ZipWriter`]: struct.ZipWriter.html
//! [`ZipWriter::finalize()`]: struct.ZipWriter.html#method.finalize

use std::io::{self, Seek, Write};
use std::mem;

use chrono::NaiveDateTime;
use log::*;

use crate::arch;
use crate::codec::{DeflateCodec, EntryResult, StoreCodec};
use crate::crypto::{CipherWriter, ENCRYPTION_HEADER_SIZE};
use crate::entry::{CompressionLevel, FileType, TextEncoding};
use crate::result::*;
use crate::spec::{self, CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory, LocalFileHeader};

/// Options for a new archive
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// How to encode entry names and comments.
    /// UTF-8 text gets the UTF-8 flag; code page 437 doesn't.
    pub encoding: TextEncoding,
    /// The archive comment, written after the central directory
    pub comment: Vec<u8>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::Utf8,
            comment: Vec::new(),
        }
    }
}

/// Options for a new entry
///
/// ```
/// # use ziprw::*;
/// let options = EntryOptions::default()
///     .compression_level(CompressionLevel::Optimal)
///     .permissions(0o600)
///     .password("hunter2");
/// ```
#[derive(Debug, Clone)]
pub struct EntryOptions {
    compression_level: CompressionLevel,
    last_modified: Option<NaiveDateTime>,
    permissions: u16,
    file_type: FileType,
    password: Option<Vec<u8>>,
    comment: String,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            compression_level: CompressionLevel::Default,
            last_modified: None,
            permissions: 0o644,
            file_type: FileType::Regular,
            password: None,
            comment: String::new(),
        }
    }
}

impl EntryOptions {
    /// `NoCompression` stores the entry; anything else DEFLATEs it.
    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    /// Defaults to the current local time.
    pub fn last_modified(mut self, timestamp: NaiveDateTime) -> Self {
        self.last_modified = Some(timestamp);
        self
    }

    pub fn permissions(mut self, permissions: u16) -> Self {
        self.permissions = permissions;
        self
    }

    /// Directories are always stored, and get a trailing `/` if they lack one.
    pub fn file_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }

    /// Encrypts the entry with ZipCrypto. An empty password means no encryption.
    pub fn password<P: AsRef<[u8]>>(mut self, password: P) -> Self {
        self.password = Some(password.as_ref().to_vec());
        self
    }

    pub fn comment<S: Into<String>>(mut self, comment: S) -> Self {
        self.comment = comment.into();
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum WriterState {
    Idle,
    EntryOpen { header_offset: u64 },
    Finalized,
}

/// Everything but the stream itself,
/// so an open entry can borrow the two separately.
#[derive(Debug)]
struct WriteSession {
    state: WriterState,
    records: Vec<CentralDirectoryHeader>,
    options: WriterOptions,
}

impl WriteSession {
    fn ready(&self) -> ZipResult<()> {
        match self.state {
            WriterState::Idle => Ok(()),
            WriterState::EntryOpen { .. } => Err(ZipError::EntryAlreadyOpen),
            WriterState::Finalized => Err(ZipError::ArchiveFinalized),
        }
    }

    fn open_entry<W: Write + Seek>(
        &mut self,
        stream: &mut W,
        header: &LocalFileHeader,
    ) -> ZipResult<u64> {
        self.ready()?;
        let header_offset = spec::write_local_file_header_placeholder(stream, header)?;
        // Without Zip64 the central directory can't point past 4 GiB.
        arch::u32(header_offset, "local header offset")?;
        trace!("Local header placeholder at {}", header_offset);
        self.state = WriterState::EntryOpen { header_offset };
        Ok(header_offset)
    }

    fn close_entry<W: Write + Seek>(
        &mut self,
        stream: &mut W,
        header: &LocalFileHeader,
        sizes: &DataDescriptor,
        external_file_attributes: u32,
        file_comment: Vec<u8>,
    ) -> ZipResult<()> {
        let header_offset = match self.state {
            WriterState::EntryOpen { header_offset } => header_offset,
            WriterState::Idle => {
                return Err(ZipError::InvalidArgument(String::from(
                    "No entry is open to close",
                )))
            }
            WriterState::Finalized => return Err(ZipError::ArchiveFinalized),
        };

        spec::patch_local_file_header_sizes(stream, header_offset, sizes)?;
        spec::write_data_descriptor(stream, sizes)?;

        let record = CentralDirectoryHeader {
            source_version: spec::VERSION_MADE_BY,
            minimum_extract_version: header.minimum_extract_version,
            flags: header.flags,
            compression_method: header.compression_method,
            last_modified_time: header.last_modified_time,
            last_modified_date: header.last_modified_date,
            crc32: sizes.crc32,
            compressed_size: sizes.compressed_size,
            uncompressed_size: sizes.uncompressed_size,
            disk_number: 0,
            internal_file_attributes: 0,
            external_file_attributes,
            header_offset: arch::u32(header_offset, "local header offset")?,
            file_name: header.file_name.clone(),
            extra_field: header.extra_field.clone(),
            file_comment,
        };
        trace!("{:?}", record);
        self.records.push(record);
        self.state = WriterState::Idle;
        Ok(())
    }

    fn finalize<W: Write + Seek>(&mut self, stream: &mut W) -> ZipResult<()> {
        self.ready()?;
        let entries = arch::u16(self.records.len(), "entry count")?;
        let (offset, size) = spec::write_central_directory(stream, &self.records)?;
        let eocdr = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: entries,
            entries,
            central_directory_size: arch::u32(size, "central directory size")?,
            central_directory_offset: arch::u32(offset, "central directory offset")?,
            file_comment: self.options.comment.clone(),
        };
        trace!("{:?}", eocdr);
        spec::write_end_of_central_directory(stream, &eocdr)?;
        stream.flush()?;
        self.state = WriterState::Finalized;
        debug!("Finalized archive with {} entries", entries);
        Ok(())
    }
}

/// A ZIP archive to be written
///
/// If the archive hasn't been finalized by the time it's dropped,
/// it will be, but any errors can only be logged.
/// Call [`finalize()`](#method.finalize) or [`into_inner()`](#method.into_inner)
/// to find out about them.
pub struct ZipWriter<W: Write + Seek> {
    /// Only `None` once `into_inner()` has taken it.
    inner: Option<W>,
    session: WriteSession,
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Starts a new archive at the end of `inner`.
    ///
    /// Usually `inner` is empty; anything already in it
    /// ends up in front of the archive.
    pub fn new(inner: W) -> Self {
        Self::with_options(inner, WriterOptions::default())
    }

    pub fn with_options(inner: W, options: WriterOptions) -> Self {
        Self {
            inner: Some(inner),
            session: WriteSession {
                state: WriterState::Idle,
                records: Vec::new(),
                options,
            },
        }
    }

    fn parts(&mut self) -> ZipResult<(&mut W, &mut WriteSession)> {
        match self.inner.as_mut() {
            Some(inner) => Ok((inner, &mut self.session)),
            None => Err(ZipError::ArchiveFinalized),
        }
    }

    /// Starts a new entry named `full_name`, returning a writer for its contents.
    ///
    /// Only one entry can be open at a time;
    /// call [`EntryWriter::finish()`] (or drop it) before starting the next.
    ///
    /// [`EntryWriter::finish()`]: struct.EntryWriter.html#method.finish
    pub fn create_entry(
        &mut self,
        full_name: &str,
        options: EntryOptions,
    ) -> ZipResult<EntryWriter<'_, W>> {
        self.session.ready()?;
        if full_name.is_empty() {
            return Err(ZipError::InvalidArgument(String::from(
                "Entry names can't be empty",
            )));
        }
        let mut full_name = full_name.to_owned();
        if options.file_type == FileType::Directory && !full_name.ends_with('/') {
            full_name.push('/');
        }

        let encoding = self.session.options.encoding;
        let file_name = encoding.encode(&full_name)?.into_owned();
        arch::u16(file_name.len(), "file name length")?;
        let file_comment = encoding.encode(&options.comment)?.into_owned();
        arch::u16(file_comment.len(), "file comment length")?;

        let level = if options.file_type == FileType::Directory {
            CompressionLevel::NoCompression
        } else {
            options.compression_level
        };
        let password = options.password.filter(|p| !p.is_empty());

        let mut flags = spec::FLAG_DATA_DESCRIPTOR | encoding.flag_bits() | level.flag_bits();
        if password.is_some() {
            flags |= spec::FLAG_ENCRYPTED;
        }
        let timestamp = options
            .last_modified
            .unwrap_or_else(|| chrono::Local::now().naive_local());
        let (last_modified_time, last_modified_date) = spec::to_msdos(timestamp);

        let header = LocalFileHeader {
            minimum_extract_version: spec::VERSION_NEEDED_TO_EXTRACT,
            flags,
            compression_method: level.compression_method().to_u16(),
            last_modified_time,
            last_modified_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name,
            extra_field: Vec::new(),
        };

        let (inner, session) = self.parts()?;
        session.open_entry(inner, &header)?;
        debug!("Writing {} ({:?})", full_name, level);

        let sink = match password {
            // The CRC isn't known yet, so the check byte comes from the time instead.
            Some(password) => {
                match CipherWriter::new(inner, &password, (last_modified_time >> 8) as u8) {
                    Ok(writer) => EntrySink::Ciphered(writer),
                    Err(e) => {
                        // Nothing points at the orphaned header, so carry on without it.
                        session.state = WriterState::Idle;
                        return Err(e);
                    }
                }
            }
            None => EntrySink::Plain(inner),
        };
        let encoder = match level {
            CompressionLevel::NoCompression => Encoder::Store(StoreCodec::new()),
            _ => Encoder::Deflate(DeflateCodec::new(level.to_flate2())),
        };

        Ok(EntryWriter {
            sink,
            session,
            encoder,
            header,
            external_file_attributes: options.file_type.external_attributes(options.permissions),
            file_comment,
            closed: false,
        })
    }

    /// Adds an entry with the given contents.
    pub fn add_bytes(
        &mut self,
        full_name: &str,
        contents: &[u8],
        options: EntryOptions,
    ) -> ZipResult<EntryResult> {
        let mut entry = self.create_entry(full_name, options)?;
        entry.write_chunk(contents)?;
        entry.finish()
    }

    /// Adds an empty, stored directory entry.
    pub fn add_directory(&mut self, full_name: &str, options: EntryOptions) -> ZipResult<()> {
        self.create_entry(full_name, options.file_type(FileType::Directory))?
            .finish()?;
        Ok(())
    }

    /// How many entries have been completely written
    pub fn len(&self) -> usize {
        self.session.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session.records.is_empty()
    }

    /// Writes the central directory and End of central directory record.
    ///
    /// No entries can be added afterwards.
    pub fn finalize(&mut self) -> ZipResult<()> {
        let (inner, session) = self.parts()?;
        session.finalize(inner)
    }

    /// Finalizes the archive (if it hasn't been already) and returns the underlying stream.
    ///
    /// If finalizing fails, the stream is dropped without another attempt.
    pub fn into_inner(mut self) -> ZipResult<W> {
        let finalized = match self.session.state {
            WriterState::Finalized => Ok(()),
            _ => self.finalize(),
        };
        // Taken either way so drop doesn't write a second central directory.
        let inner = self.inner.take();
        finalized?;
        inner.ok_or(ZipError::ArchiveFinalized)
    }
}

impl<W: Write + Seek> Drop for ZipWriter<W> {
    fn drop(&mut self) {
        if self.inner.is_none() {
            return;
        }
        match self.session.state {
            WriterState::Idle => {
                if let Err(e) = self.finalize() {
                    error!("Couldn't finalize ZIP archive: {}", e);
                }
            }
            WriterState::EntryOpen { .. } => {
                warn!("ZIP archive dropped with an entry still open; not finalizing it")
            }
            WriterState::Finalized => {}
        }
    }
}

/// Where an entry's compressed bytes go
enum EntrySink<'a, W> {
    Plain(&'a mut W),
    Ciphered(CipherWriter<&'a mut W>),
}

impl<W: Write> EntrySink<'_, W> {
    fn get_mut(&mut self) -> &mut W {
        match self {
            EntrySink::Plain(w) => &mut **w,
            EntrySink::Ciphered(w) => &mut **w.get_mut(),
        }
    }

    fn is_encrypted(&self) -> bool {
        matches!(self, EntrySink::Ciphered(_))
    }
}

impl<W: Write> Write for EntrySink<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            EntrySink::Plain(w) => w.write(buf),
            EntrySink::Ciphered(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            EntrySink::Plain(w) => w.flush(),
            EntrySink::Ciphered(w) => w.flush(),
        }
    }
}

enum Encoder {
    Store(StoreCodec),
    Deflate(DeflateCodec),
}

/// Writes a single entry's contents into a [`ZipWriter`].
///
/// Call [`finish()`](#method.finish) when done to learn the entry's sizes and CRC.
/// Dropping the writer finishes the entry too, but can only log errors.
pub struct EntryWriter<'a, W: Write + Seek> {
    sink: EntrySink<'a, W>,
    session: &'a mut WriteSession,
    encoder: Encoder,
    header: LocalFileHeader,
    external_file_attributes: u32,
    file_comment: Vec<u8>,
    closed: bool,
}

impl<W: Write + Seek> EntryWriter<'_, W> {
    fn write_chunk(&mut self, buf: &[u8]) -> ZipResult<usize> {
        if self.closed {
            return Err(ZipError::InvalidArgument(String::from(
                "Entry was already finished or abandoned",
            )));
        }
        if buf.is_empty() {
            // An empty chunk would tell the codec we're done.
            return Ok(0);
        }
        let written = match &mut self.encoder {
            Encoder::Store(codec) => codec.store_chunk(&mut self.sink, buf),
            Encoder::Deflate(codec) => codec.compress_chunk(&mut self.sink, buf),
        };
        match written {
            Ok((consumed, _)) => Ok(consumed),
            Err(e) => {
                self.abandon();
                Err(e)
            }
        }
    }

    /// Gives up on the entry, freeing the archive for the next one.
    ///
    /// Whatever was written of it stays in the stream,
    /// but the central directory never points at it.
    fn abandon(&mut self) {
        if let WriterState::EntryOpen { header_offset } = self.session.state {
            warn!("Abandoning the entry at {}", header_offset);
        }
        self.closed = true;
        self.session.state = WriterState::Idle;
    }

    fn close(&mut self) -> ZipResult<EntryResult> {
        // Whatever happens, don't try again on drop.
        self.closed = true;
        self.try_close().map_err(|e| {
            self.abandon();
            e
        })
    }

    fn try_close(&mut self) -> ZipResult<EntryResult> {
        let result = match &mut self.encoder {
            Encoder::Store(codec) => {
                codec.store_chunk(&mut self.sink, &[])?;
                codec.result()
            }
            Encoder::Deflate(codec) => codec.finish(&mut self.sink)?,
        };
        self.sink.flush()?;

        let result = if self.sink.is_encrypted() {
            EntryResult {
                compressed_size: result.compressed_size + ENCRYPTION_HEADER_SIZE as u64,
                ..result
            }
        } else {
            result
        };
        let sizes = DataDescriptor {
            crc32: result.crc32,
            compressed_size: arch::u32(result.compressed_size, "compressed size")?,
            uncompressed_size: arch::u32(result.uncompressed_size, "uncompressed size")?,
        };
        self.session.close_entry(
            self.sink.get_mut(),
            &self.header,
            &sizes,
            self.external_file_attributes,
            mem::take(&mut self.file_comment),
        )?;
        trace!("Finished entry: {:?}", result);
        Ok(result)
    }

    /// Finishes compressing the entry and records it in the central directory.
    ///
    /// The returned sizes include the encryption header, if any.
    pub fn finish(mut self) -> ZipResult<EntryResult> {
        self.close()
    }
}

impl<W: Write + Seek> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_chunk(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl<W: Write + Seek> Drop for EntryWriter<'_, W> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("Couldn't finish ZIP entry: {}", e);
            }
        }
    }
}
