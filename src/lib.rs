//! ziprw reads and writes Zip archives through any seekable stream,
//! one entry at a time:
//!
//! ```no_run
//! # use std::fs::File;
//! # use std::io::{self, Write};
//! # use ziprw::*;
//! let mut writer = ZipWriter::new(File::create("foo.zip")?);
//!
//! // Entries can be written a piece at a time...
//! let mut entry = writer.create_entry("hello/hi.txt", EntryOptions::default())?;
//! entry.write_all(b"Hello, ")?;
//! entry.write_all(b"world!")?;
//! let sizes = entry.finish()?;
//! println!("Compressed to {} bytes", sizes.compressed_size);
//!
//! // ...or all at once. Traditional PKWARE encryption is available too.
//! writer.add_bytes(
//!     "hello/secret.txt",
//!     b"Don't tell anyone",
//!     EntryOptions::default().password("hunter2"),
//! )?;
//! writer.finalize()?;
//!
//! let mut archive = ZipArchive::new(File::open("foo.zip")?)?;
//! for entry in archive.entries() {
//!     println!("{}: {} bytes", entry.full_name(), entry.size());
//! }
//! let mut reader = archive.open_by_name("hello/hi.txt", None)?;
//! io::copy(&mut reader, &mut io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Zip is an interesting archive format: unlike compressed tarballs often seen
//! in Linux land (`*.tar.gz`, `*.tar.zst`, ...),
//! each file in a Zip archive is compressed independently,
//! with a central directory at the back telling us where to find each file.
//! Readers load that directory up front and then seek to whichever entry they want.
//! Writers stream each entry's contents straight to the archive,
//! then seek back to fill in the sizes they couldn't know beforehand,
//! so the output needs to be seekable (a [`File`](std::fs::File), a
//! [`Cursor`](std::io::Cursor)...) but nothing is buffered in memory.
//!
//! There's no Zip64 support (entries and archives must stay under 4 GB,
//! with at most 65,535 entries), and DEFLATE is the only compression method.

mod arch;
mod codec;
mod crypto;
mod entry;
pub mod read;
pub mod result;
mod spec;
pub mod write;

pub use codec::EntryResult;
pub use entry::{CompressionLevel, CompressionMethod, FileType, TextEncoding, ZipEntry};
pub use read::{EntryReader, ReadOptions, ZipArchive};
pub use result::{ZipError, ZipResult};
pub use spec::ExtraField;
pub use write::{EntryOptions, EntryWriter, WriterOptions, ZipWriter};
