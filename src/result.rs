//! Error types and the related `Result<T>`

use std::io;

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// The ZIP archive contained invalid data per APPNOTE.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// An entry name couldn't be represented in the archive's text encoding.
    #[error("Can't encode name {0:?} in the archive's text encoding")]
    UnrepresentableName(String),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The entry was compressed with something other than Store or Deflate.
    #[error("Unsupported compression method {0}")]
    UnsupportedCompressionMethod(u16),

    /// The DEFLATE engine reported an abnormal status.
    #[error("Compression error: {0}")]
    Codec(String),

    /// The decompressed entry didn't match the CRC-32 from the central directory.
    #[error("Invalid checksum: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Tried to open an entry while another one on the same archive is still open.
    #[error("Another entry is still open in this archive")]
    EntryAlreadyOpen,

    /// The archive's central directory was already written.
    #[error("Archive was already finalized")]
    ArchiveFinalized,

    /// The entry produced more bytes than its central directory record declares.
    #[error("Entry is longer than its declared size")]
    EntryTooLong,

    /// The entry is encrypted and no password was provided.
    #[error("Entry {0} is encrypted, but no password was given")]
    PasswordRequired(String),

    /// No entry with the given name exists in the archive.
    #[error("No entry in the archive named {0}")]
    NoSuchEntry(String),

    /// A user-provided argument was invalid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A size or offset doesn't fit the (non-Zip64) field it goes in.
    #[error("Value too large for Zip field: {0}")]
    TooLarge(&'static str),

    /// A cast from a 64-bit int to a usize failed,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> io::Error {
        match err {
            ZipError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<flate2::CompressError> for ZipError {
    fn from(err: flate2::CompressError) -> ZipError {
        ZipError::Codec(err.to_string())
    }
}

impl From<flate2::DecompressError> for ZipError {
    fn from(err: flate2::DecompressError) -> ZipError {
        ZipError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_errors_pass_through() {
        let converted: io::Error =
            ZipError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "short")).into();
        assert_eq!(converted.kind(), io::ErrorKind::UnexpectedEof);

        let converted: io::Error = ZipError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(converted.kind(), io::ErrorKind::InvalidData);
        assert!(converted.to_string().contains("Invalid checksum"));
    }
}
