//! Streaming compression of entry contents
//!
//! Each codec works a chunk at a time through a fixed-size buffer,
//! checksumming the uncompressed side as it goes.
//! Entry readers and writers hold one of these for as long as the entry is open.

use std::io::{self, Read, Write};

use crc32fast::Hasher;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use log::*;

use crate::result::*;

/// How many bytes each codec moves through its engine at a time
pub const CODEC_BUFFER_SIZE: usize = 1024;

/// The totals an entry ends up with once it's been fully written or read
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryResult {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Compresses an entry into raw DEFLATE, with no zlib header or trailer.
pub struct DeflateCodec {
    engine: Compress,
    buffer: Box<[u8]>,
    hasher: Hasher,
    finished: bool,
}

impl DeflateCodec {
    pub fn new(level: Compression) -> Self {
        Self {
            engine: Compress::new(level, false),
            buffer: vec![0; CODEC_BUFFER_SIZE].into_boxed_slice(),
            hasher: Hasher::new(),
            finished: false,
        }
    }

    /// Feeds `input` to the compressor, writing whatever it produces to `output`.
    ///
    /// An empty `input` means there's no more data and the stream should be finished.
    /// Returns how many input bytes were consumed and whether the stream has ended.
    pub fn compress_chunk<W: Write>(
        &mut self,
        output: &mut W,
        input: &[u8],
    ) -> ZipResult<(usize, bool)> {
        if self.finished {
            return Ok((0, true));
        }
        let flush = if input.is_empty() {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };

        let mut consumed = 0;
        let mut filled = 0;
        loop {
            let before_in = self.engine.total_in();
            let before_out = self.engine.total_out();
            let status =
                self.engine
                    .compress(&input[consumed..], &mut self.buffer[filled..], flush)?;
            let read = (self.engine.total_in() - before_in) as usize;
            let written = (self.engine.total_out() - before_out) as usize;

            self.hasher.update(&input[consumed..consumed + read]);
            consumed += read;
            filled += written;
            if filled == self.buffer.len() {
                output.write_all(&self.buffer)?;
                filled = 0;
            }

            if status == Status::StreamEnd {
                self.finished = true;
                break;
            }
            if !input.is_empty() && consumed == input.len() {
                break;
            }
            if read == 0 && written == 0 {
                return Err(ZipError::Codec(format!(
                    "DEFLATE made no progress ({:?})",
                    status
                )));
            }
        }
        if filled > 0 {
            output.write_all(&self.buffer[..filled])?;
        }
        Ok((consumed, self.finished))
    }

    /// Flushes the rest of the stream to `output` and returns the entry's totals.
    pub fn finish<W: Write>(&mut self, output: &mut W) -> ZipResult<EntryResult> {
        while !self.compress_chunk(output, &[])?.1 {}
        Ok(self.result())
    }

    pub fn result(&self) -> EntryResult {
        EntryResult {
            crc32: self.hasher.clone().finalize(),
            compressed_size: self.engine.total_out(),
            uncompressed_size: self.engine.total_in(),
        }
    }
}

/// Decompresses raw DEFLATE, never reading past the entry's compressed bytes.
pub struct InflateCodec {
    engine: Decompress,
    buffer: Box<[u8]>,
    /// The unconsumed part of the buffer is `buffer[start..end]`.
    start: usize,
    end: usize,
    /// Compressed bytes not yet pulled from the stream
    remaining: u64,
    hasher: Hasher,
    produced: u64,
    finished: bool,
}

impl InflateCodec {
    pub fn new(compressed_size: u64) -> Self {
        Self {
            engine: Decompress::new(false),
            buffer: vec![0; CODEC_BUFFER_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
            remaining: compressed_size,
            hasher: Hasher::new(),
            produced: 0,
            finished: false,
        }
    }

    /// Decompresses into `output`, pulling compressed bytes from `input` as needed.
    ///
    /// Returns how many bytes were produced and whether the stream has ended.
    pub fn decompress_chunk<R: Read>(
        &mut self,
        input: &mut R,
        output: &mut [u8],
    ) -> ZipResult<(usize, bool)> {
        if self.finished || output.is_empty() {
            return Ok((0, self.finished));
        }

        let mut produced = 0;
        loop {
            if self.start == self.end && self.remaining > 0 {
                let want = self.remaining.min(self.buffer.len() as u64) as usize;
                let got = input.read(&mut self.buffer[..want])?;
                if got == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "Archive ended in the middle of compressed data",
                    )
                    .into());
                }
                self.start = 0;
                self.end = got;
                self.remaining -= got as u64;
            }

            let before_in = self.engine.total_in();
            let before_out = self.engine.total_out();
            let status = self.engine.decompress(
                &self.buffer[self.start..self.end],
                &mut output[produced..],
                FlushDecompress::None,
            )?;
            let read = (self.engine.total_in() - before_in) as usize;
            let written = (self.engine.total_out() - before_out) as usize;
            self.start += read;
            produced += written;

            if status == Status::StreamEnd {
                self.finished = true;
                if self.start != self.end || self.remaining != 0 {
                    debug!(
                        "{} bytes after the end of the DEFLATE stream",
                        (self.end - self.start) as u64 + self.remaining
                    );
                }
                break;
            }
            if produced == output.len() {
                break;
            }
            if read == 0 && written == 0 {
                if self.start < self.end {
                    return Err(ZipError::Codec(format!(
                        "INFLATE made no progress ({:?})",
                        status
                    )));
                }
                if self.remaining == 0 {
                    return Err(ZipError::Codec(String::from(
                        "DEFLATE stream ended before its final block",
                    )));
                }
            }
        }

        self.hasher.update(&output[..produced]);
        self.produced += produced as u64;
        Ok((produced, self.finished))
    }

    pub fn result(&self) -> EntryResult {
        EntryResult {
            crc32: self.hasher.clone().finalize(),
            compressed_size: self.engine.total_in(),
            uncompressed_size: self.produced,
        }
    }
}

/// Copies stored (uncompressed) entries, counting and checksumming as it goes.
pub struct StoreCodec {
    /// How much more we'll read, or `None` when writing.
    remaining: Option<u64>,
    hasher: Hasher,
    total: u64,
}

impl StoreCodec {
    /// A codec for writing a new entry
    pub fn new() -> Self {
        Self {
            remaining: None,
            hasher: Hasher::new(),
            total: 0,
        }
    }

    /// A codec for reading an entry of `size` bytes
    pub fn with_limit(size: u64) -> Self {
        Self {
            remaining: Some(size),
            ..Self::new()
        }
    }

    /// Writes `input` straight through to `output`.
    ///
    /// Like [`DeflateCodec::compress_chunk()`], an empty input ends the entry.
    pub fn store_chunk<W: Write>(
        &mut self,
        output: &mut W,
        input: &[u8],
    ) -> ZipResult<(usize, bool)> {
        if input.is_empty() {
            return Ok((0, true));
        }
        output.write_all(input)?;
        self.hasher.update(input);
        self.total += input.len() as u64;
        Ok((input.len(), false))
    }

    /// Reads up to the rest of the entry from `input` into `output`.
    pub fn copy_chunk<R: Read>(
        &mut self,
        input: &mut R,
        output: &mut [u8],
    ) -> ZipResult<(usize, bool)> {
        let remaining = self.remaining.unwrap_or(u64::MAX);
        if remaining == 0 {
            return Ok((0, true));
        }
        let want = remaining.min(output.len() as u64) as usize;
        if want == 0 {
            return Ok((0, false));
        }
        let got = input.read(&mut output[..want])?;
        if got == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Archive ended in the middle of stored data",
            )
            .into());
        }
        self.hasher.update(&output[..got]);
        self.total += got as u64;
        let remaining = remaining - got as u64;
        if let Some(r) = self.remaining.as_mut() {
            *r = remaining;
        }
        Ok((got, remaining == 0))
    }

    pub fn result(&self) -> EntryResult {
        EntryResult {
            crc32: self.hasher.clone().finalize(),
            compressed_size: self.total,
            uncompressed_size: self.total,
        }
    }
}

impl Default for StoreCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    /// Compressible, but not trivially so.
    fn sample(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|i| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                if i % 3 == 0 {
                    b'a' + (state % 4) as u8
                } else {
                    (state >> 24) as u8
                }
            })
            .collect()
    }

    fn deflate(data: &[u8], chunk: usize) -> (Vec<u8>, EntryResult) {
        let mut codec = DeflateCodec::new(Compression::default());
        let mut compressed = Vec::new();
        for piece in data.chunks(chunk) {
            let (consumed, done) = codec.compress_chunk(&mut compressed, piece).unwrap();
            assert_eq!(consumed, piece.len());
            assert!(!done);
        }
        let result = codec.finish(&mut compressed).unwrap();
        (compressed, result)
    }

    fn inflate(compressed: &[u8], out_chunk: usize) -> (Vec<u8>, EntryResult) {
        let mut codec = InflateCodec::new(compressed.len() as u64);
        let mut input = Cursor::new(compressed);
        let mut decompressed = Vec::new();
        let mut buf = vec![0; out_chunk];
        loop {
            let (n, done) = codec.decompress_chunk(&mut input, &mut buf).unwrap();
            decompressed.extend_from_slice(&buf[..n]);
            if done {
                break;
            }
        }
        (decompressed, codec.result())
    }

    #[test]
    fn boundary_sizes() {
        for len in [0, 1, CODEC_BUFFER_SIZE - 1, CODEC_BUFFER_SIZE, CODEC_BUFFER_SIZE + 1, 5000] {
            let data = sample(len);
            let (compressed, written) = deflate(&data, 700);
            assert_eq!(written.uncompressed_size, len as u64);
            assert_eq!(written.compressed_size, compressed.len() as u64);
            assert_eq!(written.crc32, crc32fast::hash(&data));

            let (decompressed, read) = inflate(&compressed, 333);
            assert_eq!(decompressed, data, "length {}", len);
            assert_eq!(read, written);
        }
    }

    #[test]
    fn interoperates_with_flate2_streams() {
        let data = sample(3000);
        let (compressed, _) = deflate(&data, CODEC_BUFFER_SIZE);
        let mut decoder = flate2::read::DeflateDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, data);

        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(inflate(&compressed, 4096).0, data);
    }

    #[test]
    fn finishing_twice_is_harmless() {
        let mut codec = DeflateCodec::new(Compression::fast());
        let mut out = Vec::new();
        codec.compress_chunk(&mut out, b"hello").unwrap();
        let first = codec.finish(&mut out).unwrap();
        let len = out.len();
        assert_eq!(codec.compress_chunk(&mut out, b"more").unwrap(), (0, true));
        assert_eq!(codec.finish(&mut out).unwrap(), first);
        assert_eq!(out.len(), len);
    }

    #[test]
    fn inflate_stays_within_its_entry() {
        let data = sample(2000);
        let (compressed, _) = deflate(&data, 2000);
        let mut archive = compressed.clone();
        archive.extend_from_slice(b"NEXT ENTRY");

        let mut input = Cursor::new(&archive[..]);
        let mut codec = InflateCodec::new(compressed.len() as u64);
        let mut out = vec![0; 8192];
        let (n, done) = codec.decompress_chunk(&mut input, &mut out).unwrap();
        assert!(done);
        assert_eq!(&out[..n], &data[..]);
        assert_eq!(input.position(), compressed.len() as u64);
    }

    #[test]
    fn truncated_deflate() {
        let data = sample(4000);
        let (compressed, _) = deflate(&data, 4000);
        let half = &compressed[..compressed.len() / 2];

        // The stream claims to be longer than what's there...
        let mut codec = InflateCodec::new(compressed.len() as u64);
        let mut input = Cursor::new(half);
        let mut out = vec![0; 8192];
        let err = loop {
            match codec.decompress_chunk(&mut input, &mut out) {
                Ok((_, false)) => continue,
                Ok((_, true)) => panic!("Truncated stream finished"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, ZipError::Io(_)), "{:?}", err);

        // ...or the entry's bytes run out before the final block.
        let mut codec = InflateCodec::new(half.len() as u64);
        let mut input = Cursor::new(half);
        let err = loop {
            match codec.decompress_chunk(&mut input, &mut out) {
                Ok((_, false)) => continue,
                Ok((_, true)) => panic!("Truncated stream finished"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, ZipError::Codec(_)), "{:?}", err);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let garbage = [0xffu8; 64];
        let mut codec = InflateCodec::new(garbage.len() as u64);
        let mut out = [0u8; 64];
        assert!(matches!(
            codec.decompress_chunk(&mut &garbage[..], &mut out),
            Err(ZipError::Codec(_))
        ));
    }

    #[test]
    fn store_round_trip() {
        let data = sample(CODEC_BUFFER_SIZE + 1);
        let mut codec = StoreCodec::new();
        let mut stored = Vec::new();
        for piece in data.chunks(100) {
            codec.store_chunk(&mut stored, piece).unwrap();
        }
        assert_eq!(codec.store_chunk(&mut stored, &[]).unwrap(), (0, true));
        let written = codec.result();
        assert_eq!(stored, data);
        assert_eq!(written.crc32, crc32fast::hash(&data));

        // Reading stops at the declared size, not the end of the stream.
        stored.extend_from_slice(b"trailing");
        let mut input = Cursor::new(&stored[..]);
        let mut codec = StoreCodec::with_limit(data.len() as u64);
        let mut out = vec![0; 300];
        let mut read_back = Vec::new();
        loop {
            let (n, done) = codec.copy_chunk(&mut input, &mut out).unwrap();
            read_back.extend_from_slice(&out[..n]);
            if done {
                break;
            }
        }
        assert_eq!(read_back, data);
        assert_eq!(codec.result(), written);
        assert_eq!(codec.copy_chunk(&mut input, &mut out).unwrap(), (0, true));
    }

    #[test]
    fn store_empty_entry() {
        let mut codec = StoreCodec::with_limit(0);
        let mut out = [0u8; 8];
        assert_eq!(
            codec.copy_chunk(&mut Cursor::new(b"abc"), &mut out).unwrap(),
            (0, true)
        );
        assert_eq!(codec.result().crc32, 0);
    }

    #[test]
    fn store_truncated() {
        let mut codec = StoreCodec::with_limit(10);
        let mut out = [0u8; 8];
        let mut input = Cursor::new(b"abc");
        assert_eq!(codec.copy_chunk(&mut input, &mut out).unwrap(), (3, false));
        assert!(matches!(
            codec.copy_chunk(&mut input, &mut out),
            Err(ZipError::Io(_))
        ));
    }
}
