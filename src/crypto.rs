//! Traditional PKWARE encryption, a.k.a. ZipCrypto
//!
//! This is the stream cipher from APPNOTE section 6.1.
//! It's badly broken (a known-plaintext attack recovers the keys in minutes),
//! so it's here for compatibility with archives that use it, not for secrecy.

use std::io::{self, Read, Write};

use log::*;

use crate::result::*;

/// Size of the random header that precedes every encrypted entry
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

/// CRC-32 lookup table (reflected polynomial 0xEDB88320).
///
/// The key schedule needs the single-byte CRC step,
/// which crc32fast doesn't expose.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

const KEY0_SEED: u32 = 0x1234_5678;
const KEY1_SEED: u32 = 0x2345_6789;
const KEY2_SEED: u32 = 0x3456_7890;

fn crc32_step(crc: u32, byte: u8) -> u32 {
    CRC32_TABLE[((crc ^ u32::from(byte)) & 0xff) as usize] ^ (crc >> 8)
}

/// The three-key state of the cipher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipCipher {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCipher {
    /// Creates a cipher keyed with `password`.
    pub fn new(password: &[u8]) -> Self {
        let mut cipher = Self {
            key0: KEY0_SEED,
            key1: KEY1_SEED,
            key2: KEY2_SEED,
        };
        cipher.init_keys(password);
        cipher
    }

    /// Resets the keys and feeds them the password,
    /// stopping at the first zero byte like the C string it originally was.
    pub fn init_keys(&mut self, password: &[u8]) {
        self.key0 = KEY0_SEED;
        self.key1 = KEY1_SEED;
        self.key2 = KEY2_SEED;
        for &byte in password.iter().take_while(|&&b| b != 0) {
            self.update_keys(byte);
        }
    }

    fn update_keys(&mut self, byte: u8) {
        self.key0 = crc32_step(self.key0, byte);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xff)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.key2 = crc32_step(self.key2, (self.key1 >> 24) as u8);
    }

    fn keystream_byte(&self) -> u8 {
        let temp = (self.key2 & 0xffff) | 2;
        ((temp.wrapping_mul(temp ^ 1) >> 8) & 0xff) as u8
    }

    pub fn encode(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.keystream_byte();
        self.update_keys(plain);
        cipher
    }

    pub fn decode(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.keystream_byte();
        self.update_keys(plain);
        plain
    }

    pub fn encode_in_place(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.encode(*byte);
        }
    }

    pub fn decode_in_place(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.decode(*byte);
        }
    }

    /// Re-keys the cipher with `password` and builds an encrypted header:
    /// eleven random bytes, then `check_byte`.
    pub fn make_encryption_header(
        &mut self,
        password: &[u8],
        check_byte: u8,
    ) -> ZipResult<[u8; ENCRYPTION_HEADER_SIZE]> {
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        getrandom::getrandom(&mut header[..ENCRYPTION_HEADER_SIZE - 1]).map_err(|e| {
            ZipError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("Couldn't get random bytes for the encryption header: {e}"),
            ))
        })?;
        header[ENCRYPTION_HEADER_SIZE - 1] = check_byte;
        self.init_keys(password);
        self.encode_in_place(&mut header);
        Ok(header)
    }

    /// Re-keys the cipher with `password` and decrypts an entry's header,
    /// leaving the cipher ready for the entry's data.
    ///
    /// Returns the last decrypted byte, which the writer set to a check value.
    pub fn consume_encryption_header(
        &mut self,
        password: &[u8],
        header: &[u8; ENCRYPTION_HEADER_SIZE],
    ) -> u8 {
        self.init_keys(password);
        let mut plain = *header;
        self.decode_in_place(&mut plain);
        plain[ENCRYPTION_HEADER_SIZE - 1]
    }
}

/// Decrypts everything read through it.
pub struct CipherReader<R> {
    inner: R,
    cipher: ZipCipher,
}

impl<R: Read> CipherReader<R> {
    /// Reads and decrypts the encryption header from `inner`.
    ///
    /// Returns the reader and the header's check byte.
    pub fn new(mut inner: R, password: &[u8]) -> ZipResult<(Self, u8)> {
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        inner.read_exact(&mut header)?;
        let mut cipher = ZipCipher::new(password);
        let check_byte = cipher.consume_encryption_header(password, &header);
        Ok((Self { inner, cipher }, check_byte))
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.cipher.decode_in_place(&mut buf[..count]);
        Ok(count)
    }
}

/// Encrypts everything written through it.
pub struct CipherWriter<W> {
    inner: W,
    cipher: ZipCipher,
    scratch: Vec<u8>,
}

impl<W: Write> CipherWriter<W> {
    /// Writes a fresh encryption header to `inner`.
    pub fn new(mut inner: W, password: &[u8], check_byte: u8) -> ZipResult<Self> {
        let mut cipher = ZipCipher::new(password);
        let header = cipher.make_encryption_header(password, check_byte)?;
        inner.write_all(&header)?;
        trace!("Wrote encryption header");
        Ok(Self {
            inner,
            cipher,
            scratch: Vec::new(),
        })
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // The keys advance with every byte we encrypt,
        // so whatever we encrypt has to make it out.
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.cipher.encode_in_place(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crc_table_matches_crc32fast() {
        // Stepping a byte at a time from the usual initial state
        // should give the usual CRC-32.
        let data = b"The quick brown fox jumps over the lazy dog";
        let crc = data.iter().fold(0xffff_ffff, |crc, &b| crc32_step(crc, b));
        assert_eq!(!crc, crc32fast::hash(data));
    }

    #[test]
    fn known_keystream() {
        // With no password, key2 is still its seed.
        let mut cipher = ZipCipher::new(b"");
        assert_eq!(cipher.encode(0), 0xab);
    }

    #[test]
    fn password_stops_at_nul() {
        assert_eq!(ZipCipher::new(b"abc\0def"), ZipCipher::new(b"abc"));
        assert_ne!(ZipCipher::new(b"abc"), ZipCipher::new(b"abd"));
    }

    #[test]
    fn encode_then_decode() {
        let plain = b"Attack at dawn. Attack at dawn. Attack at dawn.".to_vec();
        let mut encrypted = plain.clone();
        ZipCipher::new(b"hunter2").encode_in_place(&mut encrypted);
        assert_ne!(encrypted, plain);

        let mut again = plain.clone();
        ZipCipher::new(b"hunter2").encode_in_place(&mut again);
        assert_eq!(again, encrypted, "Same password, same keystream");

        ZipCipher::new(b"hunter2").decode_in_place(&mut encrypted);
        assert_eq!(encrypted, plain);
    }

    #[test]
    fn header_check_byte() {
        let mut writer_cipher = ZipCipher::new(b"");
        let header = writer_cipher
            .make_encryption_header(b"hunter2", 0x5a)
            .unwrap();
        assert_eq!(header.len(), ENCRYPTION_HEADER_SIZE);

        let mut reader_cipher = ZipCipher::new(b"");
        assert_eq!(
            reader_cipher.consume_encryption_header(b"hunter2", &header),
            0x5a
        );
        // Both sides should be in the same state for the data that follows.
        assert_eq!(reader_cipher, writer_cipher);

        // A wrong password gets garbage (most of the time, this byte won't match).
        let mut wrong = ZipCipher::new(b"");
        let _ = wrong.consume_encryption_header(b"hunter3", &header);
        assert_ne!(wrong, writer_cipher);
    }

    #[test]
    fn reader_and_writer() {
        let mut sink = Vec::new();
        {
            let mut writer = CipherWriter::new(&mut sink, b"pass", 0x42).unwrap();
            writer.write_all(b"secret ").unwrap();
            writer.write_all(b"message").unwrap();
        }
        assert_eq!(sink.len(), ENCRYPTION_HEADER_SIZE + 14);
        assert_ne!(&sink[ENCRYPTION_HEADER_SIZE..], b"secret message");

        let (mut reader, check) = CipherReader::new(&sink[..], b"pass").unwrap();
        assert_eq!(check, 0x42);
        let mut plain = String::new();
        reader.read_to_string(&mut plain).unwrap();
        assert_eq!(plain, "secret message");
    }
}
