//! Chunk decoding and in-order assembly
//!
//! Every chunk is decrypted with AES in counter mode using the branch's key and
//! IV. The same key/IV pair is used for every chunk of a file; that is how the
//! content is served. Chunks whose declared sizes differ are then inflated.

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::generic_array::GenericArray;
use ctr::cipher::{Iv, Key, KeyIvInit, StreamCipher};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::collections::BTreeMap;
use std::io::Read;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::manifest::{CdpChunk, CdpFile};
use crate::error::DownloadError;

pub const IV_LEN: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

#[derive(Clone, PartialEq, Eq)]
enum CipherKey {
    Aes128(Key<Aes128Ctr>),
    Aes192(Key<Aes192Ctr>),
    Aes256(Key<Aes256Ctr>),
}

impl CipherKey {
    fn from_bytes(key: &[u8]) -> Option<Self> {
        let bytes = key.iter().copied();
        match key.len() {
            16 => GenericArray::from_exact_iter(bytes).map(CipherKey::Aes128),
            24 => GenericArray::from_exact_iter(bytes).map(CipherKey::Aes192),
            32 => GenericArray::from_exact_iter(bytes).map(CipherKey::Aes256),
            _ => None,
        }
    }

    fn bits(&self) -> usize {
        match self {
            CipherKey::Aes128(_) => 128,
            CipherKey::Aes192(_) => 192,
            CipherKey::Aes256(_) => 256,
        }
    }
}

/// Key material for one branch.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkKeys {
    key: CipherKey,
    iv: [u8; IV_LEN],
}

impl ChunkKeys {
    /// `iv` is truncated to 16 bytes. The key length picks AES-128/192/256.
    /// `endpoint` names where the key material came from in errors.
    pub fn new(key: &[u8], iv: &[u8], endpoint: &str) -> Result<Self, DownloadError> {
        let cipher_key = CipherKey::from_bytes(key).ok_or_else(|| {
            DownloadError::protocol(endpoint, format!("unsupported key length {}", key.len()))
        })?;
        let iv: [u8; IV_LEN] = iv
            .get(..IV_LEN)
            .and_then(|prefix| prefix.try_into().ok())
            .ok_or_else(|| {
                DownloadError::protocol(
                    endpoint,
                    format!("IV has {} bytes, need at least {}", iv.len(), IV_LEN),
                )
            })?;
        Ok(Self { key: cipher_key, iv })
    }

    /// Apply the counter-mode keystream in place. Encrypting and decrypting
    /// are the same operation.
    pub fn apply_keystream(&self, data: &mut [u8]) {
        // Every AES block is 16 bytes, so one IV type serves all three key sizes.
        let iv: Iv<Aes128Ctr> = GenericArray::from(self.iv);
        match &self.key {
            CipherKey::Aes128(key) => Aes128Ctr::new(key, &iv).apply_keystream(data),
            CipherKey::Aes192(key) => Aes192Ctr::new(key, &iv).apply_keystream(data),
            CipherKey::Aes256(key) => Aes256Ctr::new(key, &iv).apply_keystream(data),
        }
    }
}

impl std::fmt::Debug for ChunkKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkKeys")
            .field("key_bits", &self.key.bits())
            .finish_non_exhaustive()
    }
}

/// Inflate a chunk. A valid zlib header selects zlib framing, anything else is
/// read as raw deflate.
pub fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    if has_zlib_header(data) && ZlibDecoder::new(data).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    out.clear();
    DeflateDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

fn has_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => {
            cmf & 0x0f == 8 && cmf >> 4 <= 7 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}

/// Decrypt and, when the manifest says so, inflate one fetched chunk.
pub fn decode_chunk(chunk: &CdpChunk, keys: &ChunkKeys, mut data: Vec<u8>) -> Result<Vec<u8>, DownloadError> {
    keys.apply_keystream(&mut data);
    if !CdpFile::is_compressed(chunk) {
        return Ok(data);
    }

    let inflated = inflate(&data).map_err(|e| {
        DownloadError::protocol(
            format!("chunk {}", chunk.sha),
            format!("chunk {} did not inflate: {}", chunk.index, e),
        )
    })?;
    if inflated.len() as u64 != chunk.uncompressed_size {
        tracing::warn!(
            chunk_index = chunk.index,
            expected = chunk.uncompressed_size,
            actual = inflated.len(),
            "Inflated chunk size differs from manifest"
        );
    }
    Ok(inflated)
}

/// Reorder buffer in front of a sequential writer.
///
/// Chunks may arrive in any order; each is identified by its position in the
/// sorted chunk list. Bytes reach the writer strictly in position order.
pub struct ChunkAssembler<W> {
    writer: W,
    total: usize,
    next: usize,
    pending: BTreeMap<usize, Vec<u8>>,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> ChunkAssembler<W> {
    pub fn new(writer: W, total: usize) -> Self {
        Self {
            writer,
            total,
            next: 0,
            pending: BTreeMap::new(),
            bytes_written: 0,
        }
    }

    /// Accept the chunk at `position` and write every chunk that is now in
    /// sequence. Returns the positions written by this call.
    pub async fn accept(&mut self, position: usize, bytes: Vec<u8>) -> std::io::Result<Vec<usize>> {
        if position >= self.total || position < self.next || self.pending.contains_key(&position) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unexpected chunk position {}", position),
            ));
        }
        self.pending.insert(position, bytes);

        let mut written = Vec::new();
        while let Some(bytes) = self.pending.remove(&self.next) {
            self.writer.write_all(&bytes).await?;
            self.bytes_written += bytes.len() as u64;
            written.push(self.next);
            self.next += 1;
        }
        Ok(written)
    }

    pub fn is_complete(&self) -> bool {
        self.next == self.total
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    pub(crate) const KEY: [u8; 16] = *b"depot-test-key-1";
    pub(crate) const IV: [u8; 16] = [7u8; 16];

    pub(crate) fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    pub(crate) fn encrypt(keys: &ChunkKeys, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        keys.apply_keystream(&mut out);
        out
    }

    fn chunk(index: u64, chunk_size: u64, uncompressed_size: u64) -> CdpChunk {
        CdpChunk {
            index,
            sha: format!("sha{}", index),
            chunk_size,
            uncompressed_size,
        }
    }

    #[test]
    fn key_length_selects_cipher_and_iv_is_truncated() {
        let iv = [9u8; 20];
        for len in [16, 24, 32] {
            let keys = ChunkKeys::new(&[1u8; 32][..len], &iv, "test").unwrap();
            let sealed = encrypt(&keys, b"plaintext");
            assert_ne!(sealed, b"plaintext");
            assert_eq!(encrypt(&keys, &sealed), b"plaintext");
        }
        let truncated = ChunkKeys::new(&[1u8; 16], &iv[..16], "test").unwrap();
        assert_eq!(ChunkKeys::new(&[1u8; 16], &iv, "test").unwrap(), truncated);

        assert!(matches!(
            ChunkKeys::new(&[1u8; 15], &iv, "depots"),
            Err(DownloadError::Protocol { ref endpoint, .. }) if endpoint == "depots"
        ));
        assert!(matches!(
            ChunkKeys::new(&[1u8; 16], &[0u8; 8], "depots"),
            Err(DownloadError::Protocol { .. })
        ));
    }

    #[test]
    fn every_chunk_starts_from_the_same_counter() {
        let keys = ChunkKeys::new(&KEY, &IV, "test").unwrap();
        assert_eq!(encrypt(&keys, b"same bytes"), encrypt(&keys, b"same bytes"));
    }

    #[test]
    fn equal_sizes_are_written_verbatim() {
        let keys = ChunkKeys::new(&KEY, &IV, "test").unwrap();
        // Would not inflate if it were tried.
        let plain = b"0123456789".to_vec();
        let decoded = decode_chunk(&chunk(0, 10, 10), &keys, encrypt(&keys, &plain)).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn differing_sizes_are_inflated() {
        let keys = ChunkKeys::new(&KEY, &IV, "test").unwrap();
        let plain = b"aaaaaaaaaa".to_vec();

        let zlib_framed = encrypt(&keys, &zlib(&plain));
        assert_eq!(decode_chunk(&chunk(2, 5, 10), &keys, zlib_framed).unwrap(), plain);

        let raw = encrypt(&keys, &raw_deflate(&plain));
        assert_eq!(decode_chunk(&chunk(2, 5, 10), &keys, raw).unwrap(), plain);
    }

    #[test]
    fn garbage_compressed_chunk_is_a_protocol_error() {
        let keys = ChunkKeys::new(&KEY, &IV, "test").unwrap();
        let garbage = encrypt(&keys, &[0xffu8; 12]);
        assert!(matches!(
            decode_chunk(&chunk(1, 12, 40), &keys, garbage),
            Err(DownloadError::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn shuffled_completions_assemble_in_order() {
        let parts: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 3 + i as usize]).collect();
        let sorted: Vec<u8> = parts.concat();

        for arrival in [
            vec![7, 6, 5, 4, 3, 2, 1, 0],
            vec![3, 0, 7, 1, 5, 2, 6, 4],
            vec![0, 1, 2, 3, 4, 5, 6, 7],
        ] {
            let mut assembler = ChunkAssembler::new(Vec::new(), parts.len());
            for position in arrival {
                assembler.accept(position, parts[position].clone()).await.unwrap();
            }
            assert!(assembler.is_complete());
            assert_eq!(assembler.buffered(), 0);
            assert_eq!(assembler.bytes_written(), sorted.len() as u64);
            assert_eq!(assembler.into_inner(), sorted);
        }
    }

    #[tokio::test]
    async fn nothing_is_written_until_the_gap_fills() {
        let mut assembler = ChunkAssembler::new(Vec::new(), 3);
        assert!(assembler.accept(2, b"c".to_vec()).await.unwrap().is_empty());
        assert!(assembler.accept(1, b"b".to_vec()).await.unwrap().is_empty());
        assert_eq!(assembler.accept(0, b"a".to_vec()).await.unwrap(), vec![0, 1, 2]);
        assert_eq!(assembler.into_inner(), b"abc");
    }

    #[tokio::test]
    async fn duplicate_or_out_of_range_positions_are_rejected() {
        let mut assembler = ChunkAssembler::new(Vec::new(), 2);
        assembler.accept(0, b"a".to_vec()).await.unwrap();
        assert!(assembler.accept(0, b"a".to_vec()).await.is_err());
        assert!(assembler.accept(2, b"c".to_vec()).await.is_err());
    }
}
