//! Integrity: SHA-256 content hashes, streamed in fixed-size blocks, rendered as lowercase hex.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::chunk::effective_block_size;

/// Hash reported for a file that does not exist. Compares as "absent".
pub const ABSENT_HASH: &str = "";

/// Hash a byte slice. Returns 32-byte digest.
pub fn hash_chunk(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Hex digest of an in-memory payload; equal to `hash_file` over the same bytes.
pub fn hash_hex(payload: &[u8]) -> String {
    hex::encode(hash_chunk(payload))
}

/// Fold `reader` into a SHA-256 accumulator, one block at a time.
pub fn hash_reader<R: Read>(mut reader: R, block_size: u64) -> io::Result<String> {
    let block_size = effective_block_size(block_size) as usize;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; block_size];
    loop {
        let n = read_block(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Content hash of the file at `path`. A missing file yields [`ABSENT_HASH`].
pub fn hash_file(path: &Path, block_size: u64) -> io::Result<String> {
    match File::open(path) {
        Ok(f) => hash_reader(f, block_size),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ABSENT_HASH.to_string()),
        Err(e) => Err(e),
    }
}

/// True if `hash` stands for "no such file".
pub fn is_absent(hash: &str) -> bool {
    hash == ABSENT_HASH
}

// Fill `buf` as far as the reader allows; short only at end of input.
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn known_digest() {
        assert_eq!(hash_hex(b"hello"), HELLO_SHA256);
    }

    #[test]
    fn block_size_does_not_change_digest() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let whole = hash_hex(&data);
        for bs in [1, 7, 4096, 1 << 20] {
            assert_eq!(hash_reader(&data[..], bs).unwrap(), whole);
        }
    }

    #[test]
    fn same_bytes_same_hash_regardless_of_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("renamed.bin");
        std::fs::write(&a, b"identical").unwrap();
        std::fs::write(&b, b"identical").unwrap();
        assert_eq!(hash_file(&a, 4).unwrap(), hash_file(&b, 1024).unwrap());
    }

    #[test]
    fn single_byte_change_changes_hash() {
        assert_ne!(hash_hex(b"hello"), hash_hex(b"hellp"));
    }

    #[test]
    fn missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let h = hash_file(&dir.path().join("nope"), 1024).unwrap();
        assert!(is_absent(&h));
    }

    #[test]
    fn empty_file_is_not_absent() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("empty");
        std::fs::write(&p, b"").unwrap();
        let h = hash_file(&p, 1024).unwrap();
        assert_eq!(h, hash_hex(b""));
        assert!(!is_absent(&h));
    }
}
