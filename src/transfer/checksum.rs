// ABOUTME: Streamed SHA-256 digests over chunk files
// ABOUTME: Always hashes the bytes on disk, never in-memory row buffers

use crate::error::TransferError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 8192;

/// Compute the SHA-256 of a file and return it as lowercase hex.
///
/// The digest is streamed from disk in fixed 8 KiB reads so that a chunk
/// corrupted at write time (short write, bad sector) is caught; hashing the
/// rows still in memory would miss it.
pub fn file_sha256(path: &Path) -> Result<String, TransferError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUF_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
