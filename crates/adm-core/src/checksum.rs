//! Whole-file checksum verification after completion.
//!
//! Hashes are computed on demand once the transfer finishes, never inline
//! with the download path, to avoid impacting throughput.

use anyhow::{Context, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// Hash algorithms accepted for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha512 => "sha512",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Some(ChecksumType::Md5),
            "sha1" => Some(ChecksumType::Sha1),
            "sha256" => Some(ChecksumType::Sha256),
            "sha512" => Some(ChecksumType::Sha512),
            _ => None,
        }
    }
}

/// Compute the digest of a file and return lowercase hex.
/// Reads in chunks to keep memory use bounded; suitable for large files.
pub fn hash_path(path: &Path, algo: ChecksumType) -> Result<String> {
    match algo {
        ChecksumType::Md5 => hash_with::<Md5>(path),
        ChecksumType::Sha1 => hash_with::<Sha1>(path),
        ChecksumType::Sha256 => hash_with::<Sha256>(path),
        ChecksumType::Sha512 => hash_with::<Sha512>(path),
    }
}

/// True when the file's digest equals `expected`, compared case-insensitively.
pub fn verify_path(path: &Path, algo: ChecksumType, expected: &str) -> Result<bool> {
    let actual = hash_path(path, algo)?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

fn hash_with<D: Digest>(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = D::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
