//! Content sniffing for files whose extension tells us nothing.
//!
//! A fixed table of magic-number prefixes is checked first; the longest matching
//! signature wins, so a short signature can never shadow a more specific one.
//! When nothing in the table matches, the `infer` crate gets a look at the same
//! header bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// How many leading bytes are read from a file before matching.
///
/// Larger than the longest table signature so `infer` has enough to work with.
pub const SNIFF_LEN: usize = 512;

/// Magic-number prefixes and the format tag they identify.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "png"),
    (b"\xff\xd8\xff", "jpg"),
    (b"GIF87a", "gif"),
    (b"GIF89a", "gif"),
    (b"%PDF", "pdf"),
    (b"PK\x03\x04", "zip"),
    (b"Rar!\x1a\x07\x00", "rar"),
    (b"\x7fELF", "elf"),
    (b"MZ", "exe"),
];

/// Infers a format tag ("png", "pdf", "zip", ...) from leading file bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSniffer;

impl ContentSniffer {
    pub fn new() -> Self {
        Self
    }

    /// Matches a byte header against the signature table, then `infer`.
    ///
    /// # Examples
    ///
    /// ```
    /// use dlsort::sniff::ContentSniffer;
    ///
    /// let sniffer = ContentSniffer::new();
    /// assert_eq!(sniffer.sniff_bytes(b"%PDF-1.7\n"), Some("pdf"));
    /// assert_eq!(sniffer.sniff_bytes(b"GIF89a\x01\x00"), Some("gif"));
    /// assert_eq!(sniffer.sniff_bytes(b""), None);
    /// ```
    pub fn sniff_bytes(&self, header: &[u8]) -> Option<&'static str> {
        if header.is_empty() {
            return None;
        }

        longest_match(SIGNATURES, header)
            .or_else(|| infer::get(header).map(|kind| kind.extension()))
    }

    /// Reads the first [`SNIFF_LEN`] bytes of `path` and sniffs them.
    ///
    /// Unreadable or empty files yield `None`; this layer never fails.
    pub fn sniff_path(&self, path: &Path) -> Option<&'static str> {
        match read_header(path) {
            Ok(header) => self.sniff_bytes(&header),
            Err(e) => {
                tracing::debug!("could not read header of {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Picks the tag of the longest signature that prefixes `header`.
fn longest_match<'a>(table: &[(&[u8], &'a str)], header: &[u8]) -> Option<&'a str> {
    table
        .iter()
        .filter(|(signature, _)| header.starts_with(signature))
        .max_by_key(|(signature, _)| signature.len())
        .map(|(_, tag)| *tag)
}

fn read_header(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut header)?;
    Ok(header)
}

/// Computes the BLAKE3 digest of a file's contents as a hex string.
///
/// This is the only content-identity primitive the organizer offers; it is used to
/// tell whether a destination collision is a byte-identical duplicate.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
