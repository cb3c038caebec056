//! MD5 digests and the jigdo base-22 encoding used for them.
//!
//! `.jigdo`/`.template` files never write a full 32-hex-digit MD5;
//! they pack the 16 raw bytes into 22 unpadded base64 characters,
//! using either the standard `+`/`/` alphabet or jigdo's own `-`/`_`
//! variant (see spec.md §4.B, §8 S6).

use crate::error::{Error, Result};
use md5::{Digest, Md5 as Md5Hasher};
use memmap2::MmapOptions;
use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::io::Read;

/// Number of pages read per mmap window in [`md5_of_fd`].
const WINDOW_PAGES: usize = 1024;

/// A 16-byte MD5 digest. Ordered lexicographically by byte value, so a
/// sorted slice of `Md5` supports binary search (spec.md §3, §8 #4).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5(pub [u8; 16]);

impl Md5 {
    /// A sentinel that can never collide with a real digest in
    /// practice; returned by [`md5_of_fd`] on I/O failure so the
    /// caller's comparison against the manifest's digest just fails
    /// rather than needing a separate error path.
    pub const FAILURE_SENTINEL: Md5 = Md5([0xff; 16]);

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl PartialOrd for Md5 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Md5 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Md5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for Md5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Computes the MD5 digest of an in-memory byte slice.
pub fn md5_of_bytes(data: &[u8]) -> Md5 {
    let mut hasher = Md5Hasher::new();
    hasher.update(data);
    Md5(hasher.finalize().into())
}

/// Computes the MD5 digest of an open file's full contents, reading
/// through memory-mapped windows of `WINDOW_PAGES` pages at a time.
/// Falls back to buffered reads if mapping fails (e.g. on a zero-length
/// file, or a filesystem that refuses mmap). Returns
/// [`Md5::FAILURE_SENTINEL`] on I/O failure.
pub fn md5_of_fd(file: &File) -> Md5 {
    match md5_of_fd_inner(file) {
        Ok(digest) => digest,
        Err(_) => Md5::FAILURE_SENTINEL,
    }
}

fn md5_of_fd_inner(file: &File) -> std::io::Result<Md5> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(md5_of_bytes(&[]));
    }
    let page_size = page_size();
    let window_len = (page_size * WINDOW_PAGES) as u64;
    let mut hasher = Md5Hasher::new();
    let mut offset = 0u64;
    while offset < len {
        let this_len = window_len.min(len - offset);
        match unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(this_len as usize)
                .map(file)
        } {
            Ok(map) => hasher.update(&map[..]),
            Err(_) => {
                // Fall back to buffered reads for the whole remainder.
                let mut f = file.try_clone()?;
                std::io::Seek::seek(&mut f, std::io::SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; 64 * 1024];
                let mut remaining = len - offset;
                while remaining > 0 {
                    let want = buf.len().min(remaining as usize);
                    f.read_exact(&mut buf[..want])?;
                    hasher.update(&buf[..want]);
                    remaining -= want as u64;
                }
                offset = len;
                continue;
            }
        }
        offset += this_len;
    }
    Ok(Md5(hasher.finalize().into()))
}

#[cfg(unix)]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

const STANDARD_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const JIGDO_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn decode_with_alphabet(s: &str, alphabet: &[u8; 64]) -> Option<Md5> {
    if s.len() != 22 {
        return None;
    }
    let mut lookup = [255u8; 256];
    for (value, &ch) in alphabet.iter().enumerate() {
        lookup[ch as usize] = value as u8;
    }

    let symbols: Vec<u8> = s
        .bytes()
        .map(|b| lookup[b as usize])
        .collect();
    if symbols.iter().any(|&v| v == 255) {
        return None;
    }

    let mut out = [0u8; 16];
    let mut out_pos = 0;
    // Five full groups of four symbols -> three bytes each (15 bytes).
    for group in symbols[..20].chunks(4) {
        out[out_pos] = (group[0] << 2) | (group[1] >> 4);
        out[out_pos + 1] = (group[1] << 4) | (group[2] >> 2);
        out[out_pos + 2] = (group[2] << 6) | group[3];
        out_pos += 3;
    }
    // Final two symbols encode 12 bits; the low 4 bits are padding and
    // must be zero for the byte to be unambiguous.
    let (a, b) = (symbols[20], symbols[21]);
    out[out_pos] = (a << 2) | (b >> 4);

    Some(Md5(out))
}

/// Decodes a 22-character base-22 MD5, accepting either the standard
/// (`+`/`/`) or jigdo (`-`/`_`) alphabet. A string mixing symbols from
/// both (or containing any other character) is rejected.
pub fn md5_decode(s: &str) -> Result<Md5> {
    decode_with_alphabet(s, STANDARD_ALPHABET)
        .or_else(|| decode_with_alphabet(s, JIGDO_ALPHABET))
        .ok_or_else(|| Error::FormatError(format!("invalid base-22 md5: {:?}", s)))
}

/// Encodes a digest using the jigdo (`-`/`_`) alphabet, the inverse of
/// [`md5_decode`]. Used by tests and by `src/jigdo` when round-tripping
/// `Parts` entries.
pub fn md5_encode(md5: &Md5) -> String {
    let alphabet = JIGDO_ALPHABET;
    let bytes = md5.0;
    let mut out = String::with_capacity(22);
    for group in bytes[..15].chunks(3) {
        out.push(alphabet[(group[0] >> 2) as usize] as char);
        out.push(alphabet[(((group[0] << 4) | (group[1] >> 4)) & 0x3f) as usize] as char);
        out.push(alphabet[(((group[1] << 2) | (group[2] >> 6)) & 0x3f) as usize] as char);
        out.push(alphabet[(group[2] & 0x3f) as usize] as char);
    }
    let last = bytes[15];
    out.push(alphabet[(last >> 2) as usize] as char);
    out.push(alphabet[((last << 4) & 0x3f) as usize] as char);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn md5_of_bytes_matches_known_vectors() {
        assert_eq!(
            format!("{:?}", md5_of_bytes(b"hello")),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(
            format!("{:?}", md5_of_bytes(b"abc")),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn decodes_jigdo_alphabet_seed_vector() {
        // spec.md S6
        let md5 = md5_decode("kA9tHRbytQQ-bdfqEx1WXg").unwrap();
        assert_eq!(md5.0[0], 0x90);
    }

    #[test]
    fn round_trips_through_jigdo_alphabet() {
        let md5 = md5_of_bytes(b"abc");
        let encoded = md5_encode(&md5);
        assert_eq!(encoded.len(), 22);
        assert_eq!(md5_decode(&encoded).unwrap(), md5);
    }

    #[test]
    fn rejects_mixed_alphabet_symbols() {
        // one '+' (standard) and one '_' (jigdo) in the same string
        let s = "kA9tHRbytQQ+bdfqEx1WX_";
        assert!(md5_decode(s).is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(md5_decode("short").is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_digest_round_trips(bytes in proptest::collection::vec(any::<u8>(), 16..=16)) {
            let mut arr = [0u8; 16];
            arr.copy_from_slice(&bytes);
            let md5 = Md5(arr);
            let encoded = md5_encode(&md5);
            prop_assert_eq!(md5_decode(&encoded).unwrap(), md5);
        }
    }
}
