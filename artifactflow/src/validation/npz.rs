//! Minimal reader for the member names of a `.npz` archive.
//!
//! An `.npz` file is a zip archive with one `<field>.npy` member per array.
//! Only the central directory is read; member data is never decompressed.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;

const EOCD_LEN: u64 = 22;
const MAX_COMMENT_LEN: u64 = 0xFFFF;
const ZIP64_LOCATOR_LEN: u64 = 20;
const ZIP64_EOCD_LEN: u64 = 56;
const CENTRAL_HEADER_LEN: usize = 46;

/// Why an archive could not be read.
#[derive(Debug)]
pub enum NpzError {
    /// Underlying read failure.
    Io(io::Error),
    /// The bytes are not a zip archive, or the directory is truncated.
    Malformed(String),
}

impl From<io::Error> for NpzError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl std::fmt::Display for NpzError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "read failed: {err}"),
            Self::Malformed(msg) => write!(f, "not a valid npz archive: {msg}"),
        }
    }
}

fn u16_at(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn u64_at(buf: &[u8], at: usize) -> Option<u64> {
    buf.get(at..at + 8).map(|b| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        u64::from_le_bytes(bytes)
    })
}

fn malformed(msg: impl Into<String>) -> NpzError {
    NpzError::Malformed(msg.into())
}

struct Directory {
    offset: u64,
    size: u64,
    entries: u64,
}

fn locate_directory(file: &mut File, file_len: u64) -> Result<Directory, NpzError> {
    if file_len < EOCD_LEN {
        return Err(malformed("file is shorter than an end-of-directory record"));
    }

    let tail_len = file_len.min(EOCD_LEN + MAX_COMMENT_LEN);
    let tail_start = file_len - tail_len;
    file.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0u8; usize::try_from(tail_len).map_err(|_| malformed("tail too large"))?];
    file.read_exact(&mut tail)?;

    let eocd_pos = (0..=tail.len() - EOCD_LEN as usize)
        .rev()
        .find(|&i| u32_at(&tail, i) == Some(EOCD_SIGNATURE))
        .ok_or_else(|| malformed("end-of-directory signature not found"))?;

    let entries = u16_at(&tail, eocd_pos + 10).ok_or_else(|| malformed("truncated EOCD"))?;
    let size = u32_at(&tail, eocd_pos + 12).ok_or_else(|| malformed("truncated EOCD"))?;
    let offset = u32_at(&tail, eocd_pos + 16).ok_or_else(|| malformed("truncated EOCD"))?;

    let needs_zip64 = entries == 0xFFFF || size == 0xFFFF_FFFF || offset == 0xFFFF_FFFF;
    if !needs_zip64 {
        return Ok(Directory {
            offset: u64::from(offset),
            size: u64::from(size),
            entries: u64::from(entries),
        });
    }

    let locator_pos = eocd_pos
        .checked_sub(ZIP64_LOCATOR_LEN as usize)
        .ok_or_else(|| malformed("zip64 locator missing"))?;
    if u32_at(&tail, locator_pos) != Some(ZIP64_LOCATOR_SIGNATURE) {
        return Err(malformed("zip64 locator missing"));
    }
    let record_offset =
        u64_at(&tail, locator_pos + 8).ok_or_else(|| malformed("truncated zip64 locator"))?;

    if record_offset
        .checked_add(ZIP64_EOCD_LEN)
        .map_or(true, |end| end > file_len)
    {
        return Err(malformed("zip64 end-of-directory record lies past end of file"));
    }

    file.seek(SeekFrom::Start(record_offset))?;
    let mut record = [0u8; ZIP64_EOCD_LEN as usize];
    file.read_exact(&mut record)?;
    if u32_at(&record, 0) != Some(ZIP64_EOCD_SIGNATURE) {
        return Err(malformed("zip64 end-of-directory signature not found"));
    }

    Ok(Directory {
        entries: u64_at(&record, 32).ok_or_else(|| malformed("truncated zip64 EOCD"))?,
        size: u64_at(&record, 40).ok_or_else(|| malformed("truncated zip64 EOCD"))?,
        offset: u64_at(&record, 48).ok_or_else(|| malformed("truncated zip64 EOCD"))?,
    })
}

/// Lists the member names stored in the archive's central directory.
pub fn member_names(path: &Path) -> Result<Vec<String>, NpzError> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let dir = locate_directory(&mut file, file_len)?;

    if dir.offset.saturating_add(dir.size) > file_len {
        return Err(malformed("central directory extends past end of file"));
    }

    file.seek(SeekFrom::Start(dir.offset))?;
    let mut buf = vec![0u8; usize::try_from(dir.size).map_err(|_| malformed("directory too large"))?];
    file.read_exact(&mut buf)?;

    let mut names = Vec::new();
    let mut pos = 0usize;
    for _ in 0..dir.entries {
        if u32_at(&buf, pos) != Some(CENTRAL_HEADER_SIGNATURE) {
            return Err(malformed(format!("bad central header at directory offset {pos}")));
        }
        let name_len = usize::from(u16_at(&buf, pos + 28).ok_or_else(|| malformed("truncated header"))?);
        let extra_len = usize::from(u16_at(&buf, pos + 30).ok_or_else(|| malformed("truncated header"))?);
        let comment_len = usize::from(u16_at(&buf, pos + 32).ok_or_else(|| malformed("truncated header"))?);

        let name_start = pos + CENTRAL_HEADER_LEN;
        let name = buf
            .get(name_start..name_start + name_len)
            .ok_or_else(|| malformed("truncated member name"))?;
        names.push(String::from_utf8_lossy(name).into_owned());

        pos = name_start + name_len + extra_len + comment_len;
    }

    Ok(names)
}

/// Lists the array names (`<field>.npy` members with the suffix stripped).
pub fn field_names(path: &Path) -> Result<Vec<String>, NpzError> {
    Ok(member_names(path)?
        .into_iter()
        .filter_map(|name| name.strip_suffix(".npy").map(String::from))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::npz_archive;

    #[test]
    fn test_field_names_from_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_data.npz");
        std::fs::write(&path, npz_archive(&["vertices.npy", "faces.npy", "notes.txt"])).unwrap();

        let fields = field_names(&path).unwrap();
        assert_eq!(fields, vec!["vertices".to_string(), "faces".to_string()]);
    }

    #[test]
    fn test_empty_archive_has_no_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.npz");
        std::fs::write(&path, npz_archive(&[])).unwrap();

        assert!(field_names(&path).unwrap().is_empty());
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.npz");
        std::fs::write(&path, b"this is plainly not a zip archive at all").unwrap();

        assert!(matches!(field_names(&path), Err(NpzError::Malformed(_))));
    }

    #[test]
    fn test_truncated_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.npz");
        let mut bytes = npz_archive(&["vertices.npy"]);
        // Point the directory offset past the end of the file.
        let len = bytes.len();
        bytes[len - 6..len - 2].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(field_names(&path), Err(NpzError::Malformed(_))));
    }

    #[test]
    fn test_zip64_record_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zip64.npz");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ZIP64_LOCATOR_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0x7FFF_FFFF_u64.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&0xFFFFu16.to_le_bytes());
        bytes.extend_from_slice(&0xFFFFu16.to_le_bytes());
        bytes.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        bytes.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(field_names(&path), Err(NpzError::Malformed(_))));
    }
}
