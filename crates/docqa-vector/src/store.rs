//! Persistence for the index and its chunk metadata.
//!
//! Two files in the data directory form one unit:
//!
//! - `document_index.flat`: magic `DQFLAT01`, `dim: u32`, `rows: u64`, a
//!   32-byte blake3 digest of the chunk records, then `rows * dim` f32 values.
//!   All integers and floats are little-endian.
//! - `documents.txt`: per row, a `SOURCE: <source>` line, the chunk text, a
//!   newline, and a `===` line.
//!
//! Chunk text lines that would read as a delimiter (a line that trims to
//! `===`, or one starting with `SOURCE: `) are written with a leading `\`.
//! So is any line that already starts with `\`. The reader drops one
//! leading `\` from every text line. Files written before this escaping
//! existed read back the same unless they hold such lines, and then the
//! digest rejects them rather than loading them misaligned.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use docqa_core::error::{Error, Result};
use docqa_core::types::Chunk;

use crate::flat::FlatIndex;

pub const INDEX_FILE: &str = "document_index.flat";
pub const METADATA_FILE: &str = "documents.txt";

const MAGIC: &[u8; 8] = b"DQFLAT01";
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + 4 + 8 + DIGEST_LEN;
const SOURCE_PREFIX: &str = "SOURCE: ";
const TERMINATOR: &str = "===";
const ESCAPE: char = '\\';

#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn data_dir(&self) -> &Path { &self.data_dir }

    pub fn index_path(&self) -> PathBuf { self.data_dir.join(INDEX_FILE) }

    pub fn metadata_path(&self) -> PathBuf { self.data_dir.join(METADATA_FILE) }

    /// Both artifacts are present.
    pub fn exists(&self) -> bool {
        self.index_path().is_file() && self.metadata_path().is_file()
    }

    /// Write the index blob, then the metadata file. Each lands via a temp
    /// file and rename, so readers see either the old or the new file.
    pub fn save(&self, index: &FlatIndex, chunks: &[Chunk]) -> Result<()> {
        if index.len() != chunks.len() {
            return Err(Error::Operation(format!(
                "index has {} rows but {} chunks were given",
                index.len(),
                chunks.len()
            )));
        }
        if let Some(chunk) = chunks.iter().enumerate().find(|(i, c)| c.position != *i).map(|(_, c)| c) {
            return Err(Error::Operation(format!("chunk at position {} is out of order", chunk.position)));
        }
        if let Some(chunk) = chunks.iter().find(|c| c.source.contains(['\n', '\r'])) {
            return Err(Error::Operation(format!("source {:?} contains a line break", chunk.source)));
        }

        fs::create_dir_all(&self.data_dir)?;
        let digest = records_digest(chunks.iter().map(|c| (c.source.as_str(), c.text.as_str())));
        write_atomic(&self.data_dir, &self.index_path(), &encode_index(index, &digest))?;
        write_atomic(&self.data_dir, &self.metadata_path(), encode_metadata(chunks).as_bytes())?;
        info!(dir = %self.data_dir.display(), rows = chunks.len(), "saved index");
        Ok(())
    }

    /// `Ok(None)` when either artifact is missing. A pair that is present but
    /// unreadable or inconsistent is an error; nothing is returned partially.
    pub fn load(&self) -> Result<Option<(FlatIndex, Vec<Chunk>)>> {
        if !self.exists() {
            debug!(dir = %self.data_dir.display(), "no persisted index");
            return Ok(None);
        }
        let blob = fs::read(self.index_path())?;
        let metadata = fs::read_to_string(self.metadata_path())
            .map_err(|e| Error::Corrupt(format!("{METADATA_FILE}: {e}")))?;

        let (index, expected_digest) = decode_index(&blob)?;
        let records = parse_metadata(&metadata);
        if records.len() != index.len() {
            return Err(Error::Corrupt(format!(
                "{METADATA_FILE} holds {} records but the index has {} rows",
                records.len(),
                index.len()
            )));
        }
        let digest = records_digest(records.iter().map(|(s, t)| (s.as_str(), t.as_str())));
        if digest != expected_digest {
            return Err(Error::Corrupt(format!("{METADATA_FILE} does not belong to {INDEX_FILE}")));
        }

        let chunks = records
            .into_iter()
            .enumerate()
            .map(|(position, (source, text))| Chunk { text, source, position })
            .collect::<Vec<_>>();
        info!(dir = %self.data_dir.display(), rows = chunks.len(), "loaded index");
        Ok(Some((index, chunks)))
    }
}

fn needs_escape(line: &str) -> bool {
    line.trim() == TERMINATOR || line.starts_with(SOURCE_PREFIX) || line.starts_with(ESCAPE)
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Length-prefixed digest of `(source, text)` records in row order.
fn records_digest<'a>(records: impl Iterator<Item = (&'a str, &'a str)>) -> [u8; DIGEST_LEN] {
    let mut hasher = blake3::Hasher::new();
    for (source, text) in records {
        hasher.update(&(source.len() as u64).to_le_bytes());
        hasher.update(source.as_bytes());
        hasher.update(&(text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    *hasher.finalize().as_bytes()
}

fn encode_index(index: &FlatIndex, digest: &[u8; DIGEST_LEN]) -> Vec<u8> {
    let values = index.as_slice();
    let mut buf = Vec::with_capacity(HEADER_LEN + values.len() * 4);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(index.dim().unwrap_or(0) as u32).to_le_bytes());
    buf.extend_from_slice(&(index.len() as u64).to_le_bytes());
    buf.extend_from_slice(digest);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

fn decode_index(bytes: &[u8]) -> Result<(FlatIndex, [u8; DIGEST_LEN])> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::Corrupt(format!("{INDEX_FILE} has no valid header")));
    }
    let mut cursor = MAGIC.len();
    let dim = u32::from_le_bytes(take_array(bytes, &mut cursor)) as usize;
    let rows = u64::from_le_bytes(take_array(bytes, &mut cursor));
    let digest: [u8; DIGEST_LEN] = take_array(bytes, &mut cursor);

    let body = &bytes[HEADER_LEN..];
    let expected = usize::try_from(rows)
        .ok()
        .and_then(|r| r.checked_mul(dim))
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::Corrupt(format!("{INDEX_FILE} header is out of range")))?;
    if body.len() != expected {
        return Err(Error::Corrupt(format!(
            "{INDEX_FILE} body is {} bytes, header promises {}",
            body.len(),
            expected
        )));
    }
    if rows > 0 && dim == 0 {
        return Err(Error::Corrupt(format!("{INDEX_FILE} has rows but no dimension")));
    }
    let data = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((FlatIndex::from_raw(dim, data)?, digest))
}

/// Copy the next `N` header bytes. Callers check the header length first.
fn take_array<const N: usize>(bytes: &[u8], cursor: &mut usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[*cursor..*cursor + N]);
    *cursor += N;
    out
}

/// Serialize chunks in row order.
pub fn encode_metadata(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(SOURCE_PREFIX);
        out.push_str(&chunk.source);
        out.push('\n');
        for line in chunk.text.split_inclusive('\n') {
            if needs_escape(line) {
                out.push(ESCAPE);
            }
            out.push_str(line);
        }
        out.push('\n');
        out.push_str(TERMINATOR);
        out.push('\n');
    }
    out
}

/// Parse `(source, text)` records in file order.
///
/// A `SOURCE: ` line sets the source of the record being read, a `===`
/// line closes it, and every other line belongs to the text with one
/// leading `\` removed. End of input closes a final record that lacks its
/// `===`. The newline the writer puts after each text is dropped again.
/// Text read while no source is set is discarded.
pub fn parse_metadata(input: &str) -> Vec<(String, String)> {
    let mut records = Vec::new();
    let mut source: Option<String> = None;
    let mut text = String::new();

    for line in input.split_inclusive('\n') {
        if let Some(rest) = line.strip_prefix(SOURCE_PREFIX) {
            if source.is_none() {
                text.clear();
            }
            source = Some(rest.trim_end_matches(['\n', '\r']).to_string());
        } else if line.trim() == TERMINATOR {
            close_record(&mut records, source.as_deref(), &mut text);
        } else {
            text.push_str(line.strip_prefix(ESCAPE).unwrap_or(line));
        }
    }
    close_record(&mut records, source.as_deref(), &mut text);
    records
}

fn close_record(records: &mut Vec<(String, String)>, source: Option<&str>, text: &mut String) {
    let Some(source) = source else {
        text.clear();
        return;
    };
    if text.is_empty() {
        return;
    }
    let mut body = std::mem::take(text);
    if body.ends_with('\n') {
        body.pop();
    }
    records.push((source.to_string(), body));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_rejected_when_truncated_or_foreign() {
        assert!(matches!(decode_index(b"DQFLAT01"), Err(Error::Corrupt(_))));
        let mut blob = encode_index(&FlatIndex::new(), &[0u8; DIGEST_LEN]);
        blob[0] = b'X';
        assert!(matches!(decode_index(&blob), Err(Error::Corrupt(_))));
    }

    #[test]
    fn body_length_must_match_header() {
        let index = FlatIndex::rebuild(&[vec![1.0, 2.0, 3.0]]).unwrap();
        let mut blob = encode_index(&index, &[7u8; DIGEST_LEN]);
        let (decoded, digest) = decode_index(&blob).unwrap();
        assert_eq!(decoded, index);
        assert_eq!(digest, [7u8; DIGEST_LEN]);

        blob.pop();
        assert!(matches!(decode_index(&blob), Err(Error::Corrupt(_))));
    }

    #[test]
    fn text_before_any_source_is_discarded() {
        let records = parse_metadata("orphan text\n===\nSOURCE: a.txt\nbody\n===\n");
        assert_eq!(records, vec![("a.txt".to_string(), "body".to_string())]);

        let unterminated = parse_metadata("stray line\nSOURCE: a.txt\nbody\n===\n");
        assert_eq!(unterminated, vec![("a.txt".to_string(), "body".to_string())]);
    }

    #[test]
    fn delimiter_lines_are_escaped_and_restored() {
        let text = "Water\n===\nSOURCE: fake.txt\n\\already escaped\n  ===  \nend";
        let chunks = vec![Chunk { text: text.to_string(), source: "guide.md".to_string(), position: 0 }];
        let encoded = encode_metadata(&chunks);

        assert!(encoded.contains("\n\\===\n"));
        assert!(encoded.contains("\n\\SOURCE: fake.txt\n"));
        assert!(encoded.contains("\n\\\\already escaped\n"));
        assert_eq!(parse_metadata(&encoded), vec![("guide.md".to_string(), text.to_string())]);
    }
}
