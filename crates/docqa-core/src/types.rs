//! Domain types shared by the loader, splitter, index and retriever.

use serde::{Deserialize, Serialize};

/// Plain text extracted from one file, tagged with the file it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    pub text: String,
    pub source: String,
}

/// A bounded slice of a document.
///
/// `position` is the row of this chunk in the vector index and in the
/// persisted metadata file. Row `i` of the index is always the embedding of
/// the chunk whose `position` is `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub position: usize,
}

/// One row returned by an exact nearest-neighbour search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub row: usize,
    /// Euclidean distance to the query vector.
    pub distance: f32,
}

/// A search hit mapped back to its chunk text and source tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub source: String,
    pub distance: f32,
}
