use std::cmp::Ordering;

use docqa_core::error::{Error, Result};
use docqa_core::types::SearchHit;

/// Exact L2 index: rows stored back to back, searched by brute force.
///
/// The dimension is fixed by [`FlatIndex::with_dim`] or by the first
/// non-empty batch added. Rows are never removed or rewritten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dim: Option<usize>,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new() -> Self { Self::default() }

    pub fn with_dim(dim: usize) -> Self { Self { dim: Some(dim), data: Vec::new() } }

    /// Build a fresh index holding exactly `vectors`, row `i` = `vectors[i]`.
    pub fn rebuild(vectors: &[Vec<f32>]) -> Result<Self> {
        let mut index = Self::new();
        index.add(vectors)?;
        Ok(index)
    }

    /// Rebuild from a row-major buffer, as read back from disk.
    pub(crate) fn from_raw(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            if !data.is_empty() {
                return Err(Error::Corrupt("vector data without a dimension".to_string()));
            }
            return Ok(Self::new());
        }
        if data.len() % dim != 0 {
            return Err(Error::Corrupt(format!("{} values do not divide into rows of {}", data.len(), dim)));
        }
        Ok(Self { dim: Some(dim), data })
    }

    pub fn dim(&self) -> Option<usize> { self.dim }

    pub fn len(&self) -> usize {
        match self.dim {
            Some(dim) if dim > 0 => self.data.len() / dim,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let dim = self.dim?;
        self.data.get(i * dim..(i + 1) * dim)
    }

    pub(crate) fn as_slice(&self) -> &[f32] { &self.data }

    /// Append `vectors` in order. The whole batch is checked first, so a
    /// dimension mismatch leaves the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else { return Ok(()) };
        let dim = self.dim.unwrap_or(first.len());
        if dim == 0 {
            return Err(Error::Operation("cannot index zero-dimensional vectors".to_string()));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, got: bad.len() });
        }
        self.dim = Some(dim);
        self.data.reserve(vectors.len() * dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// The `k` rows nearest to `query`, nearest first, ties to the lower row.
    /// Returns fewer than `k` hits when the index is smaller than `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let Some(dim) = self.dim else { return Ok(Vec::new()) };
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, got: query.len() });
        }

        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(row, v)| (squared_l2(query, v), row))
            .collect();
        let by_distance = |a: &(f32, usize), b: &(f32, usize)| -> Ordering { a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)) };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_by(by_distance);

        Ok(scored
            .into_iter()
            .map(|(d, row)| SearchHit { row, distance: d.sqrt() })
            .collect())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
