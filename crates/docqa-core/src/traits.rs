/// Maps text to fixed-dimensional dense vectors.
///
/// Implementations are expensive to construct; build one per process and
/// hand it to whatever needs embeddings.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    /// One vector of length `dim()` per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}
