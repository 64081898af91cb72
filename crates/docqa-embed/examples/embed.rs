use docqa_core::config::EmbeddingSettings;
use docqa_embed::get_default_embedder;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let embedder = get_default_embedder(&EmbeddingSettings::default())?;
    let texts = vec!["hello world".to_string(), "rust embeddings".to_string()];
    let embs = embedder.embed_batch(&texts)?;
    println!("B={} dim={}", embs.len(), embedder.dim());
    Ok(())
}
