use std::fs;

use docqa_core::error::Error;
use docqa_core::traits::Embedder;
use docqa_core::types::Chunk;
use docqa_embed::FakeEmbedder;
use docqa_vector::store::parse_metadata;
use docqa_vector::{FlatIndex, Store, INDEX_FILE, METADATA_FILE};
use tempfile::TempDir;

fn chunk(source: &str, text: &str, position: usize) -> Chunk {
    Chunk { text: text.to_string(), source: source.to_string(), position }
}

fn sample_chunks() -> Vec<Chunk> {
    vec![
        chunk("water.txt", "Boil water for one minute before drinking.", 0),
        chunk("water.txt", "Store filtered water in sealed containers.", 1),
        chunk("garden.md", "Plant potatoes after the last frost.\nHill them twice.", 2),
    ]
}

fn embed(chunks: &[Chunk]) -> FlatIndex {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = FakeEmbedder::new(32).embed_batch(&texts).expect("embed");
    FlatIndex::rebuild(&vectors).expect("rebuild")
}

#[test]
fn save_then_load_restores_index_and_chunks() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path().join("data"));
    let chunks = sample_chunks();
    let index = embed(&chunks);

    assert!(!store.exists());
    store.save(&index, &chunks).expect("save");
    assert!(store.index_path().ends_with(INDEX_FILE));
    assert!(store.metadata_path().ends_with(METADATA_FILE));

    let (loaded_index, loaded_chunks) = store.load().expect("load").expect("present");
    assert_eq!(loaded_index, index);
    assert_eq!(loaded_chunks, chunks);
}

#[test]
fn loaded_rows_still_point_at_their_chunks() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    let chunks = sample_chunks();
    store.save(&embed(&chunks), &chunks).expect("save");

    let (index, loaded) = store.load().expect("load").expect("present");
    let embedder = FakeEmbedder::new(32);
    for c in &loaded {
        let query = embedder.embed_batch(&[c.text.clone()]).expect("embed").remove(0);
        let hit = index.search(&query, 1).expect("search")[0];
        assert_eq!(hit.row, c.position);
        assert!(hit.distance < 1e-5);
    }
}

#[test]
fn final_record_without_terminator_still_loads() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    let chunks = sample_chunks();
    store.save(&embed(&chunks), &chunks).expect("save");

    let written = fs::read_to_string(store.metadata_path()).expect("read");
    let truncated = written.strip_suffix("===\n").expect("terminated");
    fs::write(store.metadata_path(), truncated).expect("write");

    let (_, loaded) = store.load().expect("load").expect("present");
    assert_eq!(loaded, chunks);
}

#[test]
fn delimiter_lines_inside_chunks_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    let chunks = vec![
        chunk("guide.md", "Water\n===\nBoil water one minute.\n", 0),
        chunk("a.txt", "intro\nSOURCE: b.txt\nrest", 1),
        chunk("paths.txt", "\\server\\share\n  ===  ", 2),
    ];
    store.save(&embed(&chunks), &chunks).expect("save");

    let (_, loaded) = store.load().expect("load").expect("present");
    assert_eq!(loaded, chunks);
}

#[test]
fn hand_written_unescaped_delimiter_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    let chunks = vec![chunk("notes.txt", "Part one\n===\nPart two", 0)];
    store.save(&embed(&chunks), &chunks).expect("save");

    fs::write(store.metadata_path(), "SOURCE: notes.txt\nPart one\n===\nPart two\n===\n").expect("write");
    assert!(matches!(store.load(), Err(Error::Corrupt(_))));

    let records = parse_metadata("SOURCE: a.txt\nintro\nSOURCE: b.txt\nrest\n===\n");
    assert_eq!(records, vec![("b.txt".to_string(), "intro\nrest".to_string())]);
}

#[test]
fn sources_keep_surrounding_spaces() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    let chunks = vec![chunk("notes .txt", "first note", 0), chunk(" spaced.txt", "second note", 1)];
    store.save(&embed(&chunks), &chunks).expect("save");

    let (_, loaded) = store.load().expect("load").expect("present");
    assert_eq!(loaded, chunks);
}

#[test]
fn source_with_line_break_is_refused_before_writing() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    let chunks = vec![chunk("odd\nname.txt", "text", 0)];

    assert!(matches!(store.save(&embed(&chunks), &chunks), Err(Error::Operation(_))));
    assert!(!store.exists());
}

#[test]
fn missing_artifact_means_nothing_persisted() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    assert!(store.load().expect("load").is_none());

    let chunks = sample_chunks();
    store.save(&embed(&chunks), &chunks).expect("save");
    fs::remove_file(store.metadata_path()).expect("remove");
    assert!(store.load().expect("load").is_none());
}

#[test]
fn metadata_from_another_save_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let first = Store::new(dir.path().join("first"));
    let second = Store::new(dir.path().join("second"));

    let a = sample_chunks();
    let mut b = sample_chunks();
    b[1].text = "Rotate stored water every six months.".to_string();
    first.save(&embed(&a), &a).expect("save a");
    second.save(&embed(&b), &b).expect("save b");

    fs::copy(second.metadata_path(), first.metadata_path()).expect("copy");
    assert!(matches!(first.load(), Err(Error::Corrupt(_))));
}

#[test]
fn truncated_metadata_is_a_row_count_mismatch() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    let chunks = sample_chunks();
    store.save(&embed(&chunks), &chunks).expect("save");

    fs::write(store.metadata_path(), docqa_vector::store::encode_metadata(&chunks[..2])).expect("write");
    let err = store.load().unwrap_err();
    assert!(err.to_string().contains("records"), "{err}");
}

#[test]
fn misaligned_pair_is_never_written() {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::new(dir.path());
    let chunks = sample_chunks();

    assert!(store.save(&embed(&chunks[..2]), &chunks).is_err());
    let mut shuffled = chunks.clone();
    shuffled.swap(0, 1);
    assert!(store.save(&embed(&shuffled), &shuffled).is_err());
    assert!(!store.exists());
}
