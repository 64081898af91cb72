use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use docqa_core::types::RetrievedChunk;
use docqa_retriever::answer::NO_CONTEXT_ANSWER;
use docqa_retriever::{
    ChatRecord, Generator, HistorySink, JsonlHistory, LocalSummaryGenerator, MistralGenerator, QueryProcessor,
};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct MemoryHistory(Arc<Mutex<Vec<ChatRecord>>>);

impl HistorySink for MemoryHistory {
    fn append(&self, record: &ChatRecord) -> Result<()> {
        self.0.lock().expect("lock").push(record.clone());
        Ok(())
    }
}

struct EchoGenerator;

impl Generator for EchoGenerator {
    fn generate(&self, question: &str, chunks: &[RetrievedChunk]) -> Result<String> {
        Ok(format!("{question} ({} chunks)", chunks.len()))
    }
}

fn hit(content: &str, source: &str) -> RetrievedChunk {
    RetrievedChunk { content: content.to_string(), source: source.to_string(), distance: 0.5 }
}

#[test]
fn no_chunks_gives_fixed_answer_and_logs_nothing() {
    let history = MemoryHistory::default();
    let qp = QueryProcessor::new(Box::new(EchoGenerator), Box::new(history.clone()));

    let answer = qp.process_query("anything?", &[]).expect("answer");
    assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
    assert!(answer.sources.is_empty());
    assert!(history.0.lock().expect("lock").is_empty());
}

#[test]
fn sources_are_unique_in_first_seen_order_and_logged() {
    let history = MemoryHistory::default();
    let qp = QueryProcessor::new(Box::new(EchoGenerator), Box::new(history.clone()));
    let chunks = vec![hit("a1", "b.txt"), hit("a2", "a.txt"), hit("a3", "b.txt")];

    let answer = qp.process_query("where?", &chunks).expect("answer");
    assert_eq!(answer.answer, "where? (3 chunks)");
    assert_eq!(answer.sources, vec!["b.txt".to_string(), "a.txt".to_string()]);

    let logged = history.0.lock().expect("lock");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].question, "where?");
    assert_eq!(logged[0].answer, "where? (3 chunks)\n\nSources: b.txt, a.txt");
    assert!(chrono::DateTime::parse_from_rfc3339(&logged[0].timestamp).is_ok());
}

#[test]
fn local_summary_lists_each_chunk_under_its_source() {
    let text = LocalSummaryGenerator
        .generate("ignored", &[hit("  Boil water.  ", "water.txt"), hit("Plant early.\n", "garden.md")])
        .expect("summary");
    assert_eq!(
        text,
        "Here's a summary of the relevant information:\n\nFrom water.txt:\n• Boil water.\n\nFrom garden.md:\n• Plant early.\n\n"
    );
}

#[test]
fn unreachable_endpoint_is_an_error_and_nothing_is_logged() {
    let history = MemoryHistory::default();
    let generator = MistralGenerator::new("key", "mistral-tiny", "http://127.0.0.1:9", Duration::from_secs(2));
    let qp = QueryProcessor::new(Box::new(generator), Box::new(history.clone()));

    assert!(qp.process_query("q", &[hit("c", "s")]).is_err());
    assert!(history.0.lock().expect("lock").is_empty());
}

#[test]
fn jsonl_history_appends_and_reads_back() {
    let dir = TempDir::new().expect("tempdir");
    let history = JsonlHistory::new(dir.path().join("nested").join("chat_history.jsonl"));
    assert!(history.load().expect("load").is_empty());

    let first = ChatRecord::new("q1", "a1");
    let second = ChatRecord::new("q2", "line one\nline two");
    history.append(&first).expect("append");
    history.append(&second).expect("append");

    let raw = fs::read_to_string(history.path()).expect("read");
    assert_eq!(raw.lines().count(), 2);
    assert_eq!(history.load().expect("load"), vec![first, second]);
}

#[test]
fn malformed_history_line_fails_with_line_number() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("chat_history.jsonl");
    let good = serde_json::to_string(&ChatRecord::new("q", "a")).expect("json");
    fs::write(&path, format!("{good}\n\n{{'question': __import__('os')}}\n")).expect("write");

    let err = JsonlHistory::new(&path).load().unwrap_err();
    assert!(format!("{err:#}").contains(":3:"), "{err:#}");
}

#[test]
fn history_rejects_unknown_and_missing_fields() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("h.jsonl");

    fs::write(&path, r#"{"timestamp":"t","question":"q","answer":"a","extra":1}"#).expect("write");
    assert!(JsonlHistory::new(&path).load().is_err());

    fs::write(&path, r#"{"timestamp":"t","question":"q"}"#).expect("write");
    assert!(JsonlHistory::new(&path).load().is_err());
}
