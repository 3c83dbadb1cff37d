use std::fs;
use std::io::Write;
use tempfile::TempDir;

use ragdoc_core::data_processor::{ChunkingConfig, DataProcessor};
use ragdoc_core::splitter::tail_chars;
use ragdoc_core::Error;

fn processor() -> DataProcessor {
    DataProcessor::new(ChunkingConfig::default()).expect("processor")
}

#[test]
fn process_directory_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let file_path = dir.join("a.txt");
    let mut f = fs::File::create(&file_path).unwrap();
    writeln!(f, "Short text").unwrap();

    let chunks = processor().process_directory(dir).expect("process");

    assert_eq!(chunks.len(), 1, "one small paragraph becomes one chunk");
    assert_eq!(chunks[0].text.trim(), "Short text");
    assert_eq!(chunks[0].doc_name, "a");
    assert_eq!(chunks[0].page, 1);
}

#[test]
fn thousand_characters_make_three_overlapping_chunks() {
    let tmp = TempDir::new().unwrap();
    let text: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    fs::write(tmp.path().join("doc.txt"), &text).unwrap();

    let chunks = processor().process_directory(tmp.path()).expect("process");
    let lens: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();

    assert_eq!(lens, vec![384, 384, 272]);
    for pair in chunks.windows(2) {
        let tail = tail_chars(&pair[0].text, 20);
        assert_eq!(tail.chars().count(), 20);
        assert!(pair[1].text.starts_with(tail));
    }
    // 384 + 364 + 252 fresh characters
    let fresh: usize = lens[0] + lens[1..].iter().map(|l| l - 20).sum::<usize>();
    assert_eq!(fresh, 1000);
}

#[test]
fn repeated_ingestion_is_deterministic() {
    let tmp = TempDir::new().unwrap();
    let body = "Trusts and wills differ. A will takes effect at death.\n\n".repeat(40);
    fs::write(tmp.path().join("b.txt"), &body).unwrap();
    fs::write(tmp.path().join("a.txt"), body.to_uppercase()).unwrap();
    fs::create_dir(tmp.path().join("nested")).unwrap();
    fs::write(tmp.path().join("nested/c.txt"), "nested document").unwrap();

    let first = processor().process_directory(tmp.path()).unwrap();
    let second = processor().process_directory(tmp.path()).unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0].doc_name, "a", "documents are ordered by path");
    assert!(first.iter().all(|c| c.text.chars().count() <= 384));
}

#[test]
fn unreadable_pdf_is_skipped() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("broken.pdf"), b"%PDF-1.4 garbage").unwrap();
    fs::write(tmp.path().join("ok.txt"), "fine").unwrap();

    let chunks = processor().process_directory(tmp.path()).unwrap();

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].doc_name, "ok");
}

#[test]
fn missing_directory_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let err = processor().process_directory(&tmp.path().join("absent")).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
