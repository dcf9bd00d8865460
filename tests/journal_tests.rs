// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use bufjournal::codec::RecordDecoder;
use bufjournal::{Entry, Journal, JournalConfig, JournalError};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::tempdir;

fn small_config(dir: &Path, rotate_size_bytes: u64) -> JournalConfig {
    let mut config = JournalConfig::new(dir.join("buffer"));
    config.rotate_size_bytes = rotate_size_bytes;
    config.flush_interval = Duration::from_millis(20);
    config
}

/// Retries through rotation boundaries the way a producer would.
async fn write_with_retry(journal: &Journal<Entry>, entry: &Entry) {
    loop {
        match journal.write_data(entry) {
            Ok(()) => return,
            Err(JournalError::RotationInProgress) => {
                tokio::time::sleep(Duration::from_millis(1)).await
            }
            Err(e) => panic!("write {} failed: {}", entry.id, e),
        }
    }
}

async fn commit_with_retry(journal: &Journal<Entry>, id: i64) {
    loop {
        match journal.write_id(id) {
            Ok(()) => return,
            Err(JournalError::RotationInProgress) => {
                tokio::time::sleep(Duration::from_millis(1)).await
            }
            Err(e) => panic!("commit {} failed: {}", id, e),
        }
    }
}

async fn wait_for_rotation(journal: &Journal<Entry>) {
    while journal.rotation_pending() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn drain(journal: &Journal<Entry>) -> Vec<i64> {
    let mut ids = Vec::new();
    while let Some(entry) = journal.load_legacy().unwrap() {
        ids.push(entry.id);
    }
    ids
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    files.sort();
    files
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_replays_only_uncommitted() {
    let dir = tempdir().unwrap();
    let journal = Journal::<Entry>::open(small_config(dir.path(), 100)).unwrap();

    for id in 0..10_000i64 {
        let entry = Entry::new(id).with("seq", id).with("source", "e2e");
        write_with_retry(&journal, &entry).await;
    }
    wait_for_rotation(&journal).await;

    let buffer_dir = journal.current_files().unwrap().0.parent().unwrap().to_path_buf();
    assert!(
        files_with_extension(&buffer_dir, "buf").len() > 1,
        "a 100 byte threshold should have forced rotations"
    );

    for id in 0..5_000i64 {
        commit_with_retry(&journal, id).await;
    }
    journal.rotate().unwrap();

    let replayed = drain(&journal);
    assert_eq!(replayed.len(), 5_000);
    assert!(replayed.iter().all(|id| *id >= 5_000));
    let unique: BTreeSet<i64> = replayed.iter().copied().collect();
    assert_eq!(unique.len(), 5_000);

    // Only the live generation is left behind.
    let (data, ids) = journal.current_files().unwrap();
    assert_eq!(files_with_extension(&buffer_dir, "buf"), vec![data]);
    assert_eq!(files_with_extension(&buffer_dir, "ids"), vec![ids]);

    journal.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_replays_uncommitted_records() {
    let dir = tempdir().unwrap();
    let config = small_config(dir.path(), 1024 * 1024);

    {
        let journal = Journal::<Entry>::open(config.clone()).unwrap();
        for id in 0..10i64 {
            write_with_retry(&journal, &Entry::new(id).with("attempt", 1i64)).await;
        }
        for id in 0..5i64 {
            commit_with_retry(&journal, id).await;
        }
        journal.close().await.unwrap();
    }

    let journal = Journal::<Entry>::open(config).unwrap();
    let replayed = drain(&journal);
    assert_eq!(replayed, vec![5, 6, 7, 8, 9]);

    // Drained once; nothing comes back a second time.
    assert!(journal.load_legacy().unwrap().is_none());
    journal.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rotation_keeps_every_accepted_record() {
    let dir = tempdir().unwrap();
    let journal = Journal::<Entry>::open(small_config(dir.path(), 1024 * 1024)).unwrap();
    let accepted = AtomicU64::new(0);
    let rejected = AtomicU64::new(0);

    std::thread::scope(|s| {
        for writer in 0..4i64 {
            let journal = &journal;
            let accepted = &accepted;
            let rejected = &rejected;
            s.spawn(move || {
                for i in 0..500i64 {
                    match journal.write_data(&Entry::new(writer * 1_000 + i)) {
                        Ok(()) => {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(JournalError::RotationInProgress) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => panic!("unexpected write error: {}", e),
                    }
                }
            });
        }
        s.spawn(|| {
            for _ in 0..10 {
                journal.rotate().unwrap();
                std::thread::sleep(Duration::from_millis(1));
            }
        });
    });

    journal.flush().unwrap();
    let buffer_dir = journal.current_files().unwrap().0.parent().unwrap().to_path_buf();
    let mut decoded = 0u64;
    for path in files_with_extension(&buffer_dir, "buf") {
        for entry in RecordDecoder::<Entry>::open(&path).unwrap() {
            entry.unwrap();
            decoded += 1;
        }
    }

    let accepted = accepted.load(Ordering::Relaxed);
    assert_eq!(accepted + rejected.load(Ordering::Relaxed), 2_000);
    assert_eq!(decoded, accepted);
    journal.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flush_task_persists_buffered_writes() {
    let dir = tempdir().unwrap();
    let journal = Journal::<Entry>::open(small_config(dir.path(), 1024 * 1024)).unwrap();
    let (data, ids) = journal.current_files().unwrap();

    write_with_retry(&journal, &Entry::new(42).with("note", "flushed by timer")).await;
    commit_with_retry(&journal, 42).await;

    let mut waited = Duration::ZERO;
    let persisted = || fs::metadata(&data).unwrap().len() > 0 && fs::metadata(&ids).unwrap().len() == 8;
    while !persisted() && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert!(persisted(), "flush task never wrote the buffered record");

    journal.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_existing_files_become_legacy_on_open() {
    let dir = tempdir().unwrap();
    let config = small_config(dir.path(), 1024 * 1024);

    {
        let journal = Journal::<Entry>::open(config.clone()).unwrap();
        write_with_retry(&journal, &Entry::new(1)).await;
        journal.close().await.unwrap();
    }

    let journal = Journal::<Entry>::open(config).unwrap();
    let (data, ids) = journal.current_files().unwrap();
    assert!(data.to_string_lossy().ends_with("0002.buf"));
    assert!(ids.to_string_lossy().ends_with("0002.ids"));
    assert_eq!(drain(&journal), vec![1]);
    journal.close().await.unwrap();
}
