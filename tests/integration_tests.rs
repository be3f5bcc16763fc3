//! End-to-end tests: real nodes on loopback sharing files by CID.

use std::time::Duration;
use torrentium_core::{Cid, ErrorKind, Node, TransferEvent};
use torrentium_integration_tests::fixtures::{TwoNodeFixture, test_config};

const OUTCOME_TIMEOUT: Duration = Duration::from_secs(30);

/// Deterministic, non-repeating test payload
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}

fn progress_counts(events: &[TransferEvent]) -> Vec<(u64, u64)> {
    events
        .iter()
        .filter_map(|event| match event {
            TransferEvent::DownloadProgress {
                received, total, ..
            } => Some((*received, *total)),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Download
// ============================================================================

#[tokio::test]
async fn test_download_one_megabyte_file() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let data = payload(1024 * 1024);
    let cid = fixture.share(&data, "movie.bin").await.unwrap();

    let mut events = fixture.leecher.subscribe();
    let requested = fixture.leecher.download_file(&cid.to_string()).unwrap();
    assert_eq!(requested, cid);

    let seen = TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;

    // 1 MiB at the default 256 KiB chunk size
    assert_eq!(progress_counts(&seen), vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    match seen.last() {
        Some(TransferEvent::DownloadComplete { filename, .. }) => assert_eq!(filename, "movie.bin"),
        other => panic!("expected completion, got {other:?}"),
    }

    let written = std::fs::read(fixture.download_dir().join("movie.bin")).unwrap();
    assert_eq!(written.len(), 1_048_576);
    assert_eq!(blake3::hash(&written), blake3::hash(&data));

    let files = fixture.leecher.list_local_files().await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].cid, cid.to_string());
    assert_eq!(files[0].file_size, 1_048_576);
    assert_eq!(files[0].file_hash, blake3::hash(&data).to_hex().to_string());

    assert!(fixture.leecher.active_downloads().is_empty());
    assert!(fixture.seeder.server_stats().bytes_sent >= 1_048_576);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_download_small_text_file() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let cid = fixture.share(b"hello from the seeder", "hello.txt").await.unwrap();

    let mut events = fixture.leecher.subscribe();
    fixture.leecher.download_file(&cid.to_string()).unwrap();
    let seen = TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;

    assert_eq!(progress_counts(&seen), vec![(1, 1)]);
    assert!(matches!(seen.last(), Some(TransferEvent::DownloadComplete { .. })));
    assert_eq!(
        std::fs::read(fixture.download_dir().join("hello.txt")).unwrap(),
        b"hello from the seeder"
    );
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_download_with_small_chunks_and_low_concurrency() {
    let fixture = TwoNodeFixture::new_with_config(
        |seeder| seeder.storage.chunk_size = 4096,
        |leecher| leecher.transfer.max_concurrent_chunks = 1,
    )
    .await
    .unwrap();
    let data = payload(10 * 4096 + 17);
    let cid = fixture.share(&data, "odd.bin").await.unwrap();

    let mut events = fixture.leecher.subscribe();
    fixture.leecher.download_file(&cid.to_string()).unwrap();
    let seen = TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;

    let counts = progress_counts(&seen);
    assert_eq!(counts.len(), 11);
    assert!(counts.iter().all(|&(_, total)| total == 11));
    assert_eq!(counts.last(), Some(&(11, 11)));
    assert_eq!(std::fs::read(fixture.download_dir().join("odd.bin")).unwrap(), data);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_download_empty_file() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let cid = fixture.share(b"", "empty.txt").await.unwrap();

    let mut events = fixture.leecher.subscribe();
    fixture.leecher.download_file(&cid.to_string()).unwrap();
    let seen = TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;

    assert!(progress_counts(&seen).is_empty());
    assert!(matches!(seen.last(), Some(TransferEvent::DownloadComplete { .. })));
    let written = std::fs::metadata(fixture.download_dir().join("empty.txt")).unwrap();
    assert_eq!(written.len(), 0);
    fixture.cleanup().await;
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_unknown_cid_reports_no_providers() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let cid = Cid::from_digest([0x5a; 32]);

    let mut events = fixture.leecher.subscribe();
    fixture.leecher.download_file(&cid.to_string()).unwrap();
    let seen = TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;

    assert_eq!(seen.len(), 1);
    match &seen[0] {
        TransferEvent::DownloadError { kind, message, .. } => {
            assert_eq!(*kind, ErrorKind::NoProviders);
            assert!(!message.is_empty());
        }
        other => panic!("expected an error, got {other:?}"),
    }
    assert!(fixture.leecher.list_local_files().await.is_empty());
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_malformed_cid_is_rejected_up_front() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let mut events = fixture.leecher.subscribe();

    let err = fixture.leecher.download_file("bafy-not-hex").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCid);
    assert!(events.try_recv().is_err());
    fixture.cleanup().await;
}

// ============================================================================
// Re-sharing
// ============================================================================

#[tokio::test]
async fn test_downloader_serves_content_onward() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let data = payload(300_000);
    let cid = fixture.share(&data, "relay.bin").await.unwrap();

    let mut events = fixture.leecher.subscribe();
    fixture.leecher.download_file(&cid.to_string()).unwrap();
    TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;

    // With the seeder gone, a newcomer can only get the file from the leecher
    fixture.seeder.shutdown().await;

    let mut config = test_config(&fixture.scratch().join("third"));
    config.discovery.bootstrap_nodes = vec![fixture.leecher.listen_addr()];
    let third = Node::start(config).await.unwrap();

    let mut events = third.subscribe();
    third.download_file(&cid.to_string()).unwrap();
    let seen = TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;
    assert!(
        matches!(seen.last(), Some(TransferEvent::DownloadComplete { .. })),
        "unexpected outcome {seen:?}"
    );

    let written = std::fs::read(fixture.scratch().join("third/downloads/relay.bin")).unwrap();
    assert_eq!(written, data);

    third.shutdown().await;
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_remove_then_download_again_reuses_file() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let data = payload(5000);
    let cid = fixture.share(&data, "again.bin").await.unwrap();

    let mut events = fixture.leecher.subscribe();
    fixture.leecher.download_file(&cid.to_string()).unwrap();
    TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;

    assert!(fixture.leecher.remove_file(&cid.to_string()).await.unwrap());
    assert!(fixture.leecher.list_local_files().await.is_empty());

    fixture.leecher.download_file(&cid.to_string()).unwrap();
    let seen = TwoNodeFixture::wait_for_outcome(&mut events, &cid, OUTCOME_TIMEOUT).await;
    match seen.last() {
        Some(TransferEvent::DownloadComplete { filename, .. }) => assert_eq!(filename, "again.bin"),
        other => panic!("expected completion, got {other:?}"),
    }
    assert!(!fixture.download_dir().join("again (1).bin").exists());
    assert_eq!(fixture.leecher.list_local_files().await.len(), 1);
    fixture.cleanup().await;
}
