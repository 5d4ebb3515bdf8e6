//! Integration tests for the complete PageBlob FS stack
//!
//! These tests go through the provider surface against the in-memory
//! container: resolver, buffered stream, page stream and replace together.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

use pageblob_fs::{
    BlobContainer, BlobFileStreamProvider, BlobFsError, FileAccess, FileMode, MemoryContainer, OpenOptions,
    ReplaceOptions,
};
use tokio_test::{assert_err, assert_ok};

fn setup(name: &str) -> (MemoryContainer, BlobFileStreamProvider) {
    let container = MemoryContainer::new(name);
    let provider = BlobFileStreamProvider::new(Arc::new(container.clone())).with_replace_options(ReplaceOptions {
        poll_interval: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    });
    (container, provider)
}

async fn write_file(provider: &BlobFileStreamProvider, path: &str, data: &[u8], buffer_size: usize) {
    let mut stream = provider
        .open(path, OpenOptions::create().buffer_size(buffer_size))
        .await
        .unwrap();
    stream.write(data).await.unwrap();
    stream.close().await.unwrap();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[tokio::test]
async fn test_hello_world_round_trip() {
    let (_container, provider) = setup("test-hello");
    write_file(&provider, "a/b.dat", b"HELLOWORLD", 4096).await;

    let mut stream = provider.open("a/b.dat", OpenOptions::read()).await.unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 10);
    assert_eq!(&buf, b"HELLOWORLD");
}

#[tokio::test]
async fn test_sparse_write_zero_fills() {
    let (container, provider) = setup("test-sparse");
    let mut stream = provider
        .open_unbuffered("s.dat", OpenOptions::new(FileMode::Create, FileAccess::ReadWrite))
        .await
        .unwrap();
    stream.seek(SeekFrom::Start(1000)).unwrap();
    stream.write(&[7]).await.unwrap();
    assert_eq!(stream.len(), 1001);
    assert_eq!(stream.capacity(), 1024);
    assert_eq!(container.capacity_of("s.dat"), Some(1024));

    let data = provider.read_all_bytes("s.dat").await.unwrap();
    assert_eq!(data.len(), 1001);
    assert!(data[..1000].iter().all(|&b| b == 0));
    assert_eq!(data[1000], 7);
}

#[tokio::test]
async fn test_extend_reads_zero_between_old_length_and_offset() {
    let (_container, provider) = setup("test-extend");
    write_file(&provider, "f", &[1u8; 700], 512).await;

    let mut stream = provider
        .open("f", OpenOptions::new(FileMode::Open, FileAccess::ReadWrite).buffer_size(512))
        .await
        .unwrap();
    stream.seek(SeekFrom::Start(1500)).await.unwrap();
    stream.write(&[2u8; 30]).await.unwrap();
    stream.close().await.unwrap();

    let data = provider.read_all_bytes("f").await.unwrap();
    assert_eq!(data.len(), 1530);
    assert!(data[..700].iter().all(|&b| b == 1));
    assert!(data[700..1500].iter().all(|&b| b == 0));
    assert!(data[1500..].iter().all(|&b| b == 2));
}

#[tokio::test]
async fn test_unaligned_round_trips() {
    let (_container, provider) = setup("test-unaligned");
    write_file(&provider, "f", &[0xEE; 3000], 1024).await;
    let mut expected = vec![0xEEu8; 3000];

    let mut stream = provider
        .open_unbuffered("f", OpenOptions::new(FileMode::Open, FileAccess::ReadWrite))
        .await
        .unwrap();
    for (offset, len) in [(0u64, 1usize), (1, 511), (511, 2), (513, 1024), (1000, 1500), (2999, 5)] {
        let data = pattern(len);
        stream.seek(SeekFrom::Start(offset)).unwrap();
        stream.write(&data).await.unwrap();

        let end = offset as usize + len;
        if end > expected.len() {
            expected.resize(end, 0);
        }
        expected[offset as usize..end].copy_from_slice(&data);

        stream.seek(SeekFrom::Start(offset)).unwrap();
        let mut out = vec![0u8; len];
        assert_eq!(stream.read(&mut out).await.unwrap(), len);
        assert_eq!(out, data, "offset {} len {}", offset, len);
    }

    // neighbouring bytes survive every partial-page write
    assert_eq!(provider.read_all_bytes("f").await.unwrap(), expected);
}

#[tokio::test]
async fn test_flush_invariant_across_buffer_sizes() {
    let (_container, provider) = setup("test-flush");
    let data = pattern(10_000);

    for buffer_size in [0usize, 512, 1024, 4096, 65536] {
        for chunk in [1usize, 100, 512, 3000, 10_000] {
            let path = format!("f-{}-{}", buffer_size, chunk);
            let mut stream = provider
                .open(&path, OpenOptions::create().buffer_size(buffer_size))
                .await
                .unwrap();
            for part in data.chunks(chunk) {
                stream.write(part).await.unwrap();
            }
            stream.close().await.unwrap();

            let back = provider.read_all_bytes(&path).await.unwrap();
            assert_eq!(back, data, "buffer {} chunk {}", buffer_size, chunk);
        }
    }
}

#[tokio::test]
async fn test_read_at_or_past_end_is_empty() {
    let (_container, provider) = setup("test-eof");
    write_file(&provider, "f", b"abc", 512).await;

    let mut stream = provider.open("f", OpenOptions::read()).await.unwrap();
    let mut buf = [0u8; 8];
    stream.seek(SeekFrom::End(0)).await.unwrap();
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    stream.seek(SeekFrom::Start(5000)).await.unwrap();
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    assert_err!(stream.seek(SeekFrom::Current(-6000)).await);
}

#[tokio::test]
async fn test_replace_scenario() {
    let (_container, provider) = setup("test-replace");
    write_file(&provider, "tmp.dat", b"X", 512).await;
    write_file(&provider, "final.dat", b"something longer", 512).await;

    assert_ok!(provider.replace("tmp.dat", "final.dat", None).await);
    assert_eq!(provider.read_all_text("final.dat").await.unwrap(), "X");
    assert!(provider.file_exists("tmp.dat").await.unwrap());
}

#[tokio::test]
async fn test_replace_twice_is_idempotent() {
    let (container, provider) = setup("test-replace-twice");
    write_file(&provider, "src", &pattern(2000), 512).await;

    container.set_copy_pending_polls(2);
    for _ in 0..2 {
        assert_ok!(provider.replace("src", "dst", Some("dst.bak")).await);
        assert_eq!(
            provider.read_all_bytes("dst").await.unwrap(),
            provider.read_all_bytes("src").await.unwrap()
        );
    }
    assert_eq!(container.stats().copies, 2);
}

#[tokio::test]
async fn test_replace_missing_source() {
    let (_container, provider) = setup("test-replace-missing");
    let err = provider.replace("nope", "dst", None).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_durable_writer() {
    let (_container, provider) = setup("test-durable");
    let writer = provider.durable_writer();
    assert_ok!(writer.write_all_text("cfg/settings.json", "{\"v\":2}").await);
    assert_eq!(provider.read_all_text("cfg/settings.json").await.unwrap(), "{\"v\":2}");
    assert!(!provider.file_exists("cfg/settings.json.tmp").await.unwrap());
}

#[tokio::test]
async fn test_directory_emulation() {
    let (container, provider) = setup("test-dirs");
    assert!(!provider.directory_exists("test-dirs").await.unwrap());

    write_file(&provider, "test-dirs/x/y.dat", b"1", 512).await;
    assert!(provider.directory_exists("test-dirs").await.unwrap());
    assert_eq!(container.blob_names(), vec!["x/y.dat".to_string()]);

    assert_ok!(provider.delete_directory("test-dirs", false).await);
    assert!(!container.exists().await.unwrap());
}

#[tokio::test]
async fn test_read_only_stream_rejects_writes() {
    let (_container, provider) = setup("test-ro");
    write_file(&provider, "f", b"abc", 512).await;

    let mut stream = provider.open("f", OpenOptions::read()).await.unwrap();
    assert!(matches!(
        stream.write(b"x").await,
        Err(BlobFsError::AccessDenied { .. })
    ));
}

#[tokio::test]
async fn test_truncate_then_extend_reads_zeros() {
    let (_container, provider) = setup("test-truncate");
    write_file(&provider, "f", &[9u8; 1500], 512).await;

    let mut stream = provider
        .open("f", OpenOptions::new(FileMode::Open, FileAccess::ReadWrite))
        .await
        .unwrap();
    stream.set_len(100).await.unwrap();
    stream.seek(SeekFrom::Start(1200)).await.unwrap();
    stream.write(&[1]).await.unwrap();
    stream.close().await.unwrap();

    let data = provider.read_all_bytes("f").await.unwrap();
    assert_eq!(data.len(), 1201);
    assert!(data[..100].iter().all(|&b| b == 9));
    assert!(data[100..1200].iter().all(|&b| b == 0));
}

#[tokio::test]
async fn test_concurrent_streams_on_distinct_paths() {
    let (_container, provider) = setup("test-concurrent");
    let provider = Arc::new(provider);

    let mut handles = vec![];
    for i in 0..8 {
        let provider = Arc::clone(&provider);
        handles.push(tokio::spawn(async move {
            let path = format!("file-{}", i);
            let data = vec![i as u8; 700 + i * 100];
            let mut stream = provider.open(&path, OpenOptions::create()).await?;
            stream.write(&data).await?;
            stream.close().await?;
            Ok::<_, BlobFsError>((path, data))
        }));
    }

    for handle in handles {
        let (path, data) = handle.await.unwrap().unwrap();
        assert_eq!(provider.read_all_bytes(&path).await.unwrap(), data);
    }
}
