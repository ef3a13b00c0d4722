//! Integration tests for chunk storage, merging and atomic publish.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{random_bytes, Pipeline};
use driftbox_core::protocol::{ChunkUpload, MergeRequest};
use driftbox_core::Error;

fn merge_request(upload_id: &str, name: &str, total_chunks: u64, file_size: Option<u64>) -> MergeRequest {
    MergeRequest {
        file_name: name.to_string(),
        upload_id: upload_id.to_string(),
        total_chunks,
        file_size,
    }
}

/// Merging the chunks of a file reproduces it exactly, for a spread of
/// chunk counts and sizes.
#[tokio::test]
async fn test_merge_reproduces_source_bytes() {
    let cases: &[(usize, usize)] = &[
        (1, 1),
        (1, 4096),
        (7, 1000),
        (1000, 1000),
        (4096, 1024),
        (10_000, 3),
        (65_537, 8192),
    ];

    for (i, &(size, chunk_size)) in cases.iter().enumerate() {
        let pipeline = Pipeline::new();
        let data = random_bytes(size);
        let upload_id = format!("case-{i}");

        let total = pipeline
            .upload_all(&upload_id, "data.bin", &data, chunk_size)
            .await;
        assert_eq!(total, size.div_ceil(chunk_size) as u64);

        let outcome = pipeline
            .engine
            .merge(&merge_request(&upload_id, "data.bin", total, Some(size as u64)))
            .await
            .unwrap();

        assert_eq!(outcome.size, size as u64);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), data, "case {i}");
        assert!(!pipeline.store.session_dir(&upload_id).unwrap().exists());
        assert!(pipeline.registry.is_empty());
    }
}

/// Chunks arriving out of order are still concatenated by index.
#[tokio::test]
async fn test_out_of_order_arrival() {
    let pipeline = Pipeline::new();
    let parts: [&[u8]; 4] = [b"alpha-", b"bravo-", b"charlie-", b"delta"];

    for index in [3u64, 1, 0, 2] {
        pipeline
            .receiver
            .receive(ChunkUpload {
                upload_id: "ooo".into(),
                file_name: "words.txt".into(),
                index,
                total_chunks: Some(4),
                payload: Bytes::from_static(parts[index as usize]),
            })
            .await
            .unwrap();
    }

    let outcome = pipeline
        .engine
        .merge(&merge_request("ooo", "words.txt", 4, None))
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(outcome.path).unwrap(),
        b"alpha-bravo-charlie-delta"
    );
}

/// Writing the same index twice keeps the second payload and still merges.
#[tokio::test]
async fn test_rewritten_chunk_wins() {
    let pipeline = Pipeline::new();
    let chunk = |index: u64, payload: &'static [u8]| ChunkUpload {
        upload_id: "retry".into(),
        file_name: "r.txt".into(),
        index,
        total_chunks: Some(2),
        payload: Bytes::from_static(payload),
    };

    pipeline.receiver.receive(chunk(0, b"first")).await.unwrap();
    pipeline.receiver.receive(chunk(1, b"-tail")).await.unwrap();
    pipeline.receiver.receive(chunk(0, b"again")).await.unwrap();

    let outcome = pipeline
        .engine
        .merge(&merge_request("retry", "r.txt", 2, Some(10)))
        .await
        .unwrap();
    assert_eq!(std::fs::read(outcome.path).unwrap(), b"again-tail");
}

/// Every missing index fails the merge and leaves nothing visible.
#[tokio::test]
async fn test_missing_index_leaves_no_final_file() {
    for missing in 0..4u64 {
        let pipeline = Pipeline::new();
        for index in (0..4u64).filter(|i| *i != missing) {
            pipeline
                .receiver
                .receive(ChunkUpload {
                    upload_id: "gap".into(),
                    file_name: "gap.bin".into(),
                    index,
                    total_chunks: Some(4),
                    payload: Bytes::from(vec![index as u8; 16]),
                })
                .await
                .unwrap();
        }

        let err = pipeline
            .engine
            .merge(&merge_request("gap", "gap.bin", 4, None))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingChunk { index } if index == missing));
        assert_eq!(err.to_string(), format!("missing chunk {missing}"));
        assert!(pipeline.visible_files().is_empty(), "missing {missing}");
    }
}

/// A size mismatch fails and leaves the previously published file untouched.
#[tokio::test]
async fn test_size_mismatch_preserves_previous_version() {
    let pipeline = Pipeline::new();

    let original = random_bytes(3000);
    let total = pipeline.upload_all("v1", "doc.pdf", &original, 1024).await;
    pipeline
        .engine
        .merge(&merge_request("v1", "doc.pdf", total, Some(3000)))
        .await
        .unwrap();

    let replacement = random_bytes(2500);
    let total = pipeline.upload_all("v2", "doc.pdf", &replacement, 1024).await;
    let err = pipeline
        .engine
        .merge(&merge_request("v2", "doc.pdf", total, Some(9999)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::SizeMismatch {
            expected: 9999,
            actual: 2500
        }
    ));
    assert_eq!(
        std::fs::read(pipeline.files_dir().join("doc.pdf")).unwrap(),
        original
    );
    assert_eq!(pipeline.visible_files(), vec!["doc.pdf".to_string()]);
    assert!(!pipeline.store.session_dir("v2").unwrap().exists());
}

/// Re-running a completed merge does not corrupt the published file.
#[tokio::test]
async fn test_duplicate_completion_is_harmless() {
    let pipeline = Pipeline::new();
    let data = random_bytes(5000);
    let total = pipeline.upload_all("dup", "dup.bin", &data, 2048).await;
    let request = merge_request("dup", "dup.bin", total, Some(5000));

    pipeline.engine.merge(&request).await.unwrap();
    let second = pipeline.engine.merge(&request).await;

    assert!(matches!(second, Err(Error::MissingChunk { index: 0 })));
    assert_eq!(std::fs::read(pipeline.files_dir().join("dup.bin")).unwrap(), data);
    assert_eq!(pipeline.visible_files(), vec!["dup.bin".to_string()]);
}

/// Concurrent duplicate merges for one session serialize: exactly one wins
/// and the published file is intact.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_merges() {
    let pipeline = Arc::new(Pipeline::new());
    let data = random_bytes(64 * 1024);
    let total = pipeline.upload_all("race", "race.bin", &data, 4096).await;
    let request = merge_request("race", "race.bin", total, Some(data.len() as u64));

    let attempts = (0..4).map(|_| {
        let pipeline = Arc::clone(&pipeline);
        let request = request.clone();
        tokio::spawn(async move { pipeline.engine.merge(&request).await })
    });
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(std::fs::read(pipeline.files_dir().join("race.bin")).unwrap(), data);
    assert_eq!(pipeline.visible_files(), vec!["race.bin".to_string()]);
}

/// Two sessions targeting different names do not interfere.
#[tokio::test]
async fn test_independent_sessions() {
    let pipeline = Pipeline::new();
    let a = random_bytes(3000);
    let b = random_bytes(4000);

    let ta = pipeline.upload_all("sess-a", "a.bin", &a, 1000).await;
    let tb = pipeline.upload_all("sess-b", "b.bin", &b, 1000).await;
    assert_eq!(pipeline.registry.len(), 2);

    pipeline.engine.merge(&merge_request("sess-b", "b.bin", tb, None)).await.unwrap();
    assert_eq!(pipeline.registry.len(), 1);
    pipeline.engine.merge(&merge_request("sess-a", "a.bin", ta, None)).await.unwrap();

    assert_eq!(std::fs::read(pipeline.files_dir().join("a.bin")).unwrap(), a);
    assert_eq!(std::fs::read(pipeline.files_dir().join("b.bin")).unwrap(), b);
    assert!(pipeline.store.list_sessions().await.unwrap().is_empty());
}
