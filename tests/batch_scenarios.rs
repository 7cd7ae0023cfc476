//! Batches driven end to end from command-line arguments against the
//! in-memory storage service.

mod common;

use common::{at, build_config, init_dummy_tracing_subscriber, run_batch};
use s3bulk_rs::storage::memory::MemoryStorage;
use s3bulk_rs::types::ObjectAcl;
use s3bulk_rs::types::error::StorageError;
use s3bulk_rs::{BatchPipeline, create_pipeline_cancellation_token, exit_code_from_error};

fn bucket_with(keys: &[&str]) -> MemoryStorage {
    let storage = MemoryStorage::new("bucket");
    for key in keys {
        storage.insert_object(key, b"data", at(1_700_000_000));
    }
    storage
}

#[tokio::test]
async fn filters_select_items_on_listing() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&[
        "photos/a.jpg",
        "photos/b2024.jpg",
        "photos/c.png",
        "photos/sub/d.jpg",
        "other/e.jpg",
    ]);
    let config = build_config(&[
        "set-acl",
        "s3://bucket/photos/",
        "public-read",
        "-r",
        "--include",
        "*.jpg",
        "--exclude",
        "*2024*",
    ]);

    let outcome = run_batch(config, Some(&storage), None).await;

    outcome.result.unwrap();
    assert_eq!(outcome.snapshot.ok, 2);
    assert_eq!(outcome.snapshot.err, 0);
    for key in ["photos/a.jpg", "photos/sub/d.jpg"] {
        assert_eq!(storage.object(key).unwrap().acl, Some(ObjectAcl::PublicRead), "{key}");
    }
    for key in ["photos/b2024.jpg", "photos/c.png", "other/e.jpg"] {
        assert_eq!(storage.object(key).unwrap().acl, None, "{key}");
    }
    assert!(
        outcome
            .finish_message
            .unwrap()
            .starts_with("Succeed: Total 2 objects.")
    );
}

#[tokio::test]
async fn time_window_limits_removal() {
    init_dummy_tracing_subscriber();

    let storage = MemoryStorage::new("bucket");
    storage.insert_object("logs/old.log", b"x", at(100));
    storage.insert_object("logs/mid.log", b"x", at(200));
    storage.insert_object("logs/new.log", b"x", at(300));
    let config = build_config(&[
        "rm",
        "s3://bucket/logs/",
        "-r",
        "-f",
        "--start-time",
        "150",
        "--end-time",
        "250",
    ]);

    let outcome = run_batch(config, Some(&storage), None).await;

    outcome.result.unwrap();
    assert_eq!(storage.keys(), vec!["logs/new.log", "logs/old.log"]);
}

#[tokio::test]
async fn continuable_errors_finish_with_a_report() {
    init_dummy_tracing_subscriber();

    let output_dir = tempfile::tempdir().unwrap();
    let storage = bucket_with(&["data/a", "data/b", "data/c"]);
    storage.inject_failure(
        "data/b",
        StorageError::new("InternalError", "please retry", Some(500)),
        10,
    );
    let config = build_config(&[
        "set-acl",
        "s3://bucket/data/",
        "private",
        "-r",
        "--output-dir",
        output_dir.path().to_str().unwrap(),
    ]);

    let outcome = run_batch(config, Some(&storage), None).await;

    outcome.result.unwrap();
    assert_eq!((outcome.snapshot.ok, outcome.snapshot.err), (2, 1));
    assert_eq!(outcome.snapshot.dealt(), 3);
    assert_eq!(outcome.item_errors, 1);
    assert!(outcome.finish_message.unwrap().starts_with("FinishWithError:"));

    let report_path = outcome.report_path.expect("report file expected");
    let report = std::fs::read_to_string(report_path).unwrap();
    let mut lines = report.lines();
    assert!(lines.next().unwrap().starts_with("# s3bulk set-acl"));
    let error_line = lines.next().unwrap();
    assert!(error_line.starts_with("[Error] "));
    assert!(error_line.contains("InternalError"));
}

#[tokio::test]
async fn fatal_errors_abort_the_batch() {
    init_dummy_tracing_subscriber();

    let output_dir = tempfile::tempdir().unwrap();
    let storage = bucket_with(&["data/a", "data/b", "data/c"]);
    storage.inject_failure(
        "data/b",
        StorageError::new("AccessDenied", "Access Denied", Some(403)),
        10,
    );
    let config = build_config(&[
        "set-acl",
        "s3://bucket/data/",
        "private",
        "-r",
        "--output-dir",
        output_dir.path().to_str().unwrap(),
    ]);

    let outcome = run_batch(config, Some(&storage), None).await;

    let error = outcome.result.unwrap_err();
    assert!(format!("{error:#}").contains("AccessDenied"));
    assert_eq!(exit_code_from_error(&error), 1);
    assert!(outcome.snapshot.err >= 1);
    assert!(outcome.finish_message.unwrap().contains("when error happens"));
}

#[tokio::test]
async fn stop_on_error_aborts_on_the_first_item_error() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&["data/a"]);
    storage.inject_failure(
        "data/a",
        StorageError::new("InternalError", "please retry", Some(500)),
        10,
    );
    let config = build_config(&[
        "set-acl",
        "s3://bucket/data/",
        "private",
        "-r",
        "--stop-on-error",
    ]);

    let outcome = run_batch(config, Some(&storage), None).await;

    assert!(outcome.result.is_err());
    assert!(outcome.report_path.is_none());
}

#[tokio::test]
async fn rm_all_types_then_the_bucket() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&["a", "dir/b"]);
    storage.insert_upload("dir/big", at(100));
    let config = build_config(&["rm", "s3://bucket", "-r", "-a", "-b", "-f"]);

    let outcome = run_batch(config, Some(&storage), None).await;

    outcome.result.unwrap();
    assert_eq!(outcome.snapshot.ok, 2);
    assert_eq!(outcome.snapshot.ok_uploads, 1);
    assert!(!storage.bucket_exists());
    let finish_message = outcome.finish_message.unwrap();
    assert!(finish_message.starts_with("Succeed:"));
    assert!(finish_message.ends_with("Removed Bucket: bucket"));
}

#[tokio::test]
async fn rm_multipart_keeps_objects() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&["tmp/a"]);
    storage.insert_upload("tmp/big", at(100));
    storage.insert_upload("tmp/other", at(100));
    let config = build_config(&["rm", "s3://bucket/tmp/", "-r", "-m"]);

    let outcome = run_batch(config, Some(&storage), None).await;

    outcome.result.unwrap();
    assert_eq!(outcome.snapshot.ok_uploads, 2);
    assert!(storage.upload_ids().is_empty());
    assert_eq!(storage.keys(), vec!["tmp/a"]);
}

#[tokio::test]
async fn only_current_dir_leaves_sub_prefixes_alone() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&["tmp/a", "tmp/b", "tmp/sub/c", "tmp/sub/deeper/d"]);
    storage.insert_upload("tmp/big", at(100));
    storage.insert_upload("tmp/sub/big", at(100));
    let config = build_config(&["rm", "s3://bucket/tmp/", "-r", "-a", "-f", "--only-current-dir"]);

    let outcome = run_batch(config, Some(&storage), None).await;

    outcome.result.unwrap();
    assert_eq!((outcome.snapshot.ok, outcome.snapshot.ok_uploads), (2, 1));
    assert_eq!(storage.keys(), vec!["tmp/sub/c", "tmp/sub/deeper/d"]);
    assert_eq!(storage.upload_ids().len(), 1);
}

#[tokio::test]
async fn rm_bucket_fails_when_not_empty() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&["a"]);
    let config = build_config(&["rm", "s3://bucket", "-b"]);

    let outcome = run_batch(config, Some(&storage), None).await;

    assert!(outcome.result.is_err());
    assert!(storage.bucket_exists());
}

#[tokio::test]
async fn set_meta_update_merges_headers() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&["site/index.html", "site/app.js"]);
    let config = build_config(&[
        "set-meta",
        "s3://bucket/site/",
        "Cache-Control:max-age=60#x-amz-meta-release:42",
        "-r",
        "-u",
    ]);

    let outcome = run_batch(config, Some(&storage), None).await;

    outcome.result.unwrap();
    assert_eq!(outcome.snapshot.ok, 2);
    let metadata = storage.object("site/app.js").unwrap().metadata;
    assert_eq!(metadata.cache_control.as_deref(), Some("max-age=60"));
    assert_eq!(
        metadata.user_metadata.get("release").map(String::as_str),
        Some("42")
    );
}

#[tokio::test]
async fn ls_prints_selected_objects_and_their_count() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&["logs/a.log", "logs/b.txt", "logs/c.log"]);
    let config = build_config(&["ls", "s3://bucket/logs/", "--include", "*.log"]);

    let mut pipeline = BatchPipeline::with_storages(
        config,
        Some(Box::new(storage)),
        None,
        create_pipeline_cancellation_token(),
    );
    let mut out = Vec::new();
    pipeline.list(&mut out).await.unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].ends_with("s3://bucket/logs/a.log"));
    assert!(lines[2].ends_with("s3://bucket/logs/c.log"));
    assert_eq!(lines[3], "Object Number is: 2");
}

#[tokio::test]
async fn include_then_exclude_keeps_only_the_first_match() {
    init_dummy_tracing_subscriber();

    let storage = bucket_with(&["a.txt", "a.jpg", "b2x.txt"]);
    let config = build_config(&["ls", "s3://bucket", "--include", "*.txt", "--exclude", "*2*"]);

    let mut pipeline = BatchPipeline::with_storages(
        config,
        Some(Box::new(storage)),
        None,
        create_pipeline_cancellation_token(),
    );
    let mut out = Vec::new();
    pipeline.list(&mut out).await.unwrap();

    let text = String::from_utf8(out).unwrap();
    let listed: Vec<_> = text.lines().filter(|line| line.contains("s3://")).collect();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].ends_with("s3://bucket/a.txt"));
}
