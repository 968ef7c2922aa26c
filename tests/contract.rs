mod common;

use std::sync::Arc;

use anonymbe_bench::backend::memory::{Call, MemoryStore};
use anonymbe_bench::{Binding, Db, LifecycleError, Record, Status};

use common::{fields, rec, setup, worker, TABLE};

#[tokio::test]
async fn read_returns_inserted_fields_restricted_to_projection() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    let record = rec(&[("a", "1"), ("b", "2"), ("c", "3")]);
    assert_eq!(db.insert(TABLE, "user1", &record).await, Status::Ok);

    let mut all = Record::new();
    assert_eq!(db.read(TABLE, "user1", None, &mut all).await, Status::Ok);
    assert_eq!(all, record);

    let mut some = Record::new();
    let wanted = fields(&["a", "c", "missing"]);
    assert_eq!(db.read(TABLE, "user1", Some(&wanted), &mut some).await, Status::Ok);
    assert_eq!(some, rec(&[("a", "1"), ("c", "3")]));

    let mut none = Record::new();
    let empty = fields(&[]);
    assert_eq!(db.read(TABLE, "user1", Some(&empty), &mut none).await, Status::Ok);
    assert!(none.is_empty());
    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn insert_over_existing_key_overwrites_whole_record() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;

    assert_eq!(db.insert(TABLE, "k1", &rec(&[("a", "1"), ("b", "2")])).await, Status::Ok);
    let mut projected = Record::new();
    assert_eq!(
        db.read(TABLE, "k1", Some(&fields(&["a"])), &mut projected).await,
        Status::Ok
    );
    assert_eq!(projected, rec(&[("a", "1")]));

    assert_eq!(db.insert(TABLE, "k1", &rec(&[("a", "9")])).await, Status::Ok);
    let mut after = Record::new();
    assert_eq!(db.read(TABLE, "k1", None, &mut after).await, Status::Ok);
    assert_eq!(after, rec(&[("a", "9")]));
    assert!(!after.contains("b"));
}

#[tokio::test]
async fn update_changes_only_the_given_fields() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    assert_eq!(db.insert(TABLE, "user1", &rec(&[("a", "1"), ("b", "2")])).await, Status::Ok);

    assert_eq!(db.update(TABLE, "user1", &rec(&[("b", "3"), ("c", "4")])).await, Status::Ok);
    let mut out = Record::new();
    assert_eq!(db.read(TABLE, "user1", None, &mut out).await, Status::Ok);
    assert_eq!(out, rec(&[("a", "1"), ("b", "3"), ("c", "4")]));
}

#[tokio::test]
async fn update_and_delete_of_missing_key_are_not_found() {
    let (store, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    assert_eq!(db.update(TABLE, "ghost", &rec(&[("a", "1")])).await, Status::NotFound);
    assert_eq!(db.delete(TABLE, "ghost").await, Status::NotFound);
    assert!(store.is_empty());
}

#[tokio::test]
async fn deleted_record_reads_as_not_found() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    assert_eq!(db.insert(TABLE, "user1", &rec(&[("a", "1")])).await, Status::Ok);
    assert_eq!(db.delete(TABLE, "user1").await, Status::Ok);

    let mut out = rec(&[("untouched", "yes")]);
    assert_eq!(db.read(TABLE, "user1", None, &mut out).await, Status::NotFound);
    assert_eq!(out, rec(&[("untouched", "yes")]));
}

#[tokio::test]
async fn scan_is_ordered_and_bounded() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    for key in ["user2", "user10", "user1", "user3"] {
        assert_eq!(db.insert(TABLE, key, &rec(&[("k", key)])).await, Status::Ok);
    }
    assert_eq!(db.insert("othertable", "user0", &rec(&[("k", "x")])).await, Status::Ok);

    let mut out = Vec::new();
    assert_eq!(db.scan(TABLE, "user1", 3, None, &mut out).await, Status::Ok);
    let keys: Vec<_> = out.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["user1", "user10", "user2"]);
    assert_eq!(out[1].1, rec(&[("k", "user10")]));

    let mut all = Vec::new();
    assert_eq!(db.scan(TABLE, "", 100, None, &mut all).await, Status::Ok);
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[tokio::test]
async fn scan_past_last_key_is_empty_and_ok() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    for key in ["k1", "k2", "k3"] {
        assert_eq!(db.insert(TABLE, key, &rec(&[("f", "v")])).await, Status::Ok);
    }
    let mut out = Vec::new();
    assert_eq!(db.scan(TABLE, "k5", 10, None, &mut out).await, Status::Ok);
    assert!(out.is_empty());
}

#[tokio::test]
async fn scan_applies_projection_to_every_record() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    for key in ["a", "b"] {
        assert_eq!(db.insert(TABLE, key, &rec(&[("x", "1"), ("y", "2")])).await, Status::Ok);
    }
    let mut out = Vec::new();
    let wanted = fields(&["y"]);
    assert_eq!(db.scan(TABLE, "a", 2, Some(&wanted), &mut out).await, Status::Ok);
    assert!(out.iter().all(|(_, r)| *r == rec(&[("y", "2")])));
}

#[tokio::test]
async fn malformed_input_is_bad_request_without_touching_backend() {
    let (store, adapter) = setup(&[("max_field_bytes", "8"), ("max_key_length", "16")]);
    let mut db = worker(&adapter).await;
    let mut out = Record::new();

    assert_eq!(db.read(TABLE, "", None, &mut out).await, Status::BadRequest);
    assert_eq!(db.read(TABLE, "bad\nkey", None, &mut out).await, Status::BadRequest);
    assert_eq!(
        db.insert(TABLE, "a-very-long-key-indeed", &rec(&[("a", "1")])).await,
        Status::BadRequest
    );
    assert_eq!(
        db.insert(TABLE, "k", &rec(&[("a", "123456789")])).await,
        Status::BadRequest
    );
    assert_eq!(db.insert(TABLE, "k", &rec(&[("", "1")])).await, Status::BadRequest);
    assert_eq!(db.insert("", "k", &rec(&[("a", "1")])).await, Status::BadRequest);

    assert_eq!(store.stats().calls(Call::Get), 0);
    assert_eq!(store.stats().calls(Call::Put), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn corrupt_stored_record_is_bad_request() {
    let (store, adapter) = setup(&[]);
    store.put_raw(TABLE, "broken", vec![0, 0, 0, 9]).unwrap();
    let mut db = worker(&adapter).await;

    let mut out = Record::new();
    assert_eq!(db.read(TABLE, "broken", None, &mut out).await, Status::BadRequest);
    assert!(out.is_empty());
    assert!(db.last_failure().is_some());
}

#[tokio::test]
async fn zero_length_scan_is_an_error() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    let mut out = Vec::new();
    assert_eq!(db.scan(TABLE, "k", 0, None, &mut out).await, Status::Error);
}

#[tokio::test]
async fn operations_after_cleanup_are_errors() {
    let (_, adapter) = setup(&[]);
    let mut db = worker(&adapter).await;
    db.cleanup().await.unwrap();
    db.cleanup().await.unwrap();
    assert_eq!(db.delete(TABLE, "k").await, Status::Error);
}

#[tokio::test]
async fn missing_required_option_fails_init_with_error() {
    let store = Arc::new(MemoryStore::new(common::ENDPOINT));
    let adapter = anonymbe_bench::Adapter::new(
        Arc::new(anonymbe_bench::backend::memory::MemoryConnector::new(store.clone())),
        [("host", "localhost")].into_iter().collect(),
    );
    let mut db = adapter.db();
    let err = db.init().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Config(_)));
    assert_eq!(err.status(), Status::Error);
    assert_eq!(store.stats().connections_opened(), 0);
    // cleanup after a failed init is harmless
    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn malformed_option_fails_init() {
    let (_, adapter) = setup(&[("timeout_ms", "soon")]);
    let err = adapter.db().init().await.unwrap_err();
    assert_eq!(err.status(), Status::Error);
}

#[tokio::test]
async fn rejected_credentials_fail_init() {
    let store = Arc::new(
        MemoryStore::new(common::ENDPOINT)
            .with_credentials(anonymbe_bench::config::Credentials::new("bench", "s3cret")),
    );

    let wrong = common::adapter_with(&store, &[("credentials", "bench:nope")]);
    let err = wrong.db().init().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Connect(_)));
    assert_eq!(err.status(), Status::Error);

    let right = common::adapter_with(&store, &[("credentials", "bench:s3cret")]);
    let mut db = worker(&right).await;
    assert_eq!(db.insert(TABLE, "k", &rec(&[("a", "1")])).await, Status::Ok);
}

#[tokio::test]
async fn unreachable_endpoint_fails_init_as_unavailable() {
    let (_, adapter) = setup(&[("port", "7999")]);
    let err = adapter.db().init().await.unwrap_err();
    assert_eq!(err.status(), Status::ServiceUnavailable);
}

#[tokio::test]
async fn binding_hands_out_independent_workers_and_shuts_down() {
    let (store, adapter) = setup(&[]);
    let binding: Arc<dyn Binding> = Arc::new(adapter.clone());
    assert_eq!(binding.name(), "memory");

    let mut a = binding.new_db();
    let mut b = binding.new_db();
    a.init().await.unwrap();
    b.init().await.unwrap();
    assert_eq!(a.insert(TABLE, "shared", &rec(&[("v", "1")])).await, Status::Ok);
    let mut out = Record::new();
    assert_eq!(b.read(TABLE, "shared", None, &mut out).await, Status::Ok);

    a.cleanup().await.unwrap();
    b.cleanup().await.unwrap();
    binding.shutdown().await;
    assert_eq!(
        store.stats().connections_opened(),
        store.stats().connections_closed()
    );

    let mut late = binding.new_db();
    assert!(late.init().await.is_err());
}
