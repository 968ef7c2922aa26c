#![allow(dead_code)]

use std::sync::Arc;

use anonymbe_bench::backend::memory::{MemoryConnector, MemoryStore};
use anonymbe_bench::{Adapter, AdapterDb, Db, FieldSet, Properties, Record};

pub const TABLE: &str = "usertable";
pub const ENDPOINT: &str = "localhost:7000";

pub fn base_properties() -> Properties {
    [("host", "localhost"), ("port", "7000")].into_iter().collect()
}

pub fn adapter_with(store: &Arc<MemoryStore>, extra: &[(&str, &str)]) -> Arc<Adapter> {
    let mut props = base_properties();
    for (k, v) in extra {
        props.set(*k, *v);
    }
    Adapter::new(Arc::new(MemoryConnector::new(store.clone())), props)
}

pub fn setup(extra: &[(&str, &str)]) -> (Arc<MemoryStore>, Arc<Adapter>) {
    let store = Arc::new(MemoryStore::new(ENDPOINT));
    let adapter = adapter_with(&store, extra);
    (store, adapter)
}

pub async fn worker(adapter: &Arc<Adapter>) -> AdapterDb {
    let mut db = adapter.db();
    db.init().await.expect("init");
    db
}

pub fn rec(pairs: &[(&str, &str)]) -> Record {
    pairs.iter().map(|(k, v)| (*k, v.as_bytes())).collect()
}

pub fn fields(names: &[&str]) -> FieldSet {
    names.iter().map(|n| n.to_string()).collect()
}
