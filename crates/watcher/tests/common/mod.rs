// Shared fixtures for the watcher integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use kevex_core::lookup::LookupError;
use kevex_core::{EnhancedEvent, ObjectIdentity, ObjectMetadata};
use kevex_store::ObjectMetadataProvider;
use kevex_watcher::EventHandler;

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_164_645, 0).unwrap()
}

/// Provider returning one fixed metadata record, or NotFound when `deleted`.
#[derive(Default)]
pub struct FixedProvider {
    pub deleted: AtomicBool,
    pub broken: AtomicBool,
    pub calls: AtomicUsize,
}

pub fn fixed_metadata() -> ObjectMetadata {
    ObjectMetadata {
        labels: BTreeMap::from([("test".to_string(), "test".to_string())]),
        annotations: BTreeMap::from([("test".to_string(), "test".to_string())]),
        owner_references: vec![OwnerReference {
            api_version: "testAPI".into(),
            kind: "testKind".into(),
            name: "testOwner".into(),
            uid: "testOwner".into(),
            ..OwnerReference::default()
        }],
        deleted: false,
    }
}

#[async_trait::async_trait]
impl ObjectMetadataProvider for FixedProvider {
    async fn get_object_metadata(&self, id: &ObjectIdentity) -> Result<ObjectMetadata, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(LookupError::Api("boom".into()));
        }
        if self.deleted.load(Ordering::SeqCst) {
            return Err(LookupError::not_found(id));
        }
        Ok(fixed_metadata())
    }
}

/// Handler collecting every delivered event.
pub fn collector() -> (EventHandler, Arc<Mutex<Vec<EnhancedEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: EventHandler = Arc::new(move |ev| sink.lock().unwrap().push(ev));
    (handler, seen)
}

pub fn involved(name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".into()),
        kind: Some("Pod".into()),
        namespace: Some("default".into()),
        name: Some(name.into()),
        uid: Some("test".into()),
        ..ObjectReference::default()
    }
}

pub fn event(name: &str, creation: Option<DateTime<Utc>>, last: Option<DateTime<Utc>>) -> Event {
    Event {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            creation_timestamp: creation.map(Time),
            ..ObjectMeta::default()
        },
        last_timestamp: last.map(Time),
        involved_object: involved(&format!("{name}-obj")),
        message: Some(format!("message of {name}")),
        reason: Some("Testing".into()),
        ..Event::default()
    }
}

#[derive(Clone, Default)]
pub struct LogBuf(Arc<Mutex<Vec<u8>>>);

impl LogBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's tracing output into a buffer until the guard drops.
pub fn capture_logs() -> (LogBuf, tracing::subscriber::DefaultGuard) {
    let buf = LogBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (buf, tracing::subscriber::set_default(subscriber))
}
