//! kevex core types: object identity, cached metadata and the enhanced event
//! handed to downstream sinks.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Event, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};

pub mod clock;
pub mod feed;
pub mod lookup;
pub mod metrics;

pub mod prelude {
    #[cfg(any(test, feature = "test-util"))]
    pub use super::clock::FakeClock;
    pub use super::clock::{Clock, SystemClock};
    pub use super::feed::{ChangeFeed, FeedError, Notification};
    pub use super::lookup::{LookupError, ObjectLookup};
    pub use super::metrics::MetricsStore;
    pub use super::{EnhancedEvent, EnhancedObjectReference, ObjectIdentity, ObjectMetadata};
}

/// Identity of the object an event refers to. Used as the metadata cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectIdentity {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl ObjectIdentity {
    /// API group, empty for the core group (`v1`).
    pub fn group(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    pub fn version(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((_, version)) => version,
            None => &self.api_version,
        }
    }

    /// `v1/Kind` or `group/v1/Kind`.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version, self.kind)
    }
}

impl From<&ObjectReference> for ObjectIdentity {
    fn from(r: &ObjectReference) -> Self {
        Self {
            api_version: r.api_version.clone().unwrap_or_default(),
            kind: r.kind.clone().unwrap_or_default(),
            namespace: r.namespace.clone().unwrap_or_default(),
            name: r.name.clone().unwrap_or_default(),
            uid: r.uid.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {} ({})", self.gvk_key(), self.name, self.uid)
        } else {
            write!(f, "{} {}/{} ({})", self.gvk_key(), self.namespace, self.name, self.uid)
        }
    }
}

/// Descriptive metadata of an involved object as seen by the metadata cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    pub deleted: bool,
}

impl ObjectMetadata {
    /// Negative result for an object the API no longer knows about.
    pub fn deleted() -> Self {
        Self { deleted: true, ..Self::default() }
    }

    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            labels: meta.labels.clone().unwrap_or_default(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            owner_references: meta.owner_references.clone().unwrap_or_default(),
            deleted: meta.deletion_timestamp.is_some(),
        }
    }
}

/// Involved object reference plus whatever enrichment could be resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedObjectReference {
    #[serde(flatten)]
    pub reference: ObjectReference,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl EnhancedObjectReference {
    pub fn bare(reference: &ObjectReference) -> Self {
        Self { reference: reference.clone(), ..Self::default() }
    }

    pub fn with_metadata(reference: &ObjectReference, meta: ObjectMetadata) -> Self {
        Self {
            reference: reference.clone(),
            labels: meta.labels,
            annotations: meta.annotations,
            owner_references: meta.owner_references,
            deleted: meta.deleted,
        }
    }
}

/// Event as delivered downstream: a copy of the raw event without server-side
/// bookkeeping and with an enriched involved object.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedEvent {
    pub event: Event,
    pub involved_object: EnhancedObjectReference,
    pub cluster_name: Option<String>,
}

impl EnhancedEvent {
    /// Copy `event`, dropping `metadata.managedFields`. The involved object
    /// starts out as the bare reference.
    pub fn from_event(event: &Event) -> Self {
        let mut event = event.clone();
        event.metadata.managed_fields = None;
        let involved_object = EnhancedObjectReference::bare(&event.involved_object);
        Self { event, involved_object, cluster_name: None }
    }

    /// JSON rendering with the enriched involved object inlined under
    /// `involvedObject`.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(&self.event)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("involvedObject".to_string(), serde_json::to_value(&self.involved_object)?);
            if let Some(cluster) = &self.cluster_name {
                obj.insert("clusterName".to_string(), serde_json::Value::String(cluster.clone()));
            }
        }
        Ok(value)
    }

    /// Copy with `.` replaced by `_` in every label and annotation key, for
    /// backends that treat dots as path separators.
    pub fn de_dot(&self) -> Self {
        let mut out = self.clone();
        out.event.metadata.labels = self.event.metadata.labels.as_ref().map(de_dot_map);
        out.event.metadata.annotations = self.event.metadata.annotations.as_ref().map(de_dot_map);
        out.involved_object.labels = de_dot_map(&self.involved_object.labels);
        out.involved_object.annotations = de_dot_map(&self.involved_object.annotations);
        out
    }

    /// Unix milliseconds of `firstTimestamp`, falling back to `eventTime`.
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.event
            .first_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| self.event.event_time.as_ref().map(|t| t.0))
            .map(|t| t.timestamp_millis())
    }
}

impl Serialize for EnhancedEvent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().map_err(serde::ser::Error::custom)?.serialize(serializer)
    }
}

fn de_dot_map(m: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    m.iter().map(|(k, v)| (k.replace('.', "_"), v.clone())).collect()
}
