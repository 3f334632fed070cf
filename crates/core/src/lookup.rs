//! Lookup capability used by the metadata cache on a miss.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::ObjectIdentity;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: String, namespace: String, name: String },
    #[error("incomplete object reference: {0}")]
    Incomplete(String),
    #[error("no served resource for {0}")]
    UnknownKind(String),
    #[error("api request failed: {0}")]
    Api(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LookupError {
    pub fn not_found(id: &ObjectIdentity) -> Self {
        Self::NotFound { kind: id.kind.clone(), namespace: id.namespace.clone(), name: id.name.clone() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Resolves the live object behind an identity and returns its metadata.
/// Implementations must report a missing object as [`LookupError::NotFound`].
#[async_trait::async_trait]
pub trait ObjectLookup: Send + Sync {
    async fn lookup(&self, id: &ObjectIdentity) -> Result<ObjectMeta, LookupError>;
}
