//! Builds the [`EnhancedEvent`] handed downstream.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Event;
use kevex_core::{EnhancedEvent, EnhancedObjectReference, ObjectIdentity};
use kevex_store::ObjectMetadataProvider;
use tracing::{debug, error};

pub struct EventEnricher {
    provider: Arc<dyn ObjectMetadataProvider>,
    omit_lookup: bool,
    cluster_name: Option<String>,
}

impl EventEnricher {
    /// With `omit_lookup` set the provider is never consulted and the involved
    /// object is passed through bare.
    pub fn new(provider: Arc<dyn ObjectMetadataProvider>, omit_lookup: bool, cluster_name: Option<String>) -> Self {
        Self { provider, omit_lookup, cluster_name }
    }

    pub fn omits_lookup(&self) -> bool {
        self.omit_lookup
    }

    /// Never fails: lookup errors degrade to the bare involved object.
    pub async fn enrich(&self, event: &Event) -> EnhancedEvent {
        let mut ev = EnhancedEvent::from_event(event);
        ev.cluster_name = self.cluster_name.clone();
        if self.omit_lookup {
            return ev;
        }

        let id = ObjectIdentity::from(&event.involved_object);
        match self.provider.get_object_metadata(&id).await {
            Ok(meta) => {
                ev.involved_object = EnhancedObjectReference::with_metadata(&event.involved_object, meta);
            }
            Err(e) if e.is_not_found() => {
                debug!(object = %id, "involved object not found, likely deleted");
                ev.involved_object.deleted = true;
            }
            Err(e) => {
                error!(object = %id, error = %e, "failed to get object metadata");
            }
        }
        ev
    }
}
