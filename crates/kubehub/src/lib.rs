//! kevex kubehub – kube-rs wiring for the event change feed and the
//! involved-object lookup.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kevex_core::feed::{ChangeFeed, FeedError, Notification};
use kevex_core::lookup::{LookupError, ObjectLookup};
use kevex_core::ObjectIdentity;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{self, ApiCapabilities, Scope},
    runtime::{watcher, WatchStreamExt},
    Client, Discovery,
};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// List+watch of `core/v1` events in one namespace, or all namespaces when
/// `namespace` is `None` or empty. Reconnects with kube's default backoff.
pub struct KubeEventFeed {
    api: Api<Event>,
    namespace: Option<String>,
}

impl KubeEventFeed {
    pub fn new(client: Client, namespace: Option<&str>) -> Self {
        let namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        let api = match namespace.as_deref() {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        Self { api, namespace }
    }
}

impl ChangeFeed for KubeEventFeed {
    fn subscribe(self: Box<Self>) -> BoxStream<'static, Result<Notification, FeedError>> {
        info!(ns = ?self.namespace, "event watch starting");
        watcher::watcher(self.api, watcher::Config::default())
            .default_backoff()
            .flat_map(|res| stream::iter(to_notifications(res)))
            .boxed()
    }
}

fn to_notifications(res: Result<watcher::Event<Event>, watcher::Error>) -> Vec<Result<Notification, FeedError>> {
    match res {
        Ok(watcher::Event::Applied(ev)) => vec![Ok(Notification::Applied(Box::new(ev)))],
        Ok(watcher::Event::Deleted(ev)) => vec![Ok(Notification::Deleted(Box::new(ev)))],
        Ok(watcher::Event::Restarted(list)) => {
            debug!(count = list.len(), "watch restart");
            list.into_iter().map(|ev| Ok(Notification::Applied(Box::new(ev)))).collect()
        }
        Err(e) => vec![Err(FeedError::Transport(Box::new(e)))],
    }
}

/// Fetches involved objects through the dynamic API. GVK to resource
/// resolution goes through discovery once per kind and is memoized.
///
/// References without an `apiVersion` (kubelet node events) are resolved by
/// kind alone: the core `v1` group first, then a full discovery run that is
/// performed at most once.
pub struct KubeObjectLookup {
    client: Client,
    resources: RwLock<HashMap<String, (ApiResource, bool)>>,
    discovery: OnceCell<Discovery>,
}

impl KubeObjectLookup {
    pub fn new(client: Client) -> Self {
        Self { client, resources: RwLock::new(HashMap::new()), discovery: OnceCell::new() }
    }

    async fn resolve(&self, id: &ObjectIdentity) -> Result<(ApiResource, bool), LookupError> {
        let key = id.gvk_key();
        if let Some(found) = self.resources.read().await.get(&key) {
            return Ok(found.clone());
        }
        let found = if id.api_version.is_empty() {
            self.resolve_kind(&id.kind).await
        } else {
            let gvk = GroupVersionKind::gvk(id.group(), id.version(), &id.kind);
            pinned(&self.client, &gvk).await
        };
        let (ar, caps) = match found {
            Ok(Some(found)) => found,
            Ok(None) => {
                debug!(gvk = %key, "kind not served");
                return Err(LookupError::UnknownKind(key));
            }
            Err(e) => return Err(LookupError::Api(Box::new(e))),
        };
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        self.resources.write().await.insert(key, (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    async fn resolve_kind(&self, kind: &str) -> Result<Option<(ApiResource, ApiCapabilities)>, kube::Error> {
        if let Some(found) = pinned(&self.client, &GroupVersionKind::gvk("", "v1", kind)).await? {
            return Ok(Some(found));
        }
        let discovery = self
            .discovery
            .get_or_try_init(|| async {
                info!("running full discovery for kind-only references");
                Discovery::new(self.client.clone()).run().await
            })
            .await?;
        Ok(discovery
            .groups()
            .flat_map(|g| g.recommended_resources())
            .find(|(ar, _)| ar.kind == kind))
    }
}

/// `pinned_kind` with "not served" folded into `None`.
async fn pinned(client: &Client, gvk: &GroupVersionKind) -> Result<Option<(ApiResource, ApiCapabilities)>, kube::Error> {
    match discovery::pinned_kind(client, gvk).await {
        Ok(found) => Ok(Some(found)),
        Err(kube::Error::Discovery(_)) => Ok(None),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait::async_trait]
impl ObjectLookup for KubeObjectLookup {
    async fn lookup(&self, id: &ObjectIdentity) -> Result<ObjectMeta, LookupError> {
        if id.kind.is_empty() || id.name.is_empty() {
            return Err(LookupError::Incomplete(id.to_string()));
        }
        let (ar, namespaced) = self.resolve(id).await?;
        let api: Api<DynamicObject> = if namespaced && !id.namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), &id.namespace, &ar)
        } else {
            if namespaced {
                warn!(object = %id, "namespaced kind referenced without namespace");
            }
            Api::all_with(self.client.clone(), &ar)
        };
        match api.get(&id.name).await {
            Ok(obj) => Ok(obj.metadata),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(LookupError::not_found(id)),
            Err(e) => Err(LookupError::Api(Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> Event {
        Event { metadata: ObjectMeta { name: Some(name.into()), ..ObjectMeta::default() }, ..Event::default() }
    }

    #[test]
    fn restart_replays_every_object_as_applied() {
        let out = to_notifications(Ok(watcher::Event::Restarted(vec![event("a"), event("b")])));
        let names: Vec<_> = out
            .into_iter()
            .map(|n| match n {
                Ok(Notification::Applied(ev)) => ev.metadata.name.unwrap_or_default(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn deletes_are_passed_through() {
        let out = to_notifications(Ok(watcher::Event::Deleted(event("a"))));
        assert!(matches!(out.as_slice(), [Ok(Notification::Deleted(_))]));
    }
}
