//! kevex watcher: consumes the event change feed, drops stale events,
//! enriches the rest and hands them to a caller-supplied handler.

#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kevex_core::clock::{Clock, SystemClock};
use kevex_core::feed::{ChangeFeed, Notification};
use kevex_core::metrics::MetricsStore;
use kevex_core::EnhancedEvent;
use kevex_kubehub::{KubeEventFeed, KubeObjectLookup};
use kevex_store::{ObjectMetadataCache, ObjectMetadataProvider};
use kube::Client;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

pub mod age;
pub mod config;
pub mod enrich;

pub use age::{event_age, Admission, AgeFilter};
pub use config::{ConfigError, WatcherConfig};
pub use enrich::EventEnricher;

/// Downstream consumer. Runs on the watcher task, so a slow handler delays
/// every following event.
pub type EventHandler = Arc<dyn Fn(EnhancedEvent) + Send + Sync>;

struct Pipeline {
    filter: AgeFilter,
    enricher: EventEnricher,
    metrics: Arc<MetricsStore>,
    handler: EventHandler,
}

impl Pipeline {
    async fn on_notification(&self, n: Notification) {
        match n {
            Notification::Applied(ev) => self.on_event(&ev).await,
            Notification::Deleted(ev) => {
                trace!(name = ?ev.metadata.name, "ignoring event deletion");
            }
        }
    }

    async fn on_event(&self, event: &Event) {
        if self.is_event_discarded(event) {
            return;
        }

        debug!(
            msg = event.message.as_deref().unwrap_or_default(),
            namespace = event.metadata.namespace.as_deref().unwrap_or_default(),
            reason = event.reason.as_deref().unwrap_or_default(),
            involved_object = event.involved_object.name.as_deref().unwrap_or_default(),
            "Received event"
        );
        self.metrics.inc_events_processed();

        let ev = self.enricher.enrich(event).await;
        (self.handler)(ev);
    }

    fn is_event_discarded(&self, event: &Event) -> bool {
        let (age, time_used) = match self.filter.check(event) {
            Admission::Admit => return false,
            Admission::DiscardBacklog { .. } => return true,
            Admission::DiscardLive { age, time_used } => (age, time_used),
        };

        let source = event.source.as_ref();
        let obj = &event.involved_object;
        warn!(
            event_age_secs = age.num_milliseconds() as f64 / 1000.0,
            time_used = %time_used.to_rfc3339(),
            event_namespace = event.metadata.namespace.as_deref().unwrap_or_default(),
            event_name = event.metadata.name.as_deref().unwrap_or_default(),
            event_message = event.message.as_deref().unwrap_or_default(),
            event_reason = event.reason.as_deref().unwrap_or_default(),
            event_source_component = source.and_then(|s| s.component.as_deref()).unwrap_or_default(),
            event_source_host = source.and_then(|s| s.host.as_deref()).unwrap_or_default(),
            event_first_timestamp = %rfc3339(event.first_timestamp.as_ref().map(|t| t.0)),
            event_last_timestamp = %rfc3339(event.last_timestamp.as_ref().map(|t| t.0)),
            event_creation_time = %rfc3339(event.metadata.creation_timestamp.as_ref().map(|t| t.0)),
            event_event_time = %rfc3339(event.event_time.as_ref().map(|t| t.0)),
            involved_object_api_version = obj.api_version.as_deref().unwrap_or_default(),
            involved_object_kind = obj.kind.as_deref().unwrap_or_default(),
            involved_object_namespace = obj.namespace.as_deref().unwrap_or_default(),
            involved_object_name = obj.name.as_deref().unwrap_or_default(),
            involved_object_uid = obj.uid.as_deref().unwrap_or_default(),
            "Event discarded as being older than maxEventAgeSeconds: {}s",
            self.filter.max_age().num_seconds()
        );
        self.metrics.inc_events_discarded();
        true
    }
}

fn rfc3339(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Owns the feed subscription and the task consuming it.
pub struct EventWatcher {
    pipeline: Arc<Pipeline>,
    feed: Option<Box<dyn ChangeFeed>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EventWatcher {
    /// Production wiring: events from the API server, metadata through an LRU
    /// cache in front of the dynamic API.
    pub fn new(
        client: Client,
        config: WatcherConfig,
        metrics: Arc<MetricsStore>,
        handler: EventHandler,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let lookup = Arc::new(KubeObjectLookup::new(client.clone()));
        let cache = Arc::new(ObjectMetadataCache::new(config.cache_size, lookup, Arc::clone(&metrics)));
        let feed = Box::new(KubeEventFeed::new(client, config.namespace.as_deref()));
        Ok(Self::with_parts(feed, cache, Arc::new(SystemClock), config, metrics, handler))
    }

    /// Build from explicit collaborators. The boot time is read from `clock`.
    pub fn with_parts(
        feed: Box<dyn ChangeFeed>,
        provider: Arc<dyn ObjectMetadataProvider>,
        clock: Arc<dyn Clock>,
        config: WatcherConfig,
        metrics: Arc<MetricsStore>,
        handler: EventHandler,
    ) -> Self {
        let pipeline = Pipeline {
            filter: AgeFilter::new(config.max_event_age, clock),
            enricher: EventEnricher::new(provider, config.omit_lookup, config.cluster_name),
            metrics,
            handler,
        };
        Self { pipeline: Arc::new(pipeline), feed: Some(feed), shutdown: None, task: None }
    }

    pub fn boot_time(&self) -> DateTime<Utc> {
        self.pipeline.filter.boot_time()
    }

    /// Override the boot time used to tell backlog from live discards. Only
    /// takes effect while the watcher is not running.
    pub fn set_boot_time(&mut self, t: DateTime<Utc>) {
        match Arc::get_mut(&mut self.pipeline) {
            Some(p) => p.filter.set_boot_time(t),
            None => warn!("boot time cannot change while the watcher is running"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Run one event through admission, enrichment and the handler on the
    /// caller's task.
    pub async fn on_event(&self, event: &Event) {
        self.pipeline.on_event(event).await;
    }

    /// Admission check with the same logging and counting as the watch loop.
    pub fn is_event_discarded(&self, event: &Event) -> bool {
        self.pipeline.is_event_discarded(event)
    }

    /// Spawn the consumption task and return. The feed can be consumed once;
    /// later calls only log.
    pub fn start(&mut self) {
        let Some(feed) = self.feed.take() else {
            warn!("event watcher already started");
            return;
        };
        let (tx, mut rx) = oneshot::channel::<()>();
        let pipeline = Arc::clone(&self.pipeline);

        self.task = Some(tokio::spawn(async move {
            let mut stream = feed.subscribe();
            info!("event watcher started");
            loop {
                tokio::select! {
                    biased;
                    _ = &mut rx => {
                        debug!("shutdown requested");
                        break;
                    }
                    next = stream.next() => match next {
                        Some(Ok(n)) => pipeline.on_notification(n).await,
                        Some(Err(e)) => {
                            pipeline.metrics.inc_watch_errors();
                            warn!(error = %e, "watch error");
                        }
                        None => {
                            warn!("event feed ended");
                            break;
                        }
                    }
                }
            }
            info!("event watcher stopped");
        }));
        self.shutdown = Some(tx);
    }

    /// Signal the task and wait for it to exit. No handler call happens after
    /// this returns. Calling it again, or before `start`, does nothing.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "event watcher task failed");
            }
        }
    }
}
