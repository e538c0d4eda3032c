use std::pin::pin;

use futures::{stream::BoxStream, Stream, StreamExt as _};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{WatchEvent, WatchParams},
    Api, Client, ResourceExt as _,
};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    annotator::{self, PodUpdater},
    error::Error,
};

/// The only namespace whose pods are watched and annotated.
pub const WATCH_NAMESPACE: &str = "default";

/// Resource version the first watch starts from. "0" lets the server start
/// from any version it has, replaying pods that already exist as `ADDED` events.
pub const WATCH_FROM_VERSION: &str = "0";

/// HTTP status the server uses when the requested resource version is too old.
const GONE: u16 = 410;

/// What the watch loop handled before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    pub observed: usize,
    pub annotated: usize,
    pub failed: usize,
}

/// Bookmarks are requested so the resume point advances even when no pod changes.
/// The server closes each watch after the request timeout (290s by default).
pub fn watch_params() -> WatchParams {
    WatchParams {
        bookmarks: true,
        ..WatchParams::default()
    }
}

/// Opens a pod watch in [`WATCH_NAMESPACE`] starting after `resource_version`.
pub trait PodWatch {
    type Events: Stream<Item = Result<WatchEvent<Pod>, kube::Error>>;

    async fn open(&self, resource_version: &str) -> Result<Self::Events, kube::Error>;
}

impl PodWatch for Client {
    type Events = BoxStream<'static, Result<WatchEvent<Pod>, kube::Error>>;

    async fn open(&self, resource_version: &str) -> Result<Self::Events, kube::Error> {
        let events = Api::<Pod>::namespaced(self.clone(), WATCH_NAMESPACE)
            .watch(&watch_params(), resource_version)
            .await?;

        Ok(events.boxed())
    }
}

fn event_type(event: &WatchEvent<Pod>) -> &'static str {
    match event {
        WatchEvent::Added(_) => "ADDED",
        WatchEvent::Modified(_) => "MODIFIED",
        WatchEvent::Deleted(_) => "DELETED",
        WatchEvent::Bookmark(_) => "BOOKMARK",
        WatchEvent::Error(_) => "ERROR",
    }
}

fn observed(pod: &Pod, kind: &str) {
    info!(
        "The pod \"{}\" in \"{}\" namespace was {kind}",
        pod.name_any(),
        pod.namespace().unwrap_or_default()
    );
}

/// Consumes pod events one at a time until `shutdown` is cancelled.
///
/// Every `ADDED` pod gets exactly one annotation attempt. A failed attempt is
/// logged and the loop moves on to the next event. When the server closes a
/// watch, a new one is opened from the last resource version seen, so the
/// subscription continues where it left off. Failing to open a watch is fatal.
pub async fn run<W, U>(
    watch: &W,
    pods: &U,
    shutdown: CancellationToken,
) -> Result<WatchSummary, Error>
where
    W: PodWatch,
    U: PodUpdater,
{
    let mut summary = WatchSummary::default();
    let mut resource_version = WATCH_FROM_VERSION.to_string();

    info!("Starting pod watcher...");

    'watch: loop {
        let events = select! {
            biased;
            _ = shutdown.cancelled() => break 'watch,
            events = watch.open(&resource_version) => events.map_err(|source| Error::Watch {
                namespace: WATCH_NAMESPACE,
                source,
            })?,
        };
        let mut events = pin!(events);

        loop {
            // Checked before every receive so an in-flight annotation completes first.
            let next = select! {
                biased;
                _ = shutdown.cancelled() => break 'watch,
                next = events.next() => next,
            };

            let Some(event) = next else {
                debug!("pod watch closed, resuming from resource version {resource_version}");
                continue 'watch;
            };

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("pod watch stream error: {e}");
                    continue;
                }
            };

            let kind = event_type(&event);

            match event {
                WatchEvent::Added(pod) => {
                    summary.observed += 1;
                    observed(&pod, kind);

                    let name = pod.name_any();
                    let namespace = pod.namespace().unwrap_or_default();
                    if let Some(version) = pod.resource_version() {
                        resource_version = version;
                    }

                    info!("Annotating pod...");
                    match annotator::annotate(pods, pod).await {
                        Ok(_) => summary.annotated += 1,
                        Err(e) => {
                            summary.failed += 1;
                            error!(
                                "failed to annotate the pod \"{name}\" in \"{namespace}\" namespace: {e}"
                            );
                        }
                    }
                }
                WatchEvent::Modified(pod) | WatchEvent::Deleted(pod) => {
                    summary.observed += 1;
                    observed(&pod, kind);

                    if let Some(version) = pod.resource_version() {
                        resource_version = version;
                    }
                }
                WatchEvent::Bookmark(bookmark) => {
                    debug!(
                        "bookmark at resource version {}",
                        bookmark.metadata.resource_version
                    );
                    resource_version = bookmark.metadata.resource_version;
                }
                WatchEvent::Error(status) if status.code == GONE => {
                    warn!(
                        "resource version {resource_version} expired ({}), watching from current state",
                        status.message
                    );
                    resource_version = WATCH_FROM_VERSION.to_string();
                }
                WatchEvent::Error(status) => {
                    warn!(
                        "watch returned an error ({} {}): {}",
                        status.code, status.reason, status.message
                    );
                }
            }
        }
    }

    info!("shutdown requested, stopping pod watcher");

    Ok(summary)
}
