use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::{api::PostParams, Api, Client, ResourceExt as _};
use tracing::{debug, info};

use crate::{error::AnnotateError, watcher::WATCH_NAMESPACE};

pub const ANNOTATION_KEY: &str = "annotatedBy";
pub const ANNOTATION_VALUE: &str = "podAnnotator";

/// Submits a full pod object back to the cluster.
///
/// The pod's resource version travels with the object, so the API server
/// rejects the write if the pod changed since it was observed.
pub trait PodUpdater {
    async fn replace(&self, namespace: &str, name: &str, pod: &Pod) -> Result<Pod, kube::Error>;
}

impl PodUpdater for Client {
    async fn replace(&self, namespace: &str, name: &str, pod: &Pod) -> Result<Pod, kube::Error> {
        Api::<Pod>::namespaced(self.clone(), namespace)
            .replace(name, &PostParams::default(), pod)
            .await
    }
}

/// Overwrites the whole annotation map with our single marker entry.
/// Annotations already present on the pod are dropped.
pub fn set_annotation(pod: &mut Pod) {
    *pod.annotations_mut() = BTreeMap::from([(
        ANNOTATION_KEY.to_string(),
        ANNOTATION_VALUE.to_string(),
    )]);
}

/// Marks `pod` as annotated and writes it back with exactly one update request.
///
/// Returns the object as persisted by the server.
pub async fn annotate<U: PodUpdater>(pods: &U, mut pod: Pod) -> Result<Pod, AnnotateError> {
    let name = pod.metadata.name.clone().ok_or(AnnotateError::MissingName)?;
    let namespace = pod
        .namespace()
        .unwrap_or_else(|| WATCH_NAMESPACE.to_string());

    set_annotation(&mut pod);
    debug!("replacing pod {name} in {namespace}");

    let updated = pods.replace(&namespace, &name, &pod).await?;

    info!(
        "Annotations of the pod after update: {:?}",
        updated.annotations()
    );

    Ok(updated)
}


#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::{api::core::v1::Pod, serde_json::json};
    use kube::ResourceExt as _;

    use super::{annotate, testing::RecordingPods, ANNOTATION_KEY, ANNOTATION_VALUE};
    use crate::error::AnnotateError;

    fn pod(name: &str, namespace: &str, annotations: &[(&str, &str)]) -> Pod {
        let annotations: BTreeMap<_, _> = annotations.iter().copied().collect();

        k8s_openapi::serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "resourceVersion": "1",
                "annotations": annotations,
            },
        }))
        .unwrap()
    }

    fn expected() -> BTreeMap<String, String> {
        BTreeMap::from([(ANNOTATION_KEY.to_string(), ANNOTATION_VALUE.to_string())])
    }

    #[tokio::test]
    async fn replaces_existing_annotations() {
        let pods = RecordingPods::default();
        let web = pod("web-1", "default", &[("team", "payments"), ("annotatedBy", "someone")]);

        let updated = annotate(&pods, web).await.unwrap();

        assert_eq!(updated.annotations(), &expected());

        let submitted = pods.submitted.borrow();
        assert_eq!(submitted.len(), 1);

        let (namespace, name, sent) = &submitted[0];
        assert_eq!(namespace, "default");
        assert_eq!(name, "web-1");
        assert_eq!(sent.annotations(), &expected());
        assert_eq!(sent.resource_version().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn annotating_twice_is_stable() {
        let pods = RecordingPods::default();

        let once = annotate(&pods, pod("web-1", "default", &[])).await.unwrap();
        let twice = annotate(&pods, once).await.unwrap();

        assert_eq!(twice.annotations(), &expected());
        assert_eq!(pods.submitted.borrow().len(), 2);
    }

    #[tokio::test]
    async fn nameless_pod_is_not_submitted() {
        let pods = RecordingPods::default();
        let mut nameless = pod("web-1", "default", &[]);
        nameless.metadata.name = None;

        let result = annotate(&pods, nameless).await;

        assert!(matches!(result, Err(AnnotateError::MissingName)));
        assert!(pods.submitted.borrow().is_empty());
    }

    #[tokio::test]
    async fn missing_namespace_uses_watched_namespace() {
        let pods = RecordingPods::default();
        let mut web = pod("web-1", "default", &[]);
        web.metadata.namespace = None;

        annotate(&pods, web).await.unwrap();

        assert_eq!(pods.submitted.borrow()[0].0, "default");
    }

    #[tokio::test]
    async fn conflict_is_reported() {
        let pods = RecordingPods::conflicting_on(&["web-1"]);

        let result = annotate(&pods, pod("web-1", "default", &[])).await;

        match result {
            Err(AnnotateError::Api(kube::Error::Api(response))) => assert_eq!(response.code, 409),
            other => panic!("expected a conflict, got {other:?}"),
        }
        assert_eq!(pods.submitted_names(), vec!["web-1"]);
    }
}
