use std::path::PathBuf;

use kube::config::{InClusterError, KubeconfigError};

/// Fatal errors. Any of these ends the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("failed to watch pods in namespace {namespace}: {source}")]
    Watch {
        namespace: &'static str,
        #[source]
        source: kube::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("in-cluster configuration unavailable: {0}")]
    InCluster(#[from] InClusterError),

    #[error("failed to load kubeconfig {}: {source}", path.display())]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: KubeconfigError,
    },

    #[error("no credential source configured")]
    NoCredentials,

    #[error("failed to build kubernetes client: {0}")]
    Client(#[source] kube::Error),
}

/// Failure to annotate a single pod. Logged by the watch loop, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("pod has no name")]
    MissingName,

    #[error("update rejected: {0}")]
    Api(#[from] kube::Error),
}
