use std::path::PathBuf;

use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::{debug, info, warn};

use crate::error::BootstrapError;

/// A place cluster credentials can come from, tried in order by [`load_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Service account token and CA mounted into the pod, plus the
    /// `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` environment.
    InCluster,
    /// A kubeconfig file, using its current context.
    Kubeconfig(PathBuf),
}

impl CredentialSource {
    pub async fn try_load(&self) -> Result<Config, BootstrapError> {
        match self {
            CredentialSource::InCluster => Ok(Config::incluster()?),
            CredentialSource::Kubeconfig(path) => {
                let kubeconfig =
                    Kubeconfig::read_from(path).map_err(|source| BootstrapError::Kubeconfig {
                        path: path.clone(),
                        source,
                    })?;

                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|source| BootstrapError::Kubeconfig {
                        path: path.clone(),
                        source,
                    })
            }
        }
    }
}

/// `$HOME/.kube/config`, if a home directory can be found.
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kube").join("config"))
}

/// In-cluster identity first, then the kubeconfig file if we know of one.
pub fn credential_chain(kubeconfig: Option<PathBuf>) -> Vec<CredentialSource> {
    std::iter::once(CredentialSource::InCluster)
        .chain(kubeconfig.map(CredentialSource::Kubeconfig))
        .collect()
}

/// Returns the configuration from the first source in `chain` that yields one.
/// When all of them fail, the last failure is returned.
pub async fn load_config(chain: &[CredentialSource]) -> Result<Config, BootstrapError> {
    let mut last_error = BootstrapError::NoCredentials;

    for source in chain {
        match source.try_load().await {
            Ok(config) => {
                debug!("loaded cluster configuration from {source:?}");
                return Ok(config);
            }
            Err(e @ BootstrapError::InCluster(_)) => {
                debug!("{e}, trying next credential source");
                last_error = e;
            }
            Err(e) => {
                warn!("{e}");
                last_error = e;
            }
        }
    }

    Err(last_error)
}

pub fn build_client(config: Config) -> Result<Client, BootstrapError> {
    Client::try_from(config).map_err(BootstrapError::Client)
}

/// Resolves credentials and builds a client bound to them.
pub async fn connect(kubeconfig: Option<PathBuf>) -> Result<Client, BootstrapError> {
    let config = load_config(&credential_chain(kubeconfig)).await?;
    info!("connecting to cluster at {}", config.cluster_url);

    build_client(config)
}
