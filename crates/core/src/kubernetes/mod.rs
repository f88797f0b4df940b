//! Cluster collaborators: finding a connectable pod and carrying tunnel bytes to it.
//!
//! The orchestrator only sees the [`ResourceLookup`] and [`Transport`] traits, so tests can
//! substitute in-process fakes for a real cluster.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::config::KubeConfigOptions;
use kube::Client;
use log::debug;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::ports::{PortSource, TunnelTarget};

pub mod lookup;
pub mod transport;

pub use lookup::KubeLookup;
pub use transport::PortForwarder;

/// How long to wait for an attachable pod when no timeout is given.
pub const DEFAULT_POD_TIMEOUT: Duration = Duration::from_secs(30);

/// A resource reference resolved down to one connectable pod.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    /// The object whose declared ports the port request is resolved against.
    pub ports: PortSource,
    pub pod: Pod,
}

/// The ports a live tunnel actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub local: u16,
    pub remote: u16,
}

#[async_trait]
pub trait ResourceLookup: Send + Sync {
    /// Resolves `resource` (`TYPE/NAME` or a pod name) in `namespace`, waiting up to
    /// `timeout` for an attachable pod.
    async fn resolve(
        &self,
        resource: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<ResolvedResource>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the tunnel and serves it until `stop` fires or the transport fails.
    ///
    /// `ready` is sent once the local side is listening, carrying the bound ports.
    async fn establish(
        &self,
        target: TunnelTarget,
        stop: CancellationToken,
        ready: oneshot::Sender<Connection>,
    ) -> Result<()>;
}

/// Builds a cluster client from the local kubeconfig, optionally for a specific context.
///
/// # Errors
///
/// Returns an error if no usable configuration is found or the client cannot be built.
pub async fn connect(context: Option<&str>) -> Result<Client> {
    let config = match context {
        Some(context) => {
            debug!("Loading kubeconfig context `{context}`");
            let options = KubeConfigOptions {
                context: Some(context.to_string()),
                ..KubeConfigOptions::default()
            };
            kube::Config::from_kubeconfig(&options)
                .await
                .map_err(|e| Error::KubeConfig(e.to_string()))?
        }
        None => kube::Config::infer()
            .await
            .map_err(|e| Error::KubeConfig(e.to_string()))?,
    };

    Ok(Client::try_from(config)?)
}
