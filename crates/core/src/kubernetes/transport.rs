use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::kubernetes::{Connection, Transport};
use crate::ports::TunnelTarget;

/// Completes once the session behind an upstream stream has fully ended.
type Finished = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serves a local listener, opening one pod port-forward per accepted connection.
pub struct PortForwarder {
    client: Client,
}

impl PortForwarder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn proxy<S>(mut local: TcpStream, mut upstream: S, finished: Finished, stop: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut local, &mut upstream) => match copied {
            Ok((sent, received)) => debug!("Connection closed after {sent} bytes out, {received} bytes in"),
            Err(e) => warn!("Error copying connection data: {e}"),
        },
        () = stop.cancelled() => debug!("Closing connection on stop"),
    }

    drop(upstream);
    finished.await;
}

fn reap(finished: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        warn!("Connection task failed: {e}");
    }
}

/// Accepts connections on `listener` until `stop` fires, proxying each through a stream
/// from `open`.
///
/// A connection whose upstream cannot be opened is logged and dropped; the listener
/// keeps serving.
async fn serve<S, F, Fut>(
    listener: TcpListener,
    pod: &str,
    remote: u16,
    stop: CancellationToken,
    open: F,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(S, Finished)>>,
{
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|e| Error::forward(pod, e))?;
                debug!("Handling connection for {remote} from {peer}");

                match open().await {
                    Ok((upstream, finished)) => {
                        connections.spawn(proxy(stream, upstream, finished, stop.clone()));
                    }
                    Err(e) => warn!("Dropping connection from {peer}: {e}"),
                }
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => reap(finished),
        }
    }

    while let Some(finished) = connections.join_next().await {
        reap(finished);
    }

    Ok(())
}

#[async_trait]
impl Transport for PortForwarder {
    async fn establish(
        &self,
        target: TunnelTarget,
        stop: CancellationToken,
        ready: oneshot::Sender<Connection>,
    ) -> Result<()> {
        let requested = target.ports.local;
        let remote = target.ports.remote;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, requested))
            .await
            .map_err(|original| Error::Bind {
                port: requested,
                original,
            })?;
        let local = listener
            .local_addr()
            .map_err(|original| Error::Bind {
                port: requested,
                original,
            })?
            .port();

        info!("Forwarding from 127.0.0.1:{local} -> {remote}");

        if ready.send(Connection { local, remote }).is_err() {
            debug!("Nobody is waiting for the tunnel to become ready");
        }

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let pod = target.pod.clone();

        serve(listener, &target.pod, remote, stop, move || {
            let pods = pods.clone();
            let pod = pod.clone();

            async move {
                let mut forwarder = pods
                    .portforward(&pod, &[remote])
                    .await
                    .map_err(|e| Error::forward(&pod, e))?;
                let upstream = forwarder
                    .take_stream(remote)
                    .ok_or_else(|| Error::forward(&pod, "port-forward stream was not opened"))?;

                let finished: Finished = Box::pin(async move {
                    if let Err(e) = forwarder.join().await {
                        warn!("Port-forward stream ended with an error: {e}");
                    }
                });

                Ok((upstream, finished))
            }
        })
        .await?;

        debug!("Stopped tunnel to {}", target.pod);

        Ok(())
    }
}
