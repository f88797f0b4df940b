//! The tunnel lifecycle: resolve the target, run pre-connect hooks, open the tunnel, run
//! post-connect hooks and the main command once it is ready, then shut everything down.
//!
//! Every run owns its signals. `shutdown` is the caller's interrupt, `stop` ends the
//! tunnel, and a child of `shutdown` keeps further hook commands from starting.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{spawn_blocking, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::annotations;
use crate::command_definitions::{Args, Command, CommandSet, Outputs};
use crate::config::{Config, PartialConfig};
use crate::error::{Error, Result};
use crate::execution::{IoStreams, SetFailure};
use crate::hooks::{HookOverrides, Hooks};
use crate::kubernetes::{Connection, ResourceLookup, Transport, DEFAULT_POD_TIMEOUT};
use crate::ports::{self, TunnelTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    PreHooks,
    Connecting,
    Connected,
    PostHooksAndMain,
    Done,
    Failed,
    Cancelled,
}

impl Display for Phase {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::PreHooks => "pre-hooks",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::PostHooksAndMain => "post-hooks and main command",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        formatter.write_str(name)
    }
}

fn enter(phase: &mut Phase, next: Phase) {
    debug!("Run phase: {phase} -> {next}");
    *phase = next;
}

/// Everything a run needs from the caller. `config`, `args` and `hooks` are the local
/// overrides, already layered file first and command line last.
#[derive(Debug, Clone)]
pub struct Request {
    pub resource: String,
    pub namespace: String,
    pub port: String,
    pub pod_timeout: Duration,
    pub config: PartialConfig,
    pub args: Args,
    pub hooks: HookOverrides,
}

impl Request {
    pub fn new(resource: &str, namespace: &str, port: &str) -> Self {
        Self {
            resource: resource.to_string(),
            namespace: namespace.to_string(),
            port: port.to_string(),
            pod_timeout: DEFAULT_POD_TIMEOUT,
            config: PartialConfig::default(),
            args: Args::default(),
            hooks: HookOverrides::default(),
        }
    }
}

/// How the connected stage ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connected {
    MainExited,
    HooksDone,
}

enum HookEvent {
    Ready(Connection),
    Finished(Result<Connected>),
}

/// Values the hook task owns once the tunnel is ready.
struct ConnectedStage {
    post: CommandSet,
    command: Option<Command>,
    config: Config,
    args: Args,
    outputs: Outputs,
    streams: IoStreams,
    cancel: CancellationToken,
}

impl ConnectedStage {
    /// Runs the post-connect hooks, then the main command. Blocks until both are done.
    fn run(self) -> Result<Connected> {
        let outputs = self.post.execute_cancellable(
            &self.config,
            &self.args,
            &self.outputs,
            &self.streams,
            &self.cancel,
        )?;

        let Some(command) = self.command else {
            return Ok(Connected::HooksDone);
        };

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        command.execute(&self.config, &self.args, &outputs, &self.streams)?;

        Ok(Connected::MainExited)
    }
}

/// Runs tunnels with hooks, using `lookup` to find pods and `transport` to carry bytes.
pub struct Forwarder<L, T> {
    lookup: L,
    transport: Arc<T>,
}

impl<L, T> Forwarder<L, T>
where
    L: ResourceLookup,
    T: Transport + 'static,
{
    pub fn new(lookup: L, transport: T) -> Self {
        Self {
            lookup,
            transport: Arc::new(transport),
        }
    }

    /// Runs one session to completion.
    ///
    /// Returns `Ok` when the main command exits (unless persisting) or when `shutdown`
    /// fires. Interrupting is never an error.
    ///
    /// # Errors
    ///
    /// Returns the first failure observed: target resolution, configuration, override
    /// merging, a hook or the main command, or the tunnel itself. The tunnel is asked to
    /// stop whenever it may still be running.
    pub async fn run(
        &self,
        request: Request,
        streams: IoStreams,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut phase = Phase::Resolving;

        let result = self.run_phases(&mut phase, request, streams, shutdown).await;

        match &result {
            Ok(()) if phase == Phase::Cancelled => {}
            Ok(()) => enter(&mut phase, Phase::Done),
            Err(_) => enter(&mut phase, Phase::Failed),
        }

        result
    }

    async fn run_phases(
        &self,
        phase: &mut Phase,
        request: Request,
        streams: IoStreams,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let resolved = tokio::select! {
            resolved = self.lookup.resolve(&request.resource, &request.namespace, request.pod_timeout) => resolved?,
            () = shutdown.cancelled() => {
                enter(phase, Phase::Cancelled);
                return Ok(());
            }
        };

        let pod_annotations = resolved.pod.metadata.annotations.clone().unwrap_or_default();
        let pod_name = resolved
            .pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidResource(request.resource.clone()))?;

        let mut config = annotations::parse_config(&pod_annotations)?
            .merge(request.config)
            .resolve();
        let args = annotations::parse_args(&pod_annotations)?.merge(request.args);
        let hooks = Hooks::from_annotations(&pod_annotations, &config.command)?
            .with_overrides(&request.hooks)?;

        let mapping = ports::resolve(
            &request.port,
            &resolved.ports,
            &resolved.pod,
            config.local_port,
        )?;
        config.local_port = mapping.local;

        let target = TunnelTarget {
            pod: pod_name,
            namespace: request.namespace,
            ports: mapping,
        };

        enter(phase, Phase::PreHooks);

        let hook_cancel = shutdown.child_token();
        let outputs = {
            let pre = hooks.pre;
            let config = config.clone();
            let args = args.clone();
            let streams = streams.clone();
            let cancel = hook_cancel.clone();

            spawn_blocking(move || {
                pre.execute_cancellable(&config, &args, &Outputs::default(), &streams, &cancel)
            })
            .await?
        };

        let outputs = match outputs {
            Ok(outputs) => outputs,
            // Once interrupted, a hook failing is reported as the interrupt
            Err(SetFailure { error, .. })
                if shutdown.is_cancelled() || matches!(error, Error::Cancelled) =>
            {
                debug!("Pre-connect hooks interrupted: {error}");
                enter(phase, Phase::Cancelled);
                return Ok(());
            }
            Err(failure) => return Err(failure.error),
        };

        if shutdown.is_cancelled() {
            enter(phase, Phase::Cancelled);
            return Ok(());
        }

        enter(phase, Phase::Connecting);

        let stop = CancellationToken::new();
        let (ready_sender, ready_receiver) = oneshot::channel();
        let pod = target.pod.clone();

        let mut tunnel: JoinHandle<Result<()>> = {
            let transport = Arc::clone(&self.transport);
            let stop = stop.clone();
            tokio::spawn(async move { transport.establish(target, stop, ready_sender).await })
        };

        let (event_sender, mut events) = mpsc::channel::<HookEvent>(2);
        let main_configured = hooks.command.is_some();
        let persist = config.persist;

        let mut stage = ConnectedStage {
            post: hooks.post,
            command: hooks.command,
            config,
            args,
            outputs,
            streams,
            cancel: hook_cancel.clone(),
        };

        tokio::spawn(async move {
            let Ok(connection) = ready_receiver.await else {
                debug!("Tunnel ended before becoming ready");
                return;
            };

            if event_sender.send(HookEvent::Ready(connection)).await.is_err() {
                return;
            }

            stage.config.local_port = connection.local;

            let outcome = match spawn_blocking(move || stage.run()).await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::from(e)),
            };

            if event_sender.send(HookEvent::Finished(outcome)).await.is_err() {
                debug!("Run already finished, dropping hook outcome");
            }
        });

        let mut tunnel_finished = false;
        let result = loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    enter(phase, Phase::Cancelled);
                    break Ok(());
                }
                Some(event) = events.recv() => match event {
                    HookEvent::Ready(connection) => {
                        enter(phase, Phase::Connected);
                        info!("Tunnel ready: 127.0.0.1:{} -> {}", connection.local, connection.remote);
                        enter(phase, Phase::PostHooksAndMain);
                    }
                    HookEvent::Finished(Ok(Connected::MainExited)) if !persist => {
                        debug!("Main command exited");
                        break Ok(());
                    }
                    HookEvent::Finished(Ok(_)) => {
                        if main_configured {
                            info!("Main command exited, keeping the tunnel open");
                        } else {
                            info!("Post-connect hooks done, keeping the tunnel open");
                        }
                    }
                    HookEvent::Finished(Err(e))
                        if shutdown.is_cancelled() || matches!(e, Error::Cancelled) =>
                    {
                        debug!("Connected stage interrupted: {e}");
                        enter(phase, Phase::Cancelled);
                        break Ok(());
                    }
                    HookEvent::Finished(Err(e)) => break Err(e),
                },
                finished = &mut tunnel => {
                    tunnel_finished = true;
                    break match finished {
                        Ok(result) => result,
                        Err(e) => Err(Error::forward(&pod, e)),
                    };
                }
            }
        };

        hook_cancel.cancel();
        stop.cancel();

        if !tunnel_finished {
            match tunnel.await {
                Ok(Err(e)) => debug!("Tunnel ended with an error during shutdown: {e}"),
                Err(e) => debug!("Tunnel task failed during shutdown: {e}"),
                Ok(Ok(())) => debug!("Tunnel stopped"),
            }
        }

        result
    }
}
