use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use exec_forward_core::error::Result;
use exec_forward_core::execution::IoStreams;
use exec_forward_core::forward::{Forwarder, Request};
use exec_forward_core::kubernetes::{self, KubeLookup, PortForwarder};
use exec_forward_core::{config, file_handling};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::arguments::Provider;
use crate::cli_args::Args;

mod arguments;
mod cli_args;

/// Cancels `shutdown` on the first Ctrl-C.
fn watch_interrupt(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {e}"),
        }
    });
}

async fn execute(args: Args) -> Result<()> {
    let cli = args.get_overrides()?;

    let (overrides_path, explicit) = config::get_overrides_path(&args.overrides_path);
    debug!("Overrides path: `{}`", overrides_path);
    let local = file_handling::get_local_overrides(&overrides_path, explicit)?.unwrap_or_default();

    let client = kubernetes::connect(args.context.as_deref()).await?;
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_string());

    let hooks = local.hooks().chain(cli.hooks);
    let request = Request {
        resource: args.resource,
        namespace,
        port: args.port,
        pod_timeout: Duration::from_secs(args.pod_timeout),
        config: local.config.merge(cli.config),
        args: local.args.merge(cli.args),
        hooks,
    };

    let shutdown = CancellationToken::new();
    watch_interrupt(shutdown.clone());

    let forwarder = Forwarder::new(KubeLookup::new(client.clone()), PortForwarder::new(client));
    forwarder.run(request, IoStreams::stdio(), shutdown).await
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match execute(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
