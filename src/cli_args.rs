//! Command-line argument parsing.
//!
//! This module defines the command-line interface of the kubectl plugin using the
//! `clap` crate.

use clap::Parser;
use exec_forward_core::error::Result;

use crate::arguments::{process_command_line, Overrides, Provider};

/// Command-line arguments for `kubectl exec-forward`.
///
/// # Examples
///
/// ```bash
/// kubectl exec-forward svc/postgres 0:5432 -n data -a username=admin --persist
/// ```
#[derive(Parser, Debug)] // requires `derive` feature
#[command(name = "kubectl-exec_forward", version, term_width = 0)]
#[command(about = "Port forward to Kubernetes resources and run the hook commands found in their annotations")]
pub struct Args {
    /// The resource to forward to, as `TYPE/NAME` or a pod name.
    ///
    /// TYPE is one of pod, service, deployment, statefulset or replicaset (or their
    /// usual kubectl short names).
    pub resource: String,

    /// The port mapping, as `[LOCAL:]REMOTE`.
    ///
    /// REMOTE may be a number or a port name. A LOCAL of `0` picks a free port.
    pub port: String,

    /// Namespace of the resource. Defaults to the kubeconfig context's namespace.
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// The kubeconfig context to use.
    #[arg(long)]
    pub context: Option<String>,

    /// Seconds to wait for an attachable pod.
    #[arg(long, default_value_t = 30)]
    pub pod_timeout: u64,

    /// Arguments passed to hook templates in the format key=value.
    ///
    /// Multiple arguments can be provided with repeated `-a` flags. They override the
    /// arguments declared on the pod.
    #[arg(long = "arg", short = 'a', action = clap::ArgAction::Append)]
    pub arguments: Vec<String>,

    /// Stream hook output to the console.
    #[arg(long, short = 'v', action)]
    pub verbose: bool,

    /// Do not stream hook output, even if the pod's configuration asks for it.
    #[arg(long, action, conflicts_with = "verbose")]
    pub no_verbose: bool,

    /// Keep the tunnel open after the main command exits.
    #[arg(long, short = 'p', action)]
    pub persist: bool,

    /// Close the tunnel when the main command exits, even if the pod's configuration
    /// asks to persist.
    #[arg(long, action, conflicts_with = "persist")]
    pub no_persist: bool,

    /// Program (and leading arguments) replacing the main command's program, comma separated.
    ///
    /// The declared main command's own arguments are kept after it.
    #[arg(long)]
    pub command: Option<String>,

    /// Pre-connect command to add or replace, in the format `[id=]comma,separated,command`.
    ///
    /// The id may be `pre:<target>[:<id>]` or `post:<target>[:<id>]` to insert the command
    /// before or after an existing one.
    #[arg(long = "pre-command", action = clap::ArgAction::Append)]
    pub pre_commands: Vec<String>,

    /// Post-connect command to add or replace, in the same format as `--pre-command`.
    #[arg(long = "post-command", action = clap::ArgAction::Append)]
    pub post_commands: Vec<String>,

    /// Path to the local overrides file YAML.
    ///
    /// If not provided, defaults to `~/.exec-forward/overrides.yml` when it exists.
    #[arg(long, short = 'o')]
    pub overrides_path: Option<String>,
}

impl Provider for Args {
    fn get_overrides(&self) -> Result<Overrides> {
        process_command_line(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_values() {
        let args = Args::parse_from(["kubectl-exec_forward", "svc/postgres", "5432"]);

        assert_eq!(args.resource, "svc/postgres");
        assert_eq!(args.port, "5432");
        assert!(args.namespace.is_none());
        assert!(args.context.is_none());
        assert_eq!(args.pod_timeout, 30);
        assert!(args.arguments.is_empty());
        assert!(!args.verbose);
        assert!(!args.persist);
        assert!(!args.no_verbose);
        assert!(!args.no_persist);
        assert!(args.command.is_none());
        assert!(args.pre_commands.is_empty());
        assert!(args.post_commands.is_empty());
        assert!(args.overrides_path.is_none());
    }

    #[test]
    fn test_args_short_flags() {
        let args = Args::parse_from([
            "kubectl-exec_forward",
            "web-0",
            "8080:http",
            "-n",
            "data",
            "-a",
            "username=admin",
            "-v",
            "-p",
            "-o",
            "/custom/overrides.yml",
        ]);

        assert_eq!(args.namespace, Some("data".to_string()));
        assert_eq!(args.arguments, ["username=admin"]);
        assert!(args.verbose);
        assert!(args.persist);
        assert_eq!(args.overrides_path, Some("/custom/overrides.yml".to_string()));
    }

    #[test]
    fn test_args_long_flags() {
        let args = Args::parse_from([
            "kubectl-exec_forward",
            "deploy/api",
            "0:80",
            "--namespace",
            "web",
            "--context",
            "staging",
            "--pod-timeout",
            "5",
            "--arg",
            "a=1",
            "--arg",
            "b=2",
            "--command",
            "pgcli,--less-chatty",
            "--pre-command",
            "token=echo,abc",
            "--post-command",
            "post:token=echo,done",
        ]);

        assert_eq!(args.context, Some("staging".to_string()));
        assert_eq!(args.pod_timeout, 5);
        assert_eq!(args.arguments, ["a=1", "b=2"]);
        assert_eq!(args.command, Some("pgcli,--less-chatty".to_string()));
        assert_eq!(args.pre_commands, ["token=echo,abc"]);
        assert_eq!(args.post_commands, ["post:token=echo,done"]);
    }

    #[test]
    fn test_negated_flags_conflict() {
        let args = Args::parse_from(["kubectl-exec_forward", "web-0", "80", "--no-persist"]);
        assert!(args.no_persist);

        let conflicting =
            Args::try_parse_from(["kubectl-exec_forward", "web-0", "80", "-p", "--no-persist"]);
        assert!(conflicting.is_err());
    }

    #[test]
    fn test_provider() {
        let args = Args::parse_from([
            "kubectl-exec_forward",
            "web-0",
            "80",
            "-a",
            "user=admin",
            "--pre-command",
            "echo,hello",
        ]);

        let overrides = args.get_overrides().unwrap();
        assert_eq!(overrides.args.get("user"), Some("admin"));
        assert_eq!(overrides.hooks.pre.len(), 1);
        assert_eq!(overrides.config.verbose, None);
    }
}
