use exec_forward_core::command_definitions::{Args as TemplateArgs, Command, CommandSet};
use exec_forward_core::config::PartialConfig;
use exec_forward_core::error::Error::{ArgFormat, EmptyCommand};
use exec_forward_core::error::Result;
use exec_forward_core::hooks::HookOverrides;
use exec_forward_core::merge::OverrideKind;

use crate::arguments::Overrides;
use crate::cli_args::Args;

/// Parses `key=value` arguments. Values may themselves contain `=`.
fn parse_arguments(raw: &[String]) -> Result<TemplateArgs> {
    raw.iter()
        .map(|argument| match argument.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(ArgFormat(argument.clone())),
        })
        .collect()
}

fn split_command(command: &str) -> Result<Vec<String>> {
    let parts: Vec<String> = command.split(',').map(ToString::to_string).collect();

    if parts.iter().all(String::is_empty) {
        return Err(EmptyCommand);
    }

    Ok(parts)
}

/// Parses `[id=]comma,separated,command` overrides.
///
/// Text before the first `=` is an ID only when it has no comma, so commands whose
/// arguments contain `=` can still be given without an ID.
fn parse_commands(raw: &[String]) -> Result<CommandSet> {
    let mut commands = Vec::with_capacity(raw.len());

    for entry in raw {
        let (id, command) = match entry.split_once('=') {
            Some((id, command)) if !id.contains(',') => (id, command),
            _ => ("", entry.as_str()),
        };

        OverrideKind::parse(id)?;

        commands.push(Command {
            id: id.to_string(),
            command: split_command(command)?,
            ..Command::default()
        });
    }

    Ok(CommandSet(commands))
}

/// A flag pair only overrides the declared value when one of them is given.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

fn get_config(args: &Args) -> Result<PartialConfig> {
    let command = args.command.as_deref().map(split_command).transpose()?;

    Ok(PartialConfig {
        local_port: None,
        verbose: switch(args.verbose, args.no_verbose),
        persist: switch(args.persist, args.no_persist),
        command,
    })
}

/// Parses every override flag of `args`.
///
/// # Errors
///
/// Returns an error if:
/// - An `--arg` value is not in key=value format
/// - A command flag is empty
/// - A command flag has a malformed positioned ID
pub fn process_command_line(args: &Args) -> Result<Overrides> {
    Ok(Overrides {
        config: get_config(args)?,
        args: parse_arguments(&args.arguments)?,
        hooks: HookOverrides {
            pre: parse_commands(&args.pre_commands)?,
            post: parse_commands(&args.post_commands)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use exec_forward_core::error::Error;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_arguments() {
        let parsed = parse_arguments(&strings(&["user=admin", "dsn=host=db port=5432"])).unwrap();
        assert_eq!(parsed.get("user"), Some("admin"));
        assert_eq!(parsed.get("dsn"), Some("host=db port=5432"));
    }

    #[test]
    fn test_parse_arguments_format() {
        assert!(matches!(
            parse_arguments(&strings(&["novalue"])),
            Err(Error::ArgFormat(_))
        ));
        assert!(matches!(
            parse_arguments(&strings(&["=value"])),
            Err(Error::ArgFormat(_))
        ));
    }

    #[test]
    fn test_parse_commands() {
        let commands = parse_commands(&strings(&[
            "echo,hello",
            "token=aws,sts,get-caller-identity",
            "pre:token:login=echo,login",
            "env,FOO=bar",
        ]))
        .unwrap();

        assert_eq!(
            commands.ids().collect::<Vec<_>>(),
            ["", "token", "pre:token:login", ""]
        );
        assert_eq!(commands.0[0].command, ["echo", "hello"]);
        assert_eq!(commands.0[1].command, ["aws", "sts", "get-caller-identity"]);
        assert_eq!(commands.0[3].command, ["env", "FOO=bar"]);
    }

    #[test]
    fn test_parse_commands_errors() {
        assert!(matches!(
            parse_commands(&strings(&["token="])),
            Err(Error::EmptyCommand)
        ));
        assert!(matches!(
            parse_commands(&strings(&["post:=echo,hi"])),
            Err(Error::PositionedFormat(_))
        ));
    }

    #[test]
    fn test_get_config_leaves_unset_flags_empty() {
        let args = Args::parse_from(["kubectl-exec_forward", "web-0", "80"]);
        assert_eq!(get_config(&args).unwrap(), PartialConfig::default());

        let args = Args::parse_from([
            "kubectl-exec_forward",
            "web-0",
            "80",
            "--verbose",
            "--command",
            "pgcli,--less-chatty",
        ]);
        let config = get_config(&args).unwrap();
        assert_eq!(config.verbose, Some(true));
        assert_eq!(config.persist, None);
        assert_eq!(config.command, Some(strings(&["pgcli", "--less-chatty"])));
    }

    #[test]
    fn test_no_persist_overrides_declared_persist() {
        let declared = PartialConfig {
            persist: Some(true),
            verbose: Some(true),
            ..PartialConfig::default()
        };
        let args = Args::parse_from([
            "kubectl-exec_forward",
            "web-0",
            "80",
            "--no-persist",
            "--no-verbose",
        ]);

        let config = declared.merge(get_config(&args).unwrap()).resolve();
        assert!(!config.persist);
        assert!(!config.verbose);
    }
}
