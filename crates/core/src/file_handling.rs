//! Reading the local overrides file.
//!
//! The overrides file lets an operator keep personal arguments, configuration and hook
//! overrides outside the cluster. It sits between the declared values and the command
//! line in precedence.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command_definitions::{Args, CommandSet};
use crate::config::PartialConfig;
use crate::error::{Error, Result};
use crate::hooks::HookOverrides;
use crate::merge::OverrideKind;

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocalOverrides {
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub config: PartialConfig,
    #[serde(default)]
    pub pre: CommandSet,
    #[serde(default)]
    pub post: CommandSet,
}

impl LocalOverrides {
    pub fn hooks(&self) -> HookOverrides {
        HookOverrides {
            pre: self.pre.clone(),
            post: self.post.clone(),
        }
    }
}

fn get_reader(file_description: &str, path: &str) -> Result<File> {
    File::open(path).map_err(|e| Error::io_error(file_description.to_string(), path.to_string(), e))
}

fn validate_override_ids(commands: &CommandSet) -> Result<()> {
    for command in commands {
        OverrideKind::parse(&command.id)?;
    }

    Ok(())
}

/// Loads the local overrides file.
///
/// # Arguments
///
/// * `overrides_path` - Path to the YAML overrides file
/// * `explicit` - Whether the path was given by the user rather than defaulted
///
/// # Returns
///
/// The parsed overrides, or `None` when the default file does not exist.
///
/// # Errors
///
/// Returns an error if:
/// - An explicitly requested file does not exist or cannot be read
/// - The YAML is malformed or has unknown keys
/// - A hook override has a malformed positioned ID
///
/// # Examples
///
/// ```no_run
/// use exec_forward_core::config::get_overrides_path;
/// use exec_forward_core::file_handling::get_local_overrides;
///
/// let (path, explicit) = get_overrides_path(&None);
/// if let Some(overrides) = get_local_overrides(&path, explicit)? {
///     println!("{} pre-connect overrides", overrides.pre.len());
/// }
/// # Ok::<(), exec_forward_core::error::Error>(())
/// ```
pub fn get_local_overrides(overrides_path: &str, explicit: bool) -> Result<Option<LocalOverrides>> {
    if !explicit && !Path::new(overrides_path).exists() {
        return Ok(None);
    }

    let reader = get_reader("overrides", overrides_path)?;

    let overrides: LocalOverrides = serde_yaml::from_reader(reader).map_err(|e| {
        Error::yaml_error(
            "reading".to_string(),
            "overrides".to_string(),
            overrides_path.to_string(),
            e,
        )
    })?;

    validate_override_ids(&overrides.pre)?;
    validate_override_ids(&overrides.post)?;

    Ok(Some(overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", content).unwrap();
        temp_file
    }

    #[test]
    fn test_missing_default_file_is_none() {
        let result = get_local_overrides("/this/path/does/not/exist.yml", false).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = get_local_overrides("/this/path/does/not/exist.yml", true);
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn test_valid_overrides() {
        let temp_file = write_temp(
            r#"
args:
  username: admin
config:
  verbose: true
  command: ["pgcli"]
pre:
  - id: "pre:token:login"
    command: ["echo", "login"]
"#,
        );
        let temp_path = temp_file.path().to_str().unwrap();

        let overrides = get_local_overrides(temp_path, true).unwrap().unwrap();
        assert_eq!(overrides.args.get("username"), Some("admin"));
        assert_eq!(overrides.config.verbose, Some(true));
        assert_eq!(overrides.config.command, Some(vec!["pgcli".to_string()]));
        assert_eq!(overrides.hooks().pre.ids().collect::<Vec<_>>(), ["pre:token:login"]);
        assert!(overrides.post.is_empty());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let temp_file = write_temp("colour: blue\n");
        let temp_path = temp_file.path().to_str().unwrap();

        let result = get_local_overrides(temp_path, true);
        assert!(matches!(result, Err(Error::Yaml { .. })));
    }

    #[test]
    fn test_malformed_positioned_id() {
        let temp_file = write_temp(
            r#"
post:
  - id: "post:"
    command: ["echo"]
"#,
        );
        let temp_path = temp_file.path().to_str().unwrap();

        let result = get_local_overrides(temp_path, false);
        assert!(matches!(result, Err(Error::PositionedFormat(_))));
    }
}
