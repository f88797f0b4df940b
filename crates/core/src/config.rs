//! Run configuration and configuration path utilities.
//!
//! A run's [`Config`] is assembled from several sources of [`PartialConfig`]:
//! the declarative values stored on the cluster, the local overrides file and the
//! command line. Later sources win field by field.

use serde::{Deserialize, Serialize};

/// Default path for the local overrides file
const DEFAULT_OVERRIDES_PATH: &str = "~/.exec-forward/overrides.yml";

/// Fully resolved run parameters, shared by the tunnel and every hook template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Requested local port before the tunnel is open, the bound port afterwards. `0` asks
    /// for an ephemeral port.
    pub local_port: u16,
    /// Stream hook output to the caller's terminal as well as capturing it.
    pub verbose: bool,
    /// Keep the tunnel open after the main command exits.
    pub persist: bool,
    /// Replaces the program (and any leading arguments) of the main command when non-empty.
    pub command: Vec<String>,
}

/// A configuration source where every field is optional.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub local_port: Option<u16>,
    pub verbose: Option<bool>,
    pub persist: Option<bool>,
    pub command: Option<Vec<String>>,
}

impl PartialConfig {
    /// Layers `overrides` on top of `self`; any field set in `overrides` wins.
    #[must_use]
    pub fn merge(self, overrides: PartialConfig) -> PartialConfig {
        PartialConfig {
            local_port: overrides.local_port.or(self.local_port),
            verbose: overrides.verbose.or(self.verbose),
            persist: overrides.persist.or(self.persist),
            command: overrides.command.or(self.command),
        }
    }

    /// Fills unset fields with their defaults.
    pub fn resolve(self) -> Config {
        Config {
            local_port: self.local_port.unwrap_or_default(),
            verbose: self.verbose.unwrap_or_default(),
            persist: self.persist.unwrap_or_default(),
            command: self.command.unwrap_or_default(),
        }
    }
}

/// Resolves the local overrides file path.
///
/// If a custom path is provided, uses that path. Otherwise, uses the default
/// overrides path. Shell expansions like `~` are resolved.
///
/// # Returns
///
/// The resolved path and whether it was explicitly requested.
///
/// # Examples
///
/// ```
/// use exec_forward_core::config::get_overrides_path;
///
/// let (path, explicit) = get_overrides_path(&Some("/etc/exec-forward.yml".to_string()));
/// assert_eq!(path, "/etc/exec-forward.yml");
/// assert!(explicit);
/// ```
pub fn get_overrides_path(overrides_path_arg: &Option<String>) -> (String, bool) {
    let (overrides_path, explicit) = match overrides_path_arg {
        Some(overrides_path) => (overrides_path.as_str(), true),
        None => (DEFAULT_OVERRIDES_PATH, false),
    };

    (shellexpand::tilde(overrides_path).to_string(), explicit)
}
