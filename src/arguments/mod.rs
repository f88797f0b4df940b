//! Turning command-line flags into run overrides.
//!
//! The CLI layer accepts arguments, configuration and hook overrides in compact
//! string forms; this module parses them into the typed values the core expects.

pub mod processing;

pub use processing::process_command_line;

use exec_forward_core::command_definitions::Args as TemplateArgs;
use exec_forward_core::config::PartialConfig;
use exec_forward_core::error::Result;
use exec_forward_core::hooks::HookOverrides;

/// Overrides given on the command line. Every value here wins over the overrides file
/// and over what the pod declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub config: PartialConfig,
    pub args: TemplateArgs,
    pub hooks: HookOverrides,
}

/// Trait for CLI argument structures that can produce [`Overrides`].
pub trait Provider {
    /// Parses the override flags.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument or command flag is malformed.
    fn get_overrides(&self) -> Result<Overrides>;
}
