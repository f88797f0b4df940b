use serde::{Deserialize, Serialize};

use crate::annotations::{self, Annotations};
use crate::command_definitions::{Command, CommandSet};
use crate::error::Result;
use crate::merge::merge;

/// The commands wrapped around one tunnel: `pre` before it opens, `post` once it is ready
/// and the main `command` last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hooks {
    pub pre: CommandSet,
    pub post: CommandSet,
    pub command: Option<Command>,
}

/// Caller-supplied hook overrides, merged into the declared sets.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HookOverrides {
    #[serde(default)]
    pub pre: CommandSet,
    #[serde(default)]
    pub post: CommandSet,
}

impl HookOverrides {
    /// Appends `later` to `self`; later overrides are applied after earlier ones.
    #[must_use]
    pub fn chain(self, later: HookOverrides) -> HookOverrides {
        let mut pre = self.pre.0;
        pre.extend(later.pre.0);
        let mut post = self.post.0;
        post.extend(later.post.0);

        HookOverrides {
            pre: CommandSet(pre),
            post: CommandSet(post),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }
}

/// Builds the main command from the declared one and the configured program prefix.
///
/// A non-empty prefix replaces the declared program and keeps the declared trailing
/// arguments. The main command always runs interactively.
fn main_command(declared: Option<Command>, prefix: &[String]) -> Option<Command> {
    let command = match (declared, prefix.is_empty()) {
        (Some(declared), true) => declared,
        (Some(mut declared), false) => {
            declared.command = prefix
                .iter()
                .cloned()
                .chain(declared.command.into_iter().skip(1))
                .collect();
            declared
        }
        (None, false) => Command {
            command: prefix.to_vec(),
            ..Command::default()
        },
        (None, true) => return None,
    };

    Some(Command {
        interactive: true,
        ..command
    })
}

impl Hooks {
    /// Reads the declared hooks from `annotations`, applying the main command `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the hook annotations is not valid JSON.
    pub fn from_annotations(annotations: &Annotations, prefix: &[String]) -> Result<Self> {
        Ok(Self {
            pre: annotations::parse_commands(annotations, annotations::PRE_CONNECT)?,
            post: annotations::parse_commands(annotations, annotations::POST_CONNECT)?,
            command: main_command(annotations::parse_command(annotations)?, prefix),
        })
    }

    /// Merges `overrides` into the pre and post sets.
    ///
    /// # Errors
    ///
    /// Returns a merge validation error if a positioned override has no target.
    pub fn with_overrides(self, overrides: &HookOverrides) -> Result<Self> {
        Ok(Self {
            pre: merge(&self.pre, &overrides.pre)?,
            post: merge(&self.post, &overrides.post)?,
            command: self.command,
        })
    }
}
