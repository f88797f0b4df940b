//! Combining declared command sets with caller-supplied overrides.
//!
//! An override's `id` decides what it does:
//!
//! - empty: appended to the set;
//! - `pre:<target>[:<id>]` / `post:<target>[:<id>]`: inserted right before or after every
//!   command whose ID is `<target>`, under the new ID `<id>` (or anonymously);
//! - anything else: replaces the command with that ID in place, or is appended when no
//!   such command exists.
//!
//! Positioned overrides are resolved after replacements and additions, so they may target
//! a command introduced by the same batch.

use log::debug;

use crate::command_definitions::{Command, CommandSet};
use crate::error::{Error, Result};

const PRE: &str = "pre";
const POST: &str = "post";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
}

/// What an override does, parsed once from its `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideKind {
    Add,
    Replace(String),
    Insert {
        position: Position,
        target: String,
        id: String,
    },
}

impl OverrideKind {
    /// Classifies an override ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PositionedFormat`] for a `pre:`/`post:` ID with a missing target or
    /// too many parts.
    pub fn parse(id: &str) -> Result<Self> {
        if id.is_empty() {
            return Ok(Self::Add);
        }

        let position = match id.split_once(':') {
            Some((PRE, _)) => Position::Before,
            Some((POST, _)) => Position::After,
            _ => return Ok(Self::Replace(id.to_string())),
        };

        let parts: Vec<&str> = id.split(':').collect();
        match parts.as_slice() {
            [_, target] if !target.is_empty() => Ok(Self::Insert {
                position,
                target: (*target).to_string(),
                id: String::new(),
            }),
            [_, target, new_id] if !target.is_empty() => Ok(Self::Insert {
                position,
                target: (*target).to_string(),
                id: (*new_id).to_string(),
            }),
            _ => Err(Error::PositionedFormat(id.to_string())),
        }
    }
}

struct Insertion<'a> {
    position: Position,
    target: String,
    id: String,
    command: &'a Command,
}

impl Insertion<'_> {
    fn materialize(&self) -> Command {
        Command {
            id: self.id.clone(),
            ..self.command.clone()
        }
    }
}

/// Merges `overrides` into `base`, returning a new set.
///
/// # Errors
///
/// Fails without producing any commands when a positioned override is malformed or its
/// target is not in the set after replacements and additions were applied.
///
/// # Examples
///
/// ```
/// use exec_forward_core::command_definitions::{Command, CommandSet};
/// use exec_forward_core::merge::merge;
///
/// let base = CommandSet(vec![Command::new("foo", ["echo", "hello"])]);
/// let overrides = CommandSet(vec![Command::new("pre:foo", ["echo", "world"])]);
///
/// let merged = merge(&base, &overrides)?;
/// assert_eq!(merged.ids().collect::<Vec<_>>(), ["", "foo"]);
/// # Ok::<(), exec_forward_core::error::Error>(())
/// ```
pub fn merge(base: &CommandSet, overrides: &CommandSet) -> Result<CommandSet> {
    let mut current: Vec<Command> = base.0.clone();
    let mut additions: Vec<Command> = Vec::new();
    let mut unmatched: Vec<Command> = Vec::new();
    let mut insertions: Vec<Insertion> = Vec::new();

    for command in overrides {
        match OverrideKind::parse(&command.id)? {
            OverrideKind::Add => additions.push(command.clone()),
            OverrideKind::Replace(id) => {
                // Only declared commands are replaced; the base is still all of `current` here
                let mut replaced = 0;
                for existing in current.iter_mut().filter(|existing| existing.id == id) {
                    *existing = command.clone();
                    replaced += 1;
                }

                if replaced == 0 {
                    unmatched.push(command.clone());
                } else {
                    debug!("Replaced {replaced} command(s) `{id}`");
                }
            }
            OverrideKind::Insert {
                position,
                target,
                id,
            } => insertions.push(Insertion {
                position,
                target,
                id,
                command,
            }),
        }
    }

    current.extend(additions);
    current.extend(unmatched);

    if let Some(missing) = insertions
        .iter()
        .find(|insertion| !current.iter().any(|command| command.id == insertion.target))
    {
        return Err(Error::PositionedTarget(missing.target.clone()));
    }

    let mut merged = Vec::with_capacity(current.len() + insertions.len());
    for command in current {
        let spliced = |position: Position| -> Vec<Command> {
            insertions
                .iter()
                .filter(|insertion| insertion.position == position && insertion.target == command.id)
                .map(Insertion::materialize)
                .collect()
        };

        let before = spliced(Position::Before);
        let after = spliced(Position::After);

        merged.extend(before);
        merged.push(command);
        merged.extend(after);
    }

    Ok(CommandSet(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn ids(set: &CommandSet) -> Vec<&str> {
        set.ids().collect()
    }

    #[test]
    fn test_parse_override_kind() {
        assert_eq!(OverrideKind::parse("").unwrap(), OverrideKind::Add);
        assert_eq!(
            OverrideKind::parse("foo").unwrap(),
            OverrideKind::Replace("foo".to_string())
        );
        assert_eq!(
            OverrideKind::parse("prefix:foo").unwrap(),
            OverrideKind::Replace("prefix:foo".to_string())
        );
        assert_eq!(
            OverrideKind::parse("pre:foo").unwrap(),
            OverrideKind::Insert {
                position: Position::Before,
                target: "foo".to_string(),
                id: String::new(),
            }
        );
        assert_eq!(
            OverrideKind::parse("post:foo:bar").unwrap(),
            OverrideKind::Insert {
                position: Position::After,
                target: "foo".to_string(),
                id: "bar".to_string(),
            }
        );
        assert!(matches!(
            OverrideKind::parse("pre:"),
            Err(Error::PositionedFormat(_))
        ));
        assert!(matches!(
            OverrideKind::parse("post:a:b:c"),
            Err(Error::PositionedFormat(_))
        ));
    }

    #[test]
    fn test_empty_overrides_are_identity() {
        let base = CommandSet(vec![
            Command::new("a", ["echo", "a"]),
            Command::new("", ["echo", "anonymous"]),
            Command::new("b", ["echo", "b"]),
        ]);

        assert_eq!(merge(&base, &CommandSet::default()).unwrap(), base);
    }

    #[test]
    fn test_replacement_keeps_position() {
        let base = CommandSet(vec![
            Command::new("foo", ["echo", "hello"]),
            Command::new("bar", ["echo", "bar"]),
        ]);
        let overrides = CommandSet(vec![Command::new("foo", ["echo", "world"])]);

        let merged = merge(&base, &overrides).unwrap();
        assert_eq!(
            merged,
            CommandSet(vec![
                Command::new("foo", ["echo", "world"]),
                Command::new("bar", ["echo", "bar"]),
            ])
        );
    }

    #[test]
    fn test_replacement_applies_to_every_matching_command() {
        let base = CommandSet(vec![
            Command::new("login", ["echo", "first"]),
            Command::new("other", ["echo", "other"]),
            Command::new("login", ["echo", "second"]),
        ]);
        let overrides = CommandSet(vec![Command::new("login", ["echo", "replaced"])]);

        let merged = merge(&base, &overrides).unwrap();
        assert_eq!(
            merged,
            CommandSet(vec![
                Command::new("login", ["echo", "replaced"]),
                Command::new("other", ["echo", "other"]),
                Command::new("login", ["echo", "replaced"]),
            ])
        );
    }

    #[test]
    fn test_pre_insertion() {
        let base = CommandSet(vec![Command::new("foo", ["echo", "hello"])]);
        let overrides = CommandSet(vec![Command::new("pre:foo", ["echo", "world"])]);

        let merged = merge(&base, &overrides).unwrap();
        assert_eq!(
            merged,
            CommandSet(vec![
                Command::new("", ["echo", "world"]),
                Command::new("foo", ["echo", "hello"]),
            ])
        );
    }

    #[test]
    fn test_missing_target_fails_whole_merge() {
        let base = CommandSet(vec![Command::new("foo", ["echo", "hello"])]);
        let overrides = CommandSet(vec![
            Command::new("", ["echo", "fine"]),
            Command::new("pre:bar", ["echo", "world"]),
        ]);

        let error = merge(&base, &overrides).unwrap_err();
        assert!(matches!(&error, Error::PositionedTarget(target) if target == "bar"));
        assert_eq!(error.kind(), ErrorKind::MergeValidation);
    }

    #[test]
    fn test_additions_then_unmatched_replacements() {
        let base = CommandSet(vec![Command::new("a", ["echo", "a"])]);
        let overrides = CommandSet(vec![
            Command::new("x", ["echo", "x"]),
            Command::new("", ["echo", "plain"]),
            Command::new("y", ["echo", "y"]),
        ]);

        let merged = merge(&base, &overrides).unwrap();
        assert_eq!(ids(&merged), ["a", "", "x", "y"]);
    }

    #[test]
    fn test_several_insertions_around_one_target() {
        let base = CommandSet(vec![
            Command::new("a", ["echo", "a"]),
            Command::new("b", ["echo", "b"]),
        ]);
        let overrides = CommandSet(vec![
            Command::new("post:a:a2", ["echo", "a2"]),
            Command::new("pre:a:a0", ["echo", "a0"]),
            Command::new("post:a:a3", ["echo", "a3"]),
            Command::new("pre:b", ["echo", "b0"]),
        ]);

        let merged = merge(&base, &overrides).unwrap();
        assert_eq!(ids(&merged), ["a0", "a", "a2", "a3", "", "b"]);
        assert_eq!(merged.0[4].command, ["echo", "b0"]);
    }

    #[test]
    fn test_insertion_may_target_an_addition() {
        let base = CommandSet(vec![Command::new("a", ["echo", "a"])]);
        let overrides = CommandSet(vec![
            Command::new("post:new", ["echo", "after new"]),
            Command::new("new", ["echo", "new"]),
        ]);

        let merged = merge(&base, &overrides).unwrap();
        assert_eq!(ids(&merged), ["a", "new", ""]);
    }

    #[test]
    fn test_inserted_command_keeps_its_other_fields() {
        let base = CommandSet(vec![Command::new("a", ["echo", "a"])]);
        let mut inserted = Command::new("post:a:shell", ["sh"]);
        inserted.interactive = true;
        inserted.display_name = Some("shell".to_string());

        let merged = merge(&base, &CommandSet(vec![inserted])).unwrap();
        let spliced = &merged.0[1];
        assert_eq!(spliced.id, "shell");
        assert!(spliced.interactive);
        assert_eq!(spliced.display_name.as_deref(), Some("shell"));
    }
}
