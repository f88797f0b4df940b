use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn is_false(value: &bool) -> bool {
    !value
}

/// A single executable step.
///
/// `command[0]` is the literal program name and is never templated; the remaining entries
/// are argument templates rendered independently.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Key for the stored output and for override matching. Empty means anonymous.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub interactive: bool,
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Command {
    pub fn new<I, S>(id: &str, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// The literal program name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCommand`] when the command has no entries at all.
    pub fn program(&self) -> Result<&str> {
        self.command
            .first()
            .map(String::as_str)
            .ok_or(Error::EmptyCommand)
    }

    /// The argument templates, everything after the program.
    pub fn arguments(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }
}

impl Display for Command {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = &self.display_name {
            write!(formatter, "{}: ", name)?;
        }

        formatter.write_str(self.command.join(" ").as_str())
    }
}

/// Ordered commands; order is execution order.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct CommandSet(pub Vec<Command>);

impl CommandSet {
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|command| command.id.as_str())
    }
}

impl From<Vec<Command>> for CommandSet {
    fn from(commands: Vec<Command>) -> Self {
        Self(commands)
    }
}

impl<'a> IntoIterator for &'a CommandSet {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Captured text of one executed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn new(stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// Outputs of previously executed commands, keyed by command ID.
///
/// A store is never changed once handed on: [`Outputs::with_output`] returns a new store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outputs(IndexMap<String, Output>);

impl Outputs {
    #[must_use]
    pub fn with_output(&self, id: &str, output: Output) -> Outputs {
        let mut outputs = self.0.clone();
        outputs.insert(id.to_string(), output);
        Outputs(outputs)
    }

    pub fn get(&self, id: &str) -> Option<&Output> {
        self.0.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// User-facing key/value arguments available to templates as `Args.<key>`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Args(HashMap<String, String>);

impl Args {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Layers `overrides` on top of `self`; keys in `overrides` win.
    #[must_use]
    pub fn merge(self, overrides: Args) -> Args {
        let mut merged = self.0;
        merged.extend(overrides.0);
        Args(merged)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Args
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Args(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_json() {
        let command: Command = serde_json::from_str(
            r#"{"id": "token", "command": ["aws", "rds", "generate-db-auth-token"], "name": "fetch token"}"#,
        )
        .unwrap();

        assert_eq!(command.id, "token");
        assert_eq!(command.program().unwrap(), "aws");
        assert_eq!(command.arguments(), ["rds", "generate-db-auth-token"]);
        assert!(!command.interactive);
        assert_eq!(command.display_name.as_deref(), Some("fetch token"));
    }

    #[test]
    fn test_empty_command() {
        let command: Command = serde_json::from_str(r#"{"command": []}"#).unwrap();
        assert!(matches!(command.program(), Err(Error::EmptyCommand)));
        assert!(command.arguments().is_empty());
    }

    #[test]
    fn test_display() {
        let mut command = Command::new("", ["psql", "-h", "localhost"]);
        assert_eq!(command.to_string(), "psql -h localhost");

        command.display_name = Some("db".to_string());
        assert_eq!(command.to_string(), "db: psql -h localhost");
    }

    #[test]
    fn test_with_output_leaves_original_untouched() {
        let first = Outputs::default().with_output("a", Output::new("1", ""));
        let second = first.with_output("b", Output::new("2", ""));

        assert_eq!(first.len(), 1);
        assert!(first.get("b").is_none());
        assert_eq!(second.ids().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_args_merge_overrides_win() {
        let declared = Args::from_iter([("user", "app"), ("db", "orders")]);
        let cli = Args::from_iter([("user", "admin")]);

        let merged = declared.merge(cli);
        assert_eq!(merged.get("user"), Some("admin"));
        assert_eq!(merged.get("db"), Some("orders"));
    }
}
