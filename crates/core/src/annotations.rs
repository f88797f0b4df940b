//! Declarative hook configuration stored as JSON in pod annotations.
//!
//! Every key is optional. A missing key reads as its empty value; a present key with
//! malformed JSON is an error naming the key.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::command_definitions::{Args, Command, CommandSet};
use crate::config::PartialConfig;
use crate::error::{Error, Result};

pub const ARGS: &str = "exec-forward.pod.kubernetes.io/args";
pub const CONFIG: &str = "exec-forward.pod.kubernetes.io/config";
pub const PRE_CONNECT: &str = "exec-forward.pod.kubernetes.io/pre-connect";
pub const POST_CONNECT: &str = "exec-forward.pod.kubernetes.io/post-connect";
pub const COMMAND: &str = "exec-forward.pod.kubernetes.io/command";

/// Annotations as exposed by pod metadata.
pub type Annotations = BTreeMap<String, String>;

fn parse<T: DeserializeOwned>(annotations: &Annotations, key: &str) -> Result<Option<T>> {
    annotations
        .get(key)
        .map(|value| serde_json::from_str(value).map_err(|e| Error::json_error(key, e)))
        .transpose()
}

pub fn parse_args(annotations: &Annotations) -> Result<Args> {
    Ok(parse(annotations, ARGS)?.unwrap_or_default())
}

pub fn parse_config(annotations: &Annotations) -> Result<PartialConfig> {
    Ok(parse(annotations, CONFIG)?.unwrap_or_default())
}

/// Parses the command list stored under `key`, usually [`PRE_CONNECT`] or [`POST_CONNECT`].
pub fn parse_commands(annotations: &Annotations, key: &str) -> Result<CommandSet> {
    Ok(parse(annotations, key)?.unwrap_or_default())
}

pub fn parse_command(annotations: &Annotations) -> Result<Option<Command>> {
    parse(annotations, COMMAND)
}
