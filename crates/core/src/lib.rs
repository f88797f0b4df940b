//! Exec Forward Core Library
//!
//! This crate provides the core functionality for `kubectl exec-forward`, a port-forward
//! wrapper that runs declaratively configured hook commands around a tunnel into a
//! cluster workload.
//!
//! # Key Features
//!
//! - **Command Definitions**: JSON/YAML commands with templated arguments
//! - **Templating**: `leon` templates over config, user arguments and earlier hook outputs
//! - **Execution**: Sequential, fail-fast hook execution with captured and redacted output
//! - **Overrides**: Replacing, adding and positionally inserting hook commands
//! - **Ports**: kubectl-compatible port resolution for pods and services
//! - **Forwarding**: The tunnel lifecycle with cooperative shutdown
//!
//! # Examples
//!
//! Merging a caller-supplied override into declared hooks:
//!
//! ```
//! use exec_forward_core::command_definitions::{Command, CommandSet};
//! use exec_forward_core::merge::merge;
//!
//! let declared = CommandSet(vec![Command::new("token", ["aws", "rds", "generate-db-auth-token"])]);
//! let overrides = CommandSet(vec![Command::new("post:token", ["echo", "fetched"])]);
//!
//! let merged = merge(&declared, &overrides)?;
//! for command in &merged {
//!     println!("Command: {}", command);
//! }
//! # Ok::<(), exec_forward_core::error::Error>(())
//! ```

pub mod annotations;
pub mod command_definitions;
pub mod config;
pub mod error;
pub mod execution;
pub mod file_handling;
pub mod forward;
pub mod hooks;
pub mod interpolation;
pub mod kubernetes;
pub mod merge;
pub mod ports;
