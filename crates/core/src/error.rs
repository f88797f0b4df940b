use std::process::ExitStatus;

use leon::RenderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure classes, used by callers that only care about where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Target, pod or port lookup failed. Nothing was started.
    Resolution,
    /// Declarative configuration or a template could not be used. Nothing was started.
    Config,
    /// A positioned override did not match the command set it was merged into.
    MergeValidation,
    /// A hook or the main command failed to start or exited unsuccessfully.
    HookExecution,
    /// The tunnel transport failed on its own.
    Tunnel,
    /// The run was interrupted before the remaining hooks could start.
    Cancelled,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Resource type `{}` is not supported (expected pod, service, deployment, statefulset or replicaset)", .0)]
    UnsupportedResourceType(String),

    #[error("Invalid resource reference `{}`: expected TYPE/NAME or NAME", .0)]
    InvalidResource(String),

    #[error("Unable to find {} `{}` in namespace `{}`", .kind, .name, .namespace)]
    ResourceNotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("Cannot attach to {} `{}`: it has no pod selector", .kind, .name)]
    NoSelector { kind: String, name: String },

    #[error("Cannot use the pod selector of {} `{}`: {}", .kind, .name, .reason)]
    InvalidSelector {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Timed out after {}s waiting for an attachable pod matching `{}`", .seconds, .selector)]
    PodTimeout { selector: String, seconds: u64 },

    #[error("Kubernetes API error: {}", .0)]
    Kube(#[from] kube::Error),

    #[error("Unable to load Kubernetes client configuration: {}", .0)]
    KubeConfig(String),

    #[error("Invalid port mapping `{}`: expected [LOCAL:]REMOTE", .0)]
    PortFormat(String),

    #[error("Service '{}' does not have a named port '{}'", .service, .port)]
    ServicePortName { service: String, port: String },

    #[error("Service {} does not have a service port {}", .service, .port)]
    ServicePortNumber { service: String, port: i32 },

    #[error("Pod '{}' does not have a named port '{}'", .pod, .port)]
    ContainerPortName { pod: String, port: String },

    #[error("Unable to allocate a free local port: {}", .0)]
    FreePort(std::io::Error),

    #[error("Error parsing `{}` as JSON: {}", .source_description, .original)]
    Json {
        source_description: String,
        original: serde_json::Error,
    },

    #[error("Error {} {} file at `{}`: {}", .action, .file_description, .path, .original)]
    Yaml {
        action: String,
        file_description: String,
        path: String,
        original: serde_yaml::Error,
    },

    #[error("IO error with {} file at path `{}`: {}", .file_description, .path, .original)]
    Io {
        file_description: String,
        path: String,
        original: std::io::Error,
    },

    #[error("Error placeholder template string: {}", .0)]
    Render(#[from] RenderError),

    #[error("Template variable `{}` is not defined", .0)]
    MissingKey(String),

    #[error("Invalid template expression `{}`: {}", .expression, .reason)]
    TemplateExpression { expression: String, reason: String },

    #[error("Unknown template helper `{}`", .0)]
    UnknownHelper(String),

    #[error("JSON path `{}` was not found in the value", .0)]
    JsonPath(String),

    #[error("A command must name at least a program to run")]
    EmptyCommand,

    #[error("Argument `{}` must be in key=value format", .0)]
    ArgFormat(String),

    #[error("Positioned commands must be in the format of position:targetID[:ID] (pre:foo[:id]), got `{}`", .0)]
    PositionedFormat(String),

    #[error("Positioned commands must target a valid ID: `{}`", .0)]
    PositionedTarget(String),

    #[error("Unable to start `{}`: {}", .command, .original)]
    Spawn {
        command: String,
        original: std::io::Error,
    },

    #[error("Command `{}` failed with {}", .command, .status)]
    SubProcessExit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Error with sub process IO: {}", .0)]
    SubProcess(std::io::Error),

    #[error("Unable to listen on local port {}: {}", .port, .original)]
    Bind { port: u16, original: std::io::Error },

    #[error("Port forwarding to pod `{}` failed: {}", .pod, .message)]
    Forward { pod: String, message: String },

    #[error("Hook task failed: {}", .0)]
    Task(#[from] tokio::task::JoinError),

    #[error("Run cancelled before the remaining commands could start")]
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedResourceType(_)
            | Self::InvalidResource(_)
            | Self::ResourceNotFound { .. }
            | Self::NoSelector { .. }
            | Self::InvalidSelector { .. }
            | Self::PodTimeout { .. }
            | Self::Kube(_)
            | Self::KubeConfig(_)
            | Self::PortFormat(_)
            | Self::ServicePortName { .. }
            | Self::ServicePortNumber { .. }
            | Self::ContainerPortName { .. }
            | Self::FreePort(_) => ErrorKind::Resolution,
            Self::Json { .. }
            | Self::Yaml { .. }
            | Self::Io { .. }
            | Self::Render(_)
            | Self::MissingKey(_)
            | Self::TemplateExpression { .. }
            | Self::UnknownHelper(_)
            | Self::JsonPath(_)
            | Self::EmptyCommand
            | Self::ArgFormat(_) => ErrorKind::Config,
            Self::PositionedFormat(_) | Self::PositionedTarget(_) => ErrorKind::MergeValidation,
            Self::Spawn { .. }
            | Self::SubProcessExit { .. }
            | Self::SubProcess(_)
            | Self::Task(_) => ErrorKind::HookExecution,
            Self::Bind { .. } | Self::Forward { .. } => ErrorKind::Tunnel,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn json_error(source_description: &str, original: serde_json::Error) -> Self {
        Self::Json {
            source_description: source_description.to_string(),
            original,
        }
    }

    pub fn yaml_error(
        action: String,
        file_description: String,
        path: String,
        original: serde_yaml::Error,
    ) -> Self {
        Self::Yaml {
            action,
            file_description,
            path,
            original,
        }
    }

    pub fn io_error(file_description: String, path: String, original: std::io::Error) -> Self {
        Self::Io {
            file_description,
            path,
            original,
        }
    }

    pub fn template_expression(expression: &str, reason: &str) -> Self {
        Self::TemplateExpression {
            expression: expression.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn forward(pod: &str, message: impl ToString) -> Self {
        Self::Forward {
            pod: pod.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_errors_match_kubectl_wording() {
        let named = Error::ServicePortName {
            service: "my-svc".to_string(),
            port: "http".to_string(),
        };
        assert_eq!(
            named.to_string(),
            "Service 'my-svc' does not have a named port 'http'"
        );

        let numbered = Error::ServicePortNumber {
            service: "my-svc".to_string(),
            port: 3000,
        };
        assert_eq!(
            numbered.to_string(),
            "Service my-svc does not have a service port 3000"
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::EmptyCommand.kind(), ErrorKind::Config);
        assert_eq!(
            Error::PositionedTarget("bar".to_string()).kind(),
            ErrorKind::MergeValidation
        );
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::PortFormat("a:b:c".to_string()).kind(),
            ErrorKind::Resolution
        );
        assert_eq!(
            Error::forward("web-0", "connection reset").kind(),
            ErrorKind::Tunnel
        );
    }
}
