//! CLI error types with miette diagnostics.
//!
//! Maps config, core and RPC failures into user-facing errors with help
//! text and process exit codes.

use miette::Diagnostic;
use statebus_api::rpc::Code;
use statebus_config::ConfigError;
use statebus_core::CoreError;
use thiserror::Error;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const UNAVAILABLE: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to state server at {url}")]
    #[diagnostic(
        code(statebus::connection_failed),
        help(
            "Check that `statebus serve` is running and reachable.\n\
             Override the address with --server or STATEBUS_RPC_URL."
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: statebus_api::Error,
    },

    #[error("Transport error")]
    #[diagnostic(code(statebus::transport))]
    Transport(#[source] statebus_api::Error),

    // ── Server responses ─────────────────────────────────────────────
    #[error("{code}: {message}")]
    #[diagnostic(code(statebus::rpc))]
    Rpc { code: Code, message: String },

    // ── Input ────────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(statebus::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error")]
    #[diagnostic(
        code(statebus::config),
        help("Default location: {path}\nRun: statebus config show")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Daemon ───────────────────────────────────────────────────────
    #[error("{}", .0.chain())]
    #[diagnostic(code(statebus::daemon))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render JSON output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot render YAML output: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Transport(_) => exit_code::CONNECTION,
            Self::Rpc { code, .. } => match code {
                Code::NotFound => exit_code::NOT_FOUND,
                Code::InvalidArgument => exit_code::USAGE,
                Code::Unavailable | Code::ResourceExhausted => exit_code::UNAVAILABLE,
                _ => exit_code::GENERAL,
            },
            Self::Validation { .. } | Self::Config { .. } => exit_code::USAGE,
            Self::Core(err) => match err.code() {
                Code::InvalidArgument => exit_code::USAGE,
                _ => exit_code::GENERAL,
            },
            _ => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(source: ConfigError) -> Self {
        Self::Config {
            path: statebus_config::config_path().display().to_string(),
            source,
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<statebus_api::Error> for CliError {
    fn from(err: statebus_api::Error) -> Self {
        match err {
            statebus_api::Error::Rpc { code, message } => Self::Rpc { code, message },
            statebus_api::Error::MalformedPath { path, reason } => Self::Validation {
                field: "path".into(),
                reason: format!("'{path}': {reason}"),
            },
            statebus_api::Error::MalformedExpression { expression, reason } => Self::Validation {
                field: "expression".into(),
                reason: format!("'{expression}': {reason}"),
            },
            other => Self::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_codes_map_to_exit_codes() {
        let err = CliError::from(statebus_api::Error::Rpc {
            code: Code::NotFound,
            message: "target not found: default/leaf9".into(),
        });
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert_eq!(err.to_string(), format!("{}: target not found: default/leaf9", Code::NotFound));

        let err = CliError::from(statebus_api::Error::ConnectionClosed);
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn malformed_input_is_a_usage_error() {
        let err = CliError::from(statebus_api::Error::MalformedExpression {
            expression: "foo[k".into(),
            reason: "unbalanced brackets".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
