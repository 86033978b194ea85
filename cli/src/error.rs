use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors with contextual messages and suggestions.
#[derive(Debug, Error)]
pub enum CliError {
    /// Failed to dial or call the coordinator.
    #[error("could not reach coordinator at {address}: {message}")]
    CoordinatorUnreachable {
        address: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// An `--bind`/`--coordinator` style address argument didn't parse.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Configuration file failed to load or validate.
    #[error("configuration error: {message}")]
    ConfigurationError {
        message: String,
        suggestion: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// An image path passed to `--image` doesn't exist or can't be read.
    #[error("could not read image: {path}")]
    ImageNotFound { path: String, suggestion: String },

    /// Invalid CLI input (e.g. malformed `--models` list, empty prompt).
    #[error("invalid input: {message}")]
    InvalidInput { message: String, suggestion: String },

    /// The coordinator returned a gRPC error for the request.
    #[error("request failed: {message}")]
    RequestFailed {
        message: String,
        suggestion: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl CliError {
    /// A coordinator that refused the connection or timed out.
    pub fn coordinator_unreachable(address: &str, source: anyhow::Error) -> Self {
        let err = Self::CoordinatorUnreachable {
            address: address.to_string(),
            message: source.to_string(),
            source: Some(source),
        };

        eprintln!("\n{} Check that:", "Suggestion:".yellow().bold());
        eprintln!("  • `fogmesh coordinator` is running and listening on {}", address.cyan());
        eprintln!("  • the address includes a scheme, e.g. http://{address}");

        err
    }

    /// An address argument that failed to parse as `host:port`.
    pub fn invalid_address(address: &str, reason: &str) -> Self {
        Self::InvalidAddress { address: address.to_string(), reason: reason.to_string() }
    }

    /// A configuration load/validation failure.
    pub fn configuration_error(message: &str, suggestion: &str, source: anyhow::Error) -> Self {
        Self::ConfigurationError { message: message.to_string(), suggestion: suggestion.to_string(), source: Some(source) }
    }

    /// An `--image` path that could not be read.
    pub fn image_not_found(path: &str) -> Self {
        let suggestion = format!("Check that the file exists and is readable: {path}");
        Self::ImageNotFound { path: path.to_string(), suggestion }
    }

    /// A malformed CLI argument.
    pub fn invalid_input(message: &str, suggestion: &str) -> Self {
        Self::InvalidInput { message: message.to_string(), suggestion: suggestion.to_string() }
    }

    /// A gRPC call that the coordinator rejected or failed mid-flight.
    pub fn request_failed(message: &str, suggestion: &str, source: anyhow::Error) -> Self {
        Self::RequestFailed { message: message.to_string(), suggestion: suggestion.to_string(), source: Some(source) }
    }

    /// Print the error with formatting and any attached suggestion.
    pub fn print_error(&self) {
        eprintln!("\n{} {}", "Error:".red().bold(), self);

        match self {
            Self::ConfigurationError { suggestion, .. }
            | Self::ImageNotFound { suggestion, .. }
            | Self::InvalidInput { suggestion, .. }
            | Self::RequestFailed { suggestion, .. } => {
                if !suggestion.is_empty() {
                    eprintln!("\n{} {}", "Suggestion:".yellow().bold(), suggestion);
                }
            }
            _ => {}
        }
    }
}

/// Exit codes for different error scenarios.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;

    /// General error.
    pub const ERROR: i32 = 1;

    /// Configuration error.
    pub const CONFIG_ERROR: i32 = 3;

    /// Invalid input.
    pub const INVALID_INPUT: i32 = 4;

    /// Coordinator or worker unreachable.
    pub const UNREACHABLE: i32 = 5;
}
