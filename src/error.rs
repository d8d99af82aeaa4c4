use std::path::PathBuf;

/// Error types for sqlx-dynamic-sql
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error while compiling an internal or user supplied pattern
    #[error("Failed to parse SQL template: {0}")]
    Parse(#[from] regex::Error),

    /// Error from SQLx database operations
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Placeholder was referenced but no value exists for it
    #[error("Placeholder '{0}' was not bound by the binder function")]
    UnboundPlaceholder(String),

    /// Strict argument checking found a name the caller did not supply
    #[error("Argument '{0}' is required but was not supplied")]
    MissingArgument(String),

    /// Two fragments (or two parts) in one file share a name
    #[error("Duplicate {kind} name '{name}' in SQL file '{alias}'")]
    DuplicateName {
        alias: String,
        name: String,
        kind: &'static str,
    },

    /// Unbalanced or malformed `--#` directive
    #[error("Dynamic SQL error at line {line}: {message}")]
    Directive { line: usize, message: String },

    /// Malformed or unevaluable condition expression
    #[error("Invalid expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// `--#for` source list could not be resolved
    #[error("Loop source ':{0}' resolved to nothing")]
    EmptyLoopSource(String),

    /// Fragment lookup failed
    #[error("No SQL fragment named '{0}' was found")]
    FragmentNotFound(String),

    /// Configured SQL file does not exist
    #[error("SQL file '{}' of alias '{alias}' not found", path.display())]
    FileNotFound { alias: String, path: PathBuf },

    /// Reading a SQL or configuration file failed
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fragment failed load-time verification
    #[error("SQL fragment '{name}' is invalid: {source}")]
    InvalidFragment {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Configuration values are inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file is not valid TOML
    #[error("Failed to parse configuration: {0}")]
    ConfigFormat(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn directive(line: usize, message: impl Into<String>) -> Self {
        Error::Directive {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn expression(expression: &str, message: impl Into<String>) -> Self {
        Error::Expression {
            expression: expression.to_owned(),
            message: message.into(),
        }
    }
}

/// Result type alias for sqlx-dynamic-sql operations
pub type Result<T> = std::result::Result<T, Error>;
