//! Error types shared across the crate.

use thiserror::Error;

/// Failures that prevent the system from starting at all.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no GPU adapter available: {0}")]
    NoAdapter(String),
    #[error("failed to create GPU device: {0}")]
    NoDevice(String),
    #[error("no frame source available: {0}")]
    NoFrameSource(String),
    #[error("failed to create window surface: {0}")]
    Surface(String),
    #[error("detection capacity must be between 1 and {max}, got {requested}")]
    Capacity { requested: usize, max: usize },
    #[error("built-in shader rejected: {0}")]
    BuiltinShader(#[from] ShaderError),
}

/// Recoverable failure of a fragment-stage hot-swap.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShaderError {
    /// The source text did not parse or validate.
    #[error("compile error: {0}")]
    Compile(String),
    /// The stage compiled but does not fit the fixed vertex stage or bind group layout.
    #[error("link error: {0}")]
    Link(String),
}

impl ShaderError {
    pub fn is_compile(&self) -> bool {
        matches!(self, ShaderError::Compile(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self, ShaderError::Link(_))
    }
}

/// Failure of a single detection cycle or of the detection backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error("detection backend failed to load: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("detection backend is not loaded")]
    NotLoaded,
    #[error("detection backend went away without replying")]
    Abandoned,
}

/// Failure of the external shader generation exchange.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("missing API key (set {0})")]
    MissingApiKey(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("service answered with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("generator worker went away without replying")]
    Abandoned,
}

/// Failure to read or parse the YAML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
