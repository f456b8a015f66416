//! Error types for manifest validation and reconciliation
//!
//! Every failure carries a diagnostic path of semantic keys (file, API
//! identity, field, subfield). The user-facing rendering is the path joined
//! by ": " followed by the message.

use std::fmt;
use thiserror::Error;

/// What went wrong, independent of where
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("api config file must be a list of api configurations")]
    MalformedConfig,

    #[error("invalid yaml: {0}")]
    Yaml(String),

    #[error("at least one api must be configured")]
    NoApis,

    #[error("name must be unique across apis (defined in {})", .apis.join(", "))]
    DuplicateName { name: String, apis: Vec<String> },

    #[error("endpoint {endpoint} is used by multiple apis in this deployment ({})", .apis.join(", "))]
    DuplicateEndpointSameDeployment { endpoint: String, apis: Vec<String> },

    #[error("endpoint is already being used by {api}")]
    DuplicateEndpointOtherDeployment { api: String },

    #[error("{field} must be specified for {predictor_type} predictor type")]
    FieldRequiredForPredictorType {
        field: &'static str,
        predictor_type: &'static str,
    },

    #[error("{field} is not supported for {predictor_type} predictor type")]
    FieldNotSupportedByPredictorType {
        field: &'static str,
        predictor_type: &'static str,
    },

    #[error("{0}: file not found or insufficient permissions")]
    S3FileNotFound(String),

    #[error(
        "{0}: invalid tensorflow export directory; expected saved_model.pb and variables/ \
         (optionally inside a numeric version directory)"
    )]
    InvalidTensorFlowDir(String),

    #[error("{0}: implementation file does not exist")]
    ImplDoesNotExist(String),

    #[error("minReplicas ({min}) cannot be greater than maxReplicas ({max})")]
    MinReplicasGreaterThanMax { min: i32, max: i32 },

    #[error("initReplicas ({init}) cannot be greater than maxReplicas ({max})")]
    InitReplicasGreaterThanMax { init: i32, max: i32 },

    #[error("initReplicas ({init}) cannot be less than minReplicas ({min})")]
    InitReplicasLessThanMin { init: i32, min: i32 },

    #[error(
        "no instances can satisfy the requested {resource} quantity - requested {resource} \
         {requested} but instances only have {available} {resource} available"
    )]
    InsufficientNodeCapacity {
        resource: &'static str,
        requested: String,
        available: String,
    },

    // Schema-level failures
    #[error("must be provided")]
    MissingRequiredKey,

    #[error("key is not supported")]
    UnsupportedKey,

    #[error("must be {0}")]
    InvalidType(&'static str),

    #[error("invalid value \"{value}\" (must be one of {})", .allowed.join(", "))]
    InvalidValue {
        value: String,
        allowed: Vec<&'static str>,
    },

    #[error("must be greater than {bound} (got {value})")]
    MustBeGreaterThan { value: String, bound: String },

    #[error("must be greater than or equal to {bound} (got {value})")]
    MustBeGreaterThanOrEqualTo { value: String, bound: String },

    #[error("cannot be empty")]
    EmptyString,

    #[error("{0}")]
    InvalidString(String),

    // Collaborator failures
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("object storage error: {0}")]
    ObjectStore(String),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("invalid deployment: {0}")]
    InvalidDeployment(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// An [`ErrorKind`] with its diagnostic path
#[derive(Debug)]
pub struct Error {
    path: Vec<String>,
    kind: ErrorKind,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            path: Vec::new(),
            kind,
        }
    }

    /// Prepend a semantic key to the diagnostic path
    pub fn wrap(mut self, key: impl Into<String>) -> Self {
        self.path.insert(0, key.into());
        self
    }

    /// Prepend several keys; the first key ends up outermost
    pub fn wrap_all<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.append(&mut self.path);
        self.path = keys;
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cluster(msg.into()))
    }

    pub fn object_store(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ObjectStore(msg.into()))
    }

    pub fn invalid_deployment(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidDeployment(msg.into()))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config(msg.into()))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::new(ErrorKind::Kube(err))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in &self.path {
            write!(f, "{}: ", key)?;
        }
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}
