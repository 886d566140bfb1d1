use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures of a single outbound HTTP request
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Timeout while fetching from {url}")]
    Timeout { url: String },

    #[error("Network error while fetching from {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: BoxError,
    },
}

/// Failures while loading a remote per-tenant image config.
///
/// These never leave the config resolver; they only decide whether a cached
/// value is served stale.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Could not parse image config from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The source image could not be obtained
#[derive(Error, Debug)]
pub enum OriginError {
    #[error("could not fetch {key} from bucket")]
    BucketObject { key: String },

    #[error("could not fetch {key} from bucket")]
    Store {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("could not fetch image from {origin}")]
    Upstream { origin: String, status: Option<u16> },

    #[error("could not resolve an origin for {href}")]
    Unresolved { href: String },
}

impl OriginError {
    pub fn status_code(&self) -> u16 {
        match self {
            OriginError::BucketObject { .. } => 404,
            OriginError::Store { .. } => 502,
            OriginError::Upstream { status, .. } => match status {
                Some(status) if *status >= 400 => *status,
                _ => 502,
            },
            OriginError::Unresolved { .. } => 404,
        }
    }
}

/// The transformation backend refused or failed to produce an image
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("\"url\" parameter is valid but image type is not allowed")]
    NotAllowed,

    #[error("The requested resource isn't a valid image.")]
    InvalidImage,

    #[error("Unable to decode image: {0}")]
    Decode(String),

    #[error("Unable to encode image: {0}")]
    Encode(String),
}

impl TransformError {
    pub fn status_code(&self) -> u16 {
        match self {
            TransformError::Encode(_) => 500,
            _ => 400,
        }
    }
}

/// A request-level failure that is answered with a plain error envelope
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ImageError {
    pub status: u16,
    pub message: String,
}

impl ImageError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<OriginError> for ImageError {
    fn from(err: OriginError) -> Self {
        ImageError::new(err.status_code(), err.to_string())
    }
}

impl From<TransformError> for ImageError {
    fn from(err: TransformError) -> Self {
        ImageError::new(err.status_code(), err.to_string())
    }
}
