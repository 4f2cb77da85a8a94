use serde::Serialize;

/// All errors the script document core can return.
///
/// Environment failures while loading artwork never surface here; the image
/// loader degrades to placeholder art instead.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(String),

    /// The script could not be read at all. The document stays unloaded.
    #[error("Could not parse script: {0}")]
    Parse(String),

    #[error("A character with id '{0}' is already on the script")]
    DuplicateId(String),

    #[error("'{0}' is not an official character and cannot be forked")]
    NotOfficial(String),

    #[error("Character '{0}' is not on this script")]
    UnknownCharacter(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("{0}")]
    Custom(String),
}

impl From<png::DecodingError> for ScriptError {
    fn from(e: png::DecodingError) -> Self {
        ScriptError::Image(e.to_string())
    }
}

impl From<png::EncodingError> for ScriptError {
    fn from(e: png::EncodingError) -> Self {
        ScriptError::Image(e.to_string())
    }
}

// Front ends hand errors across IPC/dialog boundaries as plain strings.
impl Serialize for ScriptError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;
