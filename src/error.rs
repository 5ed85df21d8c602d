//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Application error that can be serialized for the host UI.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The host OS/architecture has no leafpress build
    UnsupportedPlatform,
    /// Release index request failed or returned non-2xx
    ReleaseFetch,
    /// No release asset matches the platform pattern
    AssetNotFound,
    /// Asset download failed or returned non-2xx
    Download,
    /// Downloaded archive does not match the published checksum
    ChecksumMismatch,
    /// Archive could not be extracted
    Extraction,
    /// Configured custom binary path does not exist
    CustomBinaryNotFound,
    /// Update requested while a custom binary is configured
    CannotUpdateCustomBinary,
    /// Update failed and the previous binary could not be restored
    UpdateAndRestoreFailed,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// Process error
    Process,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::UnsupportedPlatform => 1001,
            Self::CustomBinaryNotFound => 1002,
            Self::CannotUpdateCustomBinary => 1003,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::ReleaseFetch => 3001,
            Self::AssetNotFound => 3002,
            Self::Download => 3003,
            Self::ChecksumMismatch => 3004,
            Self::Extraction => 3005,
            Self::UpdateAndRestoreFailed => 3006,
            Self::Process => 4001,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn unsupported_platform(os: &str, arch: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedPlatform,
            HashMap::from([
                ("os".to_string(), os.to_string()),
                ("arch".to_string(), arch.to_string()),
            ]),
        )
    }

    pub fn release_fetch(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::ReleaseFetch, message)
    }

    pub fn asset_not_found(pattern: &str, tag: &str) -> Self {
        Self::new(
            ErrorKind::AssetNotFound,
            HashMap::from([
                ("pattern".to_string(), pattern.to_string()),
                ("tag".to_string(), tag.to_string()),
            ]),
        )
    }

    pub fn download(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Download,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn checksum_mismatch(asset: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorKind::ChecksumMismatch,
            HashMap::from([
                ("asset".to_string(), asset.to_string()),
                ("expected".to_string(), expected.to_string()),
                ("actual".to_string(), actual.to_string()),
            ]),
        )
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Extraction, message)
    }

    pub fn custom_binary_not_found(path: &str) -> Self {
        Self::new(
            ErrorKind::CustomBinaryNotFound,
            HashMap::from([("path".to_string(), path.to_string())]),
        )
    }

    pub fn cannot_update_custom_binary() -> Self {
        Self::new(ErrorKind::CannotUpdateCustomBinary, HashMap::new())
    }

    pub fn update_and_restore_failed(update_error: &str, restore_error: &str) -> Self {
        Self::new(
            ErrorKind::UpdateAndRestoreFailed,
            HashMap::from([
                ("update_error".to_string(), update_error.to_string()),
                ("restore_error".to_string(), restore_error.to_string()),
            ]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn payload(&self) -> &HashMap<String, String> {
        &self.payload
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::extraction(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
