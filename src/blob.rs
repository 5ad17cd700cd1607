//! Remote source resolution.
//!
//! A file-mode target that is not a local path is treated as a blob URI and
//! must be resolved to a time-limited signed URI before the device opens it.
//! The actual credential exchange lives outside this crate; the engine only
//! sees the `BlobResolver` trait.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::EngineError;

/// Accepts `http(s)://host/path`-shaped URIs as well as bare-host forms.
const URI_PATTERN: &str =
    r"(?i)^(?:http(s)?://)?[\w.-]+(?:\.[\w.-]+)+[\w\-._~:/?#\[\]@!$&'()*+,;=.]+$";

/// Resolves a blob URI to an openable, time-limited signed URI.
///
/// Implementations must not mutate engine state; a resolution failure is an
/// `InvalidSource` and leaves the currently open source untouched.
pub trait BlobResolver: Send + Sync {
    fn resolve(&self, uri: &str) -> Result<String, EngineError>;
}

/// Default resolver: hands the URI through unchanged. Used when the source
/// is already directly openable (pre-signed, or a plain media URL).
pub struct PassthroughResolver;

impl BlobResolver for PassthroughResolver {
    fn resolve(&self, uri: &str) -> Result<String, EngineError> {
        Ok(uri.to_string())
    }
}

/// Whether a non-local target is a well-formed URI.
pub fn is_valid_uri(target: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(URI_PATTERN).expect("valid URI regex"));
    re.is_match(target)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
