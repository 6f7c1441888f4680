//! Logical requests and their signatures
//!
//! The signature identifies "the same request" for deduplication and is the
//! data store key. Query parameters are sorted so parameter order does not
//! split the cache; POST bodies are folded in as a blake3 digest of their
//! JSON encoding.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// HTTP method of a logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST with JSON body
    Post,
}

impl Method {
    /// Upper-case method name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request the loader can execute
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Method
    pub method: Method,
    /// Path (with optional query) relative to the API base, or absolute URL
    pub path: String,
    /// JSON body for POST
    pub body: Option<Value>,
}

impl LoadRequest {
    /// GET request
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    /// POST request with a JSON body
    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    /// POST request with any serializable body
    ///
    /// # Errors
    /// Returns the serialization error if `body` cannot be encoded as JSON.
    pub fn post_json<T: Serialize>(
        path: impl Into<String>,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::post(path, serde_json::to_value(body)?))
    }

    /// Deterministic key for deduplication and caching
    #[must_use]
    pub fn signature(&self) -> String {
        let path = canonical_path(&self.path);
        match &self.body {
            Some(body) => {
                // serde_json maps are key-ordered, so the encoding is canonical
                let encoded = serde_json::to_vec(body).unwrap_or_default();
                let digest = blake3::hash(&encoded);
                format!(
                    "{} {path}#{}",
                    self.method,
                    hex::encode(&digest.as_bytes()[..8])
                )
            }
            None => format!("{} {path}", self.method),
        }
    }
}

impl fmt::Display for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Path with query parameters sorted
fn canonical_path(path: &str) -> String {
    let path = path.trim();
    match path.split_once('?') {
        Some((base, query)) if !query.is_empty() => {
            let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
            params.sort_unstable();
            format!("{base}?{}", params.join("&"))
        }
        Some((base, _)) => base.to_string(),
        None => path.to_string(),
    }
}
