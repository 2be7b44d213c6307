//! Configuration options for kvodm connections.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The only scheme understood by [`ConnectionInfo::parse`].
pub const MEMORY_SCHEME: &str = "memory";

/// Configuration options for a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Prefix prepended to every key the object mapper writes.
    /// Default: "" (no prefix)
    pub namespace: String,

    /// Maximum execution time of a single server-side script, in milliseconds.
    /// Default: None (no limit)
    pub script_timeout_ms: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self { namespace: String::new(), script_timeout_ms: None }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the script timeout.
    pub fn script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Returns the script timeout as a [`Duration`].
    pub fn script_timeout_duration(&self) -> Option<Duration> {
        self.script_timeout_ms.map(Duration::from_millis)
    }

    /// Loads options from a JSON document. Missing keys take their defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.namespace.chars().any(char::is_whitespace) {
            return Err(crate::Error::invalid_argument("namespace must not contain whitespace"));
        }
        if self.script_timeout_ms == Some(0) {
            return Err(crate::Error::invalid_argument("script_timeout must be > 0"));
        }
        Ok(())
    }
}

/// A parsed connection string of the form
/// `memory://<name>?namespace=<prefix>&script_timeout=<ms>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection scheme.
    pub scheme: String,
    /// Database name; identifies the backend instance.
    pub name: String,
    /// Options carried by the query string.
    pub options: Options,
}

impl ConnectionInfo {
    /// Parses a connection string.
    pub fn parse(url: &str) -> crate::Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| crate::Error::invalid_argument(format!("missing scheme in '{}'", url)))?;
        if scheme != MEMORY_SCHEME {
            return Err(crate::Error::invalid_argument(format!("unsupported scheme '{}'", scheme)));
        }

        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };
        let name = if name.is_empty() { "default" } else { name };

        let mut options = Options::default();
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "namespace" => options.namespace = value.to_string(),
                "script_timeout" => {
                    let ms = value.parse::<u64>().map_err(|_| {
                        crate::Error::invalid_argument(format!("bad script_timeout '{}'", value))
                    })?;
                    options.script_timeout_ms = Some(ms);
                }
                other => {
                    return Err(crate::Error::invalid_argument(format!(
                        "unknown connection parameter '{}'",
                        other
                    )))
                }
            }
        }
        options.validate()?;

        Ok(Self { scheme: scheme.to_string(), name: name.to_string(), options })
    }

    /// Canonical form used to identify the backend.
    pub fn backend_url(&self) -> String {
        format!("{}://{}", self.scheme, self.name)
    }
}
