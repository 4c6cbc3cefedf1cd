//! Transport endpoints.
//!
//! An endpoint is the socket base URL, derived once from the address the
//! application was configured with. Paths passed to `connect` are appended to
//! it.

use std::fmt;
use thiserror::Error;

/// Endpoint construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// The address has no `scheme://` prefix.
    #[error("Address has no scheme: {0}")]
    MissingScheme(String),

    /// The scheme is not one of http, https, ws, wss.
    #[error("Unsupported scheme '{scheme}' in address: {address}")]
    InvalidScheme {
        /// Offending scheme.
        scheme: String,
        /// Full address as given.
        address: String,
    },

    /// Nothing follows the scheme.
    #[error("Address has no host: {0}")]
    MissingHost(String),
}

/// An immutable socket base URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    base: String,
}

impl Endpoint {
    /// Parse an address, rewriting `http` to `ws` and `https` to `wss`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme is missing or unsupported, or the host
    /// is empty.
    pub fn parse(address: &str) -> Result<Self, EndpointError> {
        let address = address.trim();
        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| EndpointError::MissingScheme(address.to_string()))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            _ => {
                return Err(EndpointError::InvalidScheme {
                    scheme: scheme.to_string(),
                    address: address.to_string(),
                })
            }
        };

        let rest = rest.trim_end_matches('/');
        if rest.is_empty() || rest.starts_with('/') {
            return Err(EndpointError::MissingHost(address.to_string()));
        }

        Ok(Self {
            base: format!("{scheme}://{rest}"),
        })
    }

    /// Get the base URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// Whether the endpoint uses TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.base.starts_with("wss://")
    }

    /// Build the full socket URL for a path.
    #[must_use]
    pub fn resolve(&self, path: &str) -> String {
        if path.is_empty() {
            self.base.clone()
        } else if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
