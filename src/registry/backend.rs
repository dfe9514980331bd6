//! Backend identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single backend server, identified by its `host:port` address.
///
/// Serialized as `{"Address": "<host:port>"}` in the registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Backend {
    #[serde(rename = "Address")]
    pub address: String,
}

impl Backend {
    /// Create a new backend.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// The backend's address.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl From<&str> for Backend {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_field_name() {
        let json = serde_json::to_string(&Backend::new("10.0.0.1:80")).unwrap();
        assert_eq!(json, r#"{"Address":"10.0.0.1:80"}"#);
    }
}
