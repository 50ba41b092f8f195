//! Request and response bodies of the HTTP gateway.

use serde::{Deserialize, Serialize};

/// Body of `POST /check-whatsapp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckNumbersRequest {
    /// Numbers to look up, in the order results should come back.
    #[serde(default)]
    pub phones: Vec<String>,
}

impl CheckNumbersRequest {
    /// Parse a request body. The content type is not checked.
    ///
    /// # Errors
    /// Returns the JSON error if the body is not a valid request.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    /// Create an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
