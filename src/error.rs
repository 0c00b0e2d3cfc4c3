use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The model service could not be reached or returned no usable body.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The model replied but no SQL could be recovered from the reply.
    #[error("No query could be produced: {0}")]
    Extraction(String),

    #[error("Question is not related to the database: {0}")]
    UnrelatedQuestion(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Engine error text, kept verbatim for the refinement prompt.
    #[error("{0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// HTTP-equivalent status for the outer surfaces.
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::ModelUnavailable(_) => 503,
            BridgeError::Extraction(_) => 422,
            BridgeError::UnrelatedQuestion(_) => 400,
            BridgeError::InvalidRequest(_) => 400,
            BridgeError::Json(_) => 400,
            BridgeError::Execution(_) => 500,
            BridgeError::Config(_) => 500,
            BridgeError::Io(_) => 500,
        }
    }

    /// Text handed to the model when asking for a corrected query.
    pub fn engine_message(&self) -> String {
        match self {
            BridgeError::Execution(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_failure_taxonomy() {
        assert_eq!(BridgeError::ModelUnavailable("down".into()).status_code(), 503);
        assert_eq!(BridgeError::Extraction("none".into()).status_code(), 422);
        assert_eq!(BridgeError::UnrelatedQuestion("weather".into()).status_code(), 400);
        assert_eq!(BridgeError::Execution("Invalid object name".into()).status_code(), 500);
    }

    #[test]
    fn test_engine_message_is_verbatim_for_execution_errors() {
        let err = BridgeError::Execution("Invalid column name 'Foo'.".to_string());
        assert_eq!(err.engine_message(), "Invalid column name 'Foo'.");
        assert_eq!(err.to_string(), "Invalid column name 'Foo'.");
    }
}
