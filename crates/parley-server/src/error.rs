use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::{ParleyError, SchemaError, TransportError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<ParleyError> for ServerError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::Schema(e) => ServerError::Schema(e),
            ParleyError::Transport(e) => ServerError::Transport(e),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Schema(SchemaError::UnknownNamespace(_))
            | ServerError::Schema(SchemaError::MalformedAddress(_))
            | ServerError::Schema(SchemaError::Arity { .. }) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Schema(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ServerError::Transport(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::Schema(SchemaError::UnknownNamespace("x".into())), 400),
            (
                ServerError::Schema(SchemaError::UnknownEvent {
                    namespace: "chat".into(),
                    event: "nope".into(),
                }),
                422,
            ),
            (ServerError::Transport(TransportError::Closed), 502),
            (ServerError::BadRequest("empty".into()), 400),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status().as_u16(), status);
        }
    }
}
