// src/error.rs
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

/// Everything a request handler can fail with. Each variant knows the status
/// code it is rendered with on the apology page.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("not enough funds for transaction")]
    InsufficientFunds,

    #[error("must provide valid number of owned shares")]
    InsufficientShares,

    #[error("must provide valid stock symbol")]
    SymbolNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("quote source error: {0}")]
    Oracle(#[from] OracleError),

    #[error("session error: {0}")]
    Session(#[from] jsonwebtoken::errors::Error),

    #[error("amount out of range: {0}")]
    Overflow(String),
}

impl AppError {
    pub fn validation(message: &str) -> Self {
        AppError::Validation(message.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::InsufficientFunds
            | AppError::InsufficientShares
            | AppError::SymbolNotFound(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::FORBIDDEN,
            AppError::Oracle(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Session(_) | AppError::Overflow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text shown to the user. Server-side faults only expose the reason phrase.
    pub fn public_message(&self) -> String {
        let status = self.status();
        if status.is_server_error() {
            status.canonical_reason().unwrap_or("error").to_string()
        } else {
            self.to_string()
        }
    }
}

impl Reject for AppError {}

/// Raised by the session filter when a protected route is hit without a
/// valid session; recovered into a redirect to the login page.
#[derive(Debug)]
pub struct Unauthenticated;

impl Reject for Unauthenticated {}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("unparseable price {0:?}")]
    BadPrice(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_client_errors() {
        assert_eq!(AppError::InsufficientFunds.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InsufficientShares.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::SymbolNotFound("ZZZZ".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Auth("invalid username and/or password".into()).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn server_faults_hide_details() {
        let err = AppError::Database(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.public_message(), "Internal Server Error");
        let err = AppError::Oracle(OracleError::Throttled("25 requests per day".into()));
        assert_eq!(err.public_message(), "Bad Gateway");
        let err = AppError::Overflow("AAPL".into());
        assert_eq!(err.public_message(), "Internal Server Error");
    }

    #[test]
    fn symbol_message_does_not_echo_input() {
        let err = AppError::SymbolNotFound("<script>".into());
        assert_eq!(err.public_message(), "must provide valid stock symbol");
    }
}
