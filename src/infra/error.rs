use std::net::SocketAddr;

use thiserror::Error;

/// Bootstrap and runtime failures outside the request path.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("database unavailable: {message}")]
    Database { message: String },
    #[error("schema migration failed")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("could not install the tracing subscriber: {0}")]
    Telemetry(String),
    #[error("missing or invalid configuration: {message}")]
    Configuration { message: String },
    #[error("job queue error: {message}")]
    Jobs { message: String },
}

impl InfraError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn jobs(message: impl Into<String>) -> Self {
        Self::Jobs {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for InfraError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}
