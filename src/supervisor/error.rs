use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("could not reach supervisor at `{endpoint}`: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("supervisor returned malformed XML-RPC response: {0}")]
    Malformed(String),

    #[error("supervisor fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("unexpected XML-RPC value shape: expected {expected}, got {got}")]
    UnexpectedShape { expected: &'static str, got: String },

    #[error("http error talking to supervisor: {0}")]
    Http(#[from] reqwest::Error),
}
