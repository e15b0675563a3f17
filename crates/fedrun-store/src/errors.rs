use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("http request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("store rejected {table} request ({status}): {body}")]
    Rejected {
        table: String,
        status: u16,
        body: String,
    },

    #[error("invalid store url: {0}")]
    InvalidUrl(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("store unreachable: {0}")]
    Unreachable(String),
}
