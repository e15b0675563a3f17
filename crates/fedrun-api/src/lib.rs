mod error;
pub use error::{ApiError, ErrorBody};

mod handler;
pub use handler::ApiHandler;

mod adapter;
pub use adapter::SupervisorApiAdapter;

mod http;
pub use http::HttpApi;

pub use axum;
