//! HTTP admission layer and server.

mod extract;
mod middleware;
mod server;

pub use extract::{client_key, KeySource};
pub use middleware::{
    admission, with_admission, AdmissionState, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use server::HttpServer;
