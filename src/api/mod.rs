//! HTTP control surface: create, start, inspect and tail processes.

mod client;
mod error;
mod routes;
mod server;
mod shutdown;
mod stream;
mod types;

pub use client::{ApiClient, ClientError};
pub use error::ApiError;
pub use routes::{build_router, AppState};
pub use server::{ApiHandle, ApiServer};
pub use shutdown::ShutdownManager;
pub use stream::LogStream;
pub use types::{CreateResponse, HealthStatus, ListResponse, MessageResponse, ShowResponse, TailQuery};
