//! HTTP clients of the coordinator and the result repository.

mod client;
pub use client::HttpCoordinatorClient;
mod repository;
pub use repository::HttpResultRepository;

use cw_types::CoordinatorError;

/// Map a transport failure.
fn http_err(e: reqwest::Error) -> CoordinatorError {
    CoordinatorError::Http(e.to_string())
}

/// Fail unless the response status is a success.
fn check_status(endpoint: &str, resp: &reqwest::Response) -> Result<(), CoordinatorError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(CoordinatorError::Status { endpoint: endpoint.to_string(), status: status.as_u16() })
    }
}
