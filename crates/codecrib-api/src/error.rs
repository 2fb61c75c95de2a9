use axum::http::StatusCode;
use tracing::{error, warn};

use codecrib_types::CoreError;

pub fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CoreError::TransientConnectionRace(_) => StatusCode::CONFLICT,
        CoreError::StorageInconsistency(_) | CoreError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Log a core failure at the level it deserves and turn it into a status.
pub(crate) fn reject(err: CoreError) -> StatusCode {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("{}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        assert_eq!(status_for(&CoreError::not_found("room x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&CoreError::invalid("empty")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&CoreError::StorageInconsistency("blob".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&CoreError::Storage(anyhow::anyhow!("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
