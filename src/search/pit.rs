//! Point-in-time handles.
//!
//! A PIT pins a consistent view of an index across several paginated
//! searches. It expires server-side after its keep-alive, so a failed
//! release is only logged.

use std::time::Duration;

use tracing::{debug, error, info};

use super::{SearchClient, SearchError};

/// Formats a keep-alive for the PIT API, e.g. `120s`. Never shorter than 1s.
pub fn keep_alive(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs().max(1))
}

/// Opens a point in time on `index` and returns its id.
pub fn open_pit<C: SearchClient + ?Sized>(
    client: &C,
    index: &str,
    keep_alive: &str,
) -> Result<String, SearchError> {
    let endpoint = format!("/{}/_pit?keep_alive={}", index, keep_alive);
    debug!(index, keep_alive, endpoint = %endpoint, "Get point in time");

    let response = client.post_json(&endpoint, b"").map_err(|e| {
        error!(index, error = %e, "PIT request failed");
        e
    })?;

    let id = response
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SearchError::Decode("PIT response without id".to_string()))?
        .to_string();

    info!(index, keep_alive, pit = %id, "Got point in time");
    Ok(id)
}

/// Releases a point in time.
pub fn close_pit<C: SearchClient + ?Sized>(client: &C, id: &str) -> Result<(), SearchError> {
    let body = serde_json::json!({ "id": id }).to_string();
    debug!(pit = %id, "Delete point in time");

    client.delete_json("/_pit", body.as_bytes()).map_err(|e| {
        error!(pit = %id, error = %e, "Delete PIT failed");
        e
    })?;

    info!(pit = %id, "Deleted point in time");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::mock::MockSearchClient;

    #[test]
    fn test_keep_alive_format() {
        assert_eq!(keep_alive(Duration::from_secs(120)), "120s");
        assert_eq!(keep_alive(Duration::from_millis(300)), "1s");
    }

    #[test]
    fn test_open_and_close() {
        let client = MockSearchClient::new().with_pit_ids(["pit-a"]);
        let id = open_pit(&client, "f5_telemetry", "120s").unwrap();
        assert_eq!(id, "pit-a");
        assert_eq!(
            client.posted_endpoints(),
            vec!["/f5_telemetry/_pit?keep_alive=120s".to_string()]
        );

        close_pit(&client, &id).unwrap();
        assert_eq!(client.deleted_pits(), vec!["pit-a".to_string()]);
    }

    #[test]
    fn test_open_without_id_is_decode_error() {
        let client = MockSearchClient::new();
        let err = open_pit(&client, "idx", "1s").unwrap_err();
        assert!(matches!(err, SearchError::Decode(_)));
    }
}
