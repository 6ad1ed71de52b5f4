//! HTTP readiness check.

use std::time::Duration;

use tracing::debug;

/// One readiness check. Any 2xx within the timeout counts as reachable.
pub(crate) async fn check(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    match client.get(url).timeout(timeout).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!(error = %e, "readiness check failed");
            false
        }
    }
}
