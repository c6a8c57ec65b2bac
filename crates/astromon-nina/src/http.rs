//! Shared HTTP poll client.
//!
//! All REST polling goes through [`PollClient::get_json`]: a bounded retry
//! ladder over a 5-second per-attempt deadline. The scheduler keeps one
//! keep-alive client per instance inside its poll bookkeeping and hands it
//! back after every cycle; transport errors and 5xx responses invalidate it
//! so the next cycle reconnects fresh.

use std::time::Duration;

use astromon_core::prelude::*;
use reqwest::Client;
use serde_json::Value;

/// Per-attempt request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay before each attempt, in milliseconds. Three attempts total.
const ATTEMPT_DELAYS_MS: [u64; 3] = [0, 1000, 2000];

/// Deadline for prepared-image downloads.
const IMAGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Image receive buffer growth step.
const IMAGE_CHUNK: usize = 256 * 1024;

/// Hard cap on a prepared-image body.
pub const IMAGE_MAX_BYTES: usize = 4 * 1024 * 1024;

/// Join a relative endpoint path onto a `scheme://host[:port]/v2/api/` base.
pub fn endpoint_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Map a reqwest failure onto the domain error taxonomy.
fn map_request_error(err: reqwest::Error, operation: &str) -> Error {
    if err.is_timeout() {
        Error::timeout(operation, REQUEST_TIMEOUT.as_millis() as u64)
    } else if let Some(status) = err.status() {
        Error::http(status.as_u16(), err.to_string())
    } else {
        Error::transport(err.to_string())
    }
}

/// Append a body chunk to the receive buffer, growing in [`IMAGE_CHUNK`]
/// steps and refusing to pass [`IMAGE_MAX_BYTES`].
fn append_chunk(buf: &mut Vec<u8>, chunk: &[u8]) -> Result<()> {
    let needed = buf.len() + chunk.len();
    if needed > IMAGE_MAX_BYTES {
        return Err(Error::ImageTooLarge {
            limit: IMAGE_MAX_BYTES,
        });
    }
    if needed > buf.capacity() {
        let steps = needed.div_ceil(IMAGE_CHUNK);
        let target = (steps * IMAGE_CHUNK).min(IMAGE_MAX_BYTES);
        buf.reserve_exact(target - buf.len());
    }
    buf.extend_from_slice(chunk);
    Ok(())
}

/// HTTP client wrapper carrying the keep-alive discipline.
///
/// A `PollClient` built with [`keepalive`](PollClient::keepalive) reuses one
/// pooled connection across requests; one built with
/// [`oneshot`](PollClient::oneshot) closes its connection when dropped.
#[derive(Debug, Clone)]
pub struct PollClient {
    client: Client,
}

impl PollClient {
    /// Build a client that keeps a single idle connection alive between
    /// requests, for the scheduler's active-instance poll cycle.
    pub fn keepalive() -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(1)
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Build a throwaway client for background pre-fetches.
    pub fn oneshot() -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// GET `url` and parse the body as JSON.
    ///
    /// Up to three attempts with 0/1000/2000 ms leading delays. A 4xx
    /// response is returned after the first attempt; 5xx and transport
    /// failures retry until the ladder is exhausted.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let mut last_err = Error::transport("no attempts made");

        for delay_ms in ATTEMPT_DELAYS_MS {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.try_get_json(url).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    debug!("poll GET {} failed (will retry): {}", url, err);
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    async fn try_get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| map_request_error(e, url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::http(status.as_u16(), body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| map_request_error(e, url))
    }

    /// GET `url`, logging any failure and flattening it to `None`.
    ///
    /// Fetchers treat a missing tree as "no data" and leave their
    /// destination fields unchanged.
    pub async fn get_json_opt(&self, url: &str) -> Option<Value> {
        match self.get_json(url).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("poll GET {} failed: {}", url, err);
                None
            }
        }
    }

    /// Download a prepared image into an owned buffer.
    ///
    /// Streams the body with a 15-second deadline, growing the buffer in
    /// 256 KiB steps. Exceeding the 4 MiB cap aborts the download.
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(IMAGE_TIMEOUT)
            .send()
            .await
            .map_err(|e| map_request_error(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(status.as_u16(), "image fetch failed"));
        }

        if let Some(len) = response.content_length() {
            if len as usize > IMAGE_MAX_BYTES {
                return Err(Error::ImageTooLarge {
                    limit: IMAGE_MAX_BYTES,
                });
            }
        }

        let mut response = response;
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_request_error(e, url))?
        {
            append_chunk(&mut buf, &chunk)?;
        }

        debug!("fetched image: {} bytes from {}", buf.len(), url);
        Ok(buf)
    }
}

impl Default for PollClient {
    fn default() -> Self {
        Self::oneshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- endpoint_url --------------------------------------------------------

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        assert_eq!(
            endpoint_url("http://scope:1888/v2/api/", "equipment/camera/info"),
            "http://scope:1888/v2/api/equipment/camera/info"
        );
    }

    #[test]
    fn test_endpoint_url_handles_missing_slash() {
        assert_eq!(
            endpoint_url("http://scope:1888/v2/api", "guider/info"),
            "http://scope:1888/v2/api/guider/info"
        );
    }

    #[test]
    fn test_endpoint_url_strips_leading_slash() {
        assert_eq!(
            endpoint_url("http://scope/v2/api/", "/sequence/json"),
            "http://scope/v2/api/sequence/json"
        );
    }

    // -- append_chunk --------------------------------------------------------

    #[test]
    fn test_append_chunk_accumulates() {
        let mut buf = Vec::new();
        append_chunk(&mut buf, &[1, 2, 3]).unwrap();
        append_chunk(&mut buf, &[4, 5]).unwrap();
        assert_eq!(buf, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_append_chunk_grows_in_steps() {
        let mut buf = Vec::new();
        append_chunk(&mut buf, &[0u8; 10]).unwrap();
        assert!(buf.capacity() >= IMAGE_CHUNK);

        // Crossing the first step boundary grows by another full step.
        append_chunk(&mut buf, &vec![0u8; IMAGE_CHUNK]).unwrap();
        assert!(buf.capacity() >= 2 * IMAGE_CHUNK);
    }

    #[test]
    fn test_append_chunk_enforces_cap() {
        let mut buf = Vec::new();
        append_chunk(&mut buf, &vec![0u8; IMAGE_MAX_BYTES]).unwrap();
        let err = append_chunk(&mut buf, &[0u8; 1]).unwrap_err();
        assert!(matches!(err, Error::ImageTooLarge { .. }));
        // The buffer is left at the cap, not partially extended.
        assert_eq!(buf.len(), IMAGE_MAX_BYTES);
    }

    #[test]
    fn test_append_chunk_never_reserves_past_cap() {
        let mut buf = Vec::new();
        append_chunk(&mut buf, &vec![0u8; IMAGE_MAX_BYTES - 7]).unwrap();
        append_chunk(&mut buf, &[0u8; 7]).unwrap();
        assert_eq!(buf.len(), IMAGE_MAX_BYTES);
    }

    // -- retry ladder shape --------------------------------------------------

    #[test]
    fn test_attempt_delays() {
        assert_eq!(ATTEMPT_DELAYS_MS.len(), 3);
        assert_eq!(ATTEMPT_DELAYS_MS, [0, 1000, 2000]);
    }

    #[tokio::test]
    async fn test_get_json_unreachable_host_is_transport_error() {
        // Port 9 on localhost is the discard port; nothing listens there.
        let client = PollClient::oneshot();
        let err = client
            .get_json("http://127.0.0.1:9/v2/api/equipment/camera/info")
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "expected retryable transport error");
    }
}
