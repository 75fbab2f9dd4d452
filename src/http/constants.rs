//! Constants for the HTTP layer (timeouts, retry schedule, limiter bounds).

use std::time::Duration;

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for metadata and search requests (30 seconds).
pub const METADATA_TIMEOUT_SECS: u64 = 30;

/// Default timeout for bulk file transfers (5 minutes).
pub const TRANSFER_TIMEOUT_SECS: u64 = 300;

/// Default number of concurrent outbound requests.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Upper bound accepted for concurrent outbound requests.
pub const MAX_CONCURRENT_REQUESTS: usize = 16;

/// Queue waits longer than this are logged at warn level.
pub const SLOW_ACQUIRE_WARNING_THRESHOLD: Duration = Duration::from_secs(10);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// URLs whose ETag and body are kept for revalidation.
pub const ETAG_STORE_CAPACITY: usize = 256;

/// Bodies larger than this are not kept for revalidation (1 MiB).
pub const MAX_ETAG_BODY_BYTES: usize = 1024 * 1024;

/// Default token bucket burst size when a bandwidth cap is set (1 MiB).
pub const DEFAULT_BURST_BYTES: u64 = 1024 * 1024;
