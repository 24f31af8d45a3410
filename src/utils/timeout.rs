//! Default timing constants for the session.

use std::time::Duration;

/// Default timeout for the initial TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default socket read timeout while a response is pending.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between keep-alive frames once the session is in chat.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between "check for updated advertisement" requests.
pub const AD_CHECK_INTERVAL: Duration = Duration::from_secs(20);

/// How long shutdown waits for the pipeline threads to exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
