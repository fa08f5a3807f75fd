//! Platform services: randomness and clocks.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

use crate::types::{ErrNo, FileSystemResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// The advertised clock resolution: a conservative millisecond, in
/// nanoseconds.
pub const CLOCK_RESOLUTION_NS: u64 = 1_000_000;

/// Fills `buffer` with cryptographically strong random bytes from the host's
/// entropy source.
pub fn fill_random(buffer: &mut [u8]) -> FileSystemResult<()> {
    getrandom::getrandom(buffer).map_err(|_| ErrNo::NoSys)
}

/// Wall-clock time in nanoseconds since the Unix epoch.
pub fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}
