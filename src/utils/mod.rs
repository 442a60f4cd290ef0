use std::time::Duration;

use git_version::git_version;
use smithay::utils::{Clock, Monotonic};

pub mod id;
pub mod spawning;

pub fn version() -> String {
    format!(
        "{} ({})",
        env!("CARGO_PKG_VERSION"),
        git_version!(fallback = "unknown commit"),
    )
}

pub fn get_monotonic_time() -> Duration {
    Duration::from(Clock::<Monotonic>::new().now())
}
