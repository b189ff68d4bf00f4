//! OS resource limits for the runner process.
//!
//! Limits set here are inherited by every child the runner spawns. Each limit
//! is set as both the soft and the hard value, clamped to the current hard
//! maximum, so a second call can only tighten what the first one set.

use anyhow::Result;
#[cfg(unix)]
use anyhow::Context;
use tracing::debug;

use crate::domain::ResourceLimits;

// The resource argument type differs between libc targets, so this is a macro
// rather than a function taking the resource as a parameter.
#[cfg(unix)]
macro_rules! set_limit {
    ($resource:expr, $name:literal, $value:expr) => {{
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: getrlimit only writes into the struct we pass
        let ret_code = unsafe { libc::getrlimit($resource, &mut current) };
        if ret_code != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("getrlimit({}) failed", $name));
        }

        let requested = $value as libc::rlim_t;
        let value = if current.rlim_max != libc::RLIM_INFINITY && requested > current.rlim_max {
            current.rlim_max
        } else {
            requested
        };

        let rlim = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        // SAFETY: setrlimit only reads the struct we pass
        let ret_code = unsafe { libc::setrlimit($resource, &rlim) };
        if ret_code != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("setrlimit({}) failed", $name));
        }

        value as u64
    }};
}

/// Apply `limits` to the current process and return the values in effect
#[cfg(unix)]
pub fn apply(limits: &ResourceLimits) -> Result<ResourceLimits> {
    let applied = ResourceLimits {
        cpu_seconds: set_limit!(libc::RLIMIT_CPU, "RLIMIT_CPU", limits.cpu_seconds.max(1)),
        memory_bytes: set_limit!(libc::RLIMIT_AS, "RLIMIT_AS", limits.memory_bytes),
        fd_limit: set_limit!(libc::RLIMIT_NOFILE, "RLIMIT_NOFILE", limits.fd_limit),
    };

    debug!(
        cpu_seconds = applied.cpu_seconds,
        memory_bytes = applied.memory_bytes,
        fd_limit = applied.fd_limit,
        "Applied resource limits"
    );
    Ok(applied)
}

/// Resource limits are not supported on this platform; nothing is applied
#[cfg(not(unix))]
pub fn apply(limits: &ResourceLimits) -> Result<ResourceLimits> {
    debug!("Resource limits unsupported on this platform, skipping");
    Ok(*limits)
}
