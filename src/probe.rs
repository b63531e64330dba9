//! Availability probe for optional acceleration backends
//!
//! Accelerated kernels live in shared libraries that may or may not exist in
//! a given environment. [`is_available`] answers "can this backend be
//! resolved" without ever raising: any load failure (missing binary, version
//! mismatch, absent package) is `false`. Results are memoized in a
//! process-wide capability table, so each library is resolved at most once
//! and consumed thereafter as a plain boolean.
//!
//! Callers use the probe to degrade gracefully: a benchmark suite skips the
//! variant, an injection caller keeps the reference modules.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Well-known backend library names used by the benchmark suites
pub mod backends {
    /// NVIDIA CUDA driver
    pub const CUDA: &str = "cuda";
    /// AMD HIP runtime
    pub const HIP: &str = "amdhip64";
    /// Vulkan loader
    pub const VULKAN: &str = "vulkan";
}

static CAPABILITIES: Lazy<RwLock<HashMap<String, bool>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Platform-decorated candidate file names for a backend
fn candidates(name: &str) -> Vec<String> {
    vec![
        name.to_string(),
        format!("lib{name}.so"),
        format!("lib{name}.so.1"),
        format!("{name}.dll"),
        format!("nv{name}.dll"),
        format!("lib{name}.dylib"),
    ]
}

/// Attempt to resolve the backend right now, without touching the cache
fn resolve(name: &str) -> bool {
    candidates(name).iter().any(|candidate| {
        // SAFETY: the library is opened and immediately dropped; no symbols
        // are resolved, so no initialization routines beyond the loader's
        // own run with live references.
        unsafe { libloading::Library::new(candidate) }.is_ok()
    })
}

/// Check whether an optional acceleration backend is present
///
/// Returns `true` if the named library resolves, `false` on any failure.
/// Never panics and has no side effects beyond the resolution attempt. The
/// first probe per name does the actual resolution; later calls read the
/// capability table.
///
/// # Examples
///
/// ```
/// use inyectar::probe;
///
/// // A name that cannot exist resolves to false, quietly.
/// assert!(!probe::is_available("no_such_backend_library"));
/// ```
#[must_use]
pub fn is_available(name: &str) -> bool {
    if let Ok(table) = CAPABILITIES.read() {
        if let Some(&available) = table.get(name) {
            return available;
        }
    }

    let available = resolve(name);
    if let Ok(mut table) = CAPABILITIES.write() {
        table.insert(name.to_string(), available);
    }
    available
}

/// Re-run the resolution for one backend, updating the capability table
///
/// Test hook; production callers probe once at startup and live with the
/// answer.
pub fn refresh(name: &str) -> bool {
    let available = resolve(name);
    if let Ok(mut table) = CAPABILITIES.write() {
        table.insert(name.to_string(), available);
    }
    available
}

/// Fail unless a specific backend is present
///
/// For callers that cannot degrade (a suite pinned to one accelerator, a
/// deployment that must not silently fall back to reference kernels).
///
/// # Errors
///
/// Returns [`crate::error::InyectarError::UnavailableBackend`] when the
/// probe fails.
pub fn require(name: &str) -> crate::error::Result<()> {
    if is_available(name) {
        Ok(())
    } else {
        Err(crate::error::InyectarError::UnavailableBackend(
            name.to_string(),
        ))
    }
}

/// Snapshot of every backend probed so far
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Backend name → availability
    pub backends: HashMap<String, bool>,
}

/// Capability table snapshot for run reports
#[must_use]
pub fn report() -> ProbeReport {
    let backends = CAPABILITIES
        .read()
        .map(|table| table.clone())
        .unwrap_or_default();
    ProbeReport { backends }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_missing_backend_is_false_and_silent() {
        assert!(!is_available("definitely_not_a_real_backend_42"));
    }

    #[test]
    #[serial]
    fn test_probe_is_memoized() {
        let name = "memoization_probe_target";
        let first = is_available(name);
        assert!(!first);
        let table = report();
        assert_eq!(table.backends.get(name), Some(&false));
        // Second call answers from the table.
        assert_eq!(is_available(name), first);
    }

    #[test]
    #[serial]
    fn test_refresh_updates_table() {
        let name = "refresh_probe_target";
        assert!(!is_available(name));
        assert!(!refresh(name));
        assert_eq!(report().backends.get(name), Some(&false));
    }

    #[test]
    #[serial]
    fn test_probe_c_library_present() {
        // libc exists on every platform this crate builds for; the probe
        // itself must not error either way.
        let _ = is_available("c");
    }

    #[test]
    #[serial]
    fn test_known_backend_names_probe_quietly() {
        // Whatever the host has installed, probing the well-known names
        // must answer without raising.
        let _ = is_available(backends::CUDA);
        let _ = is_available(backends::HIP);
        let _ = is_available(backends::VULKAN);
    }

    #[test]
    #[serial]
    fn test_require_missing_backend_errors() {
        let err = require("another_backend_that_cannot_exist").unwrap_err();
        assert!(matches!(
            err,
            crate::error::InyectarError::UnavailableBackend(_)
        ));
    }
}
