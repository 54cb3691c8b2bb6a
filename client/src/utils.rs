//! Utility functions

use serde::{Deserialize, Serialize};

/// Version information for the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Current wall-clock time as Unix epoch millis
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Render a duration in seconds as `1h 02m 03s`, `2m 03s` or `3s`
pub fn format_secs(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(0), "0s");
        assert_eq!(format_secs(-4), "0s");
        assert_eq!(format_secs(125), "2m 05s");
        assert_eq!(format_secs(3723), "1h 02m 03s");
    }

    #[test]
    fn test_version_info_has_crate_version() {
        assert_eq!(version_info().version, env!("CARGO_PKG_VERSION"));
    }
}
