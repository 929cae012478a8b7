//! Compile-time kernel configuration, plus build metadata baked in by
//! `build.rs` for diagnostics (`KC_DMESG` output and panic messages both
//! include it).

/// Timer tick rate driving scheduler quanta.
pub const TIMER_HZ: u32 = 100;

/// Log level installed at boot, before any kernel call can raise or
/// lower it via `lib::printk::set_level`.
pub const DEFAULT_LOG_LEVEL: crate::lib::printk::LogLevel = crate::lib::printk::LogLevel::Info;

pub struct BuildInfo {
    pub git_commit: &'static str,
    pub git_branch: &'static str,
    pub git_dirty: bool,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
    pub profile: &'static str,
    pub target: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    git_commit: match option_env!("MOCHI_GIT_COMMIT") {
        Some(v) => v,
        None => "unknown",
    },
    git_branch: match option_env!("MOCHI_GIT_BRANCH") {
        Some(v) => v,
        None => "unknown",
    },
    git_dirty: matches!(option_env!("MOCHI_GIT_DIRTY"), Some("1")),
    build_timestamp: match option_env!("MOCHI_BUILD_TIMESTAMP") {
        Some(v) => v,
        None => "unknown",
    },
    rustc_version: match option_env!("MOCHI_RUSTC_VERSION") {
        Some(v) => v,
        None => "unknown",
    },
    profile: match option_env!("MOCHI_PROFILE") {
        Some(v) => v,
        None => "unknown",
    },
    target: match option_env!("MOCHI_TARGET") {
        Some(v) => v,
        None => "unknown",
    },
};

/// Logs build metadata once, at the very start of boot.
pub fn log_build_info() {
    crate::info!(
        "mochi {} ({}{}) built {} with {} [{}/{}]",
        BUILD_INFO.git_commit,
        BUILD_INFO.git_branch,
        if BUILD_INFO.git_dirty { "-dirty" } else { "" },
        BUILD_INFO.build_timestamp,
        BUILD_INFO.rustc_version,
        BUILD_INFO.profile,
        BUILD_INFO.target,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_hz_is_nonzero() {
        assert!(TIMER_HZ > 0);
    }
}
