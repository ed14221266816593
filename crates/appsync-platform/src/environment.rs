/// Platform identifiers sent with every sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub platform: String,
    pub platform_version: String,
}

impl PlatformInfo {
    #[must_use]
    pub fn new(platform: impl Into<String>, platform_version: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            platform_version: platform_version.into(),
        }
    }

    /// Identify the platform this process is running on.
    #[must_use]
    pub fn detect() -> Self {
        Self::new(platform_name(), platform_version())
    }
}

fn platform_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "macOS"
    } else if cfg!(target_os = "windows") {
        "Windows"
    } else if cfg!(target_os = "android") {
        "Android"
    } else if cfg!(target_os = "linux") {
        "Linux"
    } else {
        std::env::consts::OS
    }
}

#[cfg(target_os = "linux")]
fn platform_version() -> String {
    std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|content| parse_os_release_version(&content))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(not(target_os = "linux"))]
fn platform_version() -> String {
    std::env::consts::ARCH.to_string()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_os_release_version(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let value = line.strip_prefix("VERSION_ID=")?;
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::{PlatformInfo, parse_os_release_version};

    #[test]
    fn parse_os_release_version_reads_quoted_value() {
        let content = "NAME=\"Ubuntu\"\nVERSION_ID=\"24.04\"\nID=ubuntu\n";

        assert_eq!(parse_os_release_version(content).as_deref(), Some("24.04"));
    }

    #[test]
    fn parse_os_release_version_ignores_missing_or_empty() {
        assert!(parse_os_release_version("NAME=Arch\n").is_none());
        assert!(parse_os_release_version("VERSION_ID=\"\"\n").is_none());
    }

    #[test]
    fn detect_fills_both_fields() {
        let info = PlatformInfo::detect();

        assert!(!info.platform.is_empty());
        assert!(!info.platform_version.is_empty());
    }
}
