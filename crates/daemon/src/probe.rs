//! Device attribute probing
//!
//! Best-effort shell queries for the attributes carried in connect reports.
//! Each attribute is probed independently; a failed query degrades that
//! attribute to its sentinel and never fails the probe as a whole.

use common::DeviceBackend;
use protocol::shell::{MEMINFO_COMMAND, PACKAGES_COMMAND, VERSION_COMMAND};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reported when the software version cannot be read
pub const UNKNOWN_VERSION: &str = "unknown";

/// Reported when the memory capacity cannot be read
pub const UNKNOWN_MEMORY_GB: u64 = 0;


/// Probed device attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub software_version: String,
    pub memory_gb: u64,
    /// Matching packages; `None` when package reporting is disabled
    pub packages: Option<Vec<String>>,
}

impl DeviceInfo {
    /// All attributes at their sentinels
    pub fn unknown() -> Self {
        Self {
            software_version: UNKNOWN_VERSION.to_string(),
            memory_gb: UNKNOWN_MEMORY_GB,
            packages: None,
        }
    }
}

/// Convert kilobytes to gigabytes, rounding to the nearest integer
pub fn kb_to_gb(kb: u64) -> u64 {
    const KB_PER_GB: u64 = 1024 * 1024;
    (kb + KB_PER_GB / 2) / KB_PER_GB
}

/// Extract the `MemTotal` figure (kB) from `/proc/meminfo` output
pub fn parse_mem_total_kb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal"))
        .and_then(|line| line.split_once(':'))
        .and_then(|(_, value)| value.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// Names from `pm list packages` output containing `filter`
pub fn parse_packages(output: &str, filter: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim())
        .map(|line| line.strip_prefix("package:").unwrap_or(line))
        .filter(|name| !name.is_empty() && name.contains(filter))
        .map(str::to_string)
        .collect()
}

/// Queries a connected device for its reportable attributes
pub struct DeviceInfoProbe {
    backend: Arc<dyn DeviceBackend>,
    package_filter: Option<String>,
}

impl DeviceInfoProbe {
    pub fn new(backend: Arc<dyn DeviceBackend>, package_filter: Option<String>) -> Self {
        Self {
            backend,
            package_filter,
        }
    }

    /// Probe every attribute; never fails
    pub async fn probe(&self, device_id: &str) -> DeviceInfo {
        let (software_version, memory_gb, packages) = tokio::join!(
            self.software_version(device_id),
            self.memory_gb(device_id),
            self.packages(device_id),
        );

        let info = DeviceInfo {
            software_version,
            memory_gb,
            packages,
        };
        debug!("Probed device {}: {:?}", device_id, info);
        info
    }

    async fn software_version(&self, device_id: &str) -> String {
        match self.backend.shell(device_id, VERSION_COMMAND).await {
            Ok(output) if !output.trim().is_empty() => output.trim().to_string(),
            Ok(_) => {
                warn!("Device {} returned an empty software version", device_id);
                UNKNOWN_VERSION.to_string()
            }
            Err(e) => {
                warn!("Failed to read software version of {}: {}", device_id, e);
                UNKNOWN_VERSION.to_string()
            }
        }
    }

    async fn memory_gb(&self, device_id: &str) -> u64 {
        match self.backend.shell(device_id, MEMINFO_COMMAND).await {
            Ok(output) => match parse_mem_total_kb(&output) {
                Some(kb) => kb_to_gb(kb),
                None => {
                    warn!("No MemTotal line in meminfo of {}", device_id);
                    UNKNOWN_MEMORY_GB
                }
            },
            Err(e) => {
                warn!("Failed to read memory info of {}: {}", device_id, e);
                UNKNOWN_MEMORY_GB
            }
        }
    }

    async fn packages(&self, device_id: &str) -> Option<Vec<String>> {
        let filter = self.package_filter.as_deref()?;
        match self.backend.shell(device_id, PACKAGES_COMMAND).await {
            Ok(output) => Some(parse_packages(&output, filter)),
            Err(e) => {
                warn!("Failed to list packages of {}: {}", device_id, e);
                Some(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MEMINFO_6GB, MockBackend};

    #[test]
    fn test_kb_to_gb_rounding() {
        assert_eq!(kb_to_gb(6_005_384), 6);
        assert_eq!(kb_to_gb(0), 0);
        assert_eq!(kb_to_gb(524_287), 0);
        assert_eq!(kb_to_gb(524_288), 1);
        assert_eq!(kb_to_gb(3_900_000), 4);
    }

    #[test]
    fn test_parse_mem_total() {
        assert_eq!(parse_mem_total_kb(MEMINFO_6GB), Some(6_005_384));
        assert_eq!(parse_mem_total_kb("MemFree: 12 kB\n"), None);
        assert_eq!(parse_mem_total_kb("MemTotal: lots\n"), None);
    }

    #[test]
    fn test_parse_packages() {
        let output = "package:com.yangcong345.app\npackage:com.android.settings\r\npackage:com.yangcong345.test\n";
        assert_eq!(
            parse_packages(output, "com.yangcong345"),
            vec!["com.yangcong345.app", "com.yangcong345.test"]
        );
    }

    #[tokio::test]
    async fn test_probe_success() {
        let backend = MockBackend::new().with_android("13", MEMINFO_6GB);
        let probe = DeviceInfoProbe::new(Arc::new(backend), None);

        let info = probe.probe("D1").await;
        assert_eq!(info.software_version, "13");
        assert_eq!(info.memory_gb, 6);
        assert_eq!(info.packages, None);
    }

    #[tokio::test]
    async fn test_probe_fields_fail_independently() {
        let backend = MockBackend::new();
        backend.set_shell_output(MEMINFO_COMMAND, MEMINFO_6GB);
        let probe = DeviceInfoProbe::new(Arc::new(backend), None);

        let info = probe.probe("D1").await;
        assert_eq!(info.software_version, UNKNOWN_VERSION);
        assert_eq!(info.memory_gb, 6);
    }

    #[tokio::test]
    async fn test_probe_total_failure_yields_sentinels() {
        let probe = DeviceInfoProbe::new(Arc::new(MockBackend::new()), Some("com.x".into()));

        let info = probe.probe("D1").await;
        assert_eq!(info.software_version, UNKNOWN_VERSION);
        assert_eq!(info.memory_gb, UNKNOWN_MEMORY_GB);
        assert_eq!(info.packages, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_probe_packages_when_filtered() {
        let backend = MockBackend::new().with_android("12", MEMINFO_6GB);
        backend.set_shell_output(PACKAGES_COMMAND, "package:com.x.one\npackage:org.y\n");
        let probe = DeviceInfoProbe::new(Arc::new(backend.clone()), Some("com.x".into()));

        let info = probe.probe("D1").await;
        assert_eq!(info.packages, Some(vec!["com.x.one".to_string()]));
        assert_eq!(backend.shell_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_probe_runs_the_scripted_commands() {
        let backend = MockBackend::new().with_android("14", MEMINFO_6GB);
        backend.set_shell_output(PACKAGES_COMMAND, "");
        let probe = DeviceInfoProbe::new(Arc::new(backend.clone()), Some("com.x".into()));

        probe.probe("D1").await;
        let mut commands: Vec<String> = backend
            .shell_calls()
            .into_iter()
            .map(|(_, command)| command)
            .collect();
        commands.sort();

        let mut expected = vec![VERSION_COMMAND, MEMINFO_COMMAND, PACKAGES_COMMAND];
        expected.sort();
        assert_eq!(commands, expected);
    }
}
