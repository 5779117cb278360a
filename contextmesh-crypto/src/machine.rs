//! Local machine identifiers for key derivation.
//!
//! Collects identifiers that survive reboots: hostname, platform, CPU
//! architecture, CPU model and the current username.

use std::env;

/// Stable identifiers of the local machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    /// Hostname.
    pub hostname: String,
    /// Operating system name.
    pub platform: String,
    /// CPU architecture.
    pub arch: String,
    /// CPU model string.
    pub cpu_model: String,
    /// Login name of the current user.
    pub username: String,
}

impl MachineIdentity {
    /// Collects identifiers for the current machine.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            hostname: get_hostname(),
            platform: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            cpu_model: get_cpu_model(),
            username: get_username(),
        }
    }

    /// The string hashed into a machine-derived key.
    #[must_use]
    pub fn fingerprint_material(&self) -> String {
        [
            self.hostname.as_str(),
            self.platform.as_str(),
            self.arch.as_str(),
            self.cpu_model.as_str(),
            self.username.as_str(),
        ]
        .join("|")
    }
}

fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn get_username() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn get_cpu_model() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("model name"))
                    .and_then(|l| l.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sysctl")
            .args(["-n", "machdep.cpu.brand_string"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "windows")]
    {
        env::var("PROCESSOR_IDENTIFIER").unwrap_or_else(|_| "unknown".to_string())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        "unknown".to_string()
    }
}
