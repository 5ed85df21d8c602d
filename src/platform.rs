use std::env::consts::{ARCH, OS};

use crate::error::{AppError, Result};

/// Which executable to run on this host and how its release archive is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
    /// Glob (single `*` for the version) matched against release asset names.
    pub archive_pattern: String,
    pub executable_name: &'static str,
}

impl Platform {
    /// Descriptor for the running process.
    pub fn current() -> Result<Self> {
        resolve_platform(OS, ARCH)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

/// Map a Rust `std::env::consts` OS/arch pair to a platform descriptor.
///
/// Unsupported pairs are fatal: callers must abort rather than guess a fallback.
pub fn resolve_platform(os: &str, arch: &str) -> Result<Platform> {
    let os_id: &'static str = match os {
        "macos" => "darwin",
        "linux" => "linux",
        "windows" => "windows",
        _ => return Err(AppError::unsupported_platform(os, arch)),
    };
    let arch_id: &'static str = match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        _ => return Err(AppError::unsupported_platform(os, arch)),
    };

    let (extension, executable_name) = if os_id == "windows" {
        ("zip", "leafpress.exe")
    } else {
        ("tar.gz", "leafpress")
    };

    Ok(Platform {
        os: os_id,
        arch: arch_id,
        archive_pattern: format!("leafpress-v*-{os_id}-{arch_id}.{extension}"),
        executable_name,
    })
}
