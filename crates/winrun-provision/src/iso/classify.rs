//! Edition/architecture classification and user-facing warnings.
//!
//! The rules encode what actually runs well on Apple Silicon: only ARM64
//! images are usable at all, Windows 11 IoT Enterprise LTSC is the
//! recommended edition, and everything else gets a graded warning.

use serde::{Deserialize, Serialize};

use super::wim::{WimArchitecture, WimImageInfo};

/// Build number where Windows 11 starts.
const WINDOWS_11_FIRST_BUILD: u32 = 22000;

/// How serious a validation warning is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningSeverity {
    /// Informational; provisioning will work.
    Info,
    /// Degraded experience expected.
    Warning,
    /// The image will not work.
    Critical,
}

/// One classification finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    /// Severity grade.
    pub severity: WarningSeverity,
    /// Human-readable explanation.
    pub message: String,
}

impl ValidationWarning {
    fn new(severity: WarningSeverity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into() }
    }
}

/// Full validation result for one ISO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsoValidation {
    /// Edition display name from the image metadata.
    pub edition_name: String,
    /// Architecture display name.
    pub architecture: String,
    /// Windows build number.
    pub build: u32,
    /// Whether provisioning can proceed with this image.
    pub is_usable: bool,
    /// Graded findings, most severe first.
    pub warnings: Vec<ValidationWarning>,
}

/// Classify an image and produce warnings.
#[must_use]
pub fn classify(info: &WimImageInfo) -> IsoValidation {
    let mut warnings = Vec::new();
    let name = info.edition_name.to_ascii_lowercase();
    let is_arm64 = info.architecture == WimArchitecture::Arm64;
    let is_windows_11 = info.build >= WINDOWS_11_FIRST_BUILD;
    let is_server = name.contains("server");
    let is_ltsc = name.contains("ltsc");
    let is_consumer = name.contains("home") || (name.contains("pro") && !name.contains("iot"));

    if !is_arm64 {
        warnings.push(ValidationWarning::new(
            WarningSeverity::Critical,
            format!(
                "{} images cannot run on Apple Silicon; use an ARM64 ISO",
                info.architecture.name()
            ),
        ));
    }

    if is_server {
        warnings.push(ValidationWarning::new(
            WarningSeverity::Critical,
            "Windows Server has no x86/x64 application compatibility layer",
        ));
    }

    if is_arm64 && !is_windows_11 {
        warnings.push(ValidationWarning::new(
            WarningSeverity::Warning,
            "Windows 10 on ARM only emulates x86 applications; x64 programs will not run",
        ));
    }

    if is_consumer {
        warnings.push(ValidationWarning::new(
            WarningSeverity::Info,
            "Consumer Home/Pro editions ship preinstalled bloat; expect extra cleanup",
        ));
    }

    if is_windows_11 && is_arm64 && !is_ltsc && !is_server {
        warnings.push(ValidationWarning::new(
            WarningSeverity::Info,
            "Prefer Windows 11 IoT Enterprise LTSC for a minimal long-support image",
        ));
    }

    warnings.sort_by(|a, b| b.severity.cmp(&a.severity));

    IsoValidation {
        edition_name: info.edition_name.clone(),
        architecture: info.architecture.name(),
        build: info.build,
        is_usable: is_arm64,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, architecture: WimArchitecture, build: u32) -> WimImageInfo {
        WimImageInfo { edition_name: name.to_string(), architecture, build }
    }

    fn severities(validation: &IsoValidation) -> Vec<WarningSeverity> {
        validation.warnings.iter().map(|w| w.severity).collect()
    }

    #[test]
    fn recommended_image_has_no_warnings() {
        let validation =
            classify(&info("Windows 11 IoT Enterprise LTSC", WimArchitecture::Arm64, 26100));
        assert!(validation.is_usable);
        assert!(validation.warnings.is_empty(), "{:?}", validation.warnings);
    }

    #[test]
    fn x64_image_is_critical_and_unusable() {
        let validation = classify(&info("Windows 11 Pro", WimArchitecture::X64, 22631));
        assert!(!validation.is_usable);
        assert!(severities(&validation).contains(&WarningSeverity::Critical));
        assert!(validation.warnings[0].message.contains("Apple Silicon"));
    }

    #[test]
    fn server_edition_is_critical() {
        let validation =
            classify(&info("Windows Server 2025 Standard", WimArchitecture::Arm64, 26100));
        assert!(severities(&validation).contains(&WarningSeverity::Critical));
        // Usability is an architecture question; Server ARM64 is usable but
        // strongly warned against.
        assert!(validation.is_usable);
    }

    #[test]
    fn windows_10_arm_warns_about_emulation() {
        let validation = classify(&info("Windows 10 Pro", WimArchitecture::Arm64, 19045));
        assert!(severities(&validation).contains(&WarningSeverity::Warning));
        assert!(validation.is_usable);
    }

    #[test]
    fn consumer_editions_get_bloat_info() {
        let validation = classify(&info("Windows 11 Home", WimArchitecture::Arm64, 26100));
        assert!(severities(&validation).contains(&WarningSeverity::Info));
    }

    #[test]
    fn non_ltsc_windows_11_suggests_ltsc() {
        let validation = classify(&info("Windows 11 Enterprise", WimArchitecture::Arm64, 26100));
        assert!(
            validation
                .warnings
                .iter()
                .any(|w| w.severity == WarningSeverity::Info && w.message.contains("LTSC"))
        );
    }

    #[test]
    fn warnings_sorted_most_severe_first() {
        let validation = classify(&info("Windows 11 Home", WimArchitecture::X64, 22631));
        let sev = severities(&validation);
        let mut sorted = sev.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(sev, sorted);
    }
}
