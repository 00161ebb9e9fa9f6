//! Windows image (WIM/ESD) metadata extraction.
//!
//! Two ways to get at the metadata: an external WIM-info tool when one is
//! installed, or parsing the WIM header directly. The direct parser reads
//! the fixed header (magic `MSWIM\0\0\0`, XML-data resource entry at byte
//! 72) and the UTF-16LE XML blob it points at, then pulls the handful of
//! tags we care about.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{ProvisioningError, Result};

/// WIM magic bytes at offset 0.
pub const WIM_MAGIC: &[u8; 8] = b"MSWIM\0\0\0";

/// Byte offset of the XML-data resource's absolute file offset.
///
/// The XML resource entry starts at byte 72 of the header: 8 bytes of
/// packed size/flags, then the u64 offset, then the u64 original size.
const XML_OFFSET_FIELD: u64 = 80;

/// Byte offset of the XML-data original size field.
const XML_SIZE_FIELD: u64 = 88;

/// Upper bound on the XML blob we are willing to read (sanity check).
const MAX_XML_SIZE: u64 = 16 * 1024 * 1024;

/// Processor architecture declared by a Windows image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WimArchitecture {
    /// 32-bit x86 (`ARCH` 0).
    X86,
    /// 64-bit x86 (`ARCH` 9).
    X64,
    /// 64-bit ARM (`ARCH` 12).
    Arm64,
    /// Anything else.
    Unknown(u32),
}

impl WimArchitecture {
    /// Map the `ARCH` XML value.
    #[must_use]
    pub fn from_arch_code(code: u32) -> Self {
        match code {
            0 => Self::X86,
            9 => Self::X64,
            12 => Self::Arm64,
            other => Self::Unknown(other),
        }
    }

    /// Display name matching Windows conventions.
    #[must_use]
    pub fn name(self) -> String {
        match self {
            Self::X86 => "x86".to_string(),
            Self::X64 => "x64".to_string(),
            Self::Arm64 => "ARM64".to_string(),
            Self::Unknown(code) => format!("unknown({code})"),
        }
    }
}

/// Metadata of the first image inside a WIM/ESD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WimImageInfo {
    /// Edition display name (`DISPLAYNAME` falling back to `NAME`).
    pub edition_name: String,
    /// Processor architecture.
    pub architecture: WimArchitecture,
    /// Windows build number (`BUILD`).
    pub build: u32,
}

/// Extracts image metadata from a WIM/ESD file.
#[async_trait]
pub trait WimInspector: Send + Sync + 'static {
    /// Inspect the image at `wim_path`.
    async fn inspect(&self, wim_path: &Path) -> Result<WimImageInfo>;
}

/// Inspector that parses the WIM header and XML directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectWimInspector;

#[async_trait]
impl WimInspector for DirectWimInspector {
    async fn inspect(&self, wim_path: &Path) -> Result<WimImageInfo> {
        let bytes = tokio::fs::read(wim_path).await.map_err(|e| {
            ProvisioningError::IsoMetadataParseFailed {
                detail: format!("reading {}: {e}", wim_path.display()),
            }
        })?;
        parse_wim(&bytes)
    }
}

/// Inspector shelling out to `wimlib-imagex info`.
///
/// Output contract: exit code, stderr bytes, and a `Key: Value` text table
/// on stdout with at least `Name`/`Display Name`, `Architecture`, `Build`.
pub struct WimlibInspector {
    tool: std::path::PathBuf,
}

impl WimlibInspector {
    /// Inspector using an explicit tool path.
    #[must_use]
    pub fn new(tool: impl Into<std::path::PathBuf>) -> Self {
        Self { tool: tool.into() }
    }
}

#[async_trait]
impl WimInspector for WimlibInspector {
    async fn inspect(&self, wim_path: &Path) -> Result<WimImageInfo> {
        let output = tokio::process::Command::new(&self.tool)
            .arg("info")
            .arg(wim_path)
            .arg("1")
            .output()
            .await
            .map_err(|e| ProvisioningError::IsoMetadataParseFailed {
                detail: format!("spawning {}: {e}", self.tool.display()),
            })?;

        if !output.status.success() {
            return Err(ProvisioningError::IsoMetadataParseFailed {
                detail: format!(
                    "wim info exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        parse_wimlib_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_wimlib_output(stdout: &str) -> Result<WimImageInfo> {
    let field = |key: &str| -> Option<String> {
        stdout.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim().eq_ignore_ascii_case(key)).then(|| v.trim().to_string())
        })
    };

    let edition_name = field("Display Name")
        .or_else(|| field("Name"))
        .ok_or_else(|| ProvisioningError::IsoMetadataParseFailed {
            detail: "wim info output carried no image name".to_string(),
        })?;

    let architecture = match field("Architecture").as_deref() {
        Some("x86") => WimArchitecture::X86,
        Some("x86_64" | "x64") => WimArchitecture::X64,
        Some("ARM64" | "arm64") => WimArchitecture::Arm64,
        _ => WimArchitecture::Unknown(u32::MAX),
    };

    let build = field("Build")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ProvisioningError::IsoMetadataParseFailed {
            detail: "wim info output carried no build number".to_string(),
        })?;

    Ok(WimImageInfo { edition_name, architecture, build })
}

/// Parse a WIM file image already loaded into memory.
pub fn parse_wim(bytes: &[u8]) -> Result<WimImageInfo> {
    if bytes.len() < 208 || &bytes[..8] != WIM_MAGIC {
        return Err(ProvisioningError::IsoMetadataParseFailed {
            detail: "missing MSWIM header magic".to_string(),
        });
    }

    let xml_offset = read_u64(bytes, XML_OFFSET_FIELD as usize)?;
    let xml_size = read_u64(bytes, XML_SIZE_FIELD as usize)?;
    if xml_size == 0 || xml_size > MAX_XML_SIZE {
        return Err(ProvisioningError::IsoMetadataParseFailed {
            detail: format!("implausible XML data size {xml_size}"),
        });
    }
    let start = usize::try_from(xml_offset).map_err(|_| bad_range(xml_offset, xml_size))?;
    let len = usize::try_from(xml_size).map_err(|_| bad_range(xml_offset, xml_size))?;
    let end = start.checked_add(len).ok_or_else(|| bad_range(xml_offset, xml_size))?;
    if end > bytes.len() {
        return Err(bad_range(xml_offset, xml_size));
    }

    let xml = decode_utf16le(&bytes[start..end]);
    parse_image_xml(&xml)
}

fn bad_range(offset: u64, size: u64) -> ProvisioningError {
    ProvisioningError::IsoMetadataParseFailed {
        detail: format!("XML data range [{offset}, +{size}) escapes the file"),
    }
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64> {
    let slice = bytes.get(offset..offset + 8).ok_or_else(|| {
        ProvisioningError::IsoMetadataParseFailed { detail: "truncated WIM header".to_string() }
    })?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(slice);
    Ok(u64::from_le_bytes(arr))
}

/// Decode UTF-16LE, skipping a BOM when present.
fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let units = if units.first() == Some(&0xFEFF) { &units[1..] } else { &units[..] };
    String::from_utf16_lossy(units)
}

/// Pull edition name, architecture, and build from the image XML.
fn parse_image_xml(xml: &str) -> Result<WimImageInfo> {
    let edition_name = extract_tag(xml, "DISPLAYNAME")
        .or_else(|| extract_tag(xml, "NAME"))
        .ok_or_else(|| ProvisioningError::IsoMetadataParseFailed {
            detail: "image XML carries neither DISPLAYNAME nor NAME".to_string(),
        })?;

    let arch_code: u32 = extract_tag(xml, "ARCH")
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ProvisioningError::IsoMetadataParseFailed {
            detail: "image XML carries no ARCH".to_string(),
        })?;

    let build: u32 = extract_tag(xml, "BUILD")
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ProvisioningError::IsoMetadataParseFailed {
            detail: "image XML carries no BUILD".to_string(),
        })?;

    Ok(WimImageInfo {
        edition_name,
        architecture: WimArchitecture::from_arch_code(arch_code),
        build,
    })
}

/// First `<TAG>value</TAG>` occurrence; WIM XML uses uppercase tags.
fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Synthetic WIM files for validator tests.

    use super::WIM_MAGIC;

    /// Build a minimal WIM byte image carrying the given XML fields.
    pub fn synthetic_wim(display_name: &str, arch: u32, build: u32) -> Vec<u8> {
        let xml = format!(
            "<WIM><TOTALBYTES>123</TOTALBYTES><IMAGE INDEX=\"1\">\
             <DISPLAYNAME>{display_name}</DISPLAYNAME>\
             <WINDOWS><ARCH>{arch}</ARCH>\
             <VERSION><MAJOR>10</MAJOR><MINOR>0</MINOR><BUILD>{build}</BUILD></VERSION>\
             </WINDOWS></IMAGE></WIM>"
        );

        let mut xml_bytes = vec![0xFF, 0xFE]; // UTF-16LE BOM
        for unit in xml.encode_utf16() {
            xml_bytes.extend_from_slice(&unit.to_le_bytes());
        }

        let xml_offset = 208u64; // right after the fixed header
        let mut out = vec![0u8; 208];
        out[..8].copy_from_slice(WIM_MAGIC);
        out[8..12].copy_from_slice(&208u32.to_le_bytes()); // cbSize
        out[80..88].copy_from_slice(&xml_offset.to_le_bytes());
        out[88..96].copy_from_slice(&(xml_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&xml_bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testing::synthetic_wim;
    use super::*;

    #[test]
    fn parses_synthetic_arm64_image() {
        let wim = synthetic_wim("Windows 11 IoT Enterprise LTSC", 12, 26100);
        let info = parse_wim(&wim).unwrap();
        assert_eq!(info.edition_name, "Windows 11 IoT Enterprise LTSC");
        assert_eq!(info.architecture, WimArchitecture::Arm64);
        assert_eq!(info.build, 26100);
    }

    #[test]
    fn arch_codes_map_per_contract() {
        assert_eq!(WimArchitecture::from_arch_code(0), WimArchitecture::X86);
        assert_eq!(WimArchitecture::from_arch_code(9), WimArchitecture::X64);
        assert_eq!(WimArchitecture::from_arch_code(12), WimArchitecture::Arm64);
        assert_eq!(WimArchitecture::from_arch_code(6), WimArchitecture::Unknown(6));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut wim = synthetic_wim("Windows 11 Pro", 12, 26100);
        wim[0] = b'X';
        assert!(matches!(
            parse_wim(&wim),
            Err(ProvisioningError::IsoMetadataParseFailed { .. })
        ));
    }

    #[test]
    fn rejects_xml_range_escaping_file() {
        let mut wim = synthetic_wim("Windows 11 Pro", 12, 26100);
        wim[88..96].copy_from_slice(&(1024u64 * 1024).to_le_bytes());
        assert!(matches!(
            parse_wim(&wim),
            Err(ProvisioningError::IsoMetadataParseFailed { .. })
        ));
    }

    #[test]
    fn falls_back_to_name_tag() {
        let xml = "<IMAGE><NAME>Windows 10 Home</NAME><ARCH>9</ARCH><BUILD>19045</BUILD></IMAGE>";
        let info = parse_image_xml(xml).unwrap();
        assert_eq!(info.edition_name, "Windows 10 Home");
        assert_eq!(info.architecture, WimArchitecture::X64);
    }

    #[test]
    fn parses_wimlib_text_output() {
        let stdout = "Index:          1\n\
                      Name:           Windows 11 Pro\n\
                      Display Name:   Windows 11 Pro\n\
                      Architecture:   ARM64\n\
                      Build:          22631\n";
        let info = parse_wimlib_output(stdout).unwrap();
        assert_eq!(info.edition_name, "Windows 11 Pro");
        assert_eq!(info.architecture, WimArchitecture::Arm64);
        assert_eq!(info.build, 22631);
    }
}
