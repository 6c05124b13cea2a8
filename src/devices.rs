//! Block device discovery for interactive source selection.

use humansize::{BINARY, format_size};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub name: String,
    pub device_type: DeviceType,
    pub size: u64,
    pub path: String,
}

impl BlockDevice {
    pub fn size_human(&self) -> String {
        format_size(self.size, BINARY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Hdd,
    Ssd,
    NVMe,
    Usb,
    Unknown,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Hdd => write!(f, "HDD"),
            DeviceType::Ssd => write!(f, "SSD"),
            DeviceType::NVMe => write!(f, "NVMe"),
            DeviceType::Usb => write!(f, "USB"),
            DeviceType::Unknown => write!(f, "Unknown"),
        }
    }
}

pub fn discover_block_devices() -> Vec<BlockDevice> {
    #[cfg(target_os = "linux")]
    return linux::discover(std::path::Path::new("/sys/block"));

    #[cfg(not(target_os = "linux"))]
    return Vec::new();
}

pub fn device_selection_options(devices: &[BlockDevice]) -> Vec<String> {
    devices
        .iter()
        .map(|d| format!("{} ({}) - {}", d.path, d.device_type, d.size_human()))
        .collect()
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{BlockDevice, DeviceType};
    use std::fs;
    use std::path::Path;

    const SECTOR_SIZE: u64 = 512;

    pub(super) fn discover(sys_block: &Path) -> Vec<BlockDevice> {
        let Ok(entries) = fs::read_dir(sys_block) else {
            return Vec::new();
        };

        let mut devices: Vec<_> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("dm-") {
                    return None;
                }
                parse_device(sys_block, &name)
            })
            .collect();

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    fn parse_device(sys_block: &Path, name: &str) -> Option<BlockDevice> {
        let sys_path = sys_block.join(name);
        let sectors = fs::read_to_string(sys_path.join("size"))
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()?;

        if sectors == 0 {
            return None;
        }

        Some(BlockDevice {
            name: name.to_string(),
            device_type: detect_type(name, &sys_path),
            size: sectors * SECTOR_SIZE,
            path: format!("/dev/{}", name),
        })
    }

    fn detect_type(name: &str, sys_path: &Path) -> DeviceType {
        if name.starts_with("nvme") {
            return DeviceType::NVMe;
        }

        if let Ok(removable) = fs::read_to_string(sys_path.join("removable")) {
            if removable.trim() == "1" {
                return DeviceType::Usb;
            }
        }

        match fs::read_to_string(sys_path.join("queue/rotational")) {
            Ok(r) if r.trim() == "1" => DeviceType::Hdd,
            Ok(r) if r.trim() == "0" => DeviceType::Ssd,
            _ => DeviceType::Unknown,
        }
    }

}
