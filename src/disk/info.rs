//! Point-in-time disk introspection.
//!
//! Everything here is recomputed on demand from the image file, the mount
//! table, and statvfs; nothing is cached between calls.

use crate::error::{Error, Result};
use crate::shell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Usage statistics for one mounted filesystem.
#[derive(Debug, Clone, Serialize)]
pub struct MountUsage {
    /// Filesystem capacity in GB.
    pub total_gb: f64,
    /// Space in use in GB.
    pub used_gb: f64,
    /// Space available to unprivileged users in GB.
    pub free_gb: f64,
    /// Percentage of capacity in use.
    pub use_percent: f64,
}

/// Snapshot of a disk image's state.
#[derive(Debug, Clone, Serialize)]
pub struct DiskInfo {
    /// Path to the backing image file.
    pub disk_file: PathBuf,
    /// Image file size in whole megabytes.
    pub size_mb: u64,
    /// Filesystem type label, or "unknown".
    pub filesystem: String,
    /// Whether any tracked loop device is mounted.
    pub mounted: bool,
    /// Mount points referencing the image or its devices.
    pub mount_points: Vec<PathBuf>,
    /// Usage statistics per mount point, when mounted.
    pub usage: BTreeMap<String, MountUsage>,
}

/// Probe the filesystem type inside the image.
///
/// Best effort: any probe failure or empty answer reads as "unknown".
pub fn detect_filesystem(image: &Path) -> String {
    let image_str = image.to_string_lossy().to_string();
    match shell::run_capture("blkid", &["-o", "value", "-s", "TYPE", &image_str]) {
        Ok(output) if !output.trim().is_empty() => output.trim().to_string(),
        _ => "unknown".to_string(),
    }
}

/// Whether any tracked loop device appears in the active mount table.
///
/// No devices means not mounted, not an error.
pub fn is_mounted(devices: &[String]) -> bool {
    if devices.is_empty() {
        return false;
    }
    match read_mount_table() {
        Ok(mounts) => devices.iter().any(|dev| mounts.contains(dev.as_str())),
        Err(_) => false,
    }
}

/// Mount points whose mount-table entry references the image or a tracked
/// device.
///
/// Entries are matched as substrings of the raw table line, so an image
/// path that is a prefix of another image's path will over-match.
pub fn mount_points(image: &Path, devices: &[String]) -> Vec<PathBuf> {
    match read_mount_table() {
        Ok(mounts) => scan_mount_table(&mounts, image, devices),
        Err(_) => Vec::new(),
    }
}

/// Build a full snapshot of the image's state.
///
/// Fails only when the image file itself is missing; usage statistics are
/// best effort per mount point.
pub fn disk_info(image: &Path, devices: &[String]) -> Result<DiskInfo> {
    let metadata = std::fs::metadata(image).map_err(|_| Error::DiskNotFound {
        path: image.to_path_buf(),
    })?;

    let mounted = is_mounted(devices);
    let mount_points = mount_points(image, devices);

    let mut usage = BTreeMap::new();
    if mounted {
        for point in &mount_points {
            match mount_usage(point) {
                Ok(stats) => {
                    usage.insert(point.display().to_string(), stats);
                }
                Err(e) => {
                    tracing::warn!(
                        mount_point = %point.display(),
                        error = %e,
                        "failed to read usage statistics"
                    );
                }
            }
        }
    }

    Ok(DiskInfo {
        disk_file: image.to_path_buf(),
        size_mb: metadata.len() / (1024 * 1024),
        filesystem: detect_filesystem(image),
        mounted,
        mount_points,
        usage,
    })
}

fn read_mount_table() -> Result<String> {
    shell::run_capture("mount", &[])
}

/// Scan mount-table text for entries referencing the image or its devices.
/// The mount point is the third whitespace-separated field.
fn scan_mount_table(mounts: &str, image: &Path, devices: &[String]) -> Vec<PathBuf> {
    let image_str = image.to_string_lossy();
    let mut points = Vec::new();

    for line in mounts.lines() {
        let referenced = line.contains(&*image_str)
            || devices.iter().any(|dev| line.contains(dev.as_str()));
        if !referenced {
            continue;
        }
        if let Some(point) = line.split_whitespace().nth(2) {
            points.push(PathBuf::from(point));
        }
    }

    points
}

/// Usage statistics for one mount point, from statvfs.
fn mount_usage(point: &Path) -> Result<MountUsage> {
    let stat = statvfs(point)?;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let blocks = stat.f_blocks as u64;
    let bfree = stat.f_bfree as u64;
    let bavail = stat.f_bavail as u64;
    let frsize = stat.f_frsize as u64;

    let use_percent = if blocks == 0 {
        0.0
    } else {
        100.0 - (bavail as f64 / blocks as f64 * 100.0)
    };

    Ok(MountUsage {
        total_gb: (blocks * frsize) as f64 / GB,
        used_gb: ((blocks - bfree) * frsize) as f64 / GB,
        free_gb: (bavail * frsize) as f64 / GB,
        use_percent,
    })
}

/// Filesystems the kernel can mount from a block device.
///
/// Pseudo-filesystems (`nodev` entries) are filtered out. An unreadable
/// table reads as empty.
pub fn list_filesystems() -> Vec<String> {
    match std::fs::read_to_string("/proc/filesystems") {
        Ok(text) => parse_filesystems(&text),
        Err(_) => Vec::new(),
    }
}

fn parse_filesystems(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.is_empty() && !line.starts_with("nodev"))
        .map(|line| line.trim().to_string())
        .collect()
}

fn statvfs(path: &Path) -> Result<libc::statvfs> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let path_cstr = CString::new(path.to_string_lossy().as_bytes())
        .map_err(|_| Error::disk(format!("invalid mount point path: {}", path.display())))?;

    unsafe {
        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        if libc::statvfs(path_cstr.as_ptr(), stat.as_mut_ptr()) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(stat.assume_init())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNT_TABLE: &str = "\
/dev/sda1 on / type ext4 (rw,relatime)
/dev/loop0 on /mnt/virtual/private type ext4 (rw,relatime)
tmpfs on /run type tmpfs (rw,nosuid,nodev)
/srv/disks/team.img on /mnt/virtual/team type ext4 (rw)
";

    #[test]
    fn test_scan_matches_device_and_image() {
        let devices = vec!["/dev/loop0".to_string()];
        let points = scan_mount_table(MOUNT_TABLE, Path::new("/srv/disks/team.img"), &devices);
        assert_eq!(
            points,
            vec![
                PathBuf::from("/mnt/virtual/private"),
                PathBuf::from("/mnt/virtual/team"),
            ]
        );
    }

    #[test]
    fn test_scan_no_match() {
        let points = scan_mount_table(MOUNT_TABLE, Path::new("/srv/disks/other.img"), &[]);
        assert!(points.is_empty());
    }

    #[test]
    fn test_scan_substring_tolerance() {
        // Matching is substring-based over the raw line: a path that is a
        // prefix of another image's path over-matches. Pinned on purpose.
        let table = "/srv/disks/a.img2 on /mnt/virtual/a2 type ext4 (rw)\n";
        let points = scan_mount_table(table, Path::new("/srv/disks/a.img"), &[]);
        assert_eq!(points, vec![PathBuf::from("/mnt/virtual/a2")]);
    }

    #[test]
    fn test_is_mounted_without_devices() {
        assert!(!is_mounted(&[]));
    }

    #[test]
    fn test_disk_info_missing_image() {
        let err = disk_info(Path::new("/nonexistent/loopshare.img"), &[]).unwrap_err();
        assert!(matches!(err, Error::DiskNotFound { .. }));
    }

    #[test]
    fn test_parse_filesystems_skips_nodev_entries() {
        let table = "\
nodev\tsysfs
nodev\tproc
\text4
\txfs
";
        assert_eq!(parse_filesystems(table), vec!["ext4", "xfs"]);
    }

    #[test]
    fn test_mount_usage_of_existing_directory() {
        // statvfs works on any directory, mounted filesystem or not.
        let dir = tempfile::tempdir().unwrap();
        let usage = mount_usage(dir.path()).unwrap();

        assert!(usage.total_gb > 0.0);
        assert!(usage.use_percent >= 0.0 && usage.use_percent <= 100.0);
        assert!(usage.used_gb <= usage.total_gb);
    }
}
