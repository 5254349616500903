//! Loop device bindings.
//!
//! A disk image may already have loop devices bound to it when the process
//! starts (a previous run mounted it and exited). The manager recovers
//! those, creates new devices on demand, and tracks every device it knows
//! about. A device acquired for a single operation is temporary and must be
//! released when that operation ends; a device backing a live mount stays
//! bound for the life of the mount.

use crate::error::{Error, Result};
use crate::shell;
use std::path::PathBuf;

/// Tracks the loop devices bound to one disk image.
///
/// Each image owns its own manager; device lists are never shared between
/// instances.
#[derive(Debug)]
pub struct LoopManager {
    image: PathBuf,
    devices: Vec<String>,
}

impl LoopManager {
    /// Create a manager with no known bindings.
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            devices: Vec::new(),
        }
    }

    /// Query the kernel for loop devices already bound to the image.
    ///
    /// Safe on a fresh image: no bindings is not an error, and neither is a
    /// failing query.
    pub fn recover(&mut self) {
        let image = self.image.to_string_lossy().to_string();
        match shell::run_capture("losetup", &["-j", &image]) {
            Ok(output) => {
                for device in parse_losetup_list(&output) {
                    if !self.devices.contains(&device) {
                        self.devices.push(device);
                    }
                }
                if !self.devices.is_empty() {
                    tracing::debug!(
                        image = %self.image.display(),
                        devices = ?self.devices,
                        "recovered loop devices"
                    );
                }
            }
            Err(e) => {
                tracing::debug!(
                    image = %self.image.display(),
                    error = %e,
                    "loop device query failed, assuming no bindings"
                );
            }
        }
    }

    /// Device nodes currently tracked for the image.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Get a loop device for a filesystem operation.
    ///
    /// Reuses the first known binding, or creates a new one. The returned
    /// flag is true when the device was created here; the caller must
    /// release it once the operation is done.
    pub fn acquire(&mut self) -> Result<(String, bool)> {
        if let Some(device) = self.devices.first() {
            return Ok((device.clone(), false));
        }
        let device = self.attach_new()?;
        Ok((device, true))
    }

    /// Bind a new loop device to the image and track it.
    ///
    /// Always creates a fresh device, even when one is already bound.
    pub fn attach_new(&mut self) -> Result<String> {
        let image = self.image.to_string_lossy().to_string();
        let output = shell::run_capture("losetup", &["--find", "--show", &image]).map_err(|e| {
            Error::loop_device(format!(
                "failed to set up loop device for {}: {}",
                self.image.display(),
                e
            ))
        })?;

        let device = output.trim().to_string();
        if device.is_empty() {
            return Err(Error::loop_device(format!(
                "losetup reported no device for {}",
                self.image.display()
            )));
        }

        tracing::debug!(device = %device, image = %self.image.display(), "attached loop device");
        self.devices.push(device.clone());
        Ok(device)
    }

    /// Release a device if it was temporary.
    ///
    /// Pre-existing bindings are left alone: no detach is issued and the
    /// device stays tracked. On detach failure the device also stays
    /// tracked so the release can be retried.
    pub fn release(&mut self, device: &str, temporary: bool) -> Result<()> {
        if !temporary {
            return Ok(());
        }

        shell::run("losetup", &["-d", device])
            .map_err(|e| Error::loop_device(format!("failed to detach {}: {}", device, e)))?;

        self.devices.retain(|d| d != device);
        tracing::debug!(device = %device, "detached loop device");
        Ok(())
    }

    /// Detach every tracked device.
    ///
    /// Devices detached before a failure are removed from the list; the
    /// failing one and any after it stay tracked for a retry.
    pub fn release_all(&mut self) -> Result<()> {
        while let Some(device) = self.devices.first().cloned() {
            shell::run("losetup", &["-d", &device])
                .map_err(|e| Error::loop_device(format!("failed to detach {}: {}", device, e)))?;
            self.devices.remove(0);
            tracing::debug!(device = %device, "detached loop device");
        }
        Ok(())
    }
}

/// Parse `losetup -j` output: one `/dev/loopN: [maj:min]:inode (/path)` line
/// per binding.
fn parse_losetup_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .filter(|device| !device.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_losetup_list() {
        let output = "\
/dev/loop0: [2049]:131 (/srv/disks/private.img)
/dev/loop3: [2049]:131 (/srv/disks/private.img)
";
        assert_eq!(parse_losetup_list(output), vec!["/dev/loop0", "/dev/loop3"]);
    }

    #[test]
    fn test_parse_losetup_list_empty() {
        assert!(parse_losetup_list("").is_empty());
        assert!(parse_losetup_list("\n\n").is_empty());
    }

    #[test]
    fn test_recover_missing_image_yields_no_bindings() {
        let mut loops = LoopManager::new("/nonexistent/loopshare-test.img");
        loops.recover();
        assert!(loops.devices().is_empty());
    }

    #[test]
    fn test_release_non_temporary_is_noop() {
        // A non-temporary release must not detach and must keep the binding.
        let mut loops = LoopManager {
            image: PathBuf::from("/srv/disks/private.img"),
            devices: vec!["/dev/loop7".to_string()],
        };

        loops.release("/dev/loop7", false).unwrap();
        assert_eq!(loops.devices(), ["/dev/loop7".to_string()]);
    }

    #[test]
    fn test_acquire_reuses_known_binding() {
        let mut loops = LoopManager {
            image: PathBuf::from("/srv/disks/private.img"),
            devices: vec!["/dev/loop2".to_string(), "/dev/loop5".to_string()],
        };

        let (device, created) = loops.acquire().unwrap();
        assert_eq!(device, "/dev/loop2");
        assert!(!created);
        assert_eq!(loops.devices().len(), 2);
    }
}
