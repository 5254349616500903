//! Virtual disk lifecycle.
//!
//! A [`VirtualDisk`] drives one backing image file through its life:
//! create, mount, unmount, resize, cleanup. Loop bindings are tracked by a
//! per-disk [`LoopManager`]; state snapshots come from [`info`].
//!
//! Operations on a single image must not run concurrently: loop devices
//! and the mount table are global host resources with no locking here.
//! Callers serialize.

pub mod info;
pub mod loopdev;

pub use info::{DiskInfo, MountUsage};
pub use loopdev::LoopManager;

use crate::error::{Error, Result};
use crate::shell;
use std::path::{Path, PathBuf};

/// Default filesystem for new disks.
pub const DEFAULT_FILESYSTEM: &str = "ext4";

/// Lifecycle controller for one loop-backed disk image.
#[derive(Debug)]
pub struct VirtualDisk {
    image: PathBuf,
    loops: LoopManager,
}

impl VirtualDisk {
    /// Open a controller for the image, recovering any loop devices the
    /// kernel already has bound to it (e.g. after a process restart).
    pub fn open(image: impl Into<PathBuf>) -> Self {
        let image = image.into();
        let mut loops = LoopManager::new(&image);
        loops.recover();
        Self { image, loops }
    }

    /// Path of the backing image file.
    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Loop devices currently tracked for this disk.
    pub fn loop_devices(&self) -> &[String] {
        self.loops.devices()
    }

    /// Allocate and format the backing image.
    ///
    /// Fails if the image already exists; the existing file is never
    /// touched. Callers decide whether that means "already provisioned" or
    /// a real conflict.
    pub fn create(&self, size_mb: u64, fs_type: &str) -> Result<()> {
        if self.image.exists() {
            return Err(Error::DiskExists {
                path: self.image.clone(),
            });
        }

        let image = self.image_str();
        tracing::info!(
            image = %self.image.display(),
            size_mb,
            fs_type,
            "creating disk image"
        );

        let of_arg = format!("of={}", image);
        let count_arg = format!("count={}", size_mb);
        shell::run("dd", &["if=/dev/zero", &of_arg, "bs=1M", &count_arg])?;
        shell::run("mkfs", &["-t", fs_type, &image])?;
        Ok(())
    }

    /// Mount the disk at `target`, creating the directory if needed.
    ///
    /// A fresh loop device is always attached and kept bound for the life
    /// of the mount. Stale mounts are not reused; unmount them first.
    pub fn mount(&mut self, target: &Path) -> Result<()> {
        if !target.exists() {
            std::fs::create_dir_all(target)?;
        }

        let device = self.loops.attach_new()?;
        let target_str = target.to_string_lossy().to_string();
        tracing::info!(device = %device, target = %target_str, "mounting disk");
        shell::run("mount", &[&device, &target_str])?;
        Ok(())
    }

    /// Unmount `mount_point` and release every tracked loop device.
    ///
    /// A disk has one logical mount context, so a successful unmount clears
    /// all bindings, not just the one behind `mount_point`. If the unmount
    /// itself fails the bindings are left untouched for a retry.
    pub fn unmount(&mut self, mount_point: &Path) -> Result<()> {
        let point = mount_point.to_string_lossy().to_string();
        shell::run("umount", &[&point])
            .map_err(|e| Error::disk(format!("failed to unmount {}: {}", point, e)))?;

        tracing::info!(mount_point = %point, "unmounted disk");
        self.loops.release_all()
    }

    /// Grow the backing file and its filesystem to `new_size_mb`.
    ///
    /// Shrinking is not supported, and only ext-family filesystems can be
    /// grown. The loop device acquired for the operation is released
    /// whether the grow succeeded or not.
    pub fn resize(&mut self, new_size_mb: u64) -> Result<()> {
        let current_mb = self.size_mb()?;
        if new_size_mb <= current_mb {
            return Err(Error::disk(format!(
                "new size {}MB must be larger than current size {}MB",
                new_size_mb, current_mb
            )));
        }

        let (device, temporary) = self.loops.acquire()?;
        tracing::info!(
            image = %self.image.display(),
            from_mb = current_mb,
            to_mb = new_size_mb,
            device = %device,
            "resizing disk"
        );

        let grown = self.grow(&device, new_size_mb);
        let released = self.loops.release(&device, temporary);

        match grown {
            Ok(()) => released,
            Err(e) => {
                if let Err(release_err) = released {
                    tracing::warn!(
                        device = %device,
                        error = %release_err,
                        "failed to release loop device after resize error"
                    );
                }
                Err(e)
            }
        }
    }

    fn grow(&self, device: &str, new_size_mb: u64) -> Result<()> {
        let image = self.image_str();

        let size_arg = format!("{}M", new_size_mb);
        shell::run("truncate", &["-s", &size_arg, &image])
            .map_err(|e| Error::disk(format!("failed to grow image file: {}", e)))?;

        // Tell the kernel the loop device's backing file changed size.
        shell::run("losetup", &["-c", device])
            .map_err(|e| Error::disk(format!("failed to refresh loop device size: {}", e)))?;

        let fs_type = info::detect_filesystem(&self.image);
        if !fs_type.starts_with("ext") {
            return Err(Error::UnsupportedFilesystem(fs_type));
        }

        shell::run("e2fsck", &["-f", "-y", device])
            .map_err(|e| Error::disk(format!("filesystem check failed: {}", e)))?;

        let block_size = ext_block_size(device)?;
        let blocks = new_size_mb * 1024 * 1024 / block_size;
        let blocks_arg = blocks.to_string();
        shell::run("resize2fs", &[device, &blocks_arg])
            .map_err(|e| Error::disk(format!("failed to grow filesystem: {}", e)))?;

        let final_mb = self.size_mb()?;
        if final_mb < new_size_mb {
            return Err(Error::disk(format!(
                "resize verification failed: expected {}MB, got {}MB",
                new_size_mb, final_mb
            )));
        }

        Ok(())
    }

    /// Delete the backing image file if present.
    ///
    /// Never unmounts and never releases bindings; unmount first.
    pub fn cleanup(&self) -> Result<()> {
        if self.image.exists() {
            std::fs::remove_file(&self.image)?;
            tracing::info!(image = %self.image.display(), "removed disk image");
        }
        Ok(())
    }

    /// Current size of the backing file in whole megabytes.
    pub fn size_mb(&self) -> Result<u64> {
        let metadata = std::fs::metadata(&self.image).map_err(|_| Error::DiskNotFound {
            path: self.image.clone(),
        })?;
        Ok(metadata.len() / (1024 * 1024))
    }

    /// Whether any tracked loop device is mounted.
    pub fn is_mounted(&self) -> bool {
        info::is_mounted(self.loops.devices())
    }

    /// Mount points currently referencing this disk.
    pub fn mount_points(&self) -> Vec<PathBuf> {
        info::mount_points(&self.image, self.loops.devices())
    }

    /// Full state snapshot.
    pub fn info(&self) -> Result<DiskInfo> {
        info::disk_info(&self.image, self.loops.devices())
    }

    fn image_str(&self) -> String {
        self.image.to_string_lossy().to_string()
    }
}

/// Block size of the ext filesystem on `device`, from `tune2fs -l`.
fn ext_block_size(device: &str) -> Result<u64> {
    let output = shell::run_capture("tune2fs", &["-l", device])
        .map_err(|e| Error::disk(format!("failed to query filesystem parameters: {}", e)))?;

    parse_block_size(&output)
        .ok_or_else(|| Error::disk(format!("no block size reported for {}", device)))
}

/// Find the `Block size:` field in `tune2fs -l` output.
fn parse_block_size(output: &str) -> Option<u64> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Block size:"))
        .and_then(|rest| rest.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn disk_at(path: &Path) -> VirtualDisk {
        // Bypass open() so tests never touch losetup.
        VirtualDisk {
            image: path.to_path_buf(),
            loops: LoopManager::new(path),
        }
    }

    #[test]
    fn test_create_on_existing_image_fails_without_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("private.img");
        let mut file = std::fs::File::create(&image).unwrap();
        file.write_all(b"precious data").unwrap();
        drop(file);

        let disk = disk_at(&image);
        let err = disk.create(10, DEFAULT_FILESYSTEM).unwrap_err();
        assert!(matches!(err, Error::DiskExists { .. }));

        let contents = std::fs::read(&image).unwrap();
        assert_eq!(contents, b"precious data");
    }

    #[test]
    fn test_resize_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk = disk_at(&dir.path().join("missing.img"));

        let err = disk.resize(100).unwrap_err();
        assert!(matches!(err, Error::DiskNotFound { .. }));
    }

    #[test]
    fn test_resize_rejects_shrink_and_same_size() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("data.img");
        let file = std::fs::File::create(&image).unwrap();
        file.set_len(10 * 1024 * 1024).unwrap();
        drop(file);

        let mut disk = disk_at(&image);
        assert_eq!(disk.size_mb().unwrap(), 10);

        for target in [5, 10] {
            let err = disk.resize(target).unwrap_err();
            assert!(
                err.to_string().contains("larger"),
                "resize to {}MB: {}",
                target,
                err
            );
        }
    }

    #[test]
    fn test_cleanup_removes_image_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("gone.img");
        std::fs::write(&image, b"x").unwrap();

        let disk = disk_at(&image);
        disk.cleanup().unwrap();
        assert!(!image.exists());

        // Second pass is a no-op.
        disk.cleanup().unwrap();
    }

    #[test]
    fn test_size_mb_truncates_to_whole_megabytes() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("odd.img");
        let file = std::fs::File::create(&image).unwrap();
        file.set_len(10 * 1024 * 1024 + 512 * 1024).unwrap();
        drop(file);

        let disk = disk_at(&image);
        assert_eq!(disk.size_mb().unwrap(), 10);
    }

    #[test]
    fn test_parse_block_size() {
        let output = "\
tune2fs 1.47.0 (5-Feb-2023)
Filesystem volume name:   <none>
Block count:              25600
Block size:               4096
Fragment size:            4096
";
        assert_eq!(parse_block_size(output), Some(4096));
        assert_eq!(parse_block_size("no such field\n"), None);
    }
}
