//! Resize command implementation.

use clap::Args;
use loopshare::units;
use loopshare::Result;
use loopshare::VirtualDisk;
use std::path::PathBuf;

/// Grow a disk image to a new size.
#[derive(Args, Debug)]
pub struct ResizeCmd {
    /// Path to the disk image file.
    pub image: PathBuf,

    /// Target size, e.g. "2GB" or "500MB". Must be larger than the current
    /// size.
    pub size: String,
}

impl ResizeCmd {
    /// Execute the resize command.
    pub fn run(self) -> Result<()> {
        let size_mb = units::parse_size_mb_u64(&self.size)?;

        let mut disk = VirtualDisk::open(&self.image);
        let current_mb = disk.size_mb()?;
        disk.resize(size_mb)?;

        println!(
            "Resized {} ({}MB => {}MB)",
            self.image.display(),
            current_mb,
            size_mb
        );
        Ok(())
    }
}
