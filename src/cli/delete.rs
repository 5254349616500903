//! Delete command implementation.

use clap::Args;
use loopshare::Result;
use loopshare::VirtualDisk;
use std::path::PathBuf;

/// Unmount a disk image and delete its backing file.
#[derive(Args, Debug)]
pub struct DeleteCmd {
    /// Path to the disk image file.
    pub image: PathBuf,
}

impl DeleteCmd {
    /// Execute the delete command.
    pub fn run(self) -> Result<()> {
        let mut disk = VirtualDisk::open(&self.image);

        for point in disk.mount_points() {
            disk.unmount(&point)?;
        }

        disk.cleanup()?;
        println!("Deleted {}", self.image.display());
        Ok(())
    }
}
