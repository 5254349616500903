//! Status command implementation.

use clap::Args;
use loopshare::disk::VirtualDisk;
use loopshare::Result;
use std::path::PathBuf;

/// Show the state of one disk image.
#[derive(Args, Debug)]
pub struct StatusCmd {
    /// Path to the disk image file.
    pub image: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusCmd {
    /// Execute the status command.
    pub fn run(self) -> Result<()> {
        let disk = VirtualDisk::open(&self.image);
        let info = disk.info()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&info).unwrap());
            return Ok(());
        }

        println!("Path: {}", info.disk_file.display());
        println!("Size: {} MB", info.size_mb);
        println!("Filesystem: {}", info.filesystem);
        println!("Mounted: {}", if info.mounted { "yes" } else { "no" });

        for point in &info.mount_points {
            println!("Mount point: {}", point.display());
        }

        for (point, usage) in &info.usage {
            println!(
                "Usage of {}: {:.2}/{:.2} GB used ({:.1}%), {:.2} GB free",
                point, usage.used_gb, usage.total_gb, usage.use_percent, usage.free_gb
            );
        }

        Ok(())
    }
}
