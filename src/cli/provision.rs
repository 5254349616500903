//! Provision command implementation.

use clap::Args;
use loopshare::config::{Config, ShareSpec, DEFAULT_CONFIG_PATH};
use loopshare::disk::{self, DiskInfo, VirtualDisk};
use loopshare::{Error, Result};
use std::path::PathBuf;

/// Provision every share disk from the configuration file.
#[derive(Args, Debug)]
pub struct ProvisionCmd {
    /// Configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output share summaries as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Summary of one provisioned share for display.
#[derive(Debug, serde::Serialize)]
struct ShareSummary {
    share: String,
    users: Vec<String>,
    read_only: bool,
    info: DiskInfo,
}

impl ProvisionCmd {
    /// Execute the provision command.
    pub fn run(self) -> Result<()> {
        if !self.config.exists() {
            Config::write_template(&self.config)?;
            println!(
                "Configuration file '{}' has been created. Edit it and run provision again.",
                self.config.display()
            );
            return Ok(());
        }

        let config = Config::load(&self.config)?;
        std::fs::create_dir_all(&config.paths.disks_dir)?;
        std::fs::create_dir_all(&config.paths.mounts_dir)?;

        // One share at a time: loop devices and the mount table are global
        // host resources, and operations on an image must be serialized.
        let mut summaries = Vec::new();
        for (name, spec) in &config.share {
            let summary = provision_share(name, spec, &config, self.json)?;
            if self.json {
                summaries.push(summary);
            } else {
                print_summary(&summary);
            }
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summaries).unwrap());
        }

        Ok(())
    }
}

/// Create, repair, and mount one share's disk.
fn provision_share(
    name: &str,
    spec: &ShareSpec,
    config: &Config,
    quiet: bool,
) -> Result<ShareSummary> {
    let image_path = config.paths.disks_dir.join(spec.image_name(name));
    let mount_path = config.paths.mounts_dir.join(name);
    let size_mb = spec.size_mb()?;

    let mut disk = VirtualDisk::open(&image_path);

    match disk.create(size_mb, disk::DEFAULT_FILESYSTEM) {
        Ok(()) => {
            if !quiet {
                println!("Disk {} created.", name);
            }
        }
        Err(Error::DiskExists { .. }) => {
            tracing::info!(
                share = name,
                image = %image_path.display(),
                "disk already provisioned"
            );
            if !quiet {
                println!("Disk {} exists. Skipping.", name);
            }
        }
        Err(e) => return Err(e),
    }

    // Clear stale mounts from a previous run before remounting. A mount
    // point that refuses to unmount is reported but does not abort the
    // pass.
    for point in disk.mount_points() {
        if let Err(e) = disk.unmount(&point) {
            tracing::warn!(
                share = name,
                mount_point = %point.display(),
                error = %e,
                "failed to unmount stale mount point"
            );
        }
    }

    let current_mb = disk.size_mb()?;
    if current_mb != size_mb {
        if !quiet {
            println!("Resize {} ({}MB => {}MB)", name, current_mb, size_mb);
        }
        disk.resize(size_mb)?;
    }

    disk.mount(&mount_path)?;

    Ok(ShareSummary {
        share: name.to_string(),
        users: spec.resolve_users(&config.groups),
        read_only: spec.read_only,
        info: disk.info()?,
    })
}

/// Print one share summary in the table style of the status command.
fn print_summary(summary: &ShareSummary) {
    let info = &summary.info;

    println!();
    println!("{}:", summary.share);
    println!("  Path: {}", info.disk_file.display());
    println!("  Size: {} MB", info.size_mb);
    println!("  Filesystem: {}", info.filesystem);
    println!(
        "  Read only: {}",
        if summary.read_only { "yes" } else { "no" }
    );
    println!(
        "  Users: {}",
        if summary.users.is_empty() {
            "-".to_string()
        } else {
            summary.users.join(", ")
        }
    );
    println!("  Mounted: {}", if info.mounted { "yes" } else { "no" });

    if info.mounted {
        println!("  Mount points:");
        for point in &info.mount_points {
            println!("    - {}", point.display());
        }

        if !info.usage.is_empty() {
            println!("  Usage:");
            for (point, usage) in &info.usage {
                println!("    {}:", point);
                println!("      Total: {:.2} GB", usage.total_gb);
                println!("      Used: {:.2} GB ({:.1}%)", usage.used_gb, usage.use_percent);
                println!("      Free: {:.2} GB", usage.free_gb);
            }
        }
    }
}
