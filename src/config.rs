//! Share configuration.
//!
//! loopshare reads one YAML document describing the users and groups that
//! may reach the shares, and the shares themselves (backing image, size,
//! access list). When the file is missing a starter template is written out
//! so the operator can edit it and re-run.

use crate::error::{Error, Result};
use crate::units;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yml";

/// Template written when no configuration file exists.
const DEFAULT_CONFIG: &str = "\
users:
  admin: password
share:
  private:
    filename: private.img
    size: 100MB
    read_only: false
    users:
      - admin
";

/// Directories holding the disk images and their mount points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Directory holding the backing image files.
    pub disks_dir: PathBuf,

    /// Directory under which each share is mounted.
    pub mounts_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            disks_dir: PathBuf::from("./virtual_drives"),
            mounts_dir: PathBuf::from("/mnt/virtual"),
        }
    }
}

/// One share to provision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSpec {
    /// Backing image filename; defaults to `<share name>.img`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Desired disk size, e.g. "100MB" or "2GB".
    pub size: String,

    /// Export read-only.
    #[serde(default)]
    pub read_only: bool,

    /// Users allowed on the share.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,

    /// Groups whose members are allowed on the share.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

impl ShareSpec {
    /// Backing image filename for this share.
    pub fn image_name(&self, share_name: &str) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| format!("{}.img", share_name))
    }

    /// Desired size in whole megabytes.
    pub fn size_mb(&self) -> Result<u64> {
        units::parse_size_mb_u64(&self.size)
    }

    /// Users allowed on the share, with group members folded in.
    ///
    /// First-seen order, no duplicates.
    pub fn resolve_users(&self, groups: &BTreeMap<String, Vec<String>>) -> Vec<String> {
        let mut users = self.users.clone();
        for group in &self.groups {
            if let Some(members) = groups.get(group) {
                for member in members {
                    if !users.contains(member) {
                        users.push(member.clone());
                    }
                }
            }
        }
        users
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Users the share publisher provisions (name -> password).
    #[serde(default)]
    pub users: BTreeMap<String, String>,

    /// Named groups of users.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, Vec<String>>,

    /// Shares to provision, by name.
    #[serde(default)]
    pub share: BTreeMap<String, ShareSpec>,

    /// Disk and mount directories.
    #[serde(default)]
    pub paths: Paths,
}

impl Config {
    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;

        let config: Config = serde_yaml::from_str(&text)
            .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Write the default template, creating parent directories as needed.
    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, DEFAULT_CONFIG)?;
        tracing::info!(path = %path.display(), "wrote configuration template");
        Ok(())
    }

    /// Check the document against the schema the share publisher expects.
    pub fn validate(&self) -> Result<()> {
        if self.users.is_empty() {
            return Err(Error::config("missing required section 'users'"));
        }

        for name in self.users.keys() {
            check_identifier(name, "users")?;
        }

        for (name, members) in &self.groups {
            check_identifier(name, "groups")?;
            if members.is_empty() {
                return Err(Error::config(format!("group '{}' has no members", name)));
            }
        }

        for (name, spec) in &self.share {
            check_identifier(name, "share")?;

            if !valid_size_string(&spec.size) {
                return Err(Error::config(format!(
                    "invalid size format '{}' in share '{}': use digits followed by B, KB, MB, GB, TB or PB (e.g. '1GB')",
                    spec.size, name
                )));
            }

            if spec.users.is_empty() && spec.groups.is_empty() {
                return Err(Error::config(format!(
                    "share '{}' must have at least one of the fields: 'users' or 'groups'",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Names may contain letters, numbers and underscores only.
fn check_identifier(name: &str, section: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!(
            "invalid name '{}' in section '{}': only letters, numbers and underscores are allowed",
            name, section
        )))
    }
}

/// Sizes in the config are whole numbers with an explicit unit.
fn valid_size_string(size: &str) -> bool {
    let digits = size.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    matches!(&size[digits..], "B" | "KB" | "MB" | "GB" | "TB" | "PB")
}
