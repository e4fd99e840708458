//! Profile file: fallbacks for values neither a flag nor the environment set

use anyhow::Context as _;
use pfs_wire::MacAddr;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Profile {
    pub iface: Option<String>,
    pub dst_mac: Option<MacAddr>,
    pub src_ip: Option<Ipv4Addr>,
    pub task_ring_path: Option<PathBuf>,
    pub report_ms: Option<u64>,
}

impl Profile {
    /// `~/.packetfs/config.toml`, or `config.<profile>.toml`. A missing file
    /// is an empty profile.
    pub fn load(profile: Option<&str>) -> anyhow::Result<Self> {
        match Self::config_path(profile) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    fn config_path(profile: Option<&str>) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let filename = match profile {
            Some(p) => format!("config.{}.toml", p),
            None => "config.toml".to_string(),
        };
        Some(home.join(".packetfs").join(filename))
    }
}
