//! Peer Directory Module
//!
//! Enumerates previously paired peers for the device picker.

use crate::domain::errors::TransportError;
use crate::domain::models::PeerDescriptor;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

pub trait PeerDirectory: Send + Sync {
    fn list_paired(&self) -> Result<Vec<PeerDescriptor>, TransportError>;
}

/// Peers listed in settings
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPeers {
    peers: Vec<PeerDescriptor>,
}

impl ConfiguredPeers {
    pub fn new(peers: Vec<PeerDescriptor>) -> Self {
        Self { peers }
    }
}

impl PeerDirectory for ConfiguredPeers {
    fn list_paired(&self) -> Result<Vec<PeerDescriptor>, TransportError> {
        Ok(self.peers.clone())
    }
}

/// RFCOMM TTYs bound by the OS (`/dev/rfcomm0`, `/dev/rfcomm1`, ...)
#[derive(Debug, Clone)]
pub struct RfcommDeviceDirectory {
    dev_dir: PathBuf,
}

impl RfcommDeviceDirectory {
    pub fn new() -> Self {
        Self::with_dir("/dev")
    }

    pub fn with_dir(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }
}

impl Default for RfcommDeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn is_rfcomm_node(file_name: &str) -> bool {
    file_name
        .strip_prefix("rfcomm")
        .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

impl PeerDirectory for RfcommDeviceDirectory {
    fn list_paired(&self) -> Result<Vec<PeerDescriptor>, TransportError> {
        let mut peers: Vec<PeerDescriptor> = fs::read_dir(&self.dev_dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                is_rfcomm_node(&file_name).then(|| {
                    PeerDescriptor::new(entry.path().to_string_lossy(), file_name)
                })
            })
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("Found {} RFCOMM device nodes", peers.len());
        Ok(peers)
    }
}

/// Merges several directories, first occurrence of an id wins. A failing
/// source is logged and skipped.
#[derive(Default)]
pub struct CombinedDirectory {
    sources: Vec<Box<dyn PeerDirectory>>,
}

impl CombinedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl PeerDirectory + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl PeerDirectory for CombinedDirectory {
    fn list_paired(&self) -> Result<Vec<PeerDescriptor>, TransportError> {
        let mut peers: Vec<PeerDescriptor> = Vec::new();
        for source in &self.sources {
            match source.list_paired() {
                Ok(found) => {
                    for peer in found {
                        if !peers.contains(&peer) {
                            peers.push(peer);
                        }
                    }
                }
                Err(e) => warn!("Peer source unavailable: {}", e),
            }
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfcomm_node_names() {
        assert!(is_rfcomm_node("rfcomm0"));
        assert!(is_rfcomm_node("rfcomm12"));
        assert!(!is_rfcomm_node("rfcomm"));
        assert!(!is_rfcomm_node("ttyACM0"));
        assert!(!is_rfcomm_node("rfcomm0.lock"));
    }

    #[test]
    fn lists_only_rfcomm_nodes_sorted() {
        let dir = std::env::temp_dir().join(format!("spp_relay_dev_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for name in ["rfcomm1", "ttyS0", "rfcomm0"] {
            fs::write(dir.join(name), b"").unwrap();
        }

        let peers = RfcommDeviceDirectory::with_dir(&dir).list_paired().unwrap();
        let names: Vec<&str> = peers.iter().map(|p| p.display_name()).collect();
        assert_eq!(names, vec!["rfcomm0", "rfcomm1"]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn combined_directory_dedups_and_skips_failures() {
        let combined = CombinedDirectory::new()
            .with(ConfiguredPeers::new(vec![
                PeerDescriptor::new("/dev/rfcomm0", "Dash"),
                PeerDescriptor::new("/tmp/vss.sock", "bench"),
            ]))
            .with(RfcommDeviceDirectory::with_dir("/nonexistent/dev"))
            .with(ConfiguredPeers::new(vec![PeerDescriptor::new(
                "/dev/rfcomm0",
                "rfcomm0",
            )]));

        let peers = combined.list_paired().unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].display_name(), "Dash");
    }
}
