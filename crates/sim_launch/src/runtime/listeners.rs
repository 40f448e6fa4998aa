//! Listening-socket enumeration
//!
//! Readiness probes read the host's listener table through [`ListenerTable`].
//! Two sources are provided: the `ss` tool from iproute2 and the Linux
//! `/proc/net` tables. Tests substitute their own table.

use crate::plan::Transport;
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::process::Command;

/// One listening socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerEntry {
    /// Local address field, e.g. `0.0.0.0:3001` or `[::]:102`
    pub local_address: String,
}

impl ListenerEntry {
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
        }
    }

    /// Whether the local address ends in exactly `:port`
    pub fn listens_on(&self, port: u16) -> bool {
        self.local_address
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse::<u16>().ok())
            == Some(port)
    }
}

/// Source of the host's listening sockets
#[async_trait]
pub trait ListenerTable: Send + Sync {
    /// Enumerate listeners of the given transport
    async fn listeners(&self, transport: Transport) -> Result<Vec<ListenerEntry>, InspectionError>;
}

/// Listener table read with `ss -H -ln{t|u}`
#[derive(Debug, Clone)]
pub struct SsListenerTable {
    program: String,
}

impl Default for SsListenerTable {
    fn default() -> Self {
        Self {
            program: "ss".to_string(),
        }
    }
}

impl SsListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different `ss` binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Parse `ss -H` output; the local address is the fourth column
    pub fn parse(output: &str) -> Vec<ListenerEntry> {
        output
            .lines()
            .filter_map(|line| line.split_whitespace().nth(3))
            .map(ListenerEntry::new)
            .collect()
    }
}

#[async_trait]
impl ListenerTable for SsListenerTable {
    async fn listeners(&self, transport: Transport) -> Result<Vec<ListenerEntry>, InspectionError> {
        let flags = match transport {
            Transport::Tcp => "-Hlnt",
            Transport::Udp => "-Hlnu",
        };

        let output = Command::new(&self.program)
            .arg(flags)
            .output()
            .await
            .map_err(|source| InspectionError::Command {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(InspectionError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Self::parse(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Socket state of a listening TCP socket in `/proc/net/tcp*`
const TCP_LISTEN: &str = "0A";
/// Socket state of a bound, unconnected UDP socket in `/proc/net/udp*`
const UDP_UNCONNECTED: &str = "07";

/// Listener table read from `/proc/net/{tcp,tcp6,udp,udp6}`
#[derive(Debug, Clone)]
pub struct ProcNetListenerTable {
    root: PathBuf,
}

impl Default for ProcNetListenerTable {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/proc/net"),
        }
    }
}

impl ProcNetListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read tables from another directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse one `/proc/net` table, keeping rows in `state`
    pub fn parse(content: &str, state: &str) -> Vec<ListenerEntry> {
        content
            .lines()
            .skip(1)
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 4 || !fields[3].eq_ignore_ascii_case(state) {
                    return None;
                }
                decode_address(fields[1]).map(ListenerEntry::new)
            })
            .collect()
    }
}

#[async_trait]
impl ListenerTable for ProcNetListenerTable {
    async fn listeners(&self, transport: Transport) -> Result<Vec<ListenerEntry>, InspectionError> {
        let (files, state) = match transport {
            Transport::Tcp => (["tcp", "tcp6"], TCP_LISTEN),
            Transport::Udp => (["udp", "udp6"], UDP_UNCONNECTED),
        };

        let mut entries = Vec::new();
        for (i, file) in files.iter().enumerate() {
            let path = self.root.join(file);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => entries.extend(Self::parse(&content, state)),
                // The IPv6 table is absent when IPv6 is disabled
                Err(e) if i > 0 && e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(InspectionError::Read { path, source }),
            }
        }

        Ok(entries)
    }
}

/// Decode `0100007F:0BB9` into `127.0.0.1:3001`
fn decode_address(field: &str) -> Option<String> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;

    match addr.len() {
        8 => {
            let raw = u32::from_str_radix(addr, 16).ok()?;
            Some(format!("{}:{}", Ipv4Addr::from(raw.to_le_bytes()), port))
        }
        32 => {
            let mut bytes = [0u8; 16];
            for (i, chunk) in bytes.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(addr.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            Some(format!("[{}]:{}", Ipv6Addr::from(bytes), port))
        }
        _ => None,
    }
}

/// Which listener table to consult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Inspector {
    /// `/proc/net` when present, `ss` otherwise
    #[default]
    Auto,
    Ss,
    Procfs,
}

impl Inspector {
    /// Build the listener table for this inspector
    pub fn table(&self) -> Arc<dyn ListenerTable> {
        match self {
            Inspector::Ss => Arc::new(SsListenerTable::new()),
            Inspector::Procfs => Arc::new(ProcNetListenerTable::new()),
            Inspector::Auto => {
                let procfs = ProcNetListenerTable::new();
                if procfs.root().join("tcp").exists() {
                    Arc::new(procfs)
                } else {
                    Arc::new(SsListenerTable::new())
                }
            }
        }
    }
}

impl FromStr for Inspector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Inspector::Auto),
            "ss" => Ok(Inspector::Ss),
            "procfs" | "proc" => Ok(Inspector::Procfs),
            other => Err(format!(
                "Unknown inspector '{}'. Expected 'auto', 'ss' or 'procfs'",
                other
            )),
        }
    }
}

/// Errors reading the listener table
///
/// A failed inspection counts as one unsuccessful poll; it never ends a probe
/// early.
#[derive(Debug, thiserror::Error)]
pub enum InspectionError {
    #[error("Failed to run '{program}': {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with code {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
