//! Process membership and node configuration.
//!
//! The membership table is loaded once before any stack is built and is
//! read-only afterwards; layers share it through an `Arc` without locking.
//!
//! # Membership file
//!
//! ```text
//! 3
//! 1 127.0.0.1 11001
//! 2 127.0.0.1 11002
//! 3 127.0.0.1 11003
//! ```
//!
//! The first line is the process count `n`, followed by `n` lines of
//! `id host port`.  Blank lines and lines starting with `#` are skipped.
//! Anything after the `n` entries is left to higher protocols and ignored.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::broadcast::SelfDelivery;
use crate::socket::DEFAULT_TICK;
use crate::timer::RetransmitPolicy;

pub type ProcessId = u32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read membership file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("membership line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("membership declares {expected} processes but lists {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("process ids must be 1..=n; {0} is out of place")]
    NotDense(ProcessId),
    #[error("address {0} is used by more than one process")]
    DuplicateAddress(SocketAddr),
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),
}

/// One member of the process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub id: ProcessId,
    pub addr: SocketAddr,
}

impl Process {
    pub fn new(id: ProcessId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}@{}", self.id, self.addr)
    }
}

/// The static process group.
#[derive(Debug, Clone)]
pub struct Membership {
    processes: BTreeMap<ProcessId, Process>,
    by_addr: HashMap<SocketAddr, ProcessId>,
}

impl Membership {
    /// Build a membership, checking that ids are exactly `1..=n` and that no
    /// address is shared.
    pub fn new(processes: impl IntoIterator<Item = Process>) -> Result<Self, ConfigError> {
        let mut by_id = BTreeMap::new();
        let mut by_addr = HashMap::new();
        for p in processes {
            if by_addr.insert(p.addr, p.id).is_some() {
                return Err(ConfigError::DuplicateAddress(p.addr));
            }
            if let Some(dup) = by_id.insert(p.id, p) {
                return Err(ConfigError::NotDense(dup.id));
            }
        }
        let n = by_id.len();
        if let Some(&stray) = by_id.keys().find(|&&id| id == 0 || id as usize > n) {
            return Err(ConfigError::NotDense(stray));
        }
        Ok(Self {
            processes: by_id,
            by_addr,
        })
    }

    /// Parse the text of a membership file.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

        let (line, first) = lines.next().ok_or_else(|| ConfigError::Parse {
            line: 1,
            reason: "missing process count".into(),
        })?;
        let n: usize = first.parse().map_err(|_| ConfigError::Parse {
            line,
            reason: format!("expected process count, got {first:?}"),
        })?;

        let entries = lines
            .by_ref()
            .take(n)
            .map(|(line, l)| parse_entry(line, l))
            .collect::<Result<Vec<_>, _>>()?;
        if entries.len() != n {
            return Err(ConfigError::CountMismatch {
                expected: n,
                found: entries.len(),
            });
        }
        let trailing = lines.count();
        if trailing > 0 {
            log::debug!("[config] ignoring {trailing} line(s) after the membership table");
        }
        Self::new(entries)
    }

    /// Read and parse a membership file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Number of processes `n`.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn get(&self, id: ProcessId) -> Result<&Process, ConfigError> {
        self.processes
            .get(&id)
            .ok_or(ConfigError::UnknownProcess(id))
    }

    /// The process listening on `addr`, if any.
    pub fn id_of(&self, addr: SocketAddr) -> Option<ProcessId> {
        self.by_addr.get(&addr).copied()
    }

    /// All processes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Process> + '_ {
        self.processes.values()
    }
}

fn parse_entry(line: usize, text: &str) -> Result<Process, ConfigError> {
    let bad = |reason: String| ConfigError::Parse { line, reason };
    let fields: Vec<&str> = text.split_whitespace().collect();
    let &[id, host, port] = fields.as_slice() else {
        return Err(bad(format!("expected `id host port`, got {text:?}")));
    };
    let id: ProcessId = id.parse().map_err(|_| bad(format!("bad process id {id:?}")))?;
    let host: IpAddr = host.parse().map_err(|_| bad(format!("bad host {host:?}")))?;
    let port: u16 = port.parse().map_err(|_| bad(format!("bad port {port:?}")))?;
    Ok(Process::new(id, SocketAddr::new(host, port)))
}

/// Protocol knobs for one node's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub retransmit: RetransmitPolicy,
    /// Tick interval of every stacked layer.
    pub tick: Duration,
    pub self_delivery: SelfDelivery,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            retransmit: RetransmitPolicy::default(),
            tick: DEFAULT_TICK,
            self_delivery: SelfDelivery::default(),
        }
    }
}
