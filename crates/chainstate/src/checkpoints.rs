//! Trusted `(height, hash)` pins.
//!
//! Checkpoints come from the compiled-in network table, an optional
//! `height,hash` text file and DNS TXT records. All sources merge into one
//! ordered set; the first source to pin a height wins.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use ccx_consensus::params::hash_to_hex;
use ccx_consensus::{hash_from_hex, ConsensusParams, Hash256};

#[derive(Debug)]
pub enum CheckpointError {
    Io(std::io::Error),
    MalformedLine { line: usize },
    InvalidHeight { line: usize },
    InvalidHash { height: u32 },
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io(err) => write!(f, "checkpoint file: {err}"),
            CheckpointError::MalformedLine { line } => {
                write!(f, "checkpoint line {line}: expected `height,hash`")
            }
            CheckpointError::InvalidHeight { line } => {
                write!(f, "checkpoint line {line}: invalid height")
            }
            CheckpointError::InvalidHash { height } => {
                write!(f, "invalid checkpoint hash for height {height}")
            }
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

/// Source of DNS TXT records. The lookup itself lives outside the ledger.
pub trait TxtResolver {
    fn txt_records(&self, domain: &str) -> Result<Vec<String>, String>;
}

#[derive(Clone, Debug, Default)]
pub struct CheckpointSet {
    points: BTreeMap<u32, Hash256>,
}

impl CheckpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled-in checkpoints for the network. Entries that do not parse are
    /// skipped with an error log.
    pub fn from_params(params: &ConsensusParams) -> Self {
        let mut set = Self::new();
        for (height, hash) in params.checkpoints {
            if let Err(err) = set.add_checkpoint(*height, hash) {
                ccx_log::log_error!("{err}");
            }
        }
        set
    }

    /// Adds a pin. Returns `Ok(false)` when the height is already pinned; the
    /// existing entry is kept.
    pub fn add_checkpoint(&mut self, height: u32, hash_hex: &str) -> Result<bool, CheckpointError> {
        let hash = hash_from_hex(hash_hex).map_err(|_| CheckpointError::InvalidHash { height })?;
        if self.points.contains_key(&height) {
            ccx_log::log_warn!("checkpoint at height {height} already exists, ignoring duplicate");
            return Ok(false);
        }
        self.points.insert(height, hash);
        Ok(true)
    }

    /// Parses `height,hash` lines. Blank lines are skipped; any other line
    /// without exactly two fields fails the whole source.
    pub fn load_from_str(&mut self, contents: &str) -> Result<usize, CheckpointError> {
        let mut parsed = Vec::new();
        for (index, line) in contents.split(['\n', '\r']).enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            let [height, hash] = fields.as_slice() else {
                return Err(CheckpointError::MalformedLine { line: index + 1 });
            };
            let height: u32 = height
                .trim()
                .parse()
                .map_err(|_| CheckpointError::InvalidHeight { line: index + 1 })?;
            hash_from_hex(hash).map_err(|_| CheckpointError::InvalidHash { height })?;
            parsed.push((height, hash.trim()));
        }

        let mut added = 0;
        for (height, hash) in parsed {
            if self.add_checkpoint(height, hash)? {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize, CheckpointError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let added = self.load_from_str(&contents)?;
        ccx_log::log_info!("Loaded {added} checkpoints from {}", path.display());
        Ok(added)
    }

    /// Merges `height:hash` TXT records from every domain. Lookup failures
    /// and malformed records are logged and skipped.
    pub fn load_from_dns(&mut self, resolver: &dyn TxtResolver, domains: &[&str]) -> usize {
        let mut added = 0;
        for domain in domains {
            let records = match resolver.txt_records(domain) {
                Ok(records) => records,
                Err(err) => {
                    ccx_log::log_warn!("checkpoint lookup for {domain} failed: {err}");
                    continue;
                }
            };
            for record in records {
                let parsed = record.trim().split_once(':').and_then(|(height, hash)| {
                    height.trim().parse::<u32>().ok().map(|height| (height, hash))
                });
                let Some((height, hash)) = parsed else {
                    ccx_log::log_warn!("ignoring malformed checkpoint record {record:?} from {domain}");
                    continue;
                };
                match self.add_checkpoint(height, hash) {
                    Ok(true) => added += 1,
                    Ok(false) => {}
                    Err(err) => ccx_log::log_warn!("{err} (from {domain})"),
                }
            }
        }
        if added > 0 {
            ccx_log::log_info!("Loaded {added} checkpoints from DNS");
        }
        added
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn heights(&self) -> Vec<u32> {
        self.points.keys().copied().collect()
    }

    pub fn last_height(&self) -> Option<u32> {
        self.points.keys().next_back().copied()
    }

    pub fn is_checkpoint(&self, height: u32) -> bool {
        self.points.contains_key(&height)
    }

    pub fn is_in_checkpoint_zone(&self, height: u32) -> bool {
        self.last_height().is_some_and(|last| height <= last)
    }

    /// True unless `height` is pinned to a different hash.
    pub fn check_block(&self, height: u32, hash: &Hash256) -> bool {
        let Some(expected) = self.points.get(&height) else {
            return true;
        };
        if expected == hash {
            if height % 100 == 0 {
                ccx_log::log_info!("CHECKPOINT PASSED FOR HEIGHT {height} {}", hash_to_hex(hash));
            }
            true
        } else {
            ccx_log::log_warn!(
                "CHECKPOINT FAILED FOR HEIGHT {height}. EXPECTED HASH: {}, FETCHED HASH: {}",
                hash_to_hex(expected),
                hash_to_hex(hash)
            );
            false
        }
    }

    /// An alternative block at `height` may be considered only if no
    /// checkpoint at or below the current chain length pins it.
    pub fn is_alternative_block_allowed(&self, chain_len: u32, height: u32) -> bool {
        if chain_len == 0 {
            return false;
        }
        match self.points.range(..=chain_len).next_back() {
            None => true,
            Some((checkpoint, _)) => *checkpoint < height,
        }
    }
}
