//! `ccx.conf` loading.
//!
//! The file is a list of `key=value` lines. `#` and `;` start comments, a
//! bare key means `1`, keys are case-insensitive and the last occurrence of a
//! repeated key wins.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ccx_consensus::{consensus_params, ConsensusParams, Network};
use ccx_log::{Format, Level, LogConfig};

use crate::checkpoints::{CheckpointSet, TxtResolver};

pub type ConfMap = HashMap<String, Vec<String>>;

pub const DEFAULT_ENTRY_CACHE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub network: Network,
    pub data_dir: Option<PathBuf>,
    pub checkpoints_file: Option<PathBuf>,
    pub dns_checkpoints: bool,
    pub log: LogConfig,
    /// Per-module level overrides from `logtargets`.
    pub log_targets: Vec<(String, Level)>,
    pub ledger_cache: bool,
    pub entry_cache_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            data_dir: None,
            checkpoints_file: None,
            dns_checkpoints: false,
            log: LogConfig::default(),
            log_targets: Vec::new(),
            ledger_cache: true,
            entry_cache_capacity: DEFAULT_ENTRY_CACHE_CAPACITY,
        }
    }
}

pub fn load_conf(path: &Path) -> Result<Option<ConfMap>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("{}: {err}", path.display())),
    };
    Ok(Some(parse_conf(&contents)))
}

pub fn parse_conf(contents: &str) -> ConfMap {
    let mut out: ConfMap = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find(['#', ';']) {
            line = &line[..idx];
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    out
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn last<'a>(conf: &'a ConfMap, key: &str) -> Option<&'a str> {
    conf.get(key)
        .and_then(|values| values.last())
        .map(String::as_str)
}

fn conf_bool(conf: &ConfMap, key: &str) -> Result<Option<bool>, String> {
    match last(conf, key) {
        None => Ok(None),
        Some(raw) => parse_conf_bool(raw)
            .map(Some)
            .ok_or_else(|| format!("invalid {key} value '{raw}'")),
    }
}

impl LedgerConfig {
    /// Reads `path`; a missing file yields the defaults. Relative paths in the
    /// file resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self, String> {
        let Some(conf) = load_conf(path)? else {
            return Ok(Self::default());
        };
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_conf(&conf, base).map_err(|err| format!("{err} in {}", path.display()))
    }

    pub fn from_conf(conf: &ConfMap, base_dir: &Path) -> Result<Self, String> {
        let mut config = Self::default();

        if conf_bool(conf, "regtest")? == Some(true) {
            config.network = Network::Regtest;
        } else if conf_bool(conf, "testnet")? == Some(true) {
            config.network = Network::Testnet;
        }

        let resolve = |raw: &str| {
            let path = PathBuf::from(raw);
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };
        if let Some(raw) = last(conf, "datadir") {
            config.data_dir = Some(resolve(raw));
        }
        if let Some(raw) = last(conf, "checkpoints") {
            if !raw.is_empty() {
                config.checkpoints_file = Some(resolve(raw));
            }
        }
        if let Some(value) = conf_bool(conf, "dnscheckpoints")? {
            config.dns_checkpoints = value;
        }
        if let Some(value) = conf_bool(conf, "ledgercache")? {
            config.ledger_cache = value;
        }
        if let Some(raw) = last(conf, "entrycache") {
            config.entry_cache_capacity = raw
                .parse::<usize>()
                .map_err(|_| format!("invalid entrycache '{raw}'"))?;
        }

        if let Some(raw) = last(conf, "loglevel") {
            config.log.level = Level::parse(raw).ok_or_else(|| format!("invalid loglevel '{raw}'"))?;
        }
        if let Some(raw) = last(conf, "logformat") {
            config.log.format =
                Format::parse(raw).ok_or_else(|| format!("invalid logformat '{raw}'"))?;
        }
        if let Some(value) = conf_bool(conf, "logtimestamps")? {
            config.log.timestamps = value;
        }
        if let Some(raw) = last(conf, "logtargets") {
            config.log_targets = ccx_log::parse_target_levels(raw)?;
        }
        Ok(config)
    }

    /// Applies the logging settings process-wide.
    pub fn init_logging(&self) {
        ccx_log::init(self.log);
        ccx_log::clear_target_levels();
        for (target, level) in &self.log_targets {
            ccx_log::set_target_level(target, *level);
        }
    }

    pub fn consensus_params(&self) -> ConsensusParams {
        consensus_params(self.network)
    }

    /// Merges the compiled-in checkpoints with the configured file and, when
    /// enabled and a resolver is given, the network's DNS records.
    pub fn checkpoint_set(
        &self,
        params: &ConsensusParams,
        resolver: Option<&dyn TxtResolver>,
    ) -> Result<CheckpointSet, String> {
        let mut checkpoints = CheckpointSet::from_params(params);
        if let Some(path) = &self.checkpoints_file {
            checkpoints
                .load_from_file(path)
                .map_err(|err| format!("{}: {err}", path.display()))?;
        }
        if self.dns_checkpoints {
            if let Some(resolver) = resolver {
                checkpoints.load_from_dns(resolver, params.dns_checkpoint_domains);
            }
        }
        Ok(checkpoints)
    }
}
