use containers::Bytes32;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// A chunk is flushed once its blocks carry this many transactions.
pub const CHUNK_MAX_TRANSACTIONS: usize = 150;
/// Upper bound for blocks per chunk, whatever `max_last_blocks` says.
pub const CHUNK_MAX_BLOCKS: usize = 100;
pub const MAX_LAST_BLOCKS: usize = 100;

pub const WAKE_UP_TIMEOUT_SECS: u64 = 60;
pub const BOOT_POLL_INTERVAL_SECS: u64 = 1;
pub const NETWORK_HEALTH_COOLDOWN_SECS: u64 = 10 * 60;
pub const MISSED_BLOCK_CHECK_PROBABILITY: f64 = 0.8;
pub const CLEANSE_PEER_COUNT: usize = 10;

/// Sync pauses downloading while more jobs than this are queued.
pub const MAX_QUEUED_JOBS: usize = 100;
pub const MAX_NO_BLOCK_ATTEMPTS: u32 = 5;
pub const MAX_P2P_UPDATE_ATTEMPTS: u32 = 3;
/// A block is recent enough to count as synced within this many blocktimes.
pub const SYNCED_BLOCKTIMES: u64 = 3;

pub const DEVNET_EPOCH: u64 = 1_700_000_000;

/// Any non-empty value skips the boot wait for the started state.
pub const SKIP_STARTED_CHECK_ENV: &str = "SKIP_BLOCKCHAIN_STARTED_CHECK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("at least one milestone is required")]
    NoMilestones,
    #[error("first milestone must start at height 1, found {0}")]
    FirstMilestoneNotGenesis(u64),
    #[error("milestone at height {0} has no active validators")]
    NoActiveValidators(u64),
    #[error("milestone at height {0} has a zero blocktime")]
    ZeroBlocktime(u64),
    #[error("missed block probability {0} is outside [0, 1]")]
    InvalidProbability(f64),
}

/// Protocol parameters in force from `height` onwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub height: u64,
    pub active_validators: u64,
    /// Seconds per slot.
    pub blocktime: u64,
}

impl Default for Milestone {
    fn default() -> Self {
        Self {
            height: 1,
            active_validators: 51,
            blocktime: 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockchainOptions {
    /// Genesis start: the node skips syncing and forges from its own chain.
    pub network_start: bool,
    pub skip_started_check: bool,
    pub max_last_blocks: usize,
    pub missed_block_probability: f64,
    pub network_health_cooldown_secs: u64,
    pub wake_up_secs: u64,
}

impl Default for BlockchainOptions {
    fn default() -> Self {
        Self {
            network_start: false,
            skip_started_check: false,
            max_last_blocks: MAX_LAST_BLOCKS,
            missed_block_probability: MISSED_BLOCK_CHECK_PROBABILITY,
            network_health_cooldown_secs: NETWORK_HEALTH_COOLDOWN_SECS,
            wake_up_secs: WAKE_UP_TIMEOUT_SECS,
        }
    }
}

impl BlockchainOptions {
    pub fn chunk_max_blocks(&self) -> usize {
        self.max_last_blocks.min(CHUNK_MAX_BLOCKS).max(1)
    }

    pub fn wake_up_timeout(&self) -> Duration {
        Duration::from_secs(self.wake_up_secs)
    }

    pub fn network_health_cooldown(&self) -> Duration {
        Duration::from_secs(self.network_health_cooldown_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Expected payload hash of the genesis block.
    pub nethash: Bytes32,
    /// Unix time (seconds) of the network epoch; block timestamps count from here.
    #[serde(default)]
    pub epoch: u64,
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub options: BlockchainOptions,
}

impl ChainConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut config: ChainConfig = serde_yaml::from_reader(reader)?;
        config.milestones.sort_by_key(|milestone| milestone.height);
        config.validate()?;
        Ok(config)
    }

    pub fn devnet() -> Self {
        Self {
            nethash: Bytes32::digest(b"devnet"),
            epoch: DEVNET_EPOCH,
            milestones: vec![Milestone::default()],
            options: BlockchainOptions::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let first = self.milestones.first().ok_or(ConfigError::NoMilestones)?;
        if first.height != 1 {
            return Err(ConfigError::FirstMilestoneNotGenesis(first.height));
        }
        for milestone in &self.milestones {
            if milestone.active_validators == 0 {
                return Err(ConfigError::NoActiveValidators(milestone.height));
            }
            if milestone.blocktime == 0 {
                return Err(ConfigError::ZeroBlocktime(milestone.height));
            }
        }
        let probability = self.options.missed_block_probability;
        if !(0.0..=1.0).contains(&probability) {
            return Err(ConfigError::InvalidProbability(probability));
        }
        Ok(())
    }

    /// Milestone in force at `height`.
    pub fn milestone_at(&self, height: u64) -> Milestone {
        self.milestones
            .iter()
            .rev()
            .find(|milestone| milestone.height <= height)
            .or_else(|| self.milestones.first())
            .copied()
            .unwrap_or_default()
    }

    /// Heights at which protocol parameters change, ascending.
    pub fn milestone_heights(&self) -> Vec<u64> {
        let mut heights: Vec<u64> = self.milestones.iter().map(|m| m.height).collect();
        heights.sort_unstable();
        heights.dedup();
        heights
    }
}
