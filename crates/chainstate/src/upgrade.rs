//! Miner-vote driven block major version upgrades.
//!
//! One detector tracks one target version. When the network configures a
//! fixed height for the target the detector only checks that the chain obeys
//! it. Otherwise it watches minor-version votes over a sliding window and
//! fixes the activation height once enough blocks have voted.

use ccx_consensus::constants::BLOCK_MINOR_VERSION_1;
use ccx_consensus::{ConsensusParams, UNDEF_HEIGHT};

/// Read access to the main chain's block versions.
pub trait ChainView {
    fn block_count(&self) -> u32;

    /// `(major, minor)` of the block at `height`.
    fn block_versions(&self, height: u32) -> Option<(u8, u8)>;
}

impl ChainView for [(u8, u8)] {
    fn block_count(&self) -> u32 {
        self.len() as u32
    }

    fn block_versions(&self, height: u32) -> Option<(u8, u8)> {
        self.get(height as usize).copied()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpgradeError {
    MissingBlock(u32),
    UpgradeHeightNotFound { target: u8 },
    VotingHeightNotFound { target: u8, upgrade_height: u32 },
    UnexpectedVersion { height: u32, found: u8, target: u8 },
}

impl std::fmt::Display for UpgradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradeError::MissingBlock(height) => write!(f, "no block at height {height}"),
            UpgradeError::UpgradeHeightNotFound { target } => {
                write!(f, "upgrade height for version {target} isn't found")
            }
            UpgradeError::VotingHeightNotFound {
                target,
                upgrade_height,
            } => write!(
                f,
                "voting complete height for version {target} isn't found, upgrade height = {upgrade_height}"
            ),
            UpgradeError::UnexpectedVersion {
                height,
                found,
                target,
            } => write!(
                f,
                "block at height {height} has version {found}, unexpected for upgrade to {target}"
            ),
        }
    }
}

impl std::error::Error for UpgradeError {}

#[derive(Clone, Debug)]
pub struct UpgradeDetector {
    target_version: u8,
    configured_height: u32,
    voting_complete_height: u32,
    voting_window: u32,
    voting_threshold: u32,
    upgrade_window: u32,
    max_upgrade_distance: u32,
    difficulty_target: u64,
}

fn versions_at<C: ChainView + ?Sized>(chain: &C, height: u32) -> Result<(u8, u8), UpgradeError> {
    chain
        .block_versions(height)
        .ok_or(UpgradeError::MissingBlock(height))
}

impl UpgradeDetector {
    pub fn new(params: &ConsensusParams, target_version: u8) -> Self {
        Self {
            target_version,
            configured_height: params.upgrade_height(target_version),
            voting_complete_height: UNDEF_HEIGHT,
            voting_window: params.upgrade_voting_window,
            voting_threshold: params.upgrade_voting_threshold,
            upgrade_window: params.upgrade_window,
            max_upgrade_distance: params.max_upgrade_distance(),
            difficulty_target: params.difficulty_target.max(1),
        }
    }

    pub fn target_version(&self) -> u8 {
        self.target_version
    }

    pub fn voting_complete_height(&self) -> u32 {
        self.voting_complete_height
    }

    fn is_voting_driven(&self) -> bool {
        self.configured_height == UNDEF_HEIGHT
    }

    /// Height of the last block allowed below `target_version`.
    pub fn upgrade_height(&self) -> u32 {
        if !self.is_voting_driven() {
            return self.configured_height;
        }
        if self.voting_complete_height == UNDEF_HEIGHT {
            UNDEF_HEIGHT
        } else {
            self.voting_complete_height
                .saturating_add(self.upgrade_window)
        }
    }

    /// Restores a voting height saved alongside the chain it was computed on.
    pub(crate) fn restore(&mut self, voting_complete_height: u32) {
        if self.is_voting_driven() {
            self.voting_complete_height = voting_complete_height;
        }
    }

    /// Derives the detector state from an existing chain.
    pub fn init<C: ChainView + ?Sized>(&mut self, chain: &C) -> Result<(), UpgradeError> {
        let len = chain.block_count();
        if self.is_voting_driven() {
            self.voting_complete_height = UNDEF_HEIGHT;
            if len == 0 {
                return Ok(());
            }
            let (tail_major, _) = versions_at(chain, len - 1)?;
            if tail_major.checked_add(1) == Some(self.target_version) {
                self.voting_complete_height = self.find_voting_complete_height(chain, len - 1)?;
            } else if self.target_version <= tail_major {
                let upgrade_height = self.first_height_with_version(chain)?;
                self.voting_complete_height =
                    self.find_voting_complete_height(chain, upgrade_height)?;
                if self.voting_complete_height == UNDEF_HEIGHT {
                    return Err(UpgradeError::VotingHeightNotFound {
                        target: self.target_version,
                        upgrade_height,
                    });
                }
            }
            return Ok(());
        }

        if len == 0 {
            return Ok(());
        }
        let upgrade_height = self.configured_height;
        if len <= upgrade_height.saturating_add(1) {
            let (tail_major, _) = versions_at(chain, len - 1)?;
            if tail_major >= self.target_version {
                return Err(UpgradeError::UnexpectedVersion {
                    height: len - 1,
                    found: tail_major,
                    target: self.target_version,
                });
            }
        } else {
            let (after_major, _) = versions_at(chain, upgrade_height + 1)?;
            if after_major != self.target_version {
                return Err(UpgradeError::UnexpectedVersion {
                    height: upgrade_height + 1,
                    found: after_major,
                    target: self.target_version,
                });
            }
        }
        Ok(())
    }

    /// Call after the chain has grown by one block.
    pub fn block_pushed<C: ChainView + ?Sized>(&mut self, chain: &C) -> Result<(), UpgradeError> {
        let len = chain.block_count();
        let Some(tail) = len.checked_sub(1) else {
            return Err(UpgradeError::MissingBlock(0));
        };
        let (tail_major, _) = versions_at(chain, tail)?;
        let unexpected = || UpgradeError::UnexpectedVersion {
            height: tail,
            found: tail_major,
            target: self.target_version,
        };

        if !self.is_voting_driven() {
            let before_upgrade = len <= self.configured_height.saturating_add(1);
            let allowed = if before_upgrade {
                tail_major < self.target_version
            } else {
                tail_major >= self.target_version
            };
            return if allowed { Ok(()) } else { Err(unexpected()) };
        }

        if self.voting_complete_height != UNDEF_HEIGHT {
            let upgrade_height = self.upgrade_height();
            if len <= upgrade_height {
                if tail_major.checked_add(1) != Some(self.target_version) {
                    return Err(unexpected());
                }
                let blocks_per_hour = (3600 / self.difficulty_target).max(1);
                if u64::from(len) % blocks_per_hour == 0 {
                    let seconds =
                        self.difficulty_target * u64::from(upgrade_height - len + 2);
                    ccx_log::log_debug!(
                        "upgrade to version {} is going to happen after block {} (in about {}s), current last block {}",
                        self.target_version,
                        upgrade_height,
                        seconds,
                        tail
                    );
                }
            } else if len == upgrade_height.saturating_add(1) {
                if tail_major.checked_add(1) != Some(self.target_version) {
                    return Err(unexpected());
                }
                ccx_log::log_info!(
                    "upgrade has happened: starting from block {} blocks with major version below {} will be rejected",
                    upgrade_height.saturating_add(1),
                    self.target_version
                );
            } else if tail_major != self.target_version {
                return Err(unexpected());
            }
            return Ok(());
        }

        if self.is_voting_complete(chain, tail)? {
            self.voting_complete_height = tail;
            ccx_log::log_info!(
                "upgrade voting complete at block {}: version {} activates after block {}",
                tail,
                self.target_version,
                self.upgrade_height()
            );
        }
        Ok(())
    }

    /// Call after the chain has shrunk by one block.
    pub fn block_popped<C: ChainView + ?Sized>(&mut self, chain: &C) -> Result<(), UpgradeError> {
        if self.voting_complete_height == UNDEF_HEIGHT {
            return Ok(());
        }
        let len = chain.block_count();
        if len == self.voting_complete_height {
            ccx_log::log_info!(
                "upgrade voting canceled: upgrade to version {} after block {} will not happen",
                self.target_version,
                self.upgrade_height()
            );
            self.voting_complete_height = UNDEF_HEIGHT;
        } else if len < self.voting_complete_height {
            return Err(UpgradeError::MissingBlock(self.voting_complete_height));
        }
        Ok(())
    }

    /// Votes for the target among the `voting_window` blocks ending at
    /// `height`.
    pub fn number_of_votes<C: ChainView + ?Sized>(
        &self,
        chain: &C,
        height: u32,
    ) -> Result<u32, UpgradeError> {
        if self.voting_window == 0 || height < self.voting_window - 1 {
            return Ok(0);
        }
        let mut votes = 0;
        for index in height + 1 - self.voting_window..=height {
            let (major, minor) = versions_at(chain, index)?;
            if major.checked_add(1) == Some(self.target_version) && minor == BLOCK_MINOR_VERSION_1 {
                votes += 1;
            }
        }
        Ok(votes)
    }

    pub fn is_voting_complete<C: ChainView + ?Sized>(
        &self,
        chain: &C,
        height: u32,
    ) -> Result<bool, UpgradeError> {
        let votes = self.number_of_votes(chain, height)?;
        Ok(u64::from(self.voting_threshold) * u64::from(self.voting_window)
            <= 100 * u64::from(votes))
    }

    fn find_voting_complete_height<C: ChainView + ?Sized>(
        &self,
        chain: &C,
        probable_upgrade_height: u32,
    ) -> Result<u32, UpgradeError> {
        let start = probable_upgrade_height.saturating_sub(self.max_upgrade_distance);
        for height in start..=probable_upgrade_height {
            if self.is_voting_complete(chain, height)? {
                return Ok(height);
            }
        }
        Ok(UNDEF_HEIGHT)
    }

    /// First height whose major version reaches the target. Versions never
    /// decrease along the chain, so a binary search applies.
    fn first_height_with_version<C: ChainView + ?Sized>(&self, chain: &C) -> Result<u32, UpgradeError> {
        let (mut low, mut high) = (0u32, chain.block_count());
        while low < high {
            let mid = low + (high - low) / 2;
            if versions_at(chain, mid)?.0 < self.target_version {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        match chain.block_versions(low) {
            Some((major, _)) if major == self.target_version => Ok(low),
            _ => Err(UpgradeError::UpgradeHeightNotFound {
                target: self.target_version,
            }),
        }
    }
}
