//! Protocol upgrade schedule.
//!
//! A height here is the last block of the old version: the first block
//! carrying the new major version sits at `height + 1`.

use crate::constants::{
    BLOCK_MAJOR_VERSION_2, BLOCK_MAJOR_VERSION_3, BLOCK_MAJOR_VERSION_4, BLOCK_MAJOR_VERSION_7,
    BLOCK_MAJOR_VERSION_8,
};

/// Marks an upgrade whose height is decided by miner voting.
pub const UNDEF_HEIGHT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UpgradeHeights {
    pub v2: u32,
    pub v3: u32,
    pub v4: u32,
    pub v5: u32,
    /// LWMA-3; first height of major version 4 blocks.
    pub v6: u32,
    pub v7: u32,
    pub v8: u32,
}

impl UpgradeHeights {
    pub const fn undefined() -> Self {
        Self {
            v2: UNDEF_HEIGHT,
            v3: UNDEF_HEIGHT,
            v4: UNDEF_HEIGHT,
            v5: UNDEF_HEIGHT,
            v6: UNDEF_HEIGHT,
            v7: UNDEF_HEIGHT,
            v8: UNDEF_HEIGHT,
        }
    }
}

/// Configured height for a block major version. Major version 4 maps to the
/// V6 height; versions without a scheduled height return `UNDEF_HEIGHT`.
pub fn upgrade_height(heights: &UpgradeHeights, major_version: u8) -> u32 {
    match major_version {
        BLOCK_MAJOR_VERSION_2 => heights.v2,
        BLOCK_MAJOR_VERSION_3 => heights.v3,
        BLOCK_MAJOR_VERSION_4 => heights.v6,
        BLOCK_MAJOR_VERSION_7 => heights.v7,
        BLOCK_MAJOR_VERSION_8 => heights.v8,
        _ => UNDEF_HEIGHT,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UpgradeInfo {
    pub major_version: u8,
    pub name: &'static str,
    pub info: &'static str,
}

pub const UPGRADE_INFO: [UpgradeInfo; 5] = [
    UpgradeInfo {
        major_version: BLOCK_MAJOR_VERSION_2,
        name: "Consensus II",
        info: "Foundation trust and reward curve",
    },
    UpgradeInfo {
        major_version: BLOCK_MAJOR_VERSION_3,
        name: "Consensus III",
        info: "Fast PoW variant",
    },
    UpgradeInfo {
        major_version: BLOCK_MAJOR_VERSION_4,
        name: "LWMA3",
        info: "LWMA-3 difficulty with shorter timestamp window",
    },
    UpgradeInfo {
        major_version: BLOCK_MAJOR_VERSION_7,
        name: "Conceal PoW",
        info: "Conceal PoW variant",
    },
    UpgradeInfo {
        major_version: BLOCK_MAJOR_VERSION_8,
        name: "LWMA1",
        info: "GPU PoW variant and halving",
    },
];

pub fn upgrade_info(major_version: u8) -> Option<&'static UpgradeInfo> {
    UPGRADE_INFO
        .iter()
        .find(|info| info.major_version == major_version)
}

/// Major version required at `height` under a fully scheduled upgrade table.
pub fn scheduled_major_version(heights: &UpgradeHeights, height: u32) -> u8 {
    UPGRADE_INFO
        .iter()
        .rev()
        .find(|info| {
            let upgrade = upgrade_height(heights, info.major_version);
            upgrade != UNDEF_HEIGHT && upgrade < height
        })
        .map(|info| info.major_version)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{consensus_params, Network};

    #[test]
    fn major_version_maps_to_configured_height() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(upgrade_height(&params.upgrades, 2), 1);
        assert_eq!(upgrade_height(&params.upgrades, 3), 12_750);
        assert_eq!(upgrade_height(&params.upgrades, 4), 104_200);
        assert_eq!(upgrade_height(&params.upgrades, 7), 195_765);
        assert_eq!(upgrade_height(&params.upgrades, 8), 661_300);
        assert_eq!(upgrade_height(&params.upgrades, 5), UNDEF_HEIGHT);
        assert_eq!(upgrade_height(&params.upgrades, 1), UNDEF_HEIGHT);
    }

    #[test]
    fn scheduled_versions_switch_after_upgrade_height() {
        let params = consensus_params(Network::Mainnet);
        let heights = &params.upgrades;
        assert_eq!(scheduled_major_version(heights, 0), 1);
        assert_eq!(scheduled_major_version(heights, 1), 1);
        assert_eq!(scheduled_major_version(heights, 2), 2);
        assert_eq!(scheduled_major_version(heights, 12_750), 2);
        assert_eq!(scheduled_major_version(heights, 12_751), 3);
        assert_eq!(scheduled_major_version(heights, 104_201), 4);
        assert_eq!(scheduled_major_version(heights, 195_766), 7);
        assert_eq!(scheduled_major_version(heights, 700_000), 8);
        assert_eq!(scheduled_major_version(&UpgradeHeights::undefined(), 700_000), 1);
    }

    #[test]
    fn upgrade_info_covers_tracked_versions() {
        for version in crate::constants::UPGRADE_TARGET_VERSIONS {
            assert!(upgrade_info(version).is_some());
        }
        assert!(upgrade_info(5).is_none());
    }
}
