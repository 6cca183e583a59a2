//! Consensus parameter definitions.

use crate::constants::{
    BLOCK_MAJOR_VERSION_4, BLOCK_MAJOR_VERSION_8, DIFFICULTY_BLOCKS_COUNT,
    DIFFICULTY_BLOCKS_COUNT_V1, MAX_BLOCK_BLOB_SIZE, MAX_BLOCK_NUMBER,
};
use crate::money::{Amount, COIN, MINIMUM_FEE, MONEY_SUPPLY};
use crate::upgrades::{UpgradeHeights, UNDEF_HEIGHT};
use crate::Hash256;

pub const GENESIS_COINBASE_TX_HEX: &str = "010a01ff0001c096b102029b2e4c0281c0b02e7c53291a94d1d0cbff8883f8024f5142ee494ffbbd08807121017d6775185749e95ac2d70cae3f29e0e46f430ab648abbe9fdc61d8e7437c60f8";
pub const GENESIS_NONCE: u32 = 10_000;
pub const GENESIS_TIMESTAMP: u64 = 1_527_078_920;

pub const START_BLOCK_REWARD: Amount = 5_000 * crate::money::POINT;
pub const FOUNDATION_TRUST: Amount = 12_000_000 * COIN;
pub const MAX_BLOCK_REWARD: Amount = 15 * COIN;
pub const REWARD_INCREASE_INTERVAL: u64 = 21_900;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub genesis_coinbase_hex: &'static str,
    pub genesis_nonce: u32,
    pub genesis_timestamp: u64,
    pub genesis_block_reward: Amount,

    pub max_block_number: u64,
    pub max_block_blob_size: usize,
    pub max_tx_size: usize,
    pub mined_money_unlock_window: u32,
    pub money_supply: Amount,
    pub minimum_fee: Amount,
    pub default_dust_threshold: Amount,

    pub timestamp_check_window: usize,
    pub timestamp_check_window_v1: usize,
    pub block_future_time_limit: u64,
    pub block_future_time_limit_v1: u64,

    pub reward_blocks_window: usize,
    pub block_granted_full_reward_zone: usize,
    pub miner_tx_blob_reserved_size: usize,
    pub max_block_size_initial: usize,
    pub max_block_size_growth_speed_numerator: u64,
    pub max_block_size_growth_speed_denominator: u64,
    pub locked_tx_allowed_delta_blocks: u64,
    pub locked_tx_allowed_delta_seconds: u64,

    pub difficulty_target: u64,
    pub difficulty_window: usize,
    pub difficulty_window_v3: usize,
    pub difficulty_cut: usize,
    pub difficulty_lag: usize,
    /// Classic window with floor division for major versions >= 2.
    pub zawy_difficulty_v2: bool,
    pub zawy_difficulty_block_version: u8,
    /// Activation height of the 17-block LWMA-1 variant; zero disables it.
    pub zawy_difficulty_block_index: u32,

    pub deposit_min_amount: Amount,
    pub deposit_min_term: u32,
    pub deposit_max_term: u32,
    pub deposit_max_term_v1: u32,
    pub deposit_min_total_rate_factor: u64,
    pub deposit_max_total_rate: u64,
    pub multiplier_factor: u64,
    pub end_multiplier_block: u32,

    pub upgrades: UpgradeHeights,
    pub upgrade_voting_threshold: u32,
    pub upgrade_voting_window: u32,
    pub upgrade_window: u32,

    pub fusion_tx_max_size: usize,
    pub fusion_tx_min_input_count: usize,
    pub fusion_tx_min_in_out_count_ratio: usize,

    pub blocks_ids_synchronizing_count: usize,
    pub checkpoints: &'static [(u32, &'static str)],
    pub dns_checkpoint_domains: &'static [&'static str],
}

impl ConsensusParams {
    pub fn difficulty_window(&self, major_version: u8) -> usize {
        if major_version >= BLOCK_MAJOR_VERSION_4 {
            self.difficulty_window_v3
        } else {
            self.difficulty_window
        }
    }

    pub fn difficulty_cut(&self, _major_version: u8) -> usize {
        self.difficulty_cut
    }

    /// Number of trailing blocks the engine feeds into the difficulty
    /// algorithm for the given era.
    pub fn difficulty_blocks_count(&self, major_version: u8) -> usize {
        if major_version >= BLOCK_MAJOR_VERSION_8 {
            DIFFICULTY_BLOCKS_COUNT_V1
        } else if major_version >= BLOCK_MAJOR_VERSION_4 {
            DIFFICULTY_BLOCKS_COUNT
        } else {
            self.difficulty_window + self.difficulty_lag
        }
    }

    pub fn timestamp_check_window(&self, major_version: u8) -> usize {
        if major_version >= BLOCK_MAJOR_VERSION_4 {
            self.timestamp_check_window_v1
        } else {
            self.timestamp_check_window
        }
    }

    pub fn block_future_time_limit(&self, major_version: u8) -> u64 {
        if major_version >= BLOCK_MAJOR_VERSION_4 {
            self.block_future_time_limit_v1
        } else {
            self.block_future_time_limit
        }
    }

    pub fn min_number_voting_blocks(&self) -> u32 {
        (self.upgrade_voting_window * self.upgrade_voting_threshold + 99) / 100
    }

    pub fn max_upgrade_distance(&self) -> u32 {
        7 * self.upgrade_window
    }

    pub fn calculate_upgrade_height(&self, voting_complete_height: u32) -> u32 {
        voting_complete_height.saturating_add(self.upgrade_window)
    }

    /// Configured activation height for `major_version`, or `UNDEF_HEIGHT`
    /// when the upgrade is left to miner voting.
    pub fn upgrade_height(&self, major_version: u8) -> u32 {
        crate::upgrades::upgrade_height(&self.upgrades, major_version)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "hash must be 64 hex characters"),
            HexError::InvalidHex => write!(f, "invalid hex character"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a 64-character hex string in byte order (no reversal).
pub fn hash_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out = u8::from_str_radix(hex.get(start..start + 2).ok_or(HexError::InvalidHex)?, 16)
            .map_err(|_| HexError::InvalidHex)?;
    }
    Ok(bytes)
}

pub fn hash_to_hex(hash: &Hash256) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    let block_granted_full_reward_zone = 100_000;
    let miner_tx_blob_reserved_size = 600;
    ConsensusParams {
        network: Network::Mainnet,
        genesis_coinbase_hex: GENESIS_COINBASE_TX_HEX,
        genesis_nonce: GENESIS_NONCE,
        genesis_timestamp: GENESIS_TIMESTAMP,
        genesis_block_reward: START_BLOCK_REWARD,

        max_block_number: MAX_BLOCK_NUMBER,
        max_block_blob_size: MAX_BLOCK_BLOB_SIZE,
        max_tx_size: block_granted_full_reward_zone - miner_tx_blob_reserved_size,
        mined_money_unlock_window: 10,
        money_supply: MONEY_SUPPLY,
        minimum_fee: MINIMUM_FEE,
        default_dust_threshold: 10,

        timestamp_check_window: 30,
        timestamp_check_window_v1: 11,
        block_future_time_limit: 60 * 60 * 2,
        block_future_time_limit_v1: 360,

        reward_blocks_window: 100,
        block_granted_full_reward_zone,
        miner_tx_blob_reserved_size,
        max_block_size_initial: block_granted_full_reward_zone * 10,
        max_block_size_growth_speed_numerator: 100 * 1024,
        max_block_size_growth_speed_denominator: 365 * 24 * 60 * 60 / 120,
        locked_tx_allowed_delta_blocks: 1,
        locked_tx_allowed_delta_seconds: 120,

        difficulty_target: 120,
        difficulty_window: 720,
        difficulty_window_v3: 60,
        difficulty_cut: 60,
        difficulty_lag: 15,
        zawy_difficulty_v2: true,
        zawy_difficulty_block_version: 0,
        zawy_difficulty_block_index: 0,

        deposit_min_amount: COIN,
        deposit_min_term: 5_040,
        deposit_max_term: 12 * 21_900,
        deposit_max_term_v1: 64_800 * 20,
        deposit_min_total_rate_factor: 0,
        deposit_max_total_rate: 4,
        multiplier_factor: 100,
        end_multiplier_block: 12_750,

        upgrades: UpgradeHeights {
            v2: 1,
            v3: 12_750,
            v4: 45_000,
            v5: 98_160,
            v6: 104_200,
            v7: 195_765,
            v8: 661_300,
        },
        upgrade_voting_threshold: 90,
        upgrade_voting_window: 720,
        upgrade_window: 720,

        fusion_tx_max_size: block_granted_full_reward_zone * 30 / 100,
        fusion_tx_min_input_count: 12,
        fusion_tx_min_in_out_count_ratio: 4,

        blocks_ids_synchronizing_count: crate::constants::BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT,
        checkpoints: MAINNET_CHECKPOINTS,
        dns_checkpoint_domains: &[],
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    let mut params = mainnet_consensus_params();
    params.network = Network::Testnet;
    params.genesis_nonce += 1;
    params.upgrades.v2 = 0;
    params.upgrades.v3 = UNDEF_HEIGHT;
    params.checkpoints = &[];
    params
}

/// Local chain for tests: every upgrade is left to voting, so blocks stay at
/// major version 1 unless a test configures heights.
fn regtest_consensus_params() -> ConsensusParams {
    let mut params = mainnet_consensus_params();
    params.network = Network::Regtest;
    params.genesis_nonce += 2;
    params.upgrades = UpgradeHeights::undefined();
    params.checkpoints = &[];
    params
}

const MAINNET_CHECKPOINTS: &[(u32, &str)] = &[
    (0, "b9dc432e56e37b52771970ce014dd23fda517cfd4fc5a9b296f1954b7d4505de"),
    (10_000, "55cf271a5c97785fb35fea7ed177cb75f47c18688bd86fc01ae66508878029d6"),
    (20_000, "52533de7f1596154c6954530ae8331fe4f92e92d476f097c6d7d20ebab1c2748"),
    (30_000, "50b5d84ac0b8abfe25669aac8514505c4c5f7ffd8e2bba0b52ab64f600d90796"),
    (40_000, "ae2ed29163a57396f11c743400e55fba3f6b8e6bb6473f421c48ff8c87447ad0"),
    (50_000, "8ad7969ca5d3cf48f784d33b60d1ea00bfb35b632447584e5181b194f3bb9cd6"),
    (60_000, "22b1a161de2318b1a83ae0e3d1d04a2c420accccadd861aa8ad6365ec630ce04"),
    (70_000, "4ef8a3c59b04ad8ae335fee0b5df0c1b114dda57d13232741d82c4984bf22bed"),
    (80_000, "a60bd6b446c5b09997b5b70f31c56f35358657a673dcf56213a163fb6516750d"),
    (90_000, "9985f631d4b2c15388e8c3797a1384b4610b13ff3852bc6d8f125ea4e13fdd22"),
    (100_000, "1ccef60fb31646fc1745ccb42167f2e2efcf953a83b99ff4b6a39c99eb37d0e5"),
    (110_000, "1b80bf8355ea023de7ed3367881ef111dfdb3aaeb25db3a0d6cad4c3cc0bb4bd"),
    (120_000, "f621bd615716b75716eb89714d60481077a16b1df4046bf829f6d09b1c8e58a6"),
    (130_000, "deb2514d03e2faf1c63b55f707b1524665ca4bd71cace3f4e8f0de58f32ecc41"),
    (140_000, "c439524c13187bb6008acb1e9999317aa44e8d1cd75c96faae78831f6b961bac"),
    (150_000, "90cc70379ea81d47df998e8b9928ba9191968035ae79ec1cb429c64a55497e03"),
    (160_000, "4176bdff06416934d7766a6c2f6279d048cfdc516019a0580ea19c1d003038cc"),
    (170_000, "50e3af756e96115011c8e4d138852e1f4835da805ca5ccd826f81593a53f4bd3"),
    (180_000, "e1672173a2794245830a742d1df38b5fe5006fe6f00707e1b776bf29316ab18b"),
    (190_000, "763eaa3c049ef46479144924b41cc9cb37346da88b0a3ae32a10e026c6f7984c"),
    (200_000, "2ef304bec067c3a94f04440a593a13903a1487890493d15f74ec79c0ae585109"),
    (210_000, "90dd7aca026ec5f9fdfd2fa9cd0c114c1c6c6bfc0536fb6490c804ac7ef72425"),
    (220_000, "8de5278fc6703933e32e062b14496b0e1562c941e7e3c5b93147a3b39491fac5"),
    (230_000, "f8ed2680d912a7f3aeb452d4eb8023f93f6387ff4c6927615691f66701d05d32"),
    (240_000, "4445874d16b3dd8d5b0f9dee287e47219022c2b214c459e03be2bb71e4a12e3d"),
    (250_000, "c579d2ad4f95a6c34180a89b32aa9fbe6ab2ecba9f3714ddde90fd5d9f85f6e9"),
    (260_000, "ce63d00de7546f1dee417b2391692b367dc5c2cfe19ea43c98cf932d3838c5ec"),
    (270_000, "f16000fefb54ad1f0f927f634c5b6f44fcfa201adc5ee093850301bd773c18fa"),
    (280_000, "aba16466e085b2c7a792ba449f025bd1e37d6a1d44fa957a1ad4df78f41f6478"),
    (290_000, "9fd5f13ac51df7ce2b8d78c45fbb864b231d6275bf7495118b4cc415301e6fe1"),
    (290_665, "4e0082f3e66b0fe4176a850ff9560f1d8d2f2e11dc3a2045904209d11478f779"),
    (290_674, "ac89a1f4c20674a8d735681b1ded3a1242252bb23341bc9b79bc06b310b490f4"),
    (290_675, "6782c5e7436f77f4466253d6a70466cc6bfc66c6c51b675864c4543250c09e8b"),
    (290_676, "0b25026f8c7fb194776c081f2bb32874b82f4298bd0d71c2d0a986117b97fa1e"),
    (290_720, "36572a88fbed4654f4291f6d7a35a732b81f61e87ec27ce58f38047981b84e09"),
    (300_000, "2a984212cc42ef62cd2229b624e05aa72926f0e89006e976c88b52d99ea14225"),
    (305_000, "46104ab66387ab6ca6a3889e81c7b9810e27f547a8684659aeb62c438a3b6cf0"),
    (310_000, "4a896f5de4f782c59f1f4691505aba0df87a20f2e06499b59496b8d7ffb025fe"),
    (320_000, "c68d15c181bdfc6c5b7fe5c46c6432a03b95d640caa425a5cb3aa675c1d8f8fd"),
    (330_000, "af9e972f98bed57579a6691c3d21443d3cbff35005e984044bc99cee82d93922"),
    (340_000, "6fce13dd473f3673cd08b28171902e281d7fdbbd8b8ba34e0019ae18f597d22f"),
    (350_000, "f08aad1562ceee3a6c8147846bb3e5dd15b3168007f588ab68bd8ee816eb386d"),
    (360_000, "cd910715be7dccc155ad3e8a6311f1bbcfaffe3ee25186c454ed27ee61faa977"),
    (370_000, "6c4a86be9a1f697cadc38d21718803c43f49bf60c71ae253293e29ebac6efe31"),
    (380_000, "620709892437c28deb72a56e6a91960f481aa682d8dd8652f792fb33e6683ef5"),
    (390_000, "d2ff4c39b4aed7ef08a99a00b9823bed44581e866180ae3daa8b8e990b57ec63"),
    (400_000, "9b7302daf5e5933b9a3e75a12651eaad83bea7d0058191cf65eb20985fe281c5"),
    (410_000, "4f343219e57f78c1063f4b4c5be6cb5a10599d64d36e9f686f7046469a6c7e73"),
    (420_000, "56b2fec8f7a55c9e2960d7224999c2e8c83a77f051931ba1673e071e7bcd6851"),
    (430_000, "6d6e24f6c518c9cc24a05967fd1bbb3aeffb670fd7329d0a24053662a2305d9e"),
    (440_000, "6a0138801d48150985045bc671c752f8209d084adad3624a57edd22f9edbef78"),
    (460_000, "dec1da5df01c3cdf5d25a577816c93de58dfb6dd6b073619c5cbd50aedefceb7"),
    (470_000, "1d07fd8995e17429143202da00138f0bfcbdd20aa5ddbba18ac762bc473ffd77"),
    (480_000, "c896df9146e8f09f6205496dfa1e28037c8223f531546d2d64119068a6d1db1d"),
    (490_000, "faa86e0b546f7655e829dcd8e967a52d9fa933c832863a648df30cc0e8771fa8"),
    (500_000, "df5b2b47960ecd7809f037de44c6817640283e13323a36fe3dd894f3b2b3c5e1"),
    (510_000, "db784d782ac463fbfbf221b417166a80ca1451f8895a1e3027bd19de2952c9bc"),
    (520_000, "70b9c6945d8156d97d5f337b22ec8a4f77fa8af3b89d63e3fe6b834a03f7a613"),
    (530_000, "f1b6f4018201e9c498e2b441f8e20f6e562e5d45c69008fe74caa7baa0a16611"),
    (550_000, "1b922d13de891cd9f7224bd1a3c879a1d7634505f5f562623d7a487d44211327"),
    (570_000, "9efe8868099afd1f6b17de773da0f5baebf2ace666bf5e599188c64d27cd429f"),
    (580_000, "39ecee8d292c4e0440467b28ead6ed96c480ac85bec4fdba1e4c14b49b08077e"),
    (590_000, "d6201b072cfed013b0e1091517624ca72bdd1ef147143356a1f951dd3241dd88"),
    (600_000, "9f87dd161e37e9dbbcd86a3fafe8e1dec8c54194251ca0c36c646173db12c115"),
    (610_000, "9c95678a27c5bde2b53efdae5c20a5528f134c4ff75737dee3e3d63b4d79c7ba"),
    (620_000, "e5de278b0ea676855873663a32a2d21bc6d98cffcb133e249c8219fb0fcdc3eb"),
    (630_000, "762c8269af35d53408d806d453b8ca6f19fc9e83048bb8d985502344f1d5e08a"),
    (640_000, "24e1ac8aff3e1e7850c06a377c68b2ea3afe53477b710b988b6b456383a50081"),
    (650_000, "4587f3196487cdf12e701bebe30340669374e39b6e0ca7a3c32d6b522be44570"),
    (660_000, "8d8338dab606e4010f1fa53bc0ef268c98f63bf727150184bfedbea37c40026d"),
    (670_000, "26350d735576a40e4d4e628b57186f4c7f85b3bea6c15f28554706f4c78c3837"),
    (680_000, "6774c21beb0f4e2383069da967654ce4d26743f313aa7c705f222c055fcf0e05"),
    (690_000, "33e1ddd732edfb8e850cdca304ae398a2eb495fd2a6876ff759725788f5b1135"),
    (700_000, "a6b8e9707cd5ac93931b3fcc6bb516d11e7cb840bf49c8d3712bdeba605557be"),
    (710_000, "922f1ca029163e58a24d6573e7de6bf9bcecc16ae164ebfd0285c0eda57d4eec"),
    (750_000, "0e22dabd4379040815f078525ed02ae95e26ae92bc9eb35628a5d588e176b900"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_checkpoints_are_ordered_and_parse() {
        let params = consensus_params(Network::Mainnet);

        assert_eq!(params.checkpoints.len(), 76);
        let (height, hash) = params.checkpoints[0];
        assert_eq!(height, 0);
        let parsed = hash_from_hex(hash).expect("genesis checkpoint");
        assert_eq!(parsed[0], 0xb9);
        assert_eq!(parsed[31], 0xde);
        assert_eq!(hash_to_hex(&parsed), hash);

        let last = params.checkpoints.last().expect("checkpoint");
        assert_eq!(last.0, 750_000);

        for window in params.checkpoints.windows(2) {
            assert!(window[0].0 < window[1].0);
        }
        for (_, hash) in params.checkpoints {
            assert!(hash_from_hex(hash).is_ok());
        }
    }

    #[test]
    fn testnet_overrides_early_upgrades() {
        let mainnet = consensus_params(Network::Mainnet);
        let testnet = consensus_params(Network::Testnet);

        assert_eq!(testnet.genesis_nonce, mainnet.genesis_nonce + 1);
        assert_eq!(testnet.upgrade_height(2), 0);
        assert_eq!(testnet.upgrade_height(3), UNDEF_HEIGHT);
        assert_eq!(testnet.upgrade_height(4), 104_200);
        assert!(testnet.checkpoints.is_empty());
    }

    #[test]
    fn era_windows_follow_major_version() {
        let params = consensus_params(Network::Mainnet);

        assert_eq!(params.difficulty_window(1), 720);
        assert_eq!(params.difficulty_window(3), 720);
        assert_eq!(params.difficulty_window(4), 60);
        assert_eq!(params.difficulty_cut(7), 60);
        assert_eq!(params.difficulty_blocks_count(1), 735);
        assert_eq!(params.difficulty_blocks_count(4), 61);
        assert_eq!(params.difficulty_blocks_count(8), 61);
        assert_eq!(params.timestamp_check_window(3), 30);
        assert_eq!(params.timestamp_check_window(4), 11);
        assert_eq!(params.block_future_time_limit(2), 7_200);
        assert_eq!(params.block_future_time_limit(7), 360);
    }

    #[test]
    fn derived_sizes_and_voting_limits() {
        let params = consensus_params(Network::Mainnet);

        assert_eq!(params.max_tx_size, 99_400);
        assert_eq!(params.max_block_size_initial, 1_000_000);
        assert_eq!(params.max_block_size_growth_speed_denominator, 262_800);
        assert_eq!(params.fusion_tx_max_size, 30_000);
        assert_eq!(params.min_number_voting_blocks(), 648);
        assert_eq!(params.max_upgrade_distance(), 5_040);
        assert_eq!(params.calculate_upgrade_height(1_000), 1_720);
    }

    #[test]
    fn hash_from_hex_rejects_bad_input() {
        assert_eq!(hash_from_hex("abcd"), Err(HexError::InvalidLength));
        let bad = "zz".repeat(32);
        assert_eq!(hash_from_hex(&bad), Err(HexError::InvalidHex));
    }
}
