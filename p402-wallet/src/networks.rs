//! Well-known EVM network names and their EIP-155 chain ids.
//!
//! Upstream servers identify networks by name in payment requirements;
//! EIP-712 domains need the numeric chain id.
//!
//! Source: <https://developers.circle.com/stablecoins/usdc-contract-addresses>

/// Known (network name, chain id) pairs.
static EVM_NETWORKS: &[(&str, u64)] = &[
    ("ethereum", 1),
    ("ethereum-sepolia", 11_155_111),
    ("base", 8453),
    ("base-sepolia", 84_532),
    ("arbitrum", 42_161),
    ("arbitrum-sepolia", 421_614),
    ("optimism", 10),
    ("optimism-sepolia", 11_155_420),
    ("polygon", 137),
    ("polygon-amoy", 80_002),
    ("avalanche", 43_114),
    ("avalanche-fuji", 43_113),
];

/// Resolves a network name to its EIP-155 chain id.
#[must_use]
pub fn chain_id_for_network(name: &str) -> Option<u64> {
    EVM_NETWORKS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
}
