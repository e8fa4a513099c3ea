//! Registry of well-known networks and token deployments.
//!
//! Network names follow the original wire convention (`solana-mainnet`,
//! `solana-devnet`, `solana-testnet`). The registry also carries the default
//! public RPC endpoint and the USDC mint for networks where Circle deploys
//! one.

/// Solana mainnet network name.
pub const MAINNET: &str = "solana-mainnet";

/// Solana devnet network name.
pub const DEVNET: &str = "solana-devnet";

/// Solana testnet network name.
pub const TESTNET: &str = "solana-testnet";

/// Static metadata for a well-known network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Wire name of the network.
    pub name: &'static str,
    /// Default public RPC endpoint.
    pub rpc_url: &'static str,
    /// USDC mint address, where Circle deploys one.
    pub usdc_mint: Option<&'static str>,
}

/// Well-known networks with their default endpoints and USDC deployments.
pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: MAINNET,
        rpc_url: "https://api.mainnet-beta.solana.com",
        // Native Circle USDC (SPL Token).
        // Verify: https://solscan.io/token/EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v
        usdc_mint: Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
    },
    NetworkInfo {
        name: DEVNET,
        rpc_url: "https://api.devnet.solana.com",
        // Circle USDC testnet deployment (SPL Token).
        // Verify: https://explorer.solana.com/address/4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU?cluster=devnet
        usdc_mint: Some("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"),
    },
    NetworkInfo {
        name: TESTNET,
        rpc_url: "https://api.testnet.solana.com",
        usdc_mint: None,
    },
];

/// Looks up a network by its wire name.
#[must_use]
pub fn find(name: &str) -> Option<&'static NetworkInfo> {
    KNOWN_NETWORKS.iter().find(|n| n.name == name)
}

/// Returns `true` if the name is a known network.
#[must_use]
pub fn is_known(name: &str) -> bool {
    find(name).is_some()
}

/// Returns the USDC mint for a network, if Circle deploys one there.
#[must_use]
pub fn usdc_mint(network: &str) -> Option<&'static str> {
    find(network).and_then(|n| n.usdc_mint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_network_lookup() {
        assert!(is_known(MAINNET));
        assert!(is_known(DEVNET));
        assert!(is_known(TESTNET));
        assert!(!is_known("solana-localnet"));
    }

    #[test]
    fn test_usdc_deployments() {
        assert_eq!(
            usdc_mint(MAINNET),
            Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v")
        );
        assert_eq!(
            usdc_mint(DEVNET),
            Some("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU")
        );
        assert_eq!(usdc_mint(TESTNET), None);
    }

    #[test]
    fn test_default_endpoints() {
        let devnet = find(DEVNET).unwrap();
        assert_eq!(devnet.rpc_url, "https://api.devnet.solana.com");
    }
}
