//! Solidity interfaces of the upgrade entry points and their revert errors.

use alloy_core::primitives::{B256, b256};
use alloy_sol_types::{SolError, sol};

/// `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// `bytes32(uint256(keccak256("eip1967.proxy.admin")) - 1)`
pub const ADMIN_SLOT: B256 =
    b256!("0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// Interface version reported by OpenZeppelin 5 proxies, which dropped the
/// non-`AndCall` upgrade functions.
pub const INTERFACE_VERSION_V5: &str = "5.0.0";

sol! {
    /// `ProxyAdmin` managing transparent proxies.
    interface IProxyAdmin {
        function upgrade(address proxy, address implementation) external;
        function upgradeAndCall(address proxy, address implementation, bytes data) external payable;
        function UPGRADE_INTERFACE_VERSION() external view returns (string);
    }

    /// Upgrade entry points exposed by the proxy itself (UUPS implementations
    /// and pre-5.0 transparent proxies called by their admin account).
    interface IUpgradeable {
        function upgradeTo(address newImplementation) external;
        function upgradeToAndCall(address newImplementation, bytes data) external payable;
        function UPGRADE_INTERFACE_VERSION() external view returns (string);
    }

    error OwnableUnauthorizedAccount(address account);
    error AccessControlUnauthorizedAccount(address account, bytes32 neededRole);
    error ProxyDeniedAdminAccess();
    error UUPSUnauthorizedCallContext();
    error ERC1967InvalidImplementation(address implementation);
}

/// Revert strings emitted by pre-5.0 access control modifiers.
const UNAUTHORIZED_MESSAGES: &[&str] = &[
    "caller is not the owner",
    "is missing role",
    "admin cannot fallback to proxy target",
];

/// How a reverted upgrade call should be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertKind {
    /// The sender lacks upgrade rights.
    Unauthorized(String),
    /// Any other revert.
    Other(String),
}

/// Classify revert `data` (and the node's `message` when data is absent).
pub fn classify_revert(data: &[u8], message: &str) -> RevertKind {
    if let Some(selector) = data.get(..4) {
        let named = [
            (OwnableUnauthorizedAccount::SELECTOR, OwnableUnauthorizedAccount::SIGNATURE),
            (
                AccessControlUnauthorizedAccount::SELECTOR,
                AccessControlUnauthorizedAccount::SIGNATURE,
            ),
            (ProxyDeniedAdminAccess::SELECTOR, ProxyDeniedAdminAccess::SIGNATURE),
            (UUPSUnauthorizedCallContext::SELECTOR, UUPSUnauthorizedCallContext::SIGNATURE),
        ];
        if let Some((_, signature)) = named.iter().find(|(sel, _)| sel.as_slice() == selector) {
            return RevertKind::Unauthorized(signature.to_string());
        }
        if selector == ERC1967InvalidImplementation::SELECTOR.as_slice() {
            return RevertKind::Other(ERC1967InvalidImplementation::SIGNATURE.to_string());
        }
    }

    let reason = alloy_sol_types::decode_revert_reason(data)
        .map(|reason| match reason.strip_prefix("revert: ") {
            Some(message) => message.to_string(),
            None => reason,
        })
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| {
            if message.is_empty() {
                "execution reverted".to_string()
            } else {
                message.to_string()
            }
        });

    if UNAUTHORIZED_MESSAGES.iter().any(|m| reason.contains(m)) {
        RevertKind::Unauthorized(reason)
    } else {
        RevertKind::Other(reason)
    }
}
