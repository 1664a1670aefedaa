//! ABI of the operations a proxy handles itself.
//!
//! Calls whose selector matches one of [`RESERVED_SELECTORS`] are intercepted
//! by the proxy; every other payload reaches the backend unmodified, even one
//! a backend could also decode.
use alloy_sol_types::SolCall;

pub use interface::*;

mod interface {
    #![allow(missing_docs)]
    #![cfg_attr(coverage_nightly, coverage(off))]

    use alloy_sol_macro::sol;

    sol! {
        /// Administrative interface of an upgradeable proxy.
        interface IUpgradeableProxy {
            function swapBackend(address new_backend) external;
            function swapBackendAndCall(address new_backend, bytes data) external payable returns (bytes);
            function transferAdmin(address new_admin) external;
            function getBackend() external view returns (address);
            function getAdmin() external view returns (address);
        }
    }
}

/// Selector of `swapBackend(address)`.
pub const SWAP_BACKEND: [u8; 4] = IUpgradeableProxy::swapBackendCall::SELECTOR;
/// Selector of `swapBackendAndCall(address,bytes)`.
pub const SWAP_BACKEND_AND_CALL: [u8; 4] =
    IUpgradeableProxy::swapBackendAndCallCall::SELECTOR;
/// Selector of `transferAdmin(address)`.
pub const TRANSFER_ADMIN: [u8; 4] =
    IUpgradeableProxy::transferAdminCall::SELECTOR;
/// Selector of `getBackend()`.
pub const GET_BACKEND: [u8; 4] = IUpgradeableProxy::getBackendCall::SELECTOR;
/// Selector of `getAdmin()`.
pub const GET_ADMIN: [u8; 4] = IUpgradeableProxy::getAdminCall::SELECTOR;

/// Selectors a proxy never forwards.
pub const RESERVED_SELECTORS: [[u8; 4]; 5] =
    [SWAP_BACKEND, SWAP_BACKEND_AND_CALL, TRANSFER_ADMIN, GET_BACKEND, GET_ADMIN];

/// Returns the function selector of `calldata`, if it has one.
#[must_use]
pub fn selector(calldata: &[u8]) -> Option<[u8; 4]> {
    calldata.get(..4)?.try_into().ok()
}

/// Returns true if the proxy handles `selector` itself.
#[must_use]
pub fn is_reserved(selector: [u8; 4]) -> bool {
    RESERVED_SELECTORS.contains(&selector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_selector() {
        assert_eq!(selector(&[1, 2, 3]), None);
        assert_eq!(selector(&[1, 2, 3, 4, 5]), Some([1, 2, 3, 4]));
    }

    #[test]
    fn reserved_selectors_are_distinct() {
        for (i, a) in RESERVED_SELECTORS.iter().enumerate() {
            for b in &RESERVED_SELECTORS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn recognises_reserved_selectors() {
        assert!(is_reserved(SWAP_BACKEND));
        assert!(is_reserved(GET_ADMIN));
        assert!(!is_reserved([0xde, 0xad, 0xbe, 0xef]));
    }
}
