//! ABI of an [`UpgradeManager`] as seen by raw callers.
//!
//! [`UpgradeManager`]: super::UpgradeManager
pub use interface::*;

mod interface {
    #![allow(missing_docs)]
    #![cfg_attr(coverage_nightly, coverage(off))]

    use alloy_sol_macro::sol;

    sol! {
        /// Calls understood by an upgrade manager.
        interface IUpgradeManager {
            function registerProxy(address instance, address admin) external;
            function unregisterProxy(address instance) external;
            function upgradeProxy(address instance, address new_backend) external;
            function transferProxyAdmin(address instance, address new_admin) external;
            function getProxyCount() external view returns (uint256 count);
            function getAllProxies() external view returns (address[] proxies);
            function isRegisteredProxy(address instance) external view returns (bool registered);
            function getProxyAdmin(address instance) external view returns (address admin);
            function owner() external view returns (address owner);
            function transferOwnership(address new_owner) external;
        }
    }
}
