//! Registry tracking a fleet of upgradeable proxies.
//!
//! An [`UpgradeManager`] keeps a roster of proxies, each paired with a
//! registry-level admin. Upgrades and admin transfers issued through the
//! registry are authorized twice: first by the registry, against its owner
//! and the instance's registry-level admin, then by the proxy itself, which
//! only accepts them if the registry is its admin.
//!
//! The roster is an unordered collection. Removal swaps the last entry into
//! the freed position, so enumeration order changes across removals.
use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolError, SolInterface, SolValue};
pub use sol::*;
use tracing::{debug, trace};

use crate::{
    access::ownable::{self, Ownable, OwnableInvalidOwner},
    host::{CallContext, Vm},
    proxy::{self, CallResult, ProxyTable},
};

pub mod abi;

use abi::IUpgradeManager::IUpgradeManagerCalls;

#[cfg_attr(coverage_nightly, coverage(off))]
mod sol {
    use alloy_sol_macro::sol;

    sol! {
        /// Emitted when `proxy` is registered with `admin` as its
        /// registry-level admin.
        #[derive(Debug)]
        #[allow(missing_docs)]
        event ProxyRegistered(address indexed proxy, address indexed admin);

        /// Emitted when `proxy` is removed from the registry.
        #[derive(Debug)]
        #[allow(missing_docs)]
        event ProxyUnregistered(address indexed proxy);

        /// Emitted when the registry replaced the backend of `proxy`.
        #[derive(Debug)]
        #[allow(missing_docs)]
        event ProxyUpgraded(address indexed proxy, address indexed previous_backend, address indexed new_backend);

        /// Emitted when the registry transferred the admin role of `proxy`.
        #[derive(Debug)]
        #[allow(missing_docs)]
        event ProxyAdminTransferred(address indexed proxy, address indexed previous_admin, address indexed new_admin);
    }

    sol! {
        /// The caller account is not authorized to perform an operation.
        ///
        /// * `account` - Account that was found to not be authorized.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error UpgradeManagerUnauthorizedAccount(address account);

        /// The `instance` is the zero address or not a deployed proxy.
        ///
        /// * `instance` - The rejected instance.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error UpgradeManagerInvalidInstance(address instance);

        /// The `admin` is not a valid admin account (eg. [`Address::ZERO`]).
        ///
        /// * `admin` - The rejected admin.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error UpgradeManagerInvalidAdmin(address admin);

        /// The `instance` is already registered.
        ///
        /// * `instance` - The registered instance.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error UpgradeManagerAlreadyRegistered(address instance);

        /// The `instance` is not registered.
        ///
        /// * `instance` - The unknown instance.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error UpgradeManagerNotRegistered(address instance);

        /// There is no registry deployed at `registry`.
        ///
        /// * `registry` - Address that was called.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error UpgradeManagerNotDeployed(address registry);
    }
}

/// An [`UpgradeManager`] error.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The caller account is not authorized to perform an operation.
    UnauthorizedAccount(UpgradeManagerUnauthorizedAccount),
    /// The instance is the zero address or not a deployed proxy.
    InvalidInstance(UpgradeManagerInvalidInstance),
    /// The admin is the zero address.
    InvalidAdmin(UpgradeManagerInvalidAdmin),
    /// The new owner is the zero address.
    InvalidOwner(OwnableInvalidOwner),
    /// The instance is already registered.
    AlreadyRegistered(UpgradeManagerAlreadyRegistered),
    /// The instance is not registered.
    NotRegistered(UpgradeManagerNotRegistered),
    /// There is no registry deployed at the called address.
    NotDeployed(UpgradeManagerNotDeployed),
    /// The proxy rejected the call the registry made to it.
    Proxy(proxy::Error),
}

impl From<ownable::Error> for Error {
    fn from(value: ownable::Error) -> Self {
        match value {
            ownable::Error::UnauthorizedAccount(e) => {
                Error::UnauthorizedAccount(UpgradeManagerUnauthorizedAccount {
                    account: e.account,
                })
            }
            ownable::Error::InvalidOwner(e) => Error::InvalidOwner(e),
        }
    }
}

impl From<proxy::Error> for Error {
    fn from(value: proxy::Error) -> Self {
        Error::Proxy(value)
    }
}

impl From<Error> for Vec<u8> {
    fn from(value: Error) -> Self {
        match value {
            Error::UnauthorizedAccount(e) => e.abi_encode(),
            Error::InvalidInstance(e) => e.abi_encode(),
            Error::InvalidAdmin(e) => e.abi_encode(),
            Error::InvalidOwner(e) => e.abi_encode(),
            Error::AlreadyRegistered(e) => e.abi_encode(),
            Error::NotRegistered(e) => e.abi_encode(),
            Error::NotDeployed(e) => e.abi_encode(),
            Error::Proxy(e) => e.into(),
        }
    }
}

/// State of an [`UpgradeManager`] contract.
#[derive(Debug, Clone, Default)]
pub struct UpgradeManager {
    address: Address,
    ownable: Ownable,
    /// Registry-level admin of every registered proxy.
    admins: BTreeMap<Address, Address>,
    /// Registered proxies, in roster order.
    proxies: Vec<Address>,
}

impl UpgradeManager {
    /// Creates the state of a registry living at `address`. It has no owner
    /// until [`UpgradeManager::constructor`] runs.
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self { address, ..Self::default() }
    }

    /// Constructor.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the contract's state.
    /// * `vm` - Event log.
    /// * `context` - Context of the deployment.
    /// * `initial_owner` - The initial owner of this registry.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidOwner`] - If `initial_owner` is [`Address::ZERO`].
    ///
    /// # Events
    ///
    /// * [`ownable::OwnershipTransferred`].
    pub fn constructor(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        initial_owner: Address,
    ) -> Result<(), Error> {
        Ok(self.ownable.constructor(vm, context, initial_owner)?)
    }

    /// Address of the registry.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the owner of the registry.
    #[must_use]
    pub fn owner(&self) -> Address {
        self.ownable.owner()
    }

    /// Registers `instance` with `admin` as its registry-level admin.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the contract's state.
    /// * `vm` - Event log.
    /// * `proxies` - Deployed proxies.
    /// * `context` - Context of the invocation.
    /// * `instance` - The proxy to register.
    /// * `admin` - Account allowed to upgrade `instance` through the registry.
    ///
    /// # Errors
    ///
    /// * [`Error::UnauthorizedAccount`] - If not called by the owner.
    /// * [`Error::InvalidInstance`] - If `instance` is the zero address or not
    ///   a deployed proxy.
    /// * [`Error::InvalidAdmin`] - If `admin` is the zero address.
    /// * [`Error::AlreadyRegistered`] - If `instance` is already registered.
    ///
    /// # Events
    ///
    /// * [`ProxyRegistered`].
    pub fn register_proxy(
        &mut self,
        vm: &mut Vm,
        proxies: &ProxyTable,
        context: &CallContext,
        instance: Address,
        admin: Address,
    ) -> Result<(), Error> {
        self.ownable.only_owner(context)?;

        if instance.is_zero() {
            return Err(Error::InvalidInstance(UpgradeManagerInvalidInstance {
                instance,
            }));
        }

        if admin.is_zero() {
            return Err(Error::InvalidAdmin(UpgradeManagerInvalidAdmin {
                admin,
            }));
        }

        if self.is_registered_proxy(instance) {
            return Err(Error::AlreadyRegistered(
                UpgradeManagerAlreadyRegistered { instance },
            ));
        }

        if !proxies.contains_key(&instance) {
            return Err(Error::InvalidInstance(UpgradeManagerInvalidInstance {
                instance,
            }));
        }

        self.admins.insert(instance, admin);
        self.proxies.push(instance);

        vm.log(self.address, &ProxyRegistered { proxy: instance, admin });
        debug!(registry = %self.address, %instance, %admin, "proxy registered");

        Ok(())
    }

    /// Removes `instance` from the registry. The last registered proxy takes
    /// its position in the roster.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the contract's state.
    /// * `vm` - Event log.
    /// * `context` - Context of the invocation.
    /// * `instance` - The proxy to remove.
    ///
    /// # Errors
    ///
    /// * [`Error::NotRegistered`] - If `instance` is not registered.
    /// * [`Error::UnauthorizedAccount`] - If not called by the owner or the
    ///   registry-level admin of `instance`.
    ///
    /// # Events
    ///
    /// * [`ProxyUnregistered`].
    pub fn unregister_proxy(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        instance: Address,
    ) -> Result<(), Error> {
        self.only_owner_or_admin(context, instance)?;

        self.admins.remove(&instance);
        if let Some(position) =
            self.proxies.iter().position(|proxy| *proxy == instance)
        {
            self.proxies.swap_remove(position);
        }

        vm.log(self.address, &ProxyUnregistered { proxy: instance });
        debug!(registry = %self.address, %instance, "proxy unregistered");

        Ok(())
    }

    /// Replaces the backend of `instance`.
    ///
    /// The registry calls [`UpgradeableProxy::swap_backend`] on `instance`
    /// as itself, so the call only succeeds if the registry is the admin of
    /// `instance`.
    ///
    /// [`UpgradeableProxy::swap_backend`]: crate::proxy::UpgradeableProxy::swap_backend
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the contract's state.
    /// * `vm` - Deployed code and event log.
    /// * `proxies` - Deployed proxies.
    /// * `context` - Context of the invocation.
    /// * `instance` - The proxy to upgrade.
    /// * `new_backend` - The backend to install.
    ///
    /// # Errors
    ///
    /// * [`Error::NotRegistered`] - If `instance` is not registered.
    /// * [`Error::UnauthorizedAccount`] - If not called by the owner or the
    ///   registry-level admin of `instance`.
    /// * [`Error::Proxy`] - If `instance` rejects the swap.
    ///
    /// # Events
    ///
    /// * [`ProxyUpgraded`].
    pub fn upgrade_proxy(
        &mut self,
        vm: &mut Vm,
        proxies: &mut ProxyTable,
        context: &CallContext,
        instance: Address,
        new_backend: Address,
    ) -> Result<(), Error> {
        self.only_owner_or_admin(context, instance)?;

        let target = Self::proxy_mut(proxies, instance)?;
        let previous_backend = target.backend();
        target.swap_backend(vm, &context.call_to(instance), new_backend)?;

        vm.log(
            self.address,
            &ProxyUpgraded { proxy: instance, previous_backend, new_backend },
        );
        debug!(registry = %self.address, %instance, %previous_backend, %new_backend, "proxy upgraded");

        Ok(())
    }

    /// Transfers the admin role of `instance` to `new_admin`, both in the
    /// registry and in `instance` itself.
    ///
    /// If `instance` rejects the transfer, nothing changes.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the contract's state.
    /// * `vm` - Event log.
    /// * `proxies` - Deployed proxies.
    /// * `context` - Context of the invocation.
    /// * `instance` - The proxy whose admin changes.
    /// * `new_admin` - The next admin.
    ///
    /// # Errors
    ///
    /// * [`Error::UnauthorizedAccount`] - If not called by the owner.
    /// * [`Error::NotRegistered`] - If `instance` is not registered.
    /// * [`Error::InvalidAdmin`] - If `new_admin` is the zero address.
    /// * [`Error::Proxy`] - If `instance` rejects the transfer.
    ///
    /// # Events
    ///
    /// * [`ProxyAdminTransferred`].
    pub fn transfer_proxy_admin(
        &mut self,
        vm: &mut Vm,
        proxies: &mut ProxyTable,
        context: &CallContext,
        instance: Address,
        new_admin: Address,
    ) -> Result<(), Error> {
        self.ownable.only_owner(context)?;
        let previous_admin = self.registered_admin(instance)?;

        if new_admin.is_zero() {
            return Err(Error::InvalidAdmin(UpgradeManagerInvalidAdmin {
                admin: new_admin,
            }));
        }

        Self::proxy_mut(proxies, instance)?.transfer_admin(
            vm,
            &context.call_to(instance),
            new_admin,
        )?;

        self.admins.insert(instance, new_admin);

        vm.log(
            self.address,
            &ProxyAdminTransferred {
                proxy: instance,
                previous_admin,
                new_admin,
            },
        );
        debug!(registry = %self.address, %instance, %previous_admin, %new_admin, "proxy admin transferred");

        Ok(())
    }

    /// Number of registered proxies.
    #[must_use]
    pub fn get_proxy_count(&self) -> U256 {
        U256::from(self.proxies.len())
    }

    /// Every registered proxy, in roster order.
    #[must_use]
    pub fn get_all_proxies(&self) -> &[Address] {
        &self.proxies
    }

    /// Returns true if `instance` is registered.
    #[must_use]
    pub fn is_registered_proxy(&self, instance: Address) -> bool {
        self.admins.contains_key(&instance)
    }

    /// Registry-level admin of `instance`, or [`Address::ZERO`] if it is not
    /// registered.
    #[must_use]
    pub fn get_proxy_admin(&self, instance: Address) -> Address {
        self.admins.get(&instance).copied().unwrap_or_default()
    }

    /// Transfers ownership of the registry to `new_owner`.
    ///
    /// # Errors
    ///
    /// * [`Error::UnauthorizedAccount`] - If not called by the owner.
    /// * [`Error::InvalidOwner`] - If `new_owner` is [`Address::ZERO`].
    ///
    /// # Events
    ///
    /// * [`ownable::OwnershipTransferred`].
    pub fn transfer_ownership(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        new_owner: Address,
    ) -> Result<(), Error> {
        Ok(self.ownable.transfer_ownership(vm, context, new_owner)?)
    }

    /// Handles a raw invocation of the registry.
    ///
    /// Payloads that do not decode as a call of
    /// [`IUpgradeManager`](abi::IUpgradeManager), and calls carrying value,
    /// revert with empty data.
    ///
    /// # Errors
    ///
    /// * Revert data of the failed operation.
    pub fn dispatch(
        &mut self,
        vm: &mut Vm,
        proxies: &mut ProxyTable,
        context: &CallContext,
        calldata: &[u8],
    ) -> CallResult {
        if !context.value.is_zero() {
            return Err(Vec::new());
        }

        let call =
            IUpgradeManagerCalls::abi_decode(calldata).map_err(|_| Vec::new())?;
        trace!(registry = %self.address, selector = ?call.selector(), "dispatch");

        let output = match call {
            IUpgradeManagerCalls::registerProxy(call) => {
                self.register_proxy(vm, proxies, context, call.instance, call.admin)?;
                Vec::new()
            }
            IUpgradeManagerCalls::unregisterProxy(call) => {
                self.unregister_proxy(vm, context, call.instance)?;
                Vec::new()
            }
            IUpgradeManagerCalls::upgradeProxy(call) => {
                self.upgrade_proxy(
                    vm,
                    proxies,
                    context,
                    call.instance,
                    call.new_backend,
                )?;
                Vec::new()
            }
            IUpgradeManagerCalls::transferProxyAdmin(call) => {
                self.transfer_proxy_admin(
                    vm,
                    proxies,
                    context,
                    call.instance,
                    call.new_admin,
                )?;
                Vec::new()
            }
            IUpgradeManagerCalls::getProxyCount(_) => {
                self.get_proxy_count().abi_encode()
            }
            IUpgradeManagerCalls::getAllProxies(_) => {
                self.proxies.abi_encode()
            }
            IUpgradeManagerCalls::isRegisteredProxy(call) => {
                self.is_registered_proxy(call.instance).abi_encode()
            }
            IUpgradeManagerCalls::getProxyAdmin(call) => {
                self.get_proxy_admin(call.instance).abi_encode()
            }
            IUpgradeManagerCalls::owner(_) => self.owner().abi_encode(),
            IUpgradeManagerCalls::transferOwnership(call) => {
                self.transfer_ownership(vm, context, call.new_owner)?;
                Vec::new()
            }
        };

        Ok(output)
    }
}

impl UpgradeManager {
    /// Returns the registry-level admin of `instance`.
    ///
    /// # Errors
    ///
    /// * [`Error::NotRegistered`] - If `instance` is not registered.
    fn registered_admin(&self, instance: Address) -> Result<Address, Error> {
        self.admins.get(&instance).copied().ok_or(Error::NotRegistered(
            UpgradeManagerNotRegistered { instance },
        ))
    }

    /// Checks that `instance` is registered and the sender of `context` is
    /// either the owner or the registry-level admin of `instance`.
    ///
    /// # Errors
    ///
    /// * [`Error::NotRegistered`] - If `instance` is not registered.
    /// * [`Error::UnauthorizedAccount`] - If called by any other account.
    fn only_owner_or_admin(
        &self,
        context: &CallContext,
        instance: Address,
    ) -> Result<(), Error> {
        let admin = self.registered_admin(instance)?;

        let account = context.sender;
        if account != admin && account != self.owner() {
            return Err(Error::UnauthorizedAccount(
                UpgradeManagerUnauthorizedAccount { account },
            ));
        }

        Ok(())
    }

    fn proxy_mut(
        proxies: &mut ProxyTable,
        instance: Address,
    ) -> Result<&mut proxy::UpgradeableProxy, Error> {
        proxies.get_mut(&instance).ok_or(Error::Proxy(proxy::Error::NotDeployed(
            proxy::upgradeable::ProxyNotDeployed { proxy: instance },
        )))
    }
}
