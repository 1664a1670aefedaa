//! In-process execution environment for proxies, registries and backends.
//!
//! A [`Host`] plays the role of the chain: it deploys code, assigns addresses,
//! routes invocations and records events. Every invocation goes through a
//! [`Caller`], obtained with [`Host::sender`], and is atomic: if it fails,
//! every storage write and event it produced is discarded.
//!
//! ```
//! use alloy_primitives::Address;
//! use upgradeable_proxy::host::Host;
//!
//! let mut host = Host::new();
//! let owner = Address::with_last_byte(1);
//!
//! let registry = host.sender(owner).deploy_registry().unwrap();
//! assert_eq!(host.registry(registry).unwrap().owner(), owner);
//! ```
use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use alloy_primitives::{Address, Log, U256};
use alloy_sol_types::SolEvent;
use tracing::{debug, trace};

mod context;
mod vm;

pub use context::{CallContext, Environment};
pub use vm::{LogCheckpoint, Vm};

use crate::{
    proxy::{
        self,
        upgradeable::ProxyNotDeployed,
        Backend, CallResult, ProxyTable, UpgradeableProxy,
    },
    registry::{self, UpgradeManager, UpgradeManagerNotDeployed},
    storage::{layout, Storage},
};

/// Chain state: deployed code, proxies, registries and the event log.
#[derive(Default)]
pub struct Host {
    env: Environment,
    vm: Vm,
    proxies: ProxyTable,
    registries: BTreeMap<Address, UpgradeManager>,
    /// Storage of backends called directly at their own address.
    accounts: HashMap<Address, Storage>,
    nonces: HashMap<Address, u64>,
}

impl Host {
    /// Creates an empty host with the default [`Environment`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty host executing in `env`.
    #[must_use]
    pub fn with_environment(env: Environment) -> Self {
        Self { env, ..Self::default() }
    }

    /// Block values observed by invocations.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.env
    }

    /// Write access to the block values, eg. to advance the block.
    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Starts an invocation issued by `sender`.
    pub fn sender(&mut self, sender: Address) -> Caller<'_> {
        Caller { host: self, sender, value: U256::ZERO }
    }

    /// Returns the proxy deployed at `address`.
    #[must_use]
    pub fn proxy(&self, address: Address) -> Option<&UpgradeableProxy> {
        self.proxies.get(&address)
    }

    /// Returns the registry deployed at `address`.
    #[must_use]
    pub fn registry(&self, address: Address) -> Option<&UpgradeManager> {
        self.registries.get(&address)
    }

    /// Returns the backend of the proxy at `proxy`.
    #[must_use]
    pub fn backend_of(&self, proxy: Address) -> Option<Address> {
        self.proxy(proxy).map(UpgradeableProxy::backend)
    }

    /// Returns the admin of the proxy at `proxy`.
    #[must_use]
    pub fn admin_of(&self, proxy: Address) -> Option<Address> {
        self.proxy(proxy).map(UpgradeableProxy::admin)
    }

    /// Returns the storage a backend wrote while being called at its own
    /// address.
    #[must_use]
    pub fn storage_at(&self, account: Address) -> Option<&Storage> {
        self.accounts.get(&account)
    }

    /// Returns true if backend code is deployed at `account`.
    #[must_use]
    pub fn has_code(&self, account: Address) -> bool {
        self.vm.has_code(account)
    }

    /// Every event emitted by committed invocations, oldest first.
    #[must_use]
    pub fn logs(&self) -> &[Log] {
        self.vm.logs()
    }

    /// Returns true if `emitter` emitted `event`.
    #[must_use]
    pub fn emitted<E: SolEvent>(&self, emitter: Address, event: &E) -> bool {
        let data = event.encode_log_data();
        self.vm
            .logs()
            .iter()
            .any(|log| log.address == emitter && log.data == data)
    }

    /// Returns the address of the next contract deployed by `deployer`.
    fn next_address(&mut self, deployer: Address) -> Address {
        let nonce = self.nonces.entry(deployer).or_default();
        let address = deployer.create(*nonce);
        *nonce += 1;
        address
    }
}

/// An invocation about to be issued by a fixed sender.
pub struct Caller<'a> {
    host: &'a mut Host,
    sender: Address,
    value: U256,
}

impl Caller<'_> {
    /// Attaches `value` to the invocation.
    #[must_use]
    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    fn context(&self, address: Address) -> CallContext {
        CallContext::new(self.sender, self.value, address, self.host.env)
    }

    /// Deploys `backend` and returns its address.
    ///
    /// # Errors
    ///
    /// * [`layout::Error`] - If the layout declared by `backend` is
    ///   malformed.
    pub fn deploy_backend<B: Backend + 'static>(
        self,
        backend: B,
    ) -> Result<Address, layout::Error> {
        backend.layout().validate()?;

        let address = self.host.next_address(self.sender);
        self.host.vm.install_code(address, Arc::new(backend));
        debug!(deployer = %self.sender, %address, "backend deployed");

        Ok(address)
    }

    /// Deploys a proxy installing `initial_backend`. The sender becomes its
    /// admin.
    ///
    /// # Errors
    ///
    /// * See [`UpgradeableProxy::constructor`].
    pub fn deploy_proxy(
        self,
        initial_backend: Address,
    ) -> Result<Address, proxy::Error> {
        let address = self.host.next_address(self.sender);
        let context = self.context(address);

        let mut instance = UpgradeableProxy::new(address);
        self.host.vm.transact(|vm| {
            instance.constructor(vm, &context, initial_backend)
        })?;
        self.host.proxies.insert(address, instance);
        debug!(deployer = %self.sender, %address, "proxy deployed");

        Ok(address)
    }

    /// Deploys a registry owned by the sender.
    ///
    /// # Errors
    ///
    /// * See [`UpgradeManager::constructor`].
    pub fn deploy_registry(self) -> Result<Address, registry::Error> {
        let address = self.host.next_address(self.sender);
        let context = self.context(address);

        let mut instance = UpgradeManager::new(address);
        self.host
            .vm
            .transact(|vm| instance.constructor(vm, &context, context.sender))?;
        self.host.registries.insert(address, instance);
        debug!(deployer = %self.sender, %address, "registry deployed");

        Ok(address)
    }

    /// Invokes `target` with raw `calldata`.
    ///
    /// Proxies intercept their reserved selectors and forward everything
    /// else. Registries decode their own ABI. A backend called at its own
    /// address runs against its own storage, not any proxy's. Accounts with
    /// no code accept the call and return nothing.
    ///
    /// # Errors
    ///
    /// * Revert data of the invocation.
    pub fn call(self, target: Address, calldata: &[u8]) -> CallResult {
        let context = self.context(target);
        let Host { vm, proxies, registries, accounts, .. } = &mut *self.host;
        trace!(sender = %context.sender, %target, len = calldata.len(), "call");

        if let Some(instance) = proxies.get_mut(&target) {
            return vm.transact(|vm| instance.dispatch(vm, &context, calldata));
        }

        if let Some(instance) = registries.get_mut(&target) {
            return vm.transact(|vm| {
                instance.dispatch(vm, proxies, &context, calldata)
            });
        }

        if let Some(code) = vm.code_at(target) {
            let storage = accounts.entry(target).or_default();
            let checkpoint = storage.checkpoint();
            let result = code.invoke(&context, calldata, storage);
            if result.is_ok() {
                storage.commit(checkpoint);
            } else {
                storage.revert_to(checkpoint);
            }
            return result;
        }

        Ok(Vec::new())
    }

    fn with_proxy<T>(
        self,
        target: Address,
        f: impl FnOnce(&mut UpgradeableProxy, &mut Vm, &CallContext) -> Result<T, proxy::Error>,
    ) -> Result<T, proxy::Error> {
        let context = self.context(target);
        let Host { vm, proxies, .. } = &mut *self.host;

        let instance = proxies.get_mut(&target).ok_or(
            proxy::Error::NotDeployed(ProxyNotDeployed { proxy: target }),
        )?;

        vm.transact(|vm| f(instance, vm, &context))
    }

    /// Forwards `calldata` to the backend of the proxy at `target`.
    ///
    /// # Errors
    ///
    /// * [`proxy::Error::NotDeployed`] - If there is no proxy at `target`.
    /// * See [`UpgradeableProxy::forward`].
    pub fn forward(
        self,
        target: Address,
        calldata: &[u8],
    ) -> Result<Vec<u8>, proxy::Error> {
        self.with_proxy(target, |instance, vm, context| {
            instance.forward(vm, context, calldata)
        })
    }

    /// Replaces the backend of the proxy at `target`.
    ///
    /// # Errors
    ///
    /// * [`proxy::Error::NotDeployed`] - If there is no proxy at `target`.
    /// * See [`UpgradeableProxy::swap_backend`].
    pub fn swap_backend(
        self,
        target: Address,
        new_backend: Address,
    ) -> Result<(), proxy::Error> {
        self.with_proxy(target, |instance, vm, context| {
            instance.swap_backend(vm, context, new_backend)
        })
    }

    /// Replaces the backend of the proxy at `target` and forwards `data` to
    /// it.
    ///
    /// # Errors
    ///
    /// * [`proxy::Error::NotDeployed`] - If there is no proxy at `target`.
    /// * See [`UpgradeableProxy::swap_backend_and_call`].
    pub fn swap_backend_and_call(
        self,
        target: Address,
        new_backend: Address,
        data: &[u8],
    ) -> Result<Vec<u8>, proxy::Error> {
        self.with_proxy(target, |instance, vm, context| {
            instance.swap_backend_and_call(vm, context, new_backend, data)
        })
    }

    /// Transfers the admin role of the proxy at `target`.
    ///
    /// # Errors
    ///
    /// * [`proxy::Error::NotDeployed`] - If there is no proxy at `target`.
    /// * See [`UpgradeableProxy::transfer_admin`].
    pub fn transfer_admin(
        self,
        target: Address,
        new_admin: Address,
    ) -> Result<(), proxy::Error> {
        self.with_proxy(target, |instance, vm, context| {
            instance.transfer_admin(vm, context, new_admin)
        })
    }

    fn with_registry<T>(
        self,
        target: Address,
        f: impl FnOnce(
            &mut UpgradeManager,
            &mut Vm,
            &mut ProxyTable,
            &CallContext,
        ) -> Result<T, registry::Error>,
    ) -> Result<T, registry::Error> {
        let context = self.context(target);
        let Host { vm, proxies, registries, .. } = &mut *self.host;

        let instance = registries.get_mut(&target).ok_or(
            registry::Error::NotDeployed(UpgradeManagerNotDeployed {
                registry: target,
            }),
        )?;

        vm.transact(|vm| f(instance, vm, proxies, &context))
    }

    /// Registers `instance` with the registry at `target`.
    ///
    /// # Errors
    ///
    /// * [`registry::Error::NotDeployed`] - If there is no registry at
    ///   `target`.
    /// * See [`UpgradeManager::register_proxy`].
    pub fn register_proxy(
        self,
        target: Address,
        instance: Address,
        admin: Address,
    ) -> Result<(), registry::Error> {
        self.with_registry(target, |registry, vm, proxies, context| {
            registry.register_proxy(vm, proxies, context, instance, admin)
        })
    }

    /// Removes `instance` from the registry at `target`.
    ///
    /// # Errors
    ///
    /// * [`registry::Error::NotDeployed`] - If there is no registry at
    ///   `target`.
    /// * See [`UpgradeManager::unregister_proxy`].
    pub fn unregister_proxy(
        self,
        target: Address,
        instance: Address,
    ) -> Result<(), registry::Error> {
        self.with_registry(target, |registry, vm, _, context| {
            registry.unregister_proxy(vm, context, instance)
        })
    }

    /// Upgrades `instance` through the registry at `target`.
    ///
    /// # Errors
    ///
    /// * [`registry::Error::NotDeployed`] - If there is no registry at
    ///   `target`.
    /// * See [`UpgradeManager::upgrade_proxy`].
    pub fn upgrade_proxy(
        self,
        target: Address,
        instance: Address,
        new_backend: Address,
    ) -> Result<(), registry::Error> {
        self.with_registry(target, |registry, vm, proxies, context| {
            registry.upgrade_proxy(vm, proxies, context, instance, new_backend)
        })
    }

    /// Transfers the admin role of `instance` through the registry at
    /// `target`.
    ///
    /// # Errors
    ///
    /// * [`registry::Error::NotDeployed`] - If there is no registry at
    ///   `target`.
    /// * See [`UpgradeManager::transfer_proxy_admin`].
    pub fn transfer_proxy_admin(
        self,
        target: Address,
        instance: Address,
        new_admin: Address,
    ) -> Result<(), registry::Error> {
        self.with_registry(target, |registry, vm, proxies, context| {
            registry.transfer_proxy_admin(
                vm, proxies, context, instance, new_admin,
            )
        })
    }

    /// Transfers ownership of the registry at `target`.
    ///
    /// # Errors
    ///
    /// * [`registry::Error::NotDeployed`] - If there is no registry at
    ///   `target`.
    /// * See [`UpgradeManager::transfer_ownership`].
    pub fn transfer_ownership(
        self,
        target: Address,
        new_owner: Address,
    ) -> Result<(), registry::Error> {
        self.with_registry(target, |registry, vm, _, context| {
            registry.transfer_ownership(vm, context, new_owner)
        })
    }
}
