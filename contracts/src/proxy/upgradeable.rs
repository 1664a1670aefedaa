//! A proxy whose backend can be swapped by its admin.
//!
//! The backend and admin references are part of the proxy's own state, not of
//! the [`Storage`] handed to backends, so only the admin operations below can
//! change them.
use alloy_primitives::Address;
use alloy_sol_types::{SolCall, SolError, SolValue};
pub use sol::*;
use tracing::{debug, trace};

use crate::{
    host::{CallContext, Vm},
    proxy::{
        abi::{self, IUpgradeableProxy},
        CallResult,
    },
    storage::{layout, Storage, StorageLayout},
};

#[cfg_attr(coverage_nightly, coverage(off))]
mod sol {
    use alloy_sol_macro::sol;

    sol! {
        /// Emitted when the backend behind a proxy is installed or replaced.
        ///
        /// * `previous_backend` - Backend before the change, zero on
        ///   construction.
        /// * `new_backend` - Backend after the change.
        #[derive(Debug)]
        #[allow(missing_docs)]
        event BackendInstalled(address indexed previous_backend, address indexed new_backend);

        /// Emitted when the admin account has changed.
        ///
        /// * `previous_admin` - Admin before the change.
        /// * `new_admin` - Admin after the change.
        #[derive(Debug)]
        #[allow(missing_docs)]
        event AdminChanged(address indexed previous_admin, address indexed new_admin);
    }

    sol! {
        /// The `backend` is the zero address or has no code.
        ///
        /// * `backend` - Address of the invalid backend.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error ProxyInvalidBackend(address backend);

        /// The `admin` is not a valid admin account (eg. [`Address::ZERO`]).
        ///
        /// * `admin` - Account that's not allowed to become the admin.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error ProxyInvalidAdmin(address admin);

        /// The caller account is not the admin of the proxy.
        ///
        /// * `account` - Account that was found to not be authorized.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error ProxyUnauthorizedAccount(address account);

        /// A call was forwarded while no backend is installed.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error ProxyBackendUnset();

        /// The swap would install the backend that is already installed.
        ///
        /// * `backend` - The current backend.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error ProxyNoOpSwap(address backend);

        /// An administrative operation received value it cannot use.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error ProxyNonPayable();

        /// There is no proxy deployed at `proxy`.
        ///
        /// * `proxy` - Address that was called.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error ProxyNotDeployed(address proxy);
    }
}

/// An [`UpgradeableProxy`] error.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The backend is the zero address or has no code.
    InvalidBackend(ProxyInvalidBackend),
    /// The admin is not a valid admin account.
    InvalidAdmin(ProxyInvalidAdmin),
    /// The caller account is not the admin of the proxy.
    UnauthorizedAccount(ProxyUnauthorizedAccount),
    /// A call was forwarded while no backend is installed.
    BackendUnset(ProxyBackendUnset),
    /// The swap would install the backend that is already installed.
    NoOpSwap(ProxyNoOpSwap),
    /// An administrative operation received value it cannot use.
    NonPayable(ProxyNonPayable),
    /// There is no proxy deployed at the called address.
    NotDeployed(ProxyNotDeployed),
    /// The new backend's layout conflicts with storage already written.
    StorageLayout(layout::Error),
    /// The backend reverted. Holds its revert data verbatim.
    ForwardedCallReverted(Vec<u8>),
}

impl From<layout::Error> for Error {
    fn from(value: layout::Error) -> Self {
        Error::StorageLayout(value)
    }
}

impl From<Error> for Vec<u8> {
    fn from(value: Error) -> Self {
        match value {
            Error::InvalidBackend(e) => e.abi_encode(),
            Error::InvalidAdmin(e) => e.abi_encode(),
            Error::UnauthorizedAccount(e) => e.abi_encode(),
            Error::BackendUnset(e) => e.abi_encode(),
            Error::NoOpSwap(e) => e.abi_encode(),
            Error::NonPayable(e) => e.abi_encode(),
            Error::NotDeployed(e) => e.abi_encode(),
            Error::StorageLayout(e) => e.into(),
            Error::ForwardedCallReverted(data) => data,
        }
    }
}

/// State of an [`UpgradeableProxy`].
#[derive(Debug, Clone, Default)]
pub struct UpgradeableProxy {
    address: Address,
    backend: Address,
    admin: Address,
    /// Slots owned by the backends.
    storage: Storage,
    /// Layout covering every slot written by any backend installed so far.
    layout: StorageLayout,
}

impl UpgradeableProxy {
    /// Creates the state of a proxy living at `address`. Nothing is installed
    /// until [`UpgradeableProxy::constructor`] runs.
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self { address, ..Self::default() }
    }

    /// Constructor.
    ///
    /// Installs `initial_backend` and makes the deployer the admin.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the proxy's state.
    /// * `vm` - Deployed code and event log.
    /// * `context` - Context of the deployment.
    /// * `initial_backend` - The first backend.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidBackend`] - If `initial_backend` is the zero address
    ///   or has no code.
    /// * [`Error::StorageLayout`] - If the backend declares a malformed
    ///   layout.
    ///
    /// # Events
    ///
    /// * [`BackendInstalled`].
    pub fn constructor(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        initial_backend: Address,
    ) -> Result<(), Error> {
        let layout = Self::layout_of(vm, initial_backend)?;
        layout.validate()?;

        self.admin = context.sender;
        self._set_backend(vm, initial_backend, layout);

        Ok(())
    }

    /// Address of the proxy.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the current backend.
    #[must_use]
    pub fn backend(&self) -> Address {
        self.backend
    }

    /// Returns the current admin.
    #[must_use]
    pub fn admin(&self) -> Address {
        self.admin
    }

    /// Read access to the proxy's storage.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Layout covering every slot written by the backends installed so far.
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Replaces the backend. The next forwarded call already reaches
    /// `new_backend`.
    ///
    /// Installing the backend that is already installed is rejected.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the proxy's state.
    /// * `vm` - Deployed code and event log.
    /// * `context` - Context of the invocation.
    /// * `new_backend` - The backend to install.
    ///
    /// # Errors
    ///
    /// * [`Error::UnauthorizedAccount`] - If the sender is not the admin.
    /// * [`Error::NonPayable`] - If value is attached.
    /// * [`Error::InvalidBackend`] - If `new_backend` is the zero address or
    ///   has no code.
    /// * [`Error::NoOpSwap`] - If `new_backend` is the current backend.
    /// * [`Error::StorageLayout`] - If the layout of `new_backend` conflicts
    ///   with a layout installed before.
    ///
    /// # Events
    ///
    /// * [`BackendInstalled`].
    pub fn swap_backend(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        new_backend: Address,
    ) -> Result<(), Error> {
        self.only_admin(context)?;
        Self::check_non_payable(context)?;
        self._swap_backend(vm, context, new_backend)
    }

    /// Replaces the backend, then forwards `data` to it in the same
    /// invocation. If the call reverts the swap is undone.
    ///
    /// Attached value is only accepted together with `data`, where it reaches
    /// the new backend.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the proxy's state.
    /// * `vm` - Deployed code and event log.
    /// * `context` - Context of the invocation.
    /// * `new_backend` - The backend to install.
    /// * `data` - Call to forward once the backend is installed.
    ///
    /// # Errors
    ///
    /// * [`Error::NonPayable`] - If value is attached and `data` is empty.
    /// * Every error of [`UpgradeableProxy::swap_backend`] and
    ///   [`UpgradeableProxy::forward`].
    ///
    /// # Events
    ///
    /// * [`BackendInstalled`].
    pub fn swap_backend_and_call(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        new_backend: Address,
        data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if data.is_empty() {
            self.swap_backend(vm, context, new_backend)?;
            return Ok(Vec::new());
        }

        let checkpoint = self.storage.checkpoint();
        let logs = vm.checkpoint();
        let layout = self.layout.clone();
        let backend = self.backend;

        let result = self
            ._swap_backend(vm, context, new_backend)
            .and_then(|()| self.forward(vm, context, data));

        if result.is_ok() {
            self.storage.commit(checkpoint);
        } else {
            self.storage.revert_to(checkpoint);
            vm.revert_to(logs);
            self.layout = layout;
            self.backend = backend;
        }

        result
    }

    /// Transfers the admin role to `new_admin`.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the proxy's state.
    /// * `vm` - Deployed code and event log.
    /// * `context` - Context of the invocation.
    /// * `new_admin` - The next admin of the proxy.
    ///
    /// # Errors
    ///
    /// * [`Error::UnauthorizedAccount`] - If the sender is not the admin.
    /// * [`Error::NonPayable`] - If value is attached.
    /// * [`Error::InvalidAdmin`] - If `new_admin` is the zero address.
    ///
    /// # Events
    ///
    /// * [`AdminChanged`].
    pub fn transfer_admin(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        new_admin: Address,
    ) -> Result<(), Error> {
        self.only_admin(context)?;
        Self::check_non_payable(context)?;

        if new_admin.is_zero() {
            return Err(Error::InvalidAdmin(ProxyInvalidAdmin {
                admin: new_admin,
            }));
        }

        let previous_admin = self.admin();
        self.admin = new_admin;
        vm.log(self.address, &AdminChanged { previous_admin, new_admin });
        debug!(proxy = %self.address, %previous_admin, %new_admin, "admin changed");

        Ok(())
    }

    /// Forwards `calldata` to the current backend, executing it against this
    /// proxy's storage. The backend is looked up on every call.
    ///
    /// The backend observes the original sender and value. Its return data
    /// is passed back unchanged; if it reverts, its writes are rolled back
    /// and its revert data is passed back unchanged.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the proxy's state.
    /// * `vm` - Deployed code.
    /// * `context` - Context of the invocation.
    /// * `calldata` - The raw payload to forward.
    ///
    /// # Errors
    ///
    /// * [`Error::BackendUnset`] - If no backend is installed.
    /// * [`Error::InvalidBackend`] - If the backend has no code.
    /// * [`Error::ForwardedCallReverted`] - If the backend reverts.
    pub fn forward(
        &mut self,
        vm: &Vm,
        context: &CallContext,
        calldata: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let backend = self.backend();
        if backend.is_zero() {
            return Err(Error::BackendUnset(ProxyBackendUnset {}));
        }

        let Some(code) = vm.code_at(backend) else {
            return Err(Error::InvalidBackend(ProxyInvalidBackend { backend }));
        };

        trace!(proxy = %self.address, %backend, len = calldata.len(), "forwarding call");

        let checkpoint = self.storage.checkpoint();
        match code.invoke(context, calldata, &mut self.storage) {
            Ok(output) => {
                self.storage.commit(checkpoint);
                Ok(output)
            }
            Err(revert) => {
                self.storage.revert_to(checkpoint);
                Err(Error::ForwardedCallReverted(revert))
            }
        }
    }

    /// Handles a raw invocation of the proxy.
    ///
    /// Payloads starting with one of the [reserved
    /// selectors](abi::RESERVED_SELECTORS) run the matching administrative
    /// operation; everything else is [forwarded](UpgradeableProxy::forward).
    /// A reserved selector with malformed arguments reverts with empty data.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the proxy's state.
    /// * `vm` - Deployed code and event log.
    /// * `context` - Context of the invocation.
    /// * `calldata` - The raw payload.
    ///
    /// # Errors
    ///
    /// * Revert data of the failed operation.
    pub fn dispatch(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        calldata: &[u8],
    ) -> CallResult {
        let Some(selector) = abi::selector(calldata).filter(|s| abi::is_reserved(*s))
        else {
            return Ok(self.forward(vm, context, calldata)?);
        };

        match selector {
            abi::SWAP_BACKEND => {
                let call = decode::<IUpgradeableProxy::swapBackendCall>(calldata)?;
                self.swap_backend(vm, context, call.new_backend)?;
                Ok(Vec::new())
            }
            abi::SWAP_BACKEND_AND_CALL => {
                let call =
                    decode::<IUpgradeableProxy::swapBackendAndCallCall>(calldata)?;
                let output = self.swap_backend_and_call(
                    vm,
                    context,
                    call.new_backend,
                    &call.data,
                )?;
                Ok(alloy_primitives::Bytes::from(output).abi_encode())
            }
            abi::TRANSFER_ADMIN => {
                let call = decode::<IUpgradeableProxy::transferAdminCall>(calldata)?;
                self.transfer_admin(vm, context, call.new_admin)?;
                Ok(Vec::new())
            }
            abi::GET_BACKEND => Ok(self.backend().abi_encode()),
            abi::GET_ADMIN => Ok(self.admin().abi_encode()),
            _ => Err(Vec::new()),
        }
    }
}

impl UpgradeableProxy {
    /// Checks if the sender of `context` is the admin.
    ///
    /// # Errors
    ///
    /// * [`Error::UnauthorizedAccount`] - If called by any account other than
    ///   the admin.
    fn only_admin(&self, context: &CallContext) -> Result<(), Error> {
        let account = context.sender;
        if self.admin() != account {
            return Err(Error::UnauthorizedAccount(ProxyUnauthorizedAccount {
                account,
            }));
        }

        Ok(())
    }

    /// Reverts if value is attached to the invocation.
    ///
    /// # Errors
    ///
    /// * [`Error::NonPayable`] - If [`CallContext::value`] is not zero.
    fn check_non_payable(context: &CallContext) -> Result<(), Error> {
        if context.value.is_zero() {
            Ok(())
        } else {
            Err(Error::NonPayable(ProxyNonPayable {}))
        }
    }

    /// Returns the layout declared by the backend at `backend`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidBackend`] - If `backend` is the zero address or has
    ///   no code.
    fn layout_of(vm: &Vm, backend: Address) -> Result<StorageLayout, Error> {
        if backend.is_zero() {
            return Err(Error::InvalidBackend(ProxyInvalidBackend { backend }));
        }

        vm.code_at(backend)
            .map(|code| code.layout())
            .ok_or(Error::InvalidBackend(ProxyInvalidBackend { backend }))
    }

    fn _swap_backend(
        &mut self,
        vm: &mut Vm,
        context: &CallContext,
        new_backend: Address,
    ) -> Result<(), Error> {
        self.only_admin(context)?;

        let layout = Self::layout_of(vm, new_backend)?;

        let current = self.backend();
        if new_backend == current {
            return Err(Error::NoOpSwap(ProxyNoOpSwap { backend: current }));
        }

        self.layout.check_upgrade(&layout)?;
        let layout = self.layout.merge(&layout);
        self._set_backend(vm, new_backend, layout);

        Ok(())
    }

    /// Stores `new_backend` and records `layout` as the installed layout.
    /// Internal function without access restriction.
    fn _set_backend(
        &mut self,
        vm: &mut Vm,
        new_backend: Address,
        layout: StorageLayout,
    ) {
        let previous_backend = self.backend();
        self.backend = new_backend;
        self.layout = layout;

        vm.log(
            self.address,
            &BackendInstalled { previous_backend, new_backend },
        );
        debug!(proxy = %self.address, %previous_backend, %new_backend, "backend installed");
    }
}

/// Decodes a reserved call, reverting with empty data if the arguments are
/// malformed.
fn decode<C: SolCall>(calldata: &[u8]) -> Result<C, Vec<u8>> {
    C::abi_decode(calldata).map_err(|_| Vec::new())
}
