//! Upgradeable proxies.
//!
//! A proxy lives at a fixed address, owns its [`Storage`] and forwards every
//! call it does not recognise to a [`Backend`]. The backend executes against
//! the proxy's storage, so replacing it changes behavior without touching the
//! state accumulated so far.
//!
//! The success and return data of the forwarded call are returned back to the
//! caller of the proxy, and so is revert data, byte for byte.
use std::collections::BTreeMap;

use alloy_primitives::Address;

use crate::{
    host::CallContext,
    storage::{Storage, StorageLayout},
};

pub mod abi;
pub mod upgradeable;

pub use upgradeable::{Error, UpgradeableProxy};

/// Raw outcome of an invocation: return data on success, revert data on
/// failure.
pub type CallResult = Result<Vec<u8>, Vec<u8>>;

/// Every proxy deployed on a host, by address.
pub type ProxyTable = BTreeMap<Address, UpgradeableProxy>;

/// Logic installed behind one or more proxies.
///
/// A backend owns no state. Each invocation borrows the storage of the proxy
/// it was forwarded from for the duration of the call, and the proxy rolls
/// back every write if the backend fails.
///
/// The fields a backend reads and writes must match its declared
/// [`Backend::layout`]; proxies refuse to switch to a backend whose layout
/// conflicts with one installed before.
///
/// NOTE: A proxy takes no reentrancy lock around forwarded calls. Backends
/// are only handed the proxy's storage and cannot call back into the host,
/// so a call can only observe state committed by earlier invocations. A
/// backend that grows a way to issue external calls becomes responsible for
/// finishing its own bookkeeping before making them.
pub trait Backend: Send + Sync {
    /// Persistent fields this backend uses, in slot order.
    fn layout(&self) -> StorageLayout;

    /// Executes `calldata` against `storage`.
    ///
    /// # Arguments
    ///
    /// * `&self` - The backend's code.
    /// * `context` - The original caller, attached value and the proxy the
    ///   call executes on.
    /// * `calldata` - The raw payload the proxy received.
    /// * `storage` - Write access to the proxy's storage.
    ///
    /// # Errors
    ///
    /// * Revert data, passed back to the proxy's caller unchanged.
    fn invoke(
        &self,
        context: &CallContext,
        calldata: &[u8],
        storage: &mut Storage,
    ) -> CallResult;
}
