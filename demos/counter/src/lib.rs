//! Versioned counter backends for an upgradeable proxy.
//!
//! [`CounterV1`] keeps a single count. [`CounterV2`] appends the last caller
//! and a per-account call tally, and adds `incrementBy` and `decrement`.
//! [`OwnedCounter`] prepends an owner field, which moves the count to another
//! slot: proxies that ran either counter refuse to switch to it.
#![allow(clippy::module_name_repetitions)]
use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolError, SolInterface, SolValue};
use tracing::trace;
use upgradeable_proxy::{
    host::CallContext,
    proxy::{Backend, CallResult},
    storage::{FieldType, Storage, StorageLayout},
};

pub use sol::*;

mod sol {
    #![allow(missing_docs)]
    #![cfg_attr(coverage_nightly, coverage(off))]

    use alloy_sol_macro::sol;

    sol! {
        /// Calls understood by the counter backends.
        interface ICounter {
            function increment() external;
            function incrementBy(uint256 amount) external;
            function decrement() external;
            function count() external view returns (uint256 count);
            function lastCaller() external view returns (address caller);
            function callsBy(address account) external view returns (uint256 calls);
        }

        /// The count would drop below zero.
        #[derive(Debug, PartialEq, Eq)]
        error CounterUnderflow();

        /// The count would exceed `uint256`.
        #[derive(Debug, PartialEq, Eq)]
        error CounterOverflow();

        /// This backend version does not implement `selector`.
        #[derive(Debug, PartialEq, Eq)]
        error UnsupportedCall(bytes4 selector);
    }
}

/// Slot of `count`.
pub const COUNT_SLOT: U256 = U256::ZERO;
/// Slot of `last_caller`, used from version 2 on.
pub const LAST_CALLER_SLOT: U256 = U256::from_limbs([1, 0, 0, 0]);
/// Base slot of the `calls_by` mapping, used from version 2 on.
pub const CALLS_BY_SLOT: U256 = U256::from_limbs([2, 0, 0, 0]);

/// JSON descriptor of [`CounterV2`]'s layout.
pub const COUNTER_V2_LAYOUT: &str = include_str!("../layouts/counter-v2.json");

/// Decodes `calldata`, reverting with [`UnsupportedCall`] if it is not an
/// [`ICounter`] call.
fn decode(calldata: &[u8]) -> Result<ICounter::ICounterCalls, Vec<u8>> {
    ICounter::ICounterCalls::abi_decode(calldata).map_err(|_| unsupported(calldata))
}

fn unsupported(calldata: &[u8]) -> Vec<u8> {
    let mut selector = [0u8; 4];
    let len = calldata.len().min(4);
    selector[..len].copy_from_slice(&calldata[..len]);
    UnsupportedCall { selector: selector.into() }.abi_encode()
}

fn add(count: U256, amount: U256) -> Result<U256, Vec<u8>> {
    count.checked_add(amount).ok_or_else(|| CounterOverflow {}.abi_encode())
}

/// First version: `count: uint256`, only counts up by one.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterV1;

impl Backend for CounterV1 {
    fn layout(&self) -> StorageLayout {
        StorageLayout::new(1).field("count", FieldType::UINT256)
    }

    fn invoke(
        &self,
        context: &CallContext,
        calldata: &[u8],
        storage: &mut Storage,
    ) -> CallResult {
        trace!(proxy = %context.address, "counter v1");
        let count: U256 = storage.get(COUNT_SLOT);

        match decode(calldata)? {
            ICounter::ICounterCalls::increment(_) => {
                storage.set(COUNT_SLOT, add(count, U256::from(1))?);
                Ok(Vec::new())
            }
            ICounter::ICounterCalls::count(_) => Ok(count.abi_encode()),
            _ => Err(unsupported(calldata)),
        }
    }
}

/// Second version: appends `last_caller: address` and
/// `calls_by: mapping(address => uint256)`.
#[derive(Debug, Clone)]
pub struct CounterV2 {
    layout: StorageLayout,
}

impl Default for CounterV2 {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterV2 {
    /// Creates the backend with its built-in layout.
    #[must_use]
    pub fn new() -> Self {
        let layout = StorageLayout::new(2)
            .field("count", FieldType::UINT256)
            .field("last_caller", FieldType::Address)
            .field(
                "calls_by",
                FieldType::mapping(FieldType::Address, FieldType::UINT256),
            );
        Self { layout }
    }

    /// Creates the backend declaring the layout described by `json`.
    ///
    /// # Errors
    ///
    /// * [`serde_json::Error`] - If `json` is not a valid layout.
    pub fn from_descriptor(json: &str) -> Result<Self, serde_json::Error> {
        StorageLayout::from_json(json).map(|layout| Self { layout })
    }

    fn record_call(storage: &mut Storage, caller: Address) -> Result<(), Vec<u8>> {
        let slot = Storage::mapping_slot(CALLS_BY_SLOT, caller);
        let calls: U256 = storage.get(slot);
        storage.set(slot, add(calls, U256::from(1))?);
        storage.set(LAST_CALLER_SLOT, caller);
        Ok(())
    }
}

impl Backend for CounterV2 {
    fn layout(&self) -> StorageLayout {
        self.layout.clone()
    }

    fn invoke(
        &self,
        context: &CallContext,
        calldata: &[u8],
        storage: &mut Storage,
    ) -> CallResult {
        trace!(proxy = %context.address, "counter v2");
        let count: U256 = storage.get(COUNT_SLOT);

        match decode(calldata)? {
            ICounter::ICounterCalls::increment(_) => {
                storage.set(COUNT_SLOT, add(count, U256::from(1))?);
                Self::record_call(storage, context.sender)?;
                Ok(Vec::new())
            }
            ICounter::ICounterCalls::incrementBy(call) => {
                storage.set(COUNT_SLOT, add(count, call.amount)?);
                Self::record_call(storage, context.sender)?;
                Ok(Vec::new())
            }
            ICounter::ICounterCalls::decrement(_) => {
                let next = count
                    .checked_sub(U256::from(1))
                    .ok_or_else(|| CounterUnderflow {}.abi_encode())?;
                storage.set(COUNT_SLOT, next);
                Self::record_call(storage, context.sender)?;
                Ok(Vec::new())
            }
            ICounter::ICounterCalls::count(_) => Ok(count.abi_encode()),
            ICounter::ICounterCalls::lastCaller(_) => {
                Ok(storage.get::<Address>(LAST_CALLER_SLOT).abi_encode())
            }
            ICounter::ICounterCalls::callsBy(call) => {
                let slot = Storage::mapping_slot(CALLS_BY_SLOT, call.account);
                Ok(storage.get::<U256>(slot).abi_encode())
            }
        }
    }
}

/// A rewrite that stores an owner before the count. Its layout conflicts
/// with [`CounterV1`] and [`CounterV2`] at slot zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnedCounter;

impl Backend for OwnedCounter {
    fn layout(&self) -> StorageLayout {
        StorageLayout::new(3)
            .field("owner", FieldType::Address)
            .field("count", FieldType::UINT256)
    }

    fn invoke(
        &self,
        context: &CallContext,
        calldata: &[u8],
        storage: &mut Storage,
    ) -> CallResult {
        let count_slot = U256::from(1);
        let count: U256 = storage.get(count_slot);

        match decode(calldata)? {
            ICounter::ICounterCalls::increment(_) => {
                storage.set(U256::ZERO, context.sender);
                storage.set(count_slot, add(count, U256::from(1))?);
                Ok(Vec::new())
            }
            ICounter::ICounterCalls::count(_) => Ok(count.abi_encode()),
            _ => Err(unsupported(calldata)),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};
    use alloy_sol_types::{SolCall, SolError, SolValue};
    use upgradeable_proxy::host::{CallContext, Environment};

    use super::*;

    fn context(sender: Address) -> CallContext {
        CallContext::new(
            sender,
            U256::ZERO,
            Address::repeat_byte(0x99),
            Environment::default(),
        )
    }

    #[test]
    fn descriptor_matches_built_in_layout() {
        let backend = CounterV2::from_descriptor(COUNTER_V2_LAYOUT)
            .expect("descriptor should parse");
        assert_eq!(backend.layout(), CounterV2::new().layout());
    }

    #[test]
    fn v1_rejects_calls_it_does_not_implement() {
        let mut storage = Storage::new();
        let alice = Address::with_last_byte(1);

        let calldata = ICounter::decrementCall {}.abi_encode();
        let err = CounterV1
            .invoke(&context(alice), &calldata, &mut storage)
            .unwrap_err();

        assert_eq!(
            err,
            UnsupportedCall { selector: ICounter::decrementCall::SELECTOR.into() }
                .abi_encode()
        );
    }

    #[test]
    fn v2_tracks_callers() {
        let mut storage = Storage::new();
        let alice = Address::with_last_byte(1);
        let bob = Address::with_last_byte(2);

        let increment = ICounter::incrementCall {}.abi_encode();
        CounterV2::new().invoke(&context(alice), &increment, &mut storage).unwrap();
        CounterV2::new().invoke(&context(alice), &increment, &mut storage).unwrap();
        CounterV2::new().invoke(&context(bob), &increment, &mut storage).unwrap();

        let calls = CounterV2::new()
            .invoke(
                &context(bob),
                &ICounter::callsByCall { account: alice }.abi_encode(),
                &mut storage,
            )
            .unwrap();
        assert_eq!(calls, U256::from(2).abi_encode());
        assert_eq!(storage.get::<Address>(LAST_CALLER_SLOT), bob);
    }

    #[test]
    fn v2_decrement_underflows_at_zero() {
        let mut storage = Storage::new();

        let err = CounterV2::new()
            .invoke(
                &context(Address::with_last_byte(1)),
                &ICounter::decrementCall {}.abi_encode(),
                &mut storage,
            )
            .unwrap_err();

        assert_eq!(err, CounterUnderflow {}.abi_encode());
    }

    #[test]
    fn v2_increment_by_overflows_at_max() {
        let mut storage = Storage::new();
        storage.set(COUNT_SLOT, U256::MAX);

        let err = CounterV2::new()
            .invoke(
                &context(Address::with_last_byte(1)),
                &ICounter::incrementByCall { amount: U256::from(1) }.abi_encode(),
                &mut storage,
            )
            .unwrap_err();

        assert_eq!(err, CounterOverflow {}.abi_encode());
    }

    #[test]
    fn garbage_calldata_is_unsupported() {
        let mut storage = Storage::new();

        let err = CounterV2::new()
            .invoke(&context(Address::with_last_byte(1)), &[0xab], &mut storage)
            .unwrap_err();

        assert_eq!(
            err,
            UnsupportedCall { selector: [0xab, 0, 0, 0].into() }.abi_encode()
        );
    }
}
