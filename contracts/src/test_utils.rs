//! Unit-testing utilities: a counter backend and a deployed proxy fixture.
use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolError, SolInterface, SolValue};

pub(crate) use crate::host::Host;
use crate::{
    host::CallContext,
    proxy::{Backend, CallResult},
    storage::{FieldType, Storage, StorageLayout},
};

mod interface {
    #![allow(missing_docs)]

    use alloy_sol_macro::sol;

    sol! {
        interface ICounter {
            function increment() external;
            function count() external view returns (uint256);
            function whoami() external payable returns (address, uint256, address);
            function fail() external;
            function getAdmin() external view returns (address);

            error CounterFailed(uint256 reason);
        }
    }
}

pub(crate) use interface::ICounter;

/// Counts calls in slot zero. Versions differ by their step and layout.
pub(crate) struct Counter {
    step: u64,
    layout: StorageLayout,
}

impl Counter {
    /// Layout `[count: uint256]`, counts by one.
    pub(crate) fn v1() -> Self {
        Self::with_layout(StorageLayout::new(1).field("count", FieldType::UINT256))
    }

    /// Appends `last_caller: address`, counts by two.
    pub(crate) fn v2() -> Self {
        Self {
            step: 2,
            layout: StorageLayout::new(2)
                .field("count", FieldType::UINT256)
                .field("last_caller", FieldType::Address),
        }
    }

    /// Counts by one and declares `layout`.
    pub(crate) fn with_layout(layout: StorageLayout) -> Self {
        Self { step: 1, layout }
    }
}

impl Backend for Counter {
    fn layout(&self) -> StorageLayout {
        self.layout.clone()
    }

    fn invoke(
        &self,
        context: &CallContext,
        calldata: &[u8],
        storage: &mut Storage,
    ) -> CallResult {
        if calldata.is_empty() {
            return Ok(b"fallback".to_vec());
        }

        let call = ICounter::ICounterCalls::abi_decode(calldata)
            .map_err(|_| Vec::new())?;

        let count: U256 = storage.get(U256::ZERO);
        match call {
            ICounter::ICounterCalls::increment(_) => {
                storage.set(U256::ZERO, count + U256::from(self.step));
                if self.layout.len() > 1 {
                    storage.set(U256::from(1), context.sender);
                }
                Ok(Vec::new())
            }
            ICounter::ICounterCalls::count(_) => Ok(count.abi_encode()),
            ICounter::ICounterCalls::whoami(_) => {
                Ok((context.sender, context.value, context.address)
                    .abi_encode_params())
            }
            ICounter::ICounterCalls::fail(_) => {
                storage.set(U256::ZERO, count + U256::from(100));
                Err(ICounter::CounterFailed { reason: U256::from(42) }.abi_encode())
            }
            ICounter::ICounterCalls::getAdmin(_) => Ok(Address::ZERO.abi_encode()),
        }
    }
}

/// A host with two counter versions deployed and a proxy on the first one.
pub(crate) struct Rig {
    pub(crate) host: Host,
    /// Deployer of everything, admin of `proxy`.
    pub(crate) owner: Address,
    pub(crate) alice: Address,
    pub(crate) v1: Address,
    pub(crate) v2: Address,
    pub(crate) proxy: Address,
}

impl Rig {
    pub(crate) fn new() -> Self {
        let mut host = Host::new();
        let owner = Address::with_last_byte(0x01);
        let alice = Address::with_last_byte(0xa1);

        let v1 = host.sender(owner).deploy_backend(Counter::v1()).unwrap();
        let v2 = host.sender(owner).deploy_backend(Counter::v2()).unwrap();
        let proxy = host.sender(owner).deploy_proxy(v1).unwrap();

        Self { host, owner, alice, v1, v2, proxy }
    }
}
