//! Invocation context handed to every contract and backend.
use alloy_primitives::{Address, U256};

/// Block Timestamp - Epoch timestamp: 1st January 2025 `00::00::00`.
const BLOCK_TIMESTAMP: u64 = 1_735_689_600;
/// Arbitrum's CHAIN ID.
const CHAIN_ID: u64 = 42161;

/// Block-level values observable by invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    /// Chain identifier.
    pub chain_id: u64,
    /// Number of the block being executed.
    pub block_number: u64,
    /// Unix timestamp of the block being executed.
    pub block_timestamp: u64,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            chain_id: CHAIN_ID,
            block_number: 1,
            block_timestamp: BLOCK_TIMESTAMP,
        }
    }
}

/// Identity and value context of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// Account that issued the invocation.
    pub sender: Address,
    /// Value attached to the invocation.
    pub value: U256,
    /// Account whose storage the invocation executes against. For calls a
    /// proxy forwards this is the proxy, never the backend.
    pub address: Address,
    /// Block the invocation executes in.
    pub block: Environment,
}

impl CallContext {
    /// Creates the context of a call from `sender` to `address`.
    #[must_use]
    pub fn new(
        sender: Address,
        value: U256,
        address: Address,
        block: Environment,
    ) -> Self {
        Self { sender, value, address, block }
    }

    /// Returns the context of a call the current contract makes to `target`.
    ///
    /// The current contract becomes the sender and no value is attached.
    #[must_use]
    pub fn call_to(&self, target: Address) -> Self {
        Self {
            sender: self.address,
            value: U256::ZERO,
            address: target,
            block: self.block,
        }
    }
}
