//! Code table and event log shared by every contract of a [`Host`].
//!
//! [`Host`]: super::Host
use std::{collections::HashMap, sync::Arc};

use alloy_primitives::{Address, Log};
use alloy_sol_types::SolEvent;

use crate::proxy::Backend;

/// A position in the event log that can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct LogCheckpoint(usize);

/// Deployed backend code and emitted events.
#[derive(Default)]
pub struct Vm {
    code: HashMap<Address, Arc<dyn Backend>>,
    logs: Vec<Log>,
}

impl Vm {
    /// Returns true if backend code is deployed at `account`.
    #[must_use]
    pub fn has_code(&self, account: Address) -> bool {
        self.code.contains_key(&account)
    }

    /// Returns the backend deployed at `account`.
    #[must_use]
    pub fn code_at(&self, account: Address) -> Option<&dyn Backend> {
        self.code.get(&account).map(|code| &**code)
    }

    pub(crate) fn install_code(
        &mut self,
        account: Address,
        backend: Arc<dyn Backend>,
    ) {
        self.code.insert(account, backend);
    }

    /// Records `event` as emitted by `emitter`.
    pub fn log<E: SolEvent>(&mut self, emitter: Address, event: &E) {
        self.logs.push(Log { address: emitter, data: event.encode_log_data() });
    }

    /// Every event emitted so far, oldest first.
    #[must_use]
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Marks the current end of the event log.
    pub fn checkpoint(&self) -> LogCheckpoint {
        LogCheckpoint(self.logs.len())
    }

    /// Drops every event emitted since `checkpoint`.
    pub fn revert_to(&mut self, checkpoint: LogCheckpoint) {
        self.logs.truncate(checkpoint.0);
    }

    /// Runs `f` as one invocation: if it fails, every event it emitted is
    /// discarded.
    ///
    /// # Errors
    ///
    /// * Whatever `f` returns.
    pub fn transact<T, E>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E> {
        let checkpoint = self.checkpoint();
        let result = f(self);
        if result.is_err() {
            self.revert_to(checkpoint);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;

    use super::*;
    use crate::proxy::upgradeable::AdminChanged;

    const EMITTER: Address = Address::repeat_byte(0xe0);

    fn event(last_byte: u8) -> AdminChanged {
        AdminChanged {
            previous_admin: Address::ZERO,
            new_admin: Address::with_last_byte(last_byte),
        }
    }

    #[test]
    fn records_events_in_order() {
        let mut vm = Vm::default();

        vm.log(EMITTER, &event(1));
        vm.log(EMITTER, &event(2));

        assert_eq!(vm.logs().len(), 2);
        assert_eq!(vm.logs()[1].data, event(2).encode_log_data());
        assert!(vm.logs().iter().all(|log| log.address == EMITTER));
    }

    #[test]
    fn failed_transaction_discards_its_events() {
        let mut vm = Vm::default();
        vm.log(EMITTER, &event(1));

        let result: Result<(), ()> = vm.transact(|vm| {
            vm.log(EMITTER, &event(2));
            Err(())
        });

        assert!(result.is_err());
        assert_eq!(vm.logs().len(), 1);
    }

    #[test]
    fn successful_transaction_keeps_its_events() {
        let mut vm = Vm::default();

        let result: Result<u8, ()> = vm.transact(|vm| {
            vm.log(EMITTER, &event(1));
            Ok(7)
        });

        assert_eq!(result, Ok(7));
        assert_eq!(vm.logs().len(), 1);
    }

    #[test]
    fn reports_missing_code() {
        let vm = Vm::default();
        assert!(!vm.has_code(EMITTER));
        assert!(vm.code_at(EMITTER).is_none());
    }
}
