/*!
# Upgradeable Proxy

Proxies with hot-swappable backends, and a registry to upgrade them in bulk.

A proxy lives at a fixed address and owns its storage. It handles a handful
of administrative calls itself and forwards every other call, byte for byte,
to its current backend, which executes against the proxy's storage. The proxy
admin can replace the backend at any time; the next call already reaches the
new one, and the state written so far stays in place.

Backends declare the fields they store as a [`StorageLayout`]. A proxy refuses
to switch to a backend whose layout conflicts with the layouts it ran before,
so a new version can append fields but never reinterpret existing ones.

## Usage

```
use alloy_primitives::Address;
use upgradeable_proxy::{
    host::{CallContext, Host},
    proxy::{Backend, CallResult},
    storage::{FieldType, Storage, StorageLayout},
};

struct Echo;

impl Backend for Echo {
    fn layout(&self) -> StorageLayout {
        StorageLayout::new(1).field("calls", FieldType::UINT256)
    }

    fn invoke(
        &self,
        _context: &CallContext,
        calldata: &[u8],
        _storage: &mut Storage,
    ) -> CallResult {
        Ok(calldata.to_vec())
    }
}

let mut host = Host::new();
let admin = Address::with_last_byte(1);

let backend = host.sender(admin).deploy_backend(Echo).unwrap();
let proxy = host.sender(admin).deploy_proxy(backend).unwrap();

let out = host.sender(admin).call(proxy, b"hello").unwrap();
assert_eq!(out, b"hello");
```

[`StorageLayout`]: storage::StorageLayout
*/

#![allow(clippy::pub_underscore_fields, clippy::module_name_repetitions)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod access;
pub mod host;
pub mod proxy;
pub mod registry;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;
