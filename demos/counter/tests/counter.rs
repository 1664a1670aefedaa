use alloy_primitives::{
    private::proptest::{prop_assert_eq, proptest},
    Address, U256,
};
use alloy_sol_types::{SolCall, SolError, SolValue};
use counter_example::{
    CounterUnderflow, CounterV1, CounterV2, ICounter, OwnedCounter,
    UnsupportedCall, COUNT_SLOT, LAST_CALLER_SLOT,
};
use upgradeable_proxy::{
    host::Host,
    proxy::{
        self,
        abi::IUpgradeableProxy,
        upgradeable::{BackendInstalled, ProxyUnauthorizedAccount},
    },
    registry::{self, ProxyUpgraded, UpgradeManagerUnauthorizedAccount},
    storage::layout,
};

const OWNER: Address = Address::repeat_byte(0x0a);
const ALICE: Address = Address::repeat_byte(0xa1);
const MALLORY: Address = Address::repeat_byte(0x66);
const REGISTRY_OWNER: Address = Address::repeat_byte(0x0e);

struct Deployment {
    host: Host,
    b1: Address,
    b2: Address,
    proxy: Address,
}

fn deploy() -> Deployment {
    let _ = tracing_subscriber::fmt::try_init();

    let mut host = Host::new();
    let b1 = host.sender(OWNER).deploy_backend(CounterV1).unwrap();
    let b2 = host.sender(OWNER).deploy_backend(CounterV2::new()).unwrap();
    let proxy = host.sender(OWNER).deploy_proxy(b1).unwrap();

    Deployment { host, b1, b2, proxy }
}

fn count(host: &mut Host, proxy: Address) -> U256 {
    let out = host
        .sender(ALICE)
        .call(proxy, &ICounter::countCall {}.abi_encode())
        .expect("should read count");
    U256::abi_decode(&out).expect("should decode count")
}

fn send(host: &mut Host, from: Address, proxy: Address, call: impl SolCall) {
    host.sender(from).call(proxy, &call.abi_encode()).expect("call should succeed");
}

// ============================================================================
// Integration Tests: Proxy
// ============================================================================

#[test]
fn counts_across_an_upgrade() {
    let Deployment { mut host, b1, b2, proxy } = deploy();

    for _ in 0..3 {
        send(&mut host, ALICE, proxy, ICounter::incrementCall {});
    }
    assert_eq!(count(&mut host, proxy), U256::from(3));

    host.sender(OWNER).swap_backend(proxy, b2).expect("should swap");
    assert!(host.emitted(
        proxy,
        &BackendInstalled { previous_backend: b1, new_backend: b2 }
    ));

    send(&mut host, ALICE, proxy, ICounter::incrementByCall { amount: U256::from(5) });
    assert_eq!(count(&mut host, proxy), U256::from(8));

    send(&mut host, ALICE, proxy, ICounter::decrementCall {});
    assert_eq!(count(&mut host, proxy), U256::from(7));

    assert_eq!(host.backend_of(proxy), Some(b2));
}

#[test]
fn first_call_after_swap_reaches_new_backend() {
    let Deployment { mut host, b2, proxy, .. } = deploy();
    let call = ICounter::incrementByCall { amount: U256::from(2) }.abi_encode();

    let err = host.sender(ALICE).call(proxy, &call).unwrap_err();
    assert_eq!(
        err,
        UnsupportedCall { selector: ICounter::incrementByCall::SELECTOR.into() }
            .abi_encode()
    );

    host.sender(OWNER).swap_backend(proxy, b2).expect("should swap");

    host.sender(ALICE).call(proxy, &call).expect("v2 should accept the call");
    let state = host.proxy(proxy).expect("proxy exists").storage();
    assert_eq!(state.get::<U256>(COUNT_SLOT), U256::from(2));
    assert_eq!(state.get::<Address>(LAST_CALLER_SLOT), ALICE);
}

#[test]
fn relays_backend_revert_data_unchanged() {
    let Deployment { mut host, b2, proxy, .. } = deploy();
    host.sender(OWNER).swap_backend(proxy, b2).expect("should swap");

    let err = host
        .sender(ALICE)
        .call(proxy, &ICounter::decrementCall {}.abi_encode())
        .unwrap_err();

    assert_eq!(err, CounterUnderflow {}.abi_encode());
    assert_eq!(count(&mut host, proxy), U256::ZERO);
}

#[test]
fn non_admin_cannot_swap_through_raw_call() {
    let Deployment { mut host, b1, b2, proxy } = deploy();

    let call = IUpgradeableProxy::swapBackendCall { new_backend: b2 };
    let err = host.sender(MALLORY).call(proxy, &call.abi_encode()).unwrap_err();

    assert_eq!(err, ProxyUnauthorizedAccount { account: MALLORY }.abi_encode());
    assert_eq!(host.backend_of(proxy), Some(b1));
    assert_eq!(host.admin_of(proxy), Some(OWNER));
}

#[test]
fn rejects_backend_with_conflicting_layout() {
    let Deployment { mut host, b1, proxy, .. } = deploy();
    send(&mut host, ALICE, proxy, ICounter::incrementCall {});
    let owned = host.sender(OWNER).deploy_backend(OwnedCounter).unwrap();

    let err = host.sender(OWNER).swap_backend(proxy, owned).unwrap_err();

    assert!(matches!(
        err,
        proxy::Error::StorageLayout(layout::Error::FieldChanged(_))
    ));
    assert_eq!(host.backend_of(proxy), Some(b1));
    assert_eq!(count(&mut host, proxy), U256::from(1));
}

#[test]
fn rolls_back_to_previous_version() {
    let Deployment { mut host, b1, b2, proxy } = deploy();
    host.sender(OWNER).swap_backend(proxy, b2).expect("should swap");
    send(&mut host, ALICE, proxy, ICounter::incrementByCall { amount: U256::from(4) });

    host.sender(OWNER).swap_backend(proxy, b1).expect("should roll back");
    send(&mut host, ALICE, proxy, ICounter::incrementCall {});

    assert_eq!(count(&mut host, proxy), U256::from(5));
    // v1 never touches the fields v2 appended.
    let state = host.proxy(proxy).expect("proxy exists").storage();
    assert_eq!(state.get::<Address>(LAST_CALLER_SLOT), ALICE);
}

#[test]
fn preserves_state_across_swaps() {
    proptest!(|(increments in 0u8..16)| {
        let Deployment { mut host, b2, proxy, .. } = deploy();

        for _ in 0..increments {
            send(&mut host, ALICE, proxy, ICounter::incrementCall {});
        }
        let before = host.proxy(proxy).expect("proxy exists").storage().clone();

        host.sender(OWNER).swap_backend(proxy, b2).expect("should swap");

        let after = host.proxy(proxy).expect("proxy exists").storage();
        prop_assert_eq!(after.get::<U256>(COUNT_SLOT), U256::from(increments));
        prop_assert_eq!(
            before.get::<U256>(COUNT_SLOT),
            after.get::<U256>(COUNT_SLOT)
        );
    });
}

// ============================================================================
// Integration Tests: Registry
// ============================================================================

#[test]
fn registry_mediates_upgrades() {
    let Deployment { mut host, b1, b2, proxy } = deploy();
    let registry = host.sender(REGISTRY_OWNER).deploy_registry().unwrap();
    host.sender(OWNER).transfer_admin(proxy, registry).expect("should hand over");
    host.sender(REGISTRY_OWNER)
        .register_proxy(registry, proxy, ALICE)
        .expect("should register");

    host.sender(ALICE)
        .upgrade_proxy(registry, proxy, b2)
        .expect("registry admin should upgrade");
    assert_eq!(host.backend_of(proxy), Some(b2));
    assert!(host.emitted(
        registry,
        &ProxyUpgraded { proxy, previous_backend: b1, new_backend: b2 }
    ));

    let b3 = host.sender(OWNER).deploy_backend(CounterV2::new()).unwrap();
    let err =
        host.sender(MALLORY).upgrade_proxy(registry, proxy, b3).unwrap_err();

    assert!(matches!(
        err,
        registry::Error::UnauthorizedAccount(UpgradeManagerUnauthorizedAccount { account })
            if account == MALLORY
    ));
    assert_eq!(host.backend_of(proxy), Some(b2));
}
