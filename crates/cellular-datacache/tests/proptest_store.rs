//! Property-based tests for the shared-state store.
//!
//! Any record that fits its slot reads back exactly as written; any record
//! that does not fit is rejected and leaves the previous value in place.

use cellular_datacache::cellular::{ApnConfig, CellularEntries, MAX_FIELD_LEN, NfmcInfo};
use cellular_datacache::{DataCache, DataCacheError, ServiceState};
use proptest::prelude::*;

fn rt_state() -> impl Strategy<Value = ServiceState> {
    prop_oneof![
        Just(ServiceState::Unavailable),
        Just(ServiceState::Off),
        Just(ServiceState::Run),
        Just(ServiceState::On),
        Just(ServiceState::Fail),
    ]
}

fn fitting_apn() -> impl Strategy<Value = ApnConfig> {
    (
        rt_state(),
        "[a-z0-9.]{0,32}",
        1u8..=9,
        "[a-z]{0,32}",
        "[a-zA-Z0-9]{0,32}",
    )
        .prop_map(|(rt_state, apn, cid, username, password)| ApnConfig {
            rt_state,
            apn,
            cid,
            username,
            password,
        })
}

proptest! {
    #[test]
    fn fitting_records_read_back_identically(value in fitting_apn()) {
        let cache = DataCache::new();
        let entries = CellularEntries::register(&cache).unwrap();
        cache.write(entries.apn_config, value.clone()).unwrap();
        prop_assert_eq!(cache.read(entries.apn_config).unwrap(), value);
    }

    #[test]
    fn nfmc_tempo_survives_write(tempo in proptest::array::uniform7(any::<u32>()), active in any::<bool>()) {
        let cache = DataCache::new();
        let entries = CellularEntries::register(&cache).unwrap();
        let value = NfmcInfo { rt_state: ServiceState::On, active, tempo };
        cache.write(entries.nfmc_info, value.clone()).unwrap();
        prop_assert_eq!(cache.read(entries.nfmc_info).unwrap(), value);
    }

    #[test]
    fn oversized_apn_is_rejected_without_side_effects(
        before in fitting_apn(),
        extra in 1usize..64,
    ) {
        let cache = DataCache::new();
        let entries = CellularEntries::register(&cache).unwrap();
        cache.write(entries.apn_config, before.clone()).unwrap();

        let mut oversized = before.clone();
        oversized.apn = "a".repeat(MAX_FIELD_LEN + extra);
        let err = cache.write(entries.apn_config, oversized).unwrap_err();
        let is_oversized = matches!(err, DataCacheError::Oversized { field: "apn", .. });
        prop_assert!(is_oversized);
        prop_assert_eq!(cache.read(entries.apn_config).unwrap(), before);
    }
}
