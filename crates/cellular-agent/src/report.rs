//! JSON rendering of record changes.

use cellular_datacache::cellular::CellularEntries;
use cellular_datacache::{DataCache, EntryId};

/// Renders the record behind `id` as one JSON line, tagged with its name.
/// Returns `None` for entries outside the cellular catalogue.
pub fn record_line(
    cache: &DataCache,
    entries: &CellularEntries,
    id: EntryId,
) -> anyhow::Result<Option<String>> {
    let (name, value) = if id == entries.cellular_info.id() {
        ("cellular_info", serde_json::to_value(cache.read(entries.cellular_info)?)?)
    } else if id == entries.sim_info.id() {
        ("sim_info", serde_json::to_value(cache.read(entries.sim_info)?)?)
    } else if id == entries.data_info.id() {
        ("data_info", serde_json::to_value(cache.read(entries.data_info)?)?)
    } else if id == entries.nifman_info.id() {
        ("nifman_info", serde_json::to_value(cache.read(entries.nifman_info)?)?)
    } else if id == entries.nfmc_info.id() {
        ("nfmc_info", serde_json::to_value(cache.read(entries.nfmc_info)?)?)
    } else if id == entries.apn_config.id() {
        let mut apn = cache.read(entries.apn_config)?;
        if !apn.password.is_empty() {
            apn.password = "***".into();
        }
        ("apn_config", serde_json::to_value(apn)?)
    } else if id == entries.target_state.id() {
        ("target_state", serde_json::to_value(cache.read(entries.target_state)?)?)
    } else if id == entries.power_config.id() {
        ("power_config", serde_json::to_value(cache.read(entries.power_config)?)?)
    } else {
        return Ok(None);
    };

    let line = serde_json::json!({ "record": name, "value": value });
    Ok(Some(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellular_datacache::ServiceState;
    use cellular_datacache::cellular::ApnConfig;

    #[test]
    fn password_is_masked() {
        let cache = DataCache::new();
        let entries = CellularEntries::register(&cache).unwrap();
        cache
            .write(
                entries.apn_config,
                ApnConfig {
                    rt_state: ServiceState::On,
                    apn: "corp".into(),
                    cid: 1,
                    username: "u".into(),
                    password: "hunter2".into(),
                },
            )
            .unwrap();

        let line = record_line(&cache, &entries, entries.apn_config.id())
            .unwrap()
            .unwrap();
        assert!(line.contains("\"record\":\"apn_config\""));
        assert!(line.contains("corp"));
        assert!(!line.contains("hunter2"));
    }

    #[test]
    fn config_record_not_reported() {
        let cache = DataCache::new();
        let entries = CellularEntries::register(&cache).unwrap();
        let line = record_line(&cache, &entries, entries.cellular_config.id()).unwrap();
        assert!(line.is_none());
    }
}
