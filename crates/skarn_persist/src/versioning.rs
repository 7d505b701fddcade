use tracing::info;

pub const CURRENT_REGION_FORMAT_VERSION: u32 = 1;
pub const FORMAT_VERSION: u32 = CURRENT_REGION_FORMAT_VERSION;

/// Walks a region payload forward one format version at a time until it
/// reaches the current version. The payload stays bincode throughout; each
/// step re-encodes at the next version.
pub fn migrate_region_payload(mut version: u32, mut payload: Vec<u8>) -> Result<Vec<u8>, String> {
    if version == CURRENT_REGION_FORMAT_VERSION {
        return Ok(payload);
    }

    if version == 0 || version > CURRENT_REGION_FORMAT_VERSION {
        return Err(format!(
            "unsupported region format version {version}; current version is {CURRENT_REGION_FORMAT_VERSION}"
        ));
    }

    while version < CURRENT_REGION_FORMAT_VERSION {
        let next_version = version + 1;
        info!("Migrating region payload format v{version} -> v{next_version}");
        payload = migrate_one_version(version, payload)?;
        version = next_version;
    }

    Ok(payload)
}

fn migrate_one_version(version: u32, _payload: Vec<u8>) -> Result<Vec<u8>, String> {
    // No historical formats exist yet; the chain grows here when v2 lands.
    Err(format!(
        "missing migration path for region format v{version} -> v{}",
        version + 1
    ))
}

#[cfg(test)]
mod tests {
    use super::{migrate_region_payload, CURRENT_REGION_FORMAT_VERSION};

    #[test]
    fn current_version_passes_through_unchanged() {
        let payload = vec![1, 2, 3];
        let migrated = migrate_region_payload(CURRENT_REGION_FORMAT_VERSION, payload.clone())
            .expect("current version migrates trivially");
        assert_eq!(migrated, payload);
    }

    #[test]
    fn unknown_versions_are_errors() {
        assert!(migrate_region_payload(0, Vec::new()).is_err());
        assert!(migrate_region_payload(CURRENT_REGION_FORMAT_VERSION + 1, Vec::new()).is_err());
    }
}
