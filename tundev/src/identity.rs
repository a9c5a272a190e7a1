//! Stable identity derivation for vendor-managed adapters.
//!
//! A Wintun adapter is identified by a GUID rather than by its name. The
//! mapping from a requested device name to that GUID must be stable, so
//! that opening the same name after a restart reattaches to the same
//! adapter instead of creating a new one.

use uuid::Uuid;

/// Maps a requested device name to an adapter GUID.
///
/// A parseable GUID literal (including the braced form) is used verbatim.
/// Any other non-empty name derives a version-5 UUID over the nil
/// namespace, so equal names always map to equal identities. An empty name
/// yields a fresh random identity.
pub fn adapter_guid(name: &str) -> Uuid {
    if let Ok(guid) = Uuid::try_parse(name) {
        return guid;
    }

    if !name.is_empty() {
        return Uuid::new_v5(&Uuid::nil(), name.as_bytes());
    }

    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_derives_same_identity() {
        assert_eq!(adapter_guid("tundev0"), adapter_guid("tundev0"));
    }

    #[test]
    fn different_names_derive_different_identities() {
        assert_ne!(adapter_guid("tundev0"), adapter_guid("tundev1"));
    }

    #[test]
    fn derived_identity_is_version_5() {
        assert_eq!(adapter_guid("tundev0").get_version_num(), 5);
    }

    #[test]
    fn guid_literal_is_used_verbatim() {
        let guid = Uuid::new_v4();

        assert_eq!(adapter_guid(&guid.to_string()), guid);
        assert_eq!(adapter_guid(&format!("{{{guid}}}")), guid);
    }

    #[test]
    fn empty_name_is_random() {
        assert_ne!(adapter_guid(""), adapter_guid(""));
        assert_eq!(adapter_guid("").get_version_num(), 4);
    }
}
