use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// A stored reference to a piece of media.
///
/// New data always stores a [`MediaRef::Asset`] id. Rows persisted before
/// cache assets existed hold a raw storage key; those are carried as
/// [`MediaRef::LegacyKey`] and resolved directly against object storage.
/// Call sites that know what they hold should construct the variant
/// explicitly; [`MediaRef::parse`] sniffing is only for untyped legacy
/// strings coming out of old rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaRef {
    Asset(Uuid),
    LegacyKey(String),
}

impl MediaRef {
    /// Classify an untyped persisted string. Empty and whitespace-only
    /// strings carry no reference at all and return `None`.
    pub fn parse(raw: &str) -> Option<MediaRef> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match Uuid::parse_str(raw) {
            Ok(id) => Some(MediaRef::Asset(id)),
            Err(_) => Some(MediaRef::LegacyKey(raw.to_string())),
        }
    }

    pub fn asset_id(&self) -> Option<Uuid> {
        match self {
            MediaRef::Asset(id) => Some(*id),
            MediaRef::LegacyKey(_) => None,
        }
    }
}

impl From<Uuid> for MediaRef {
    fn from(id: Uuid) -> Self {
        MediaRef::Asset(id)
    }
}

impl Display for MediaRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaRef::Asset(id) => write!(f, "{}", id),
            MediaRef::LegacyKey(key) => write!(f, "{}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uuid_as_asset() {
        let id = Uuid::new_v4();
        assert_eq!(MediaRef::parse(&id.to_string()), Some(MediaRef::Asset(id)));
    }

    #[test]
    fn parse_non_uuid_as_legacy_key() {
        assert_eq!(
            MediaRef::parse("media/2021/avatar-17.png"),
            Some(MediaRef::LegacyKey("media/2021/avatar-17.png".to_string()))
        );
    }

    #[test]
    fn parse_empty_is_none() {
        assert_eq!(MediaRef::parse(""), None);
        assert_eq!(MediaRef::parse("   "), None);
    }

    #[test]
    fn display_matches_persisted_form() {
        let id = Uuid::new_v4();
        assert_eq!(MediaRef::Asset(id).to_string(), id.to_string());
        assert_eq!(
            MediaRef::LegacyKey("a/b.jpg".to_string()).to_string(),
            "a/b.jpg"
        );
    }
}
