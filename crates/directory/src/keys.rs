//! Per-partition key layout.
//!
//! | Key | Value |
//! |-----|-------|
//! | `seq/profile` | last allocated profile id, decimal |
//! | `profiles/{id:020}` | JSON [`Profile`](crate::Profile) |
//! | `idx/external/{external_id}` | profile id; kept after soft delete |
//! | `idx/email/{email}` | profile id; only while not deleted |
//! | `tokens/{purpose}/by-token/{token}` | JSON [`TokenRecord`](crate::TokenRecord) |
//! | `tokens/{purpose}/by-profile/{id:020}` | current token value |
//!
//! Profile ids are zero-padded so a prefix scan over `profiles/` returns
//! rows in id order.

use crate::model::{ProfileId, TokenPurpose};

pub(crate) const PROFILE_SEQ_KEY: &str = "seq/profile";
pub(crate) const PROFILES_PREFIX: &str = "profiles/";

const EMAIL_INDEX_PREFIX: &str = "idx/email/";
const EXTERNAL_INDEX_PREFIX: &str = "idx/external/";

pub(crate) fn profile(id: ProfileId) -> Vec<u8> {
    format!("{PROFILES_PREFIX}{:020}", id.0).into_bytes()
}

pub(crate) fn email_index(email: &str) -> Vec<u8> {
    format!("{EMAIL_INDEX_PREFIX}{email}").into_bytes()
}

pub(crate) fn external_index(external_id: &str) -> Vec<u8> {
    format!("{EXTERNAL_INDEX_PREFIX}{external_id}").into_bytes()
}

pub(crate) fn token(purpose: TokenPurpose, token: &str) -> Vec<u8> {
    format!("tokens/{purpose}/by-token/{token}").into_bytes()
}

pub(crate) fn token_owner(purpose: TokenPurpose, id: ProfileId) -> Vec<u8> {
    format!("tokens/{purpose}/by-profile/{:020}", id.0).into_bytes()
}

/// Which unique field a conflicting key guards, if it is an index key.
///
/// Token rows are not index keys here: a token value is checked for
/// existence before it is written, so a commit conflict on a token row is
/// a concurrent refresh or consume and is retried.
pub(crate) fn unique_field(key: &str) -> Option<(&'static str, &str)> {
    if let Some(email) = key.strip_prefix(EMAIL_INDEX_PREFIX) {
        return Some(("email", email));
    }
    if let Some(external_id) = key.strip_prefix(EXTERNAL_INDEX_PREFIX) {
        return Some(("external_id", external_id));
    }
    None
}

/// Encodes a profile id as stored in index entries.
pub(crate) fn encode_id(id: ProfileId) -> Vec<u8> {
    id.0.to_string().into_bytes()
}

/// Decodes a profile id stored by [`encode_id`].
pub(crate) fn decode_id(bytes: &[u8]) -> Option<ProfileId> {
    std::str::from_utf8(bytes).ok()?.parse::<i64>().ok().map(ProfileId)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn layout_is_stable() {
        assert_eq!(profile(ProfileId(42)), b"profiles/00000000000000000042".to_vec());
        assert_eq!(email_index("a@x.com"), b"idx/email/a@x.com".to_vec());
        assert_eq!(external_index("u-1"), b"idx/external/u-1".to_vec());
        assert_eq!(
            token(TokenPurpose::RestorePassword, "abc"),
            b"tokens/restore-password/by-token/abc".to_vec()
        );
        assert_eq!(
            token_owner(TokenPurpose::Registration, ProfileId(7)),
            b"tokens/registration/by-profile/00000000000000000007".to_vec()
        );
    }

    #[test]
    fn unique_field_classifies_index_keys() {
        assert_eq!(unique_field("idx/email/a@x.com"), Some(("email", "a@x.com")));
        assert_eq!(unique_field("idx/external/u-1"), Some(("external_id", "u-1")));
        assert_eq!(unique_field("tokens/registration/by-token/t1"), None);
        assert_eq!(unique_field("profiles/00000000000000000001"), None);
        assert_eq!(unique_field("tokens/registration/by-profile/00000000000000000001"), None);
        assert_eq!(unique_field(PROFILE_SEQ_KEY), None);
    }

    proptest! {
        #[test]
        fn profile_keys_sort_by_id(a in 0i64..i64::MAX, b in 0i64..i64::MAX) {
            prop_assert_eq!(a.cmp(&b), profile(ProfileId(a)).cmp(&profile(ProfileId(b))));
        }

        #[test]
        fn id_encoding_round_trips(id in any::<i64>()) {
            prop_assert_eq!(decode_id(&encode_id(ProfileId(id))), Some(ProfileId(id)));
        }
    }
}
