//! Content-addressed identifiers for cross-referenced resources.

use std::collections::BTreeMap;

use sha2::{Digest, Sha512};

use crate::spec::AlertSpec;
use crate::{ClientError, ClientResult};

/// Hex length of an identifier (SHA-512).
pub const ID_LEN: usize = 128;

/// Lowercase hex SHA-512 of `content`.
pub fn identify(content: &[u8]) -> String {
    hex::encode(Sha512::digest(content))
}

/// Map every action referenced by `alert` to its identifier, keyed by the
/// action name as written in the spec.
pub fn action_ids(alert: &AlertSpec) -> ClientResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for action in &alert.actions {
        if action.is_empty() {
            return Err(ClientError::Precondition(format!(
                "alert {} in view {} references an action with an empty name",
                alert.name, alert.view_name
            )));
        }
        out.insert(action.clone(), identify(action.as_bytes()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alert(actions: &[&str]) -> AlertSpec {
        AlertSpec {
            name: "a".into(),
            view_name: "v".into(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn known_vector() {
        // sha512("abc")
        assert_eq!(
            identify(b"abc"),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn mapping_keys_are_the_referenced_actions() {
        let ids = action_ids(&alert(&["slack", "pager"])).unwrap();
        assert_eq!(ids.keys().cloned().collect::<Vec<_>>(), vec!["pager".to_string(), "slack".to_string()]);
        assert_eq!(ids["slack"], identify(b"slack"));
    }

    #[test]
    fn empty_action_name_is_a_precondition_failure() {
        let err = action_ids(&alert(&["ok", ""])).unwrap_err();
        assert!(err.is_precondition());
    }

    proptest! {
        #[test]
        fn identify_is_deterministic_and_fixed_width(content in proptest::collection::vec(any::<u8>(), 0..256)) {
            let a = identify(&content);
            prop_assert_eq!(a.len(), ID_LEN);
            prop_assert!(a.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
            prop_assert_eq!(a, identify(&content));
        }

        #[test]
        fn distinct_content_distinct_ids(a in "[a-z]{1,16}", b in "[a-z]{1,16}") {
            prop_assume!(a != b);
            prop_assert_ne!(identify(a.as_bytes()), identify(b.as_bytes()));
        }
    }
}
