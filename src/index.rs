use crate::model::{SessionRecord, PRINCIPAL_NAME_ATTRIBUTE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic lookup key for one indexed attribute value.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexKey(String);

impl IndexKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Index key for sessions owned by `principal`.
pub fn principal_index_key(principal: &str) -> IndexKey {
    IndexKey(hex_sha(&format!("pn:{principal}")))
}

/// Index key for sessions whose attribute `name` equals `value`.
///
/// The principal attribute maps to the same key as [`principal_index_key`].
pub fn attribute_index_key(name: &str, value: &Value) -> IndexKey {
    match (name, value) {
        (PRINCIPAL_NAME_ATTRIBUTE, Value::String(principal)) => principal_index_key(principal),
        _ => IndexKey(hex_sha(&format!("attr:{name}:{value}"))),
    }
}

/// All index keys a session should be findable under.
pub fn index_keys(session: &SessionRecord, indexable: &[String]) -> Vec<IndexKey> {
    let mut keys = Vec::new();
    if let Some(principal) = session.principal_name() {
        keys.push(principal_index_key(principal));
    }
    for name in indexable {
        if name == PRINCIPAL_NAME_ATTRIBUTE {
            continue;
        }
        if let Some(value) = session.get_attribute(name) {
            keys.push(attribute_index_key(name, value));
        }
    }
    keys
}

fn hex_sha(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordKind, SessionId};
    use serde_json::json;
    use time::OffsetDateTime;

    #[test]
    fn stable_hash() {
        assert_eq!(principal_index_key("alice"), principal_index_key("alice"));
        assert_ne!(principal_index_key("alice"), principal_index_key("bob"));
        assert_eq!(
            attribute_index_key("tenant", &json!("acme")),
            attribute_index_key("tenant", &json!("acme"))
        );
        assert_ne!(
            attribute_index_key("tenant", &json!("acme")),
            attribute_index_key("tenant", &json!(["acme"]))
        );
    }

    #[test]
    fn principal_attribute_shares_principal_key() {
        assert_eq!(
            attribute_index_key(PRINCIPAL_NAME_ATTRIBUTE, &json!("alice")),
            principal_index_key("alice")
        );
    }

    #[test]
    fn only_present_indexable_attributes_produce_keys() {
        let mut session =
            SessionRecord::create(SessionId::new(), OffsetDateTime::now_utc(), RecordKind::Session);
        session.set_principal_name(Some("alice")).expect("principal");
        session.set_attribute("tenant", json!("acme")).expect("tenant");
        let indexable = vec![
            "tenant".to_owned(),
            "missing".to_owned(),
            PRINCIPAL_NAME_ATTRIBUTE.to_owned(),
        ];
        let keys = index_keys(&session, &indexable);
        assert_eq!(
            keys,
            vec![
                principal_index_key("alice"),
                attribute_index_key("tenant", &json!("acme")),
            ]
        );
    }
}
