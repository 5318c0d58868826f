//! Per-field merge rules between remote and local `jsondata`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happens to a field that exists on both sides of a store.
///
/// The serde names are the wire/config spellings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverwritePolicy {
    /// Fields present locally overwrite remote; remote-only fields are
    /// kept.
    #[default]
    #[serde(rename = "true")]
    LocalWins,
    /// Fields present remotely are kept verbatim, even when empty;
    /// local-only fields are added.
    #[serde(rename = "false")]
    RemoteWins,
    /// Remote is kept unless the remote value is empty (`null`, `""`,
    /// `[]`, `{}`), in which case local fills it in.
    #[serde(rename = "only_empty")]
    FillEmpty,
    /// The merged result is exactly the local entity; remote-only
    /// fields are dropped.
    #[serde(rename = "replace_remote")]
    ReplaceRemote,
    /// The merged result is exactly the remote page; local is
    /// discarded.
    #[serde(rename = "keep_existing")]
    KeepExisting,
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Merge `local` into `remote` under the given policy. Non-object
/// inputs degrade to whole-value selection.
pub fn apply(remote: &Value, local: &Value, policy: OverwritePolicy) -> Value {
    match policy {
        OverwritePolicy::ReplaceRemote => return local.clone(),
        OverwritePolicy::KeepExisting => return remote.clone(),
        _ => {}
    }
    let (Value::Object(remote_map), Value::Object(local_map)) = (remote, local) else {
        return match policy {
            OverwritePolicy::LocalWins => local.clone(),
            OverwritePolicy::RemoteWins => remote.clone(),
            OverwritePolicy::FillEmpty if is_empty(remote) => local.clone(),
            _ => remote.clone(),
        };
    };

    let mut merged = remote_map.clone();
    for (key, local_value) in local_map {
        let take_local = match policy {
            OverwritePolicy::LocalWins => true,
            OverwritePolicy::RemoteWins => !remote_map.contains_key(key),
            OverwritePolicy::FillEmpty => {
                remote_map.get(key).map(is_empty).unwrap_or(true)
            }
            OverwritePolicy::ReplaceRemote | OverwritePolicy::KeepExisting => {
                unreachable!("handled above")
            }
        };
        if take_local {
            merged.insert(key.clone(), local_value.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote() -> Value {
        json!({
            "label": [{"text": "Remote", "lang": "en"}],
            "iri": "",
            "description": [],
            "remote_only": "kept"
        })
    }

    fn local() -> Value {
        json!({
            "label": [{"text": "Local", "lang": "en"}],
            "iri": "ex:Local",
            "description": [{"text": "d", "lang": "en"}],
            "local_only": 1
        })
    }

    #[test]
    fn local_wins_overwrites_but_keeps_remote_only() {
        let merged = apply(&remote(), &local(), OverwritePolicy::LocalWins);
        assert_eq!(merged["label"][0]["text"], "Local");
        assert_eq!(merged["iri"], "ex:Local");
        assert_eq!(merged["remote_only"], "kept");
        assert_eq!(merged["local_only"], 1);
    }

    #[test]
    fn remote_wins_keeps_empty_remote_fields() {
        let merged = apply(&remote(), &local(), OverwritePolicy::RemoteWins);
        assert_eq!(merged["label"][0]["text"], "Remote");
        assert_eq!(merged["iri"], "");
        assert_eq!(merged["description"], json!([]));
        assert_eq!(merged["local_only"], 1);
    }

    #[test]
    fn fill_empty_fills_only_empties() {
        let merged = apply(&remote(), &local(), OverwritePolicy::FillEmpty);
        assert_eq!(merged["label"][0]["text"], "Remote");
        assert_eq!(merged["iri"], "ex:Local");
        assert_eq!(merged["description"][0]["text"], "d");
        assert_eq!(merged["local_only"], 1);
    }

    #[test]
    fn replace_remote_ignores_remote() {
        let merged = apply(&remote(), &local(), OverwritePolicy::ReplaceRemote);
        assert_eq!(merged, local());
        let other = apply(&json!({"different": true}), &local(), OverwritePolicy::ReplaceRemote);
        assert_eq!(other, merged);
    }

    #[test]
    fn keep_existing_ignores_local() {
        let merged = apply(&remote(), &local(), OverwritePolicy::KeepExisting);
        assert_eq!(merged, remote());
    }

    #[test]
    fn identity_holds_for_every_policy() {
        let x = remote();
        for policy in [
            OverwritePolicy::LocalWins,
            OverwritePolicy::RemoteWins,
            OverwritePolicy::FillEmpty,
            OverwritePolicy::ReplaceRemote,
            OverwritePolicy::KeepExisting,
        ] {
            assert_eq!(apply(&x, &x, policy), x, "{policy:?}");
        }
    }

    #[test]
    fn wire_spellings_round_trip() {
        assert_eq!(
            serde_json::to_string(&OverwritePolicy::FillEmpty).unwrap(),
            "\"only_empty\""
        );
        let p: OverwritePolicy = serde_json::from_str("\"false\"").unwrap();
        assert_eq!(p, OverwritePolicy::RemoteWins);
    }
}
