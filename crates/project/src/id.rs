use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const RANDOM_SUFFIX_LEN: usize = 9;

/// Generates a process-unique identifier of the form `{prefix}_{unix-millis}_{random}`.
/// 產生 `{前綴}_{毫秒時間}_{隨機碼}` 格式的識別碼。
///
/// Persisted ids are kept verbatim on reload, so uniqueness only has to hold
/// for ids minted during the current process.
pub fn new_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{millis}_{}", &random[..RANDOM_SUFFIX_LEN])
}

/// Returns `candidate` unchanged when unused, otherwise `"{candidate} {n}"` for the
/// smallest positive `n` not present in `existing`.
/// 若名稱未被使用則原樣回傳，否則附加最小可用的正整數編號。
pub fn allocate_unique_name<S>(candidate: &str, existing: &HashSet<S>) -> String
where
    S: Borrow<str> + Hash + Eq,
{
    if !existing.contains(candidate) {
        return candidate.to_string();
    }
    (1u64..)
        .map(|n| format!("{candidate} {n}"))
        .find(|name| !existing.contains(name.as_str()))
        .unwrap_or_else(|| candidate.to_string())
}

/// Identifier of a project loaded into a session.
/// 工作階段中專案的識別碼。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new() -> Self {
        Self(new_id("proj"))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for ProjectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_carries_prefix_and_stays_unique() {
        let ids: HashSet<String> = (0..2_000).map(|_| new_id("node")).collect();
        assert_eq!(ids.len(), 2_000);
        assert!(ids.iter().all(|id| id.starts_with("node_")));
        let sample = ids.iter().next().unwrap();
        assert_eq!(sample.split('_').count(), 3);
    }

    #[test]
    fn unused_name_is_returned_verbatim() {
        let existing: HashSet<&str> = ["Sensor"].into_iter().collect();
        assert_eq!(allocate_unique_name("Actuator", &existing), "Actuator");
    }

    #[test]
    fn taken_name_gets_smallest_free_suffix() {
        let mut existing: HashSet<String> = HashSet::new();
        existing.insert("Untitled Project".to_string());
        assert_eq!(
            allocate_unique_name("Untitled Project", &existing),
            "Untitled Project 1"
        );

        existing.insert("Untitled Project 1".to_string());
        assert_eq!(
            allocate_unique_name("Untitled Project", &existing),
            "Untitled Project 2"
        );
    }

    #[test]
    fn gaps_in_numbering_are_filled_first() {
        let existing: HashSet<&str> = ["Bus", "Bus 1", "Bus 3"].into_iter().collect();
        assert_eq!(allocate_unique_name("Bus", &existing), "Bus 2");
    }

    #[test]
    fn project_id_displays_raw_value() {
        let id = ProjectId::from_string("p1");
        assert_eq!(id.to_string(), "p1");
        assert!(!id.is_empty());
        assert!(ProjectId::new().as_str().starts_with("proj_"));
    }
}
