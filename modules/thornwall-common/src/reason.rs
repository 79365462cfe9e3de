//! Reason maps and confidence aggregation.
//!
//! A subject carries at most one [`Reason`] per reason type. Analyzers only
//! ever append through the shared map; the subject's overall confidence is an
//! aggregate recomputed whenever the map changes.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Clamp a value to `[0, 1]`.
pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Round to two decimal places, the precision stored for confidence scores.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Marker for enums usable as reason-map keys.
pub trait ReasonKind:
    Copy + Ord + Eq + Hash + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Relative weight of this reason type in the subject-level aggregate.
    /// Analyzers already scale their own confidence, so types weigh equally.
    fn weight(&self) -> f64 {
        1.0
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UserReasonType {
    Profile,
    Friend,
    Group,
    Outfit,
    Condo,
}

impl UserReasonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Friend => "friend",
            Self::Group => "group",
            Self::Outfit => "outfit",
            Self::Condo => "condo",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "profile" => Some(Self::Profile),
            "friend" => Some(Self::Friend),
            "group" => Some(Self::Group),
            "outfit" => Some(Self::Outfit),
            "condo" => Some(Self::Condo),
            _ => None,
        }
    }
}

impl fmt::Display for UserReasonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReasonKind for UserReasonType {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GroupReasonType {
    Member,
    Description,
    Owner,
    Purge,
}

impl GroupReasonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Description => "description",
            Self::Owner => "owner",
            Self::Purge => "purge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "member" => Some(Self::Member),
            "description" => Some(Self::Description),
            "owner" => Some(Self::Owner),
            "purge" => Some(Self::Purge),
            _ => None,
        }
    }
}

impl fmt::Display for GroupReasonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReasonKind for GroupReasonType {}

/// One typed explanation for flagging a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub message: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl Reason {
    pub fn new(message: impl Into<String>, confidence: f64) -> Self {
        Self {
            message: message.into(),
            confidence: confidence.clamp(0.01, 1.0),
            evidence: Vec::new(),
        }
    }

    /// Attach evidence lines. Entries are trimmed; empty lines are dropped.
    pub fn with_evidence(mut self, evidence: impl IntoIterator<Item = String>) -> Self {
        self.evidence = evidence
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        self
    }
}

/// Mapping from reason type to reason. At most one entry per type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent, bound = "T: ReasonKind")]
pub struct Reasons<T: ReasonKind>(BTreeMap<T, Reason>);

impl<T: ReasonKind> Default for Reasons<T> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<T: ReasonKind> Reasons<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite the reason for a type.
    pub fn add(&mut self, kind: T, reason: Reason) {
        self.0.insert(kind, reason);
    }

    pub fn get(&self, kind: T) -> Option<&Reason> {
        self.0.get(&kind)
    }

    pub fn remove(&mut self, kind: T) -> Option<Reason> {
        self.0.remove(&kind)
    }

    pub fn contains(&self, kind: T) -> bool {
        self.0.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, T, Reason> {
        self.0.iter()
    }

    pub fn types(&self) -> Vec<T> {
        self.0.keys().copied().collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.values().map(|r| r.message.clone()).collect()
    }

    /// Merge freshly produced reasons into this map. Incoming types overwrite
    /// existing entries of the same type; other existing types are preserved.
    pub fn merge_from(&mut self, incoming: Reasons<T>) {
        for (kind, reason) in incoming.0 {
            self.0.insert(kind, reason);
        }
    }

    /// Subject-level confidence: weighted sum over all reasons, clamped to
    /// `[0, 1]` and rounded to two decimals.
    pub fn aggregate_confidence(&self) -> f64 {
        let sum: f64 = self
            .0
            .iter()
            .map(|(kind, reason)| kind.weight() * reason.confidence)
            .sum();
        round2(clamp01(sum))
    }
}

impl<T: ReasonKind> IntoIterator for Reasons<T> {
    type Item = (T, Reason);
    type IntoIter = btree_map::IntoIter<T, Reason>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T: ReasonKind> FromIterator<(T, Reason)> for Reasons<T> {
    fn from_iter<I: IntoIterator<Item = (T, Reason)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_clamps_and_rounds() {
        let mut reasons = Reasons::new();
        reasons.add(UserReasonType::Profile, Reason::new("profile text", 0.731));
        assert_eq!(reasons.aggregate_confidence(), 0.73);

        reasons.add(UserReasonType::Outfit, Reason::new("outfit themes", 0.9));
        assert_eq!(reasons.aggregate_confidence(), 1.0);
    }

    #[test]
    fn empty_map_aggregates_to_zero() {
        let reasons: Reasons<UserReasonType> = Reasons::new();
        assert_eq!(reasons.aggregate_confidence(), 0.0);
    }

    #[test]
    fn merge_overwrites_same_type_and_keeps_others() {
        let mut existing = Reasons::new();
        existing.add(UserReasonType::Friend, Reason::new("old friend reason", 0.5));
        existing.add(UserReasonType::Condo, Reason::new("condo match", 1.0));

        let mut incoming = Reasons::new();
        incoming.add(UserReasonType::Friend, Reason::new("new friend reason", 0.8));

        existing.merge_from(incoming);
        assert_eq!(existing.len(), 2);
        assert_eq!(
            existing.get(UserReasonType::Friend).unwrap().message,
            "new friend reason"
        );
        assert!(existing.contains(UserReasonType::Condo));
    }

    #[test]
    fn evidence_is_trimmed_and_non_empty() {
        let reason = Reason::new("msg", 0.5).with_evidence(vec![
            "  padded  ".to_string(),
            String::new(),
            "   ".to_string(),
            "kept".to_string(),
        ]);
        assert_eq!(reason.evidence, vec!["padded".to_string(), "kept".to_string()]);
    }

    #[test]
    fn confidence_floor_is_applied() {
        let reason = Reason::new("msg", 0.0);
        assert_eq!(reason.confidence, 0.01);
    }

    #[test]
    fn reasons_round_trip_as_json() {
        let mut reasons = Reasons::new();
        reasons.add(
            UserReasonType::Group,
            Reason::new("member of groups", 0.6).with_evidence(vec!["group a".to_string()]),
        );
        let json = serde_json::to_string(&reasons).unwrap();
        let back: Reasons<UserReasonType> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reasons);
    }
}
