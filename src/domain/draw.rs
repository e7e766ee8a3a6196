//! Random draw requests and per-session draw state.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::domain::types::NodeId;

/// How many identifiers a draw may return.
///
/// `Limited(0)` means "nothing" and never reaches the store; `Unlimited` omits
/// the row limit entirely and returns every matching node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawCount {
    Limited(u32),
    Unlimited,
}

impl DrawCount {
    /// Interprets a signed amount the way template authors pass it: negative
    /// values request every matching node.
    pub fn from_signed(amount: i64) -> Self {
        if amount < 0 {
            Self::Unlimited
        } else {
            Self::Limited(u32::try_from(amount).unwrap_or(u32::MAX))
        }
    }

    /// Running budget used by quota arithmetic.
    pub fn budget(self) -> i64 {
        match self {
            Self::Limited(count) => i64::from(count),
            Self::Unlimited => i64::MAX,
        }
    }

    pub fn limit(self) -> Option<u64> {
        match self {
            Self::Limited(count) => Some(u64::from(count)),
            Self::Unlimited => None,
        }
    }
}

impl fmt::Display for DrawCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(count) => write!(f, "{count}"),
            Self::Unlimited => f.write_str("all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quota {
    Exact(u32),
    /// Shares whatever budget is left after the exact quotas.
    RemainingShare,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleQuota {
    pub bundle: String,
    pub quota: Quota,
}

impl BundleQuota {
    pub fn exact(bundle: impl Into<String>, count: u32) -> Self {
        Self {
            bundle: bundle.into(),
            quota: Quota::Exact(count),
        }
    }

    pub fn share(bundle: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            quota: Quota::RemainingShare,
        }
    }
}

/// Which bundles a draw selects from, in caller order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleSelection {
    #[default]
    Any,
    /// Restrict to these bundles without per-bundle counts.
    Only(Vec<String>),
    Quotas(Vec<BundleQuota>),
}

impl BundleSelection {
    pub fn only<I, S>(bundles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bundles: Vec<String> = bundles.into_iter().map(Into::into).collect();
        if bundles.is_empty() {
            Self::Any
        } else {
            Self::Only(bundles)
        }
    }

    pub fn quotas(entries: Vec<BundleQuota>) -> Self {
        if entries.is_empty() {
            Self::Any
        } else {
            Self::Quotas(entries)
        }
    }

    pub fn is_quota_based(&self) -> bool {
        matches!(self, Self::Quotas(_))
    }

    fn write_fingerprint(&self, out: &mut String) {
        match self {
            Self::Any => out.push('*'),
            Self::Only(bundles) => out.push_str(&bundles.join(",")),
            Self::Quotas(entries) => {
                for (index, entry) in entries.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    match entry.quota {
                        Quota::Exact(count) => {
                            let _ = write!(out, "{}={count}", entry.bundle);
                        }
                        Quota::RemainingShare => {
                            let _ = write!(out, "{}=~", entry.bundle);
                        }
                    }
                }
            }
        }
    }
}

/// Scalar a node property must equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Property equality filters keyed by node property name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyFilters(BTreeMap<String, FilterValue>);

impl PropertyFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: impl Into<String>, value: FilterValue) -> Self {
        self.insert(property, value);
        self
    }

    pub fn insert(&mut self, property: impl Into<String>, value: FilterValue) {
        self.0.insert(property.into(), value);
    }

    pub fn get(&self, property: &str) -> Option<&FilterValue> {
        self.0.get(property)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Fills in `defaults` for every property the caller left unset.
    pub fn with_defaults(mut self, defaults: &PropertyFilters) -> Self {
        for (property, value) in &defaults.0 {
            self.0
                .entry(property.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

impl FromIterator<(String, FilterValue)> for PropertyFilters {
    fn from_iter<T: IntoIterator<Item = (String, FilterValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Immutable description of one random draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRequest {
    pub count: DrawCount,
    pub bundles: BundleSelection,
    pub filters: PropertyFilters,
}

impl DrawRequest {
    pub fn new(count: DrawCount) -> Self {
        Self {
            count,
            bundles: BundleSelection::Any,
            filters: PropertyFilters::default(),
        }
    }

    pub fn limited(count: u32) -> Self {
        Self::new(DrawCount::Limited(count))
    }

    pub fn with_bundles(mut self, bundles: BundleSelection) -> Self {
        self.bundles = bundles;
        self
    }

    pub fn with_filters(mut self, filters: PropertyFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Stable textual form of every parameter that affects the draw.
    ///
    /// Meant to be folded into cache partition keys; the result cache itself
    /// never looks at request contents.
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "count={};bundles=", self.count);
        self.bundles.write_fingerprint(&mut out);
        out.push_str(";filters=");
        for (index, (property, value)) in self.filters.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            let _ = write!(out, "{property}={value}");
        }
        out
    }
}

/// Identifiers already drawn in one session. Only ever grows.
#[derive(Debug, Clone, Default)]
pub struct DrawnIdSet {
    order: Vec<NodeId>,
    seen: HashSet<NodeId>,
}

impl DrawnIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.seen.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Records `id`; returns false when it was already drawn.
    pub fn insert(&mut self, id: NodeId) -> bool {
        if self.seen.insert(id) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    /// Records `ids`, skipping ones already present. Returns how many were new.
    pub fn extend<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = NodeId>,
    {
        ids.into_iter().filter(|id| self.insert(*id)).count()
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.order
    }
}

/// Outcome of one sampling pass, in draw order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampledRecordSet {
    pub ids: Vec<NodeId>,
    /// Access tags the query layer applied; they become cache contexts.
    pub access_tags: BTreeSet<String>,
}

impl SampledRecordSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
