//! Template-facing entry point for random node blocks.
//!
//! Template authors call capabilities by name with positional arguments:
//!
//! ```text
//! randomNodes(count, bundles, view_mode, cache, filters)
//! ```
//!
//! | position | argument    | falsy value means                         |
//! |----------|-------------|-------------------------------------------|
//! | 0        | `count`     | one node; negative means every match      |
//! | 1        | `bundles`   | any bundle                                |
//! | 2        | `view_mode` | `full`                                    |
//! | 3        | `cache`     | 30000 seconds; `"today"` until midnight   |
//! | 4        | `filters`   | no extra property filters                 |

use std::collections::HashMap;
use std::fmt;

use chrono_tz::Tz;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::application::render::{
    DeferredRenderPipeline, LazyRandomNodes, PipelineError, RandomNodeSettings, RenderSession,
    guard,
};
use crate::cache::MaxAge;
use crate::domain::draw::{
    BundleQuota, BundleSelection, DrawCount, DrawRequest, FilterValue, PropertyFilters,
};
use crate::domain::types::ViewMode;
use crate::util::timezone::seconds_until_next_midnight;

const SOURCE: &str = "application::extension::RandomNodeExtension";

pub const RANDOM_NODES: &str = "randomNodes";
pub const DEFAULT_CACHE_SECS: i64 = 30_000;
const TODAY: &str = "today";

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("the capability `{name}` is not registered")]
    InvalidCapabilityInvocation { name: String },
    #[error("invalid `{argument}` argument: {message}")]
    InvalidArgument {
        argument: &'static str,
        message: String,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ExtensionError {
    fn invalid(argument: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    RandomNodes,
}

impl Capability {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            RANDOM_NODES => Some(Self::RandomNodes),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RandomNodes => RANDOM_NODES,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capabilities exposed to templates, keyed by their template-facing name.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: HashMap<String, Capability>,
}

impl CapabilityTable {
    /// Builds a table from template-facing names. Names without a matching
    /// capability are rejected here rather than on first use.
    pub fn register<I, S>(names: I) -> Result<Self, ExtensionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = HashMap::new();
        for name in names {
            let name = name.into();
            let capability = Capability::from_name(&name).ok_or_else(|| {
                ExtensionError::InvalidCapabilityInvocation { name: name.clone() }
            })?;
            entries.insert(name, capability);
        }
        Ok(Self { entries })
    }

    /// Every known capability under its own name.
    pub fn standard() -> Self {
        Self {
            entries: HashMap::from([(RANDOM_NODES.to_string(), Capability::RandomNodes)]),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Capability, ExtensionError> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| ExtensionError::InvalidCapabilityInvocation {
                name: name.to_string(),
            })
    }
}

/// Normalized `randomNodes` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomNodesArgs {
    pub request: DrawRequest,
    pub view_mode: ViewMode,
    pub max_age: MaxAge,
}

impl RandomNodesArgs {
    pub fn parse(args: &[Value], now: OffsetDateTime, timezone: Tz) -> Result<Self, ExtensionError> {
        let arg = |index: usize| args.get(index).filter(|value| !is_falsy(value));

        let count = arg(0).map(parse_count).transpose()?.unwrap_or(DrawCount::Limited(1));
        let bundles = arg(1).map(parse_bundles).transpose()?.unwrap_or_default();
        let view_mode = arg(2)
            .map(parse_view_mode)
            .transpose()?
            .unwrap_or_else(ViewMode::full);
        let max_age = match arg(3) {
            Some(value) => parse_cache(value, now, timezone)?,
            None => MaxAge::from_seconds(DEFAULT_CACHE_SECS),
        };
        let filters = arg(4).map(parse_filters).transpose()?.unwrap_or_default();

        Ok(Self {
            request: DrawRequest::new(count)
                .with_bundles(bundles)
                .with_filters(filters),
            view_mode,
            max_age,
        })
    }

    /// Partition keys covering every output-affecting argument.
    pub fn cache_keys(&self) -> Vec<String> {
        vec![
            RANDOM_NODES.to_string(),
            self.request.fingerprint(),
            format!("view_mode={}", self.view_mode),
        ]
    }

    pub fn into_settings(self) -> RandomNodeSettings {
        let keys = self.cache_keys();
        RandomNodeSettings::for_request(self.request)
            .with_cache_keys(keys)
            .with_max_age(self.max_age)
            .with_view_mode(self.view_mode)
    }
}

/// Loose truthiness as template authors expect it.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty() || text == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn parse_count(value: &Value) -> Result<DrawCount, ExtensionError> {
    as_integer(value)
        .map(DrawCount::from_signed)
        .ok_or_else(|| ExtensionError::invalid("count", format!("expected a number, got {value}")))
}

fn parse_bundles(value: &Value) -> Result<BundleSelection, ExtensionError> {
    match value {
        Value::String(bundle) => Ok(BundleSelection::only([bundle.as_str()])),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ExtensionError::invalid("bundles", format!("expected a bundle name, got {item}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(BundleSelection::only),
        Value::Object(map) => map
            .iter()
            .map(|(bundle, quota)| match quota {
                Value::Number(number) if number.is_i64() || number.is_u64() => number
                    .as_u64()
                    .and_then(|amount| u32::try_from(amount).ok())
                    .map(|amount| BundleQuota::exact(bundle.as_str(), amount))
                    .ok_or_else(|| {
                        ExtensionError::invalid(
                            "bundles",
                            format!("quota for `{bundle}` must be between 0 and {}", u32::MAX),
                        )
                    }),
                _ => Ok(BundleQuota::share(bundle.as_str())),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(BundleSelection::quotas),
        other => Err(ExtensionError::invalid(
            "bundles",
            format!("expected a list or a map of quotas, got {other}"),
        )),
    }
}

fn parse_view_mode(value: &Value) -> Result<ViewMode, ExtensionError> {
    value
        .as_str()
        .map(ViewMode::new)
        .ok_or_else(|| ExtensionError::invalid("view_mode", format!("expected a name, got {value}")))
}

fn parse_cache(value: &Value, now: OffsetDateTime, timezone: Tz) -> Result<MaxAge, ExtensionError> {
    if value.as_str() == Some(TODAY) {
        return Ok(MaxAge::from_seconds(seconds_until_next_midnight(now, timezone)));
    }
    as_integer(value).map(MaxAge::from_seconds).ok_or_else(|| {
        ExtensionError::invalid(
            "cache",
            format!("expected seconds or \"{TODAY}\", got {value}"),
        )
    })
}

fn parse_filters(value: &Value) -> Result<PropertyFilters, ExtensionError> {
    let Value::Object(map) = value else {
        return Err(ExtensionError::invalid(
            "filters",
            format!("expected a map of properties, got {value}"),
        ));
    };

    map.iter()
        .map(|(property, value)| {
            let value = match value {
                Value::Bool(flag) => FilterValue::Bool(*flag),
                Value::Number(number) => number.as_i64().map(FilterValue::Int).ok_or_else(|| {
                    ExtensionError::invalid("filters", format!("`{property}` must be an integer"))
                })?,
                Value::String(text) => FilterValue::Text(text.clone()),
                other => {
                    return Err(ExtensionError::invalid(
                        "filters",
                        format!("`{property}` must be a scalar, got {other}"),
                    ));
                }
            };
            Ok((property.clone(), value))
        })
        .collect()
}

/// Dispatches template capability calls to the render pipeline.
#[derive(Clone)]
pub struct RandomNodeExtension {
    pipeline: DeferredRenderPipeline,
    table: CapabilityTable,
    timezone: Tz,
}

impl RandomNodeExtension {
    pub fn new(pipeline: DeferredRenderPipeline, table: CapabilityTable, timezone: Tz) -> Self {
        Self {
            pipeline,
            table,
            timezone,
        }
    }

    pub async fn invoke(
        &self,
        session: &mut RenderSession,
        name: &str,
        args: &[Value],
    ) -> Result<String, ExtensionError> {
        self.invoke_at(OffsetDateTime::now_utc(), session, name, args)
            .await
    }

    /// Same as [`RandomNodeExtension::invoke`] with an explicit clock reading.
    pub async fn invoke_at(
        &self,
        now: OffsetDateTime,
        session: &mut RenderSession,
        name: &str,
        args: &[Value],
    ) -> Result<String, ExtensionError> {
        let capability = self.table.resolve(name)?;

        if guard::is_sub_rendering() {
            debug!(target = SOURCE, capability = %capability, "nested invocation rendered empty");
            return Ok(String::new());
        }

        match capability {
            Capability::RandomNodes => {
                let args = RandomNodesArgs::parse(args, now, self.timezone)?;
                let element = LazyRandomNodes::build(args.into_settings());
                let hydrated = self.pipeline.render(element, session).await?;
                Ok(hydrated.into_markup())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::domain::draw::Quota;

    const NOW: OffsetDateTime = datetime!(2024-05-01 22:30:00 UTC);

    fn parse(args: &[Value]) -> RandomNodesArgs {
        RandomNodesArgs::parse(args, NOW, Tz::UTC).expect("arguments parse")
    }

    #[test]
    fn empty_arguments_use_defaults() {
        let args = parse(&[]);

        assert_eq!(args.request.count, DrawCount::Limited(1));
        assert_eq!(args.request.bundles, BundleSelection::Any);
        assert!(args.request.filters.is_empty());
        assert_eq!(args.view_mode, ViewMode::full());
        assert_eq!(args.max_age, MaxAge::Seconds(30_000));
    }

    #[test]
    fn falsy_values_fall_back_to_defaults() {
        let args = parse(&[json!(0), json!(null), json!(""), json!(0), json!({})]);

        assert_eq!(args.request.count, DrawCount::Limited(1));
        assert_eq!(args.view_mode, ViewMode::full());
        assert_eq!(args.max_age, MaxAge::Seconds(30_000));
    }

    #[test]
    fn negative_count_is_unlimited() {
        assert_eq!(parse(&[json!(-1)]).request.count, DrawCount::Unlimited);
        assert_eq!(parse(&[json!("4")]).request.count, DrawCount::Limited(4));
    }

    #[test]
    fn bundle_list_and_quota_map() {
        let only = parse(&[json!(3), json!(["article", "page"])]);
        assert_eq!(
            only.request.bundles,
            BundleSelection::Only(vec!["article".into(), "page".into()])
        );

        let quotas = parse(&[json!(5), json!({"page": 2, "article": true, "event": 1})]);
        let BundleSelection::Quotas(entries) = quotas.request.bundles else {
            panic!("expected quotas");
        };
        let summary: Vec<(&str, Quota)> = entries
            .iter()
            .map(|entry| (entry.bundle.as_str(), entry.quota))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("page", Quota::Exact(2)),
                ("article", Quota::RemainingShare),
                ("event", Quota::Exact(1)),
            ]
        );
    }

    #[test]
    fn today_caches_until_local_midnight() {
        let args = parse(&[json!(1), json!(null), json!("teaser"), json!("today")]);
        assert_eq!(args.max_age, MaxAge::Seconds(90 * 60));
        assert!(args.view_mode.is_teaser());
    }

    #[test]
    fn filters_become_property_filters() {
        let args = parse(&[
            json!(2),
            json!(null),
            json!(null),
            json!(60),
            json!({"promote": true, "uid": 3, "langcode": "de"}),
        ]);

        assert_eq!(args.request.filters.get("promote"), Some(&FilterValue::Bool(true)));
        assert_eq!(args.request.filters.get("uid"), Some(&FilterValue::Int(3)));
        assert_eq!(
            args.request.filters.get("langcode"),
            Some(&FilterValue::Text("de".into()))
        );
        assert_eq!(args.max_age, MaxAge::Seconds(60));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        assert!(matches!(
            RandomNodesArgs::parse(&[json!("many")], NOW, Tz::UTC),
            Err(ExtensionError::InvalidArgument { argument: "count", .. })
        ));
        assert!(matches!(
            RandomNodesArgs::parse(&[json!(1), json!(7)], NOW, Tz::UTC),
            Err(ExtensionError::InvalidArgument { argument: "bundles", .. })
        ));
        assert!(matches!(
            RandomNodesArgs::parse(
                &[json!(1), json!(null), json!(null), json!(null), json!({"uid": [1]})],
                NOW,
                Tz::UTC
            ),
            Err(ExtensionError::InvalidArgument { argument: "filters", .. })
        ));
    }

    #[test]
    fn cache_keys_follow_every_argument() {
        let base = parse(&[json!(3), json!(["article"])]).cache_keys();
        assert_eq!(base, parse(&[json!(3), json!(["article"])]).cache_keys());
        assert_ne!(base, parse(&[json!(4), json!(["article"])]).cache_keys());
        assert_ne!(base, parse(&[json!(3), json!(["page"])]).cache_keys());
        assert_ne!(
            base,
            parse(&[json!(3), json!(["article"]), json!("teaser")]).cache_keys()
        );
    }

    #[test]
    fn registration_rejects_unknown_names() {
        let table = CapabilityTable::register([RANDOM_NODES]).expect("known name registers");
        assert_eq!(table.resolve(RANDOM_NODES).expect("resolves"), Capability::RandomNodes);

        match CapabilityTable::register(["randomNodes", "randomUsers"]) {
            Err(ExtensionError::InvalidCapabilityInvocation { name }) => {
                assert_eq!(name, "randomUsers")
            }
            other => panic!("expected registration failure, got {other:?}"),
        }
    }
}
