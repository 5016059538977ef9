//! Search request construction and result types.

use super::IndexFamily;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Message carried by results produced while search is unavailable.
pub const UNAVAILABLE_MESSAGE: &str = "Search unavailable";

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Best match first.
    #[default]
    Relevance,
    /// Most recently created first.
    Newest,
    /// Oldest first.
    Oldest,
    /// Most recently updated first.
    Updated,
    /// Highest priority first (tickets only; relevance elsewhere).
    Priority,
}

impl FromStr for SortOrder {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "relevance" => Ok(Self::Relevance),
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "updated" => Ok(Self::Updated),
            "priority" => Ok(Self::Priority),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown sort order: {other}"
            ))),
        }
    }
}

/// Inclusive date range on one field. Bounds are ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Date field to filter.
    pub field: String,
    /// Lower bound.
    pub from: Option<String>,
    /// Upper bound.
    pub to: Option<String>,
}

/// A search request against one or more indices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Free text; blank means "match everything".
    pub text: String,
    /// Exact-match filters. Strings become `term`, arrays become `terms`.
    pub filters: BTreeMap<String, Value>,
    /// Optional date range.
    pub date_range: Option<DateRange>,
    /// Zero-based offset of the first hit.
    pub offset: usize,
    /// Requested page size; clamped to `1..=100`.
    pub size: usize,
    /// Ordering.
    pub sort: SortOrder,
}

impl SearchQuery {
    /// Creates a query for free text with the default page size.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            size: DEFAULT_PAGE_SIZE,
            ..Self::default()
        }
    }

    /// Adds an exact-match filter.
    #[must_use]
    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    /// Restricts a date field to a range.
    #[must_use]
    pub fn with_date_range(
        mut self,
        field: impl Into<String>,
        from: Option<String>,
        to: Option<String>,
    ) -> Self {
        self.date_range = Some(DateRange {
            field: field.into(),
            from,
            to,
        });
        self
    }

    /// Sets the page window.
    #[must_use]
    pub const fn with_page(mut self, offset: usize, size: usize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub const fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Page size actually sent.
    #[must_use]
    pub fn effective_size(&self) -> usize {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Builds the request body.
    ///
    /// `fields` are the boosted `multi_match` fields. `family` selects the
    /// priority field when sorting by priority.
    #[must_use]
    pub fn to_body(&self, fields: &[String], family: Option<IndexFamily>) -> Value {
        let text = self.text.trim();
        let must = if text.is_empty() {
            json!({ "match_all": {} })
        } else {
            json!({
                "multi_match": {
                    "query": text,
                    "type": "best_fields",
                    "fields": fields,
                    "fuzziness": "AUTO"
                }
            })
        };

        let mut filter: Vec<Value> = self
            .filters
            .iter()
            .filter_map(|(field, value)| filter_clause(field, value))
            .collect();
        if let Some(range) = &self.date_range {
            if let Some(clause) = range_clause(range) {
                filter.push(clause);
            }
        }

        let highlight_fields: serde_json::Map<String, Value> = fields
            .iter()
            .map(|f| {
                let name = f.split('^').next().unwrap_or(f);
                (name.to_string(), json!({}))
            })
            .collect();

        json!({
            "query": { "bool": { "must": [must], "filter": filter } },
            "from": self.offset,
            "size": self.effective_size(),
            "sort": sort_clause(self.sort, family),
            "track_total_hits": true,
            "highlight": { "fields": highlight_fields }
        })
    }
}

/// `term` for scalars, `terms` for arrays; nulls and empty arrays are skipped.
fn filter_clause(field: &str, value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(values) if values.is_empty() => None,
        Value::Array(values) => Some(json!({ "terms": { field: values } })),
        scalar => Some(json!({ "term": { field: scalar } })),
    }
}

fn range_clause(range: &DateRange) -> Option<Value> {
    let mut bounds = serde_json::Map::new();
    if let Some(from) = &range.from {
        bounds.insert("gte".to_string(), json!(from));
    }
    if let Some(to) = &range.to {
        bounds.insert("lte".to_string(), json!(to));
    }
    if bounds.is_empty() {
        return None;
    }
    Some(json!({ "range": { range.field.as_str(): Value::Object(bounds) } }))
}

/// Sort clause; every non-relevance order tie-breaks on score.
fn sort_clause(sort: SortOrder, family: Option<IndexFamily>) -> Value {
    let score = json!({ "_score": { "order": "desc" } });
    let primary = match sort {
        SortOrder::Relevance => None,
        SortOrder::Newest => Some(("created_at", "desc", "date")),
        SortOrder::Oldest => Some(("created_at", "asc", "date")),
        SortOrder::Updated => Some(("updated_at", "desc", "date")),
        SortOrder::Priority => family
            .and_then(IndexFamily::priority_field)
            .map(|f| (f, "desc", "long")),
    };
    match primary {
        Some((field, order, unmapped_type)) => json!([
            { field: { "order": order, "unmapped_type": unmapped_type } },
            score
        ]),
        None => json!([score]),
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document id.
    pub id: String,
    /// Index the hit came from.
    pub index: String,
    /// Family, when the index is one of ours.
    pub family: Option<IndexFamily>,
    /// Relevance score (absent when sorting by a field only).
    pub score: Option<f64>,
    /// Stored document.
    pub source: Value,
    /// Highlighted fragments by field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Value>,
}

/// A page of results.
///
/// While search is unavailable every read returns
/// `{ items: [], total: 0, message: "Search unavailable" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults<T = SearchHit> {
    /// Hits on this page.
    pub items: Vec<T>,
    /// Total matching documents.
    pub total: u64,
    /// Engine-side duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub took_ms: Option<u64>,
    /// Set when the results are degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> SearchResults<T> {
    /// The "search unavailable" sentinel.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            took_ms: None,
            message: Some(UNAVAILABLE_MESSAGE.to_string()),
        }
    }

    /// An empty, non-degraded page.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            took_ms: None,
            message: None,
        }
    }

    /// Returns true for the unavailable sentinel.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.message.as_deref() == Some(UNAVAILABLE_MESSAGE)
    }
}

/// One aggregation bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket key (date histogram keys are rendered as dates).
    pub key: String,
    /// Documents in the bucket.
    pub doc_count: u64,
}

/// Facet counts for one family.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalyticsResults {
    /// Buckets by aggregation name (keyword field or `created_per_day`).
    pub buckets: BTreeMap<String, Vec<Bucket>>,
    /// Documents matching the filters.
    pub total: u64,
    /// Set when the results are degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalyticsResults {
    /// The "search unavailable" sentinel.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            buckets: BTreeMap::new(),
            total: 0,
            message: Some(UNAVAILABLE_MESSAGE.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn fields() -> Vec<String> {
        IndexFamily::Tickets.boosted_fields()
    }

    #[test]
    fn test_text_becomes_fuzzy_multi_match() {
        let body = SearchQuery::new("printer jam").to_body(&fields(), Some(IndexFamily::Tickets));
        let mm = &body["query"]["bool"]["must"][0]["multi_match"];
        assert_eq!(mm["query"], "printer jam");
        assert_eq!(mm["type"], "best_fields");
        assert_eq!(mm["fuzziness"], "AUTO");
        assert_eq!(mm["fields"][1], "title^3");
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    fn test_blank_text_matches_all(text: &str) {
        let body = SearchQuery::new(text).to_body(&fields(), None);
        assert!(body["query"]["bool"]["must"][0].get("match_all").is_some());
    }

    #[test]
    fn test_filters_and_date_range() {
        let body = SearchQuery::new("vpn")
            .with_filter("status", "open")
            .with_filter("priority", json!(["high", "critical"]))
            .with_filter("assignee_id", Value::Null)
            .with_date_range("created_at", Some("2024-01-01".to_string()), None)
            .to_body(&fields(), None);

        let filter = body["query"]["bool"]["filter"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(filter.len(), 3);
        assert!(filter.contains(&json!({ "terms": { "priority": ["high", "critical"] } })));
        assert!(filter.contains(&json!({ "term": { "status": "open" } })));
        assert!(filter.contains(&json!({ "range": { "created_at": { "gte": "2024-01-01" } } })));
    }

    #[test_case(0, 1 ; "zero clamps up")]
    #[test_case(20, 20 ; "default kept")]
    #[test_case(500, 100 ; "large clamps down")]
    fn test_size_clamped(requested: usize, expected: usize) {
        let body = SearchQuery::new("x").with_page(40, requested).to_body(&fields(), None);
        assert_eq!(body["size"], expected);
        assert_eq!(body["from"], 40);
    }

    #[test_case(SortOrder::Newest, "created_at", "desc", "date")]
    #[test_case(SortOrder::Oldest, "created_at", "asc", "date")]
    #[test_case(SortOrder::Updated, "updated_at", "desc", "date")]
    #[test_case(SortOrder::Priority, "priority_level", "desc", "long")]
    fn test_sort_tie_breaks_on_score(sort: SortOrder, field: &str, order: &str, unmapped: &str) {
        let body = SearchQuery::new("x")
            .with_sort(sort)
            .to_body(&fields(), Some(IndexFamily::Tickets));
        assert_eq!(body["sort"][0][field]["order"], order);
        assert_eq!(body["sort"][0][field]["unmapped_type"], unmapped);
        assert_eq!(body["sort"][1]["_score"]["order"], "desc");
    }

    #[test]
    fn test_relevance_and_unsupported_priority_sort_by_score() {
        let body = SearchQuery::new("x").to_body(&fields(), None);
        assert_eq!(body["sort"], json!([{ "_score": { "order": "desc" } }]));

        let body = SearchQuery::new("x")
            .with_sort(SortOrder::Priority)
            .to_body(&fields(), Some(IndexFamily::Assets));
        assert_eq!(body["sort"], json!([{ "_score": { "order": "desc" } }]));
    }

    #[test]
    fn test_parse_sort_order() {
        assert_eq!("".parse::<SortOrder>().ok(), Some(SortOrder::Relevance));
        assert_eq!("Newest".parse::<SortOrder>().ok(), Some(SortOrder::Newest));
        assert!("random".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_unavailable_sentinel_shape() {
        let results = SearchResults::<SearchHit>::unavailable();
        assert!(results.is_unavailable());
        let json = serde_json::to_value(&results).unwrap_or_default();
        assert_eq!(
            json,
            json!({ "items": [], "total": 0, "message": "Search unavailable" })
        );
        assert!(!SearchResults::<SearchHit>::empty().is_unavailable());
    }
}
