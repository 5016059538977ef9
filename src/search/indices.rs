//! Declared search indices.
//!
//! Each [`IndexFamily`] maps to one index named `<prefix>_<suffix>`, with
//! text fields analyzed by the standard analyzer, keyword fields for exact
//! filters and date fields for ranges and sorting.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;

/// Searchable entity family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFamily {
    /// Service desk tickets.
    Tickets,
    /// Knowledge base articles.
    KnowledgeArticles,
    /// Managed assets.
    Assets,
    /// Application and audit logs.
    Logs,
}

/// A text field and its relevance boost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostedField {
    /// Field name.
    pub name: &'static str,
    /// Relevance multiplier.
    pub boost: f32,
}

const fn field(name: &'static str, boost: f32) -> BoostedField {
    BoostedField { name, boost }
}

const TICKET_TEXT: &[BoostedField] = &[
    field("ticket_number", 4.0),
    field("title", 3.0),
    field("description", 2.0),
    field("comments", 1.0),
];
const TICKET_KEYWORDS: &[&str] = &[
    "status",
    "priority",
    "category",
    "assignee_id",
    "requester_id",
    "tags",
];

const ARTICLE_TEXT: &[BoostedField] = &[
    field("title", 3.0),
    field("summary", 2.0),
    field("content", 1.0),
];
const ARTICLE_KEYWORDS: &[&str] = &["status", "category", "author_id", "tags"];

const ASSET_TEXT: &[BoostedField] = &[
    field("asset_tag", 4.0),
    field("serial_number", 4.0),
    field("name", 3.0),
    field("description", 1.0),
];
const ASSET_KEYWORDS: &[&str] = &["status", "asset_type", "location", "assigned_to"];

const LOG_TEXT: &[BoostedField] = &[field("message", 2.0), field("context", 1.0)];
const LOG_KEYWORDS: &[&str] = &["level", "source", "service", "user_id", "request_id"];

impl IndexFamily {
    /// Every declared family.
    pub const ALL: [Self; 4] = [
        Self::Tickets,
        Self::KnowledgeArticles,
        Self::Assets,
        Self::Logs,
    ];

    /// Families included in global search.
    pub const GLOBAL: [Self; 3] = [Self::Tickets, Self::KnowledgeArticles, Self::Assets];

    /// Index name suffix.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Tickets => "tickets",
            Self::KnowledgeArticles => "knowledge_articles",
            Self::Assets => "assets",
            Self::Logs => "logs",
        }
    }

    /// Full index name for a prefix.
    #[must_use]
    pub fn index_name(self, prefix: &str) -> String {
        format!("{prefix}_{}", self.suffix())
    }

    /// Recovers the family from a full index name.
    #[must_use]
    pub fn from_index_name(prefix: &str, index: &str) -> Option<Self> {
        let suffix = index.strip_prefix(prefix)?.strip_prefix('_')?;
        Self::ALL.into_iter().find(|f| f.suffix() == suffix)
    }

    /// Analyzed text fields with boosts.
    #[must_use]
    pub const fn text_fields(self) -> &'static [BoostedField] {
        match self {
            Self::Tickets => TICKET_TEXT,
            Self::KnowledgeArticles => ARTICLE_TEXT,
            Self::Assets => ASSET_TEXT,
            Self::Logs => LOG_TEXT,
        }
    }

    /// Keyword fields usable as exact filters and facets.
    #[must_use]
    pub const fn keyword_fields(self) -> &'static [&'static str] {
        match self {
            Self::Tickets => TICKET_KEYWORDS,
            Self::KnowledgeArticles => ARTICLE_KEYWORDS,
            Self::Assets => ASSET_KEYWORDS,
            Self::Logs => LOG_KEYWORDS,
        }
    }

    /// Field used for prefix suggestions.
    #[must_use]
    pub const fn title_field(self) -> &'static str {
        match self {
            Self::Tickets | Self::KnowledgeArticles => "title",
            Self::Assets => "name",
            Self::Logs => "message",
        }
    }

    /// Numeric field backing the `priority` sort, if the family has one.
    #[must_use]
    pub const fn priority_field(self) -> Option<&'static str> {
        match self {
            Self::Tickets => Some("priority_level"),
            Self::KnowledgeArticles | Self::Assets | Self::Logs => None,
        }
    }

    /// `multi_match` field list, e.g. `title^3`.
    #[must_use]
    pub fn boosted_fields(self) -> Vec<String> {
        self.text_fields().iter().map(render_boost).collect()
    }

    /// Index mappings sent when the index is created.
    #[must_use]
    pub fn mappings(self) -> Value {
        let mut properties = Map::new();
        for text in self.text_fields() {
            properties.insert(
                text.name.to_string(),
                json!({ "type": "text", "analyzer": "standard" }),
            );
        }
        for keyword in self.keyword_fields() {
            properties.insert((*keyword).to_string(), json!({ "type": "keyword" }));
        }
        for date in ["created_at", "updated_at", "indexed_at"] {
            properties.insert(date.to_string(), json!({ "type": "date" }));
        }
        if let Some(priority) = self.priority_field() {
            properties.insert(priority.to_string(), json!({ "type": "integer" }));
        }
        if self == Self::KnowledgeArticles {
            properties.insert("published_at".to_string(), json!({ "type": "date" }));
        }

        json!({
            "settings": { "number_of_shards": 1, "number_of_replicas": 0 },
            "mappings": { "properties": Value::Object(properties) }
        })
    }
}

impl fmt::Display for IndexFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for IndexFamily {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tickets" | "ticket" => Ok(Self::Tickets),
            "knowledge_articles" | "knowledge" | "articles" => Ok(Self::KnowledgeArticles),
            "assets" | "asset" => Ok(Self::Assets),
            "logs" | "log" => Ok(Self::Logs),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown index family: {other}"
            ))),
        }
    }
}

/// Renders `name^boost`, omitting a unit boost.
fn render_boost(field: &BoostedField) -> String {
    if (field.boost - 1.0).abs() < f32::EPSILON {
        field.name.to_string()
    } else {
        format!("{}^{}", field.name, field.boost)
    }
}

/// Union of boosted fields across families, first occurrence wins.
#[must_use]
pub fn global_fields(families: &[IndexFamily]) -> Vec<String> {
    let mut seen = Vec::<&str>::new();
    let mut fields = Vec::new();
    for family in families {
        for text in family.text_fields() {
            if !seen.contains(&text.name) {
                seen.push(text.name);
                fields.push(render_boost(text));
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(IndexFamily::Tickets, "deskstore_tickets")]
    #[test_case(IndexFamily::KnowledgeArticles, "deskstore_knowledge_articles")]
    #[test_case(IndexFamily::Assets, "deskstore_assets")]
    #[test_case(IndexFamily::Logs, "deskstore_logs")]
    fn test_index_names(family: IndexFamily, expected: &str) {
        assert_eq!(family.index_name("deskstore"), expected);
        assert_eq!(
            IndexFamily::from_index_name("deskstore", expected),
            Some(family)
        );
    }

    #[test]
    fn test_from_index_name_rejects_other_prefix() {
        assert_eq!(IndexFamily::from_index_name("desk", "deskstore_tickets"), None);
        assert_eq!(IndexFamily::from_index_name("deskstore", "deskstore_users"), None);
    }

    #[test]
    fn test_boosted_fields() {
        assert_eq!(
            IndexFamily::KnowledgeArticles.boosted_fields(),
            vec!["title^3", "summary^2", "content"]
        );
    }

    #[test]
    fn test_mappings_declare_filter_and_date_fields() {
        let mappings = IndexFamily::Tickets.mappings();
        let props = &mappings["mappings"]["properties"];
        assert_eq!(props["status"]["type"], "keyword");
        assert_eq!(props["title"]["type"], "text");
        assert_eq!(props["title"]["analyzer"], "standard");
        assert_eq!(props["created_at"]["type"], "date");
        assert_eq!(props["priority_level"]["type"], "integer");
    }

    #[test]
    fn test_global_fields_deduplicate() {
        let fields = global_fields(&IndexFamily::GLOBAL);
        assert_eq!(fields.iter().filter(|f| f.starts_with("title")).count(), 1);
        assert_eq!(
            fields.iter().filter(|f| f.starts_with("description")).count(),
            1
        );
        assert!(fields.contains(&"name^3".to_string()));
    }

    #[test]
    fn test_parse_family() {
        assert_eq!("Tickets".parse::<IndexFamily>().ok(), Some(IndexFamily::Tickets));
        assert_eq!("knowledge".parse::<IndexFamily>().ok(), Some(IndexFamily::KnowledgeArticles));
        assert!("users".parse::<IndexFamily>().is_err());
    }
}
