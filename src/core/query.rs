use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const SCHEMA_VERSION_FIELD: &str = "schema_version";
pub const TYPE_FIELD: &str = "type";

/// Minimal query language shared by the wire adapter and the in-memory backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    MatchAll,
    Term { field: String, value: Value },
    Range {
        field: String,
        gte: Option<i64>,
        lt: Option<i64>,
    },
    Exists { field: String },
    Not(Box<Query>),
    And(Vec<Query>),
    Or(Vec<Query>),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::Not(Box::new(Self::exists(field)))
    }

    pub fn doc_type(document_type: impl Into<String>) -> Self {
        Self::term(TYPE_FIELD, document_type.into())
    }

    /// Documents produced before `version`. A missing tag counts as older.
    pub fn schema_version_below(version: i64) -> Self {
        Self::Or(vec![
            Self::Range {
                field: SCHEMA_VERSION_FIELD.to_string(),
                gte: None,
                lt: Some(version),
            },
            Self::missing(SCHEMA_VERSION_FIELD),
        ])
    }

    pub fn and(self, other: Query) -> Self {
        match self {
            Self::MatchAll => other,
            Self::And(mut clauses) => {
                clauses.push(other);
                Self::And(clauses)
            }
            current => Self::And(vec![current, other]),
        }
    }

    /// Renders the query as an Elasticsearch/OpenSearch query clause.
    pub fn to_json(&self) -> Value {
        match self {
            Self::MatchAll => json!({ "match_all": {} }),
            Self::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Self::Range { field, gte, lt } => {
                let mut bounds = Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".to_string(), json!(gte));
                }
                if let Some(lt) = lt {
                    bounds.insert("lt".to_string(), json!(lt));
                }
                json!({ "range": { field.as_str(): bounds } })
            }
            Self::Exists { field } => json!({ "exists": { "field": field } }),
            Self::Not(inner) => json!({ "bool": { "must_not": [inner.to_json()] } }),
            Self::And(clauses) => {
                let rendered: Vec<Value> = clauses.iter().map(Query::to_json).collect();
                json!({ "bool": { "filter": rendered } })
            }
            Self::Or(clauses) => {
                let rendered: Vec<Value> = clauses.iter().map(Query::to_json).collect();
                json!({ "bool": { "should": rendered, "minimum_should_match": 1 } })
            }
        }
    }

    /// Evaluates the query against a document source.
    pub fn matches(&self, source: &Map<String, Value>) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Term { field, value } => match source.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                Some(found) => found == value,
                None => false,
            },
            Self::Range { field, gte, lt } => {
                let Some(number) = source.get(field).and_then(numeric) else {
                    return false;
                };
                gte.is_none_or(|gte| number >= gte as f64) && lt.is_none_or(|lt| number < lt as f64)
            }
            Self::Exists { field } => source.get(field).is_some_and(|v| !v.is_null()),
            Self::Not(inner) => !inner.matches(source),
            Self::And(clauses) => clauses.iter().all(|q| q.matches(source)),
            Self::Or(clauses) => clauses.iter().any(|q| q.matches(source)),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_schema_version_below_counts_missing_tag() {
        let query = Query::schema_version_below(2311);
        assert!(query.matches(&doc(json!({ "type": "issue" }))));
        assert!(query.matches(&doc(json!({ "schema_version": 2310 }))));
        assert!(!query.matches(&doc(json!({ "schema_version": 2311 }))));
        assert!(!query.matches(&doc(json!({ "schema_version": 2400 }))));
    }

    #[test]
    fn test_missing_treats_null_as_absent() {
        let query = Query::missing("hidden");
        assert!(query.matches(&doc(json!({ "hidden": null }))));
        assert!(!query.matches(&doc(json!({ "hidden": false }))));
    }

    #[test]
    fn test_and_flattens_and_renders_filter() {
        let query = Query::doc_type("issue")
            .and(Query::missing("hidden"))
            .and(Query::exists("title"));
        match &query {
            Query::And(clauses) => assert_eq!(clauses.len(), 3),
            other => panic!("unexpected query {:?}", other),
        }

        let rendered = query.to_json();
        assert_eq!(rendered["bool"]["filter"][0], json!({ "term": { "type": "issue" } }));
        assert_eq!(
            rendered["bool"]["filter"][1],
            json!({ "bool": { "must_not": [{ "exists": { "field": "hidden" } }] } })
        );
    }

    #[test]
    fn test_match_all_is_and_identity() {
        assert_eq!(Query::MatchAll.and(Query::doc_type("note")), Query::doc_type("note"));
    }

    #[test]
    fn test_range_rendering() {
        let rendered = Query::Range {
            field: "id".into(),
            gte: Some(10),
            lt: None,
        }
        .to_json();
        assert_eq!(rendered, json!({ "range": { "id": { "gte": 10 } } }));
    }
}
