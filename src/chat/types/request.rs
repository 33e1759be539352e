use serde::{Deserialize, Serialize};

/// A natural-language question for the backend, sent as `{"query": "..."}`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub query: String,
}

impl Query {
    #[must_use]
    pub fn new<S: Into<String>>(query: S) -> Self {
        Self {
            query: query.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_to_query_object() {
        let query = Query::new("temperature near the equator in October 2024");

        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({"query": "temperature near the equator in October 2024"})
        );
    }
}
