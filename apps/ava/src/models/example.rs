use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A curated conversation starter used as a few-shot example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExampleRecord {
    pub id: String,
    pub topics: Vec<String>,
    pub content: String,
}

#[cfg(test)]
impl ExampleRecord {
    pub fn new(id: impl Into<String>, topics: &[&str], content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            content: content.into(),
        }
    }
}
