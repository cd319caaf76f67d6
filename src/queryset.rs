//! Queryset definitions.
//!
//! A queryset is a named set of columns at a target level of analysis. Each
//! column is a chain of operations the service applies bottom-up: fetch from
//! the database, run transforms, rename.
//!
//! ```
//! use viewser::queryset::{Column, Queryset};
//!
//! let queryset = Queryset::new("conflict_history", "country_month")
//!     .with_column(
//!         Column::new("ged_sb", "priogrid_month", "ged_sb_best_sum_nokgi")
//!             .aggregate("sum")
//!             .unwrap()
//!             .transform("ops", "ln", &[]),
//!     )
//!     .describe("Logged state-based fatalities");
//! assert_eq!(queryset.operations().len(), 1);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const AGGREGATIONS: [&str; 4] = ["sum", "max", "avg", "min"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Database retrieval.
    Base,
    /// Transforms, including the final rename.
    Trf,
}

/// One step of a column definition, as the service expects it on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub namespace: Namespace,
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl Operation {
    #[must_use]
    pub fn rename(to: &str) -> Self {
        Self {
            namespace: Namespace::Trf,
            name: "util.rename".to_string(),
            arguments: vec![to.to_string()],
        }
    }

    #[must_use]
    pub fn database(from_loa: &str, from_column: &str, aggregation: &str) -> Self {
        Self {
            namespace: Namespace::Base,
            name: format!("{from_loa}.{from_column}"),
            arguments: vec![aggregation.to_string()],
        }
    }

    #[must_use]
    pub fn transform(namespace: &str, function: &str, arguments: &[&str]) -> Self {
        Self {
            namespace: Namespace::Trf,
            name: format!("{namespace}.{function}"),
            arguments: arguments.iter().map(ToString::to_string).collect(),
        }
    }
}

/// A column: `[rename, transforms (latest first), database]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    operations: Vec<Operation>,
}

impl Column {
    /// Fetch `from_column` of the `from_loa` table without aggregation.
    #[must_use]
    pub fn new(name: &str, from_loa: &str, from_column: &str) -> Self {
        Self {
            operations: vec![
                Operation::rename(name),
                Operation::database(from_loa, from_column, "values"),
            ],
        }
    }

    /// Aggregate when the column is fetched to a coarser level of analysis.
    pub fn aggregate(&self, aggregation: &str) -> Result<Self> {
        if !AGGREGATIONS.contains(&aggregation) {
            return Err(Error::validation(format!(
                "unknown aggregation '{aggregation}' (expected one of: {})",
                AGGREGATIONS.join(", ")
            )));
        }
        let mut column = self.clone();
        if let Some(database) = column.operations.last_mut() {
            database.arguments = vec![aggregation.to_string()];
        }
        Ok(column)
    }

    /// Add `namespace.function(arguments)` to the transform chain.
    #[must_use]
    pub fn transform(&self, namespace: &str, function: &str, arguments: &[&str]) -> Self {
        let mut column = self.clone();
        column
            .operations
            .insert(1, Operation::transform(namespace, function, arguments));
        column
    }

    #[must_use]
    pub fn aggregation(&self) -> Option<&str> {
        self.operations
            .last()
            .and_then(|op| op.arguments.first())
            .map(String::as_str)
    }

    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }
}

/// A queryset definition as published to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queryset {
    pub name: String,
    pub loa: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub operations: Vec<Vec<Operation>>,
}

impl Queryset {
    #[must_use]
    pub fn new(name: impl Into<String>, loa: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            loa: loa.into(),
            themes: Vec::new(),
            description: None,
            operations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_column(mut self, column: Column) -> Self {
        self.operations.push(column.operations);
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.themes.push(theme.into());
        self
    }

    #[must_use]
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn operations(&self) -> &[Vec<Operation>] {
        &self.operations
    }

    /// Read a queryset definition written as JSON.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let queryset: Self = serde_json::from_str(&text).map_err(|e| {
            Error::validation(format!("{} is not a queryset definition: {e}", path.display()))
        })?;
        queryset.validate()?;
        Ok(queryset)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("queryset name must not be empty"));
        }
        if self.loa.trim().is_empty() {
            return Err(Error::validation(format!(
                "queryset '{}' has no level of analysis",
                self.name
            )));
        }
        for (i, column) in self.operations.iter().enumerate() {
            let well_formed = column.len() >= 2
                && column.last().is_some_and(|op| op.namespace == Namespace::Base)
                && column[..column.len() - 1]
                    .iter()
                    .all(|op| op.namespace == Namespace::Trf);
            if !well_formed {
                return Err(Error::validation(format!(
                    "column {i} of queryset '{}' must be transforms followed by one database operation",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// `GET /querysets` body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QuerysetList {
    pub querysets: Vec<String>,
}

/// `GET /querysets/{name}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerysetDetail {
    pub name: String,
    #[serde(default)]
    pub loa: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub operations: Vec<Vec<Operation>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn column_layout_is_rename_transforms_database() {
        let column = Column::new("ged", "priogrid_month", "ged_best")
            .transform("temporal", "tlag", &["1"])
            .transform("ops", "ln", &[]);
        let names: Vec<&str> = column.operations().iter().map(|op| op.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["util.rename", "ops.ln", "temporal.tlag", "priogrid_month.ged_best"]
        );
        assert_eq!(column.aggregation(), Some("values"));
    }

    #[test]
    fn builders_never_mutate_their_source() {
        let base = Column::new("a", "country_month", "x");
        let summed = base.aggregate("sum").unwrap();
        assert_eq!(base.aggregation(), Some("values"));
        assert_eq!(summed.aggregation(), Some("sum"));

        let transformed = summed.transform("missing", "fill", &[]);
        assert_eq!(summed.operations().len(), 2);
        assert_eq!(transformed.operations().len(), 3);
        assert_eq!(transformed.aggregation(), Some("sum"));
    }

    #[test]
    fn unknown_aggregation_is_rejected() {
        let err = Column::new("a", "b", "c").aggregate("median").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn serializes_to_the_wire_format() {
        let queryset = Queryset::new("qs", "country_month")
            .with_theme("conflict")
            .with_column(Column::new("a", "country_month", "x").aggregate("max").unwrap());
        assert_eq!(
            serde_json::to_value(&queryset).unwrap(),
            json!({
                "name": "qs",
                "loa": "country_month",
                "themes": ["conflict"],
                "operations": [[
                    {"namespace": "trf", "name": "util.rename", "arguments": ["a"]},
                    {"namespace": "base", "name": "country_month.x", "arguments": ["max"]}
                ]]
            })
        );
    }

    #[test]
    fn reads_and_validates_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let queryset = Queryset::new("qs", "priogrid_month")
            .with_column(Column::new("a", "priogrid_month", "x"))
            .describe("test");
        fs::write(&good, serde_json::to_string(&queryset).unwrap()).unwrap();
        assert_eq!(Queryset::from_json_file(&good).unwrap(), queryset);

        let bad = dir.path().join("bad.json");
        fs::write(
            &bad,
            r#"{"name": "qs", "loa": "cm", "operations": [[{"namespace": "trf", "name": "util.rename", "arguments": ["a"]}]]}"#,
        )
        .unwrap();
        assert!(Queryset::from_json_file(&bad).is_err());
    }
}
