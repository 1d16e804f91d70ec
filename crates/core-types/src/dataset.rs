use crate::enums::{DType, DTypeSpec, Domain};
use crate::error::CoreError;
use crate::value::{MissingValue, Value};
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// Free-form per-column metadata.
pub type ColumnMetadata = Map<String, JsonValue>;

/// A single typed field of a dataset. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    dtype: DType,
    missing_value: MissingValue,
    currency_aware: bool,
    metadata: ColumnMetadata,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn missing_value(&self) -> &MissingValue {
        &self.missing_value
    }

    pub fn currency_aware(&self) -> bool {
        self.currency_aware
    }

    pub fn metadata(&self) -> &ColumnMetadata {
        &self.metadata
    }
}

/// An immutable, typed schema: an ordered set of uniquely named columns
/// tagged with a name and a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    columns: Vec<Column>,
    domain: Domain,
    doc: String,
}

impl Dataset {
    pub fn builder(name: &str) -> DatasetBuilder {
        DatasetBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Binds a column of this dataset so it can be requested from a loader.
    pub fn column(&self, name: &str) -> Result<BoundColumn, CoreError> {
        let column = self.get(name).ok_or_else(|| {
            CoreError::Configuration(format!(
                "{} has no column '{}'. Available columns: {}",
                self.name,
                name,
                self.column_names().join(", ")
            ))
        })?;
        Ok(BoundColumn {
            dataset: self.name.clone(),
            domain: self.domain.clone(),
            column: column.clone(),
        })
    }

    pub fn bound_columns(&self) -> Vec<BoundColumn> {
        self.columns
            .iter()
            .map(|column| BoundColumn {
                dataset: self.name.clone(),
                domain: self.domain.clone(),
                column: column.clone(),
            })
            .collect()
    }

    /// The same schema specialized to `domain`.
    pub fn specialize(&self, domain: Domain) -> Dataset {
        Dataset {
            domain,
            ..self.clone()
        }
    }

    /// The generic form of this dataset.
    pub fn unspecialize(&self) -> Dataset {
        self.specialize(Domain::Generic)
    }

    /// True if `column` was bound from this dataset or from its generic form.
    pub fn owns(&self, column: &BoundColumn) -> bool {
        column.dataset == self.name
            && (column.domain == self.domain || column.domain.is_generic())
            && self
                .get(column.name())
                .is_some_and(|own| own == &column.column)
    }
}

/// A column bound to the dataset (and domain) it was requested through.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundColumn {
    dataset: String,
    domain: Domain,
    column: Column,
}

impl BoundColumn {
    pub fn dataset_name(&self) -> &str {
        &self.dataset
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn name(&self) -> &str {
        &self.column.name
    }

    pub fn dtype(&self) -> DType {
        self.column.dtype
    }

    pub fn missing_value(&self) -> &MissingValue {
        &self.column.missing_value
    }

    /// `Dataset.column`, or `Dataset<domain>.column` when specialized.
    pub fn qualname(&self) -> String {
        if self.domain.is_generic() {
            format!("{}.{}", self.dataset, self.column.name)
        } else {
            format!("{}<{}>.{}", self.dataset, self.domain, self.column.name)
        }
    }
}

/// Optional inputs to [`define`].
#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    pub missing_values: HashMap<String, Value>,
    pub domain: Domain,
    pub metadata: HashMap<String, ColumnMetadata>,
    pub currency_aware: HashMap<String, bool>,
    pub doc: Option<String>,
}

/// Defines a dataset from a name -> dtype listing in one call.
pub fn define<N, S>(
    name: &str,
    columns: impl IntoIterator<Item = (N, S)>,
    options: DatasetOptions,
) -> Result<Dataset, CoreError>
where
    N: Into<String>,
    S: Into<DTypeSpec>,
{
    let mut builder = DatasetBuilder::new(name).domain(options.domain);
    for (column, spec) in columns {
        builder = builder.column(column, spec);
    }
    for (column, value) in options.missing_values {
        builder = builder.missing_value(column, value);
    }
    for (column, metadata) in options.metadata {
        builder = builder.metadata(column, metadata);
    }
    for (column, flag) in options.currency_aware {
        builder = builder.currency_aware(column, flag);
    }
    if let Some(doc) = options.doc {
        builder = builder.doc(doc);
    }
    builder.build()
}

/// Collects column declarations and per-column options, then validates them
/// all at once in [`DatasetBuilder::build`].
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    name: String,
    columns: Vec<(String, DTypeSpec)>,
    missing_values: HashMap<String, Value>,
    domain: Domain,
    metadata: HashMap<String, ColumnMetadata>,
    currency_aware: HashMap<String, bool>,
    doc: Option<String>,
}

impl DatasetBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            missing_values: HashMap::new(),
            domain: Domain::Generic,
            metadata: HashMap::new(),
            currency_aware: HashMap::new(),
            doc: None,
        }
    }

    pub fn column(mut self, name: impl Into<String>, dtype: impl Into<DTypeSpec>) -> Self {
        self.columns.push((name.into(), dtype.into()));
        self
    }

    pub fn missing_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.missing_values.insert(name.into(), value.into());
        self
    }

    pub fn domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    pub fn metadata(mut self, name: impl Into<String>, metadata: ColumnMetadata) -> Self {
        self.metadata.insert(name.into(), metadata);
        self
    }

    pub fn currency_aware(mut self, name: impl Into<String>, flag: bool) -> Self {
        self.currency_aware.insert(name.into(), flag);
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn build(self) -> Result<Dataset, CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Configuration(
                "Dataset name cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(self.columns.len());
        for (name, spec) in &self.columns {
            validate_identifier(name)?;
            if !seen.insert(name.as_str()) {
                return Err(CoreError::Configuration(format!(
                    "Column '{}' is declared more than once",
                    name
                )));
            }

            let dtype = spec.resolve()?;
            let missing_value = match self.missing_values.get(name) {
                Some(value) => MissingValue::from_value(value.clone(), dtype).map_err(|e| {
                    CoreError::Configuration(format!("Missing value for column '{}': {}", name, e))
                })?,
                None => MissingValue::default_for(dtype).ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "Column '{}' has dtype {} and requires an explicit missing value",
                        name, dtype
                    ))
                })?,
            };

            let currency_aware = self.currency_aware.get(name).copied().unwrap_or(false);
            if currency_aware && dtype != DType::Float64 {
                return Err(CoreError::Configuration(format!(
                    "Column '{}' is currency-aware but has dtype {}; currency-aware columns must be float64",
                    name, dtype
                )));
            }

            columns.push(Column {
                name: name.clone(),
                dtype,
                missing_value,
                currency_aware,
                metadata: self.metadata.get(name).cloned().unwrap_or_default(),
            });
        }

        for (option, names) in [
            ("missing value", self.missing_values.keys().collect::<Vec<_>>()),
            ("metadata", self.metadata.keys().collect()),
            ("currency flag", self.currency_aware.keys().collect()),
        ] {
            if let Some(unknown) = names.into_iter().find(|n| !seen.contains(n.as_str())) {
                return Err(CoreError::Configuration(format!(
                    "A {} was given for undeclared column '{}'",
                    option, unknown
                )));
            }
        }

        let doc = match self.doc {
            Some(doc) => doc,
            None => default_doc(&self.name, &columns, &self.domain),
        };

        Ok(Dataset {
            name: self.name,
            columns,
            domain: self.domain,
            doc,
        })
    }
}

/// Column and field names must start with a letter and contain only
/// letters, digits and underscores.
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CoreError::Configuration(format!(
            "Column name '{}' must start with a letter and contain only letters, numbers, and underscores",
            name
        )))
    }
}

fn default_doc(name: &str, columns: &[Column], domain: &Domain) -> String {
    let mut sorted: Vec<_> = columns.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut doc = format!("{} - Custom Pipeline DataSet\n\nColumns\n-------\n", name);
    for column in sorted {
        let _ = writeln!(doc, "    {} : {}", column.name, column.dtype);
    }
    let _ = write!(doc, "\nDomain\n------\n    {}\n", domain);
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company_data() -> Dataset {
        Dataset::builder("CompanyData")
            .column("market_cap", DType::Float64)
            .column("sector", "int")
            .column("ticker", "str")
            .column("is_listed", "bool")
            .missing_value("sector", -1i64)
            .build()
            .unwrap()
    }

    #[test]
    fn builds_mixed_columns_with_defaults() {
        let ds = company_data();
        assert_eq!(ds.column_names(), vec!["market_cap", "sector", "ticker", "is_listed"]);
        assert_eq!(ds.get("sector").unwrap().missing_value(), &MissingValue::Int64(-1));
        assert_eq!(
            ds.get("market_cap").unwrap().missing_value(),
            &MissingValue::Float64(f64::NAN)
        );
        assert_eq!(ds.get("ticker").unwrap().missing_value(), &MissingValue::Text(None));
        assert_eq!(ds.get("is_listed").unwrap().missing_value(), &MissingValue::Bool(false));
        assert!(ds.domain().is_generic());
        assert!(ds.doc().contains("sector : int64"));
    }

    #[test]
    fn integer_column_without_sentinel_is_rejected() {
        let err = Dataset::builder("Bad").column("count", DType::Int64).build().unwrap_err();
        assert!(matches!(err, CoreError::Configuration(msg) if msg.contains("explicit missing value")));
    }

    #[test]
    fn currency_aware_requires_float() {
        let err = Dataset::builder("Bad")
            .column("label", "str")
            .currency_aware("label", true)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(msg) if msg.contains("currency-aware")));

        let ok = Dataset::builder("Prices")
            .column("price_local", "float")
            .currency_aware("price_local", true)
            .build()
            .unwrap();
        assert!(ok.get("price_local").unwrap().currency_aware());
    }

    #[test]
    fn rejects_bad_names_and_duplicates() {
        for name in ["1metric", "metric-1", "", "_hidden"] {
            assert!(Dataset::builder("X").column(name, "float").build().is_err(), "{}", name);
        }
        let dup = Dataset::builder("X").column("a", "float").column("a", "int").build();
        assert!(dup.is_err());
    }

    #[test]
    fn rejects_options_for_undeclared_columns() {
        let err = Dataset::builder("X")
            .column("a", "float")
            .missing_value("b", 0.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(msg) if msg.contains("'b'")));
    }

    #[test]
    fn define_matches_builder() {
        let mut options = DatasetOptions::default();
        options.missing_values.insert("sector".to_string(), Value::Int64(-1));
        options.doc = Some("fundamentals".to_string());
        let ds = define(
            "CompanyData",
            [("pe_ratio", DTypeSpec::from(DType::Float64)), ("sector", "int".into())],
            options,
        )
        .unwrap();
        assert_eq!(ds.doc(), "fundamentals");
        assert_eq!(ds.get("sector").unwrap().dtype(), DType::Int64);
    }

    #[test]
    fn ownership_accepts_generic_form() {
        let generic = company_data();
        let us = generic.specialize(Domain::calendar("US", "XNYS"));

        let generic_col = generic.column("sector").unwrap();
        let us_col = us.column("sector").unwrap();

        assert!(us.owns(&generic_col));
        assert!(us.owns(&us_col));
        assert!(!generic.owns(&us_col));
        assert_eq!(us_col.qualname(), "CompanyData<US/XNYS>.sector");

        let other = Dataset::builder("Other")
            .column("sector", "int")
            .missing_value("sector", -1i64)
            .build()
            .unwrap();
        assert!(!us.owns(&other.column("sector").unwrap()));
    }

    #[test]
    fn unknown_column_lists_available() {
        let err = company_data().column("nope").unwrap_err();
        assert!(matches!(err, CoreError::Configuration(msg) if msg.contains("market_cap")));
    }
}
