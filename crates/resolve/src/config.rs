use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::ResolveError;
use crate::load::parse_timestamp;
use crate::recurring::RecurringRules;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub name: String,
    /// Instant the recurring classifier evaluates at. Defaults to local now.
    #[serde(default, deserialize_with = "deserialize_instant")]
    pub reference_instant: Option<NaiveDateTime>,
    pub source: SourceConfig,
    #[serde(default)]
    pub recurring: RecurringRules,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Accepts the layouts `load::parse_timestamp` knows, quoted or as a native
/// TOML local datetime / date. Offset datetimes are rejected.
fn deserialize_instant<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    struct InstantVisitor;

    impl<'de> Visitor<'de> for InstantVisitor {
        type Value = NaiveDateTime;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a timestamp like \"2026-06-30 12:00:00\" or a TOML local datetime")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<NaiveDateTime, E> {
            parse_timestamp(value)
                .ok_or_else(|| E::custom(format!("invalid timestamp '{value}'")))
        }

        fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<NaiveDateTime, A::Error> {
            let datetime =
                toml::value::Datetime::deserialize(de::value::MapAccessDeserializer::new(map))?;
            if datetime.offset.is_some() {
                return Err(de::Error::custom(format!(
                    "reference_instant {datetime} has an offset; use a local datetime"
                )));
            }
            self.visit_str(&datetime.to_string())
        }
    }

    deserializer.deserialize_any(InstantVisitor).map(Some)
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Where the snapshot is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Four CSV extracts. `distributions` may be omitted, in which case no
    /// donation is attributed to a business.
    Csv {
        donors: String,
        donations: String,
        tax_units: String,
        #[serde(default)]
        distributions: Option<String>,
    },
    Sqlite {
        path: String,
        #[serde(default)]
        tables: TableNames,
    },
}

impl SourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Csv { .. } => "csv",
            Self::Sqlite { .. } => "sqlite",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableNames {
    #[serde(default = "default_donors_table")]
    pub donors: String,
    #[serde(default = "default_donations_table")]
    pub donations: String,
    #[serde(default = "default_tax_units_table")]
    pub tax_units: String,
    #[serde(default = "default_distributions_table")]
    pub distributions: String,
}

fn default_donors_table() -> String {
    "donors".into()
}

fn default_donations_table() -> String {
    "donations".into()
}

fn default_tax_units_table() -> String {
    "tax_units".into()
}

fn default_distributions_table() -> String {
    "distribution_links".into()
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            donors: default_donors_table(),
            donations: default_donations_table(),
            tax_units: default_tax_units_table(),
            distributions: default_distributions_table(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub json: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl RunConfig {
    pub fn from_toml(input: &str) -> Result<Self, ResolveError> {
        let config: RunConfig =
            toml::from_str(input).map_err(|e| ResolveError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.name.trim().is_empty() {
            return Err(ResolveError::ConfigValidation("name must not be empty".into()));
        }

        let ids = &self.recurring.agreement_payment_ids;
        if ids.is_empty() {
            return Err(ResolveError::ConfigValidation(
                "recurring.agreement_payment_ids must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                return Err(ResolveError::ConfigValidation(format!(
                    "recurring.agreement_payment_ids: duplicate payment id {id}"
                )));
            }
        }

        match &self.source {
            SourceConfig::Csv {
                donors,
                donations,
                tax_units,
                distributions,
            } => {
                non_blank("source.donors", donors)?;
                non_blank("source.donations", donations)?;
                non_blank("source.tax_units", tax_units)?;
                if let Some(distributions) = distributions {
                    non_blank("source.distributions", distributions)?;
                }
            }
            SourceConfig::Sqlite { path, tables } => {
                non_blank("source.path", path)?;
                non_blank("source.tables.donors", &tables.donors)?;
                non_blank("source.tables.donations", &tables.donations)?;
                non_blank("source.tables.tax_units", &tables.tax_units)?;
                non_blank("source.tables.distributions", &tables.distributions)?;
            }
        }

        if let Some(dir) = &self.output.dir {
            non_blank("output.dir", dir)?;
        }
        if let Some(json) = &self.output.json {
            non_blank("output.json", json)?;
        }

        Ok(())
    }
}

fn non_blank(field: &str, value: &str) -> Result<(), ResolveError> {
    if value.trim().is_empty() {
        return Err(ResolveError::ConfigValidation(format!("{field} must not be blank")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CSV: &str = r#"
name = "nightly"
reference_instant = "2026-06-30T12:00:00"

[source]
kind = "csv"
donors = "donors.csv"
donations = "donations.csv"
tax_units = "tax_units.csv"
distributions = "distributions.csv"

[output]
dir = "out"
json = "result.json"
"#;

    #[test]
    fn parse_valid_csv() {
        let config = RunConfig::from_toml(VALID_CSV).unwrap();
        assert_eq!(config.name, "nightly");
        assert_eq!(
            config.reference_instant.unwrap().to_string(),
            "2026-06-30 12:00:00"
        );
        assert_eq!(config.source.kind(), "csv");
        assert_eq!(config.recurring, RecurringRules::default());
        assert_eq!(config.output.dir.as_deref(), Some("out"));
        assert_eq!(config.output.json.as_deref(), Some("result.json"));
    }

    #[test]
    fn reference_instant_layouts() {
        for (value, expected) in [
            ("\"2026-06-30 12:00:00\"", "2026-06-30 12:00:00"),
            ("\"2026-06-30T12:00:00.250\"", "2026-06-30 12:00:00.250"),
            ("\"2026-06-30\"", "2026-06-30 00:00:00"),
            ("2026-06-30T12:00:00", "2026-06-30 12:00:00"),
            ("2026-06-30 08:15:00", "2026-06-30 08:15:00"),
            ("2026-06-30", "2026-06-30 00:00:00"),
        ] {
            let input = VALID_CSV.replace("\"2026-06-30T12:00:00\"", value);
            let config = RunConfig::from_toml(&input)
                .unwrap_or_else(|e| panic!("reference_instant = {value}: {e}"));
            assert_eq!(config.reference_instant.unwrap().to_string(), expected, "{value}");
        }
    }

    #[test]
    fn rejects_bad_reference_instant() {
        for value in ["\"tomorrow\"", "2026-06-30T12:00:00Z", "12"] {
            let input = VALID_CSV.replace("\"2026-06-30T12:00:00\"", value);
            let err = RunConfig::from_toml(&input).unwrap_err();
            assert!(matches!(err, ResolveError::ConfigParse(_)), "{value}: {err}");
        }
    }

    #[test]
    fn parse_sqlite_with_table_overrides() {
        let input = r#"
name = "db"

[source]
kind = "sqlite"
path = "donations.db"

[source.tables]
donors = "Donors"
"#;
        let config = RunConfig::from_toml(input).unwrap();
        assert!(config.reference_instant.is_none());
        match config.source {
            SourceConfig::Sqlite { path, tables } => {
                assert_eq!(path, "donations.db");
                assert_eq!(tables.donors, "Donors");
                assert_eq!(tables.donations, "donations");
                assert_eq!(tables.distributions, "distribution_links");
            }
            other => panic!("expected sqlite source, got {other:?}"),
        }
    }

    #[test]
    fn distributions_are_optional() {
        let input = r#"
name = "x"
[source]
kind = "csv"
donors = "d.csv"
donations = "ds.csv"
tax_units = "t.csv"
"#;
        let config = RunConfig::from_toml(input).unwrap();
        assert!(matches!(config.source, SourceConfig::Csv { distributions: None, .. }));
    }

    #[test]
    fn custom_agreement_ids() {
        let input = format!("{VALID_CSV}\n[recurring]\nagreement_payment_ids = [3, 9]\n");
        let config = RunConfig::from_toml(&input).unwrap();
        assert_eq!(config.recurring.agreement_payment_ids, vec![3, 9]);
    }

    #[test]
    fn rejects_empty_name() {
        let input = VALID_CSV.replace("name = \"nightly\"", "name = \"  \"");
        let err = RunConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ResolveError::ConfigValidation(_)));
    }

    #[test]
    fn rejects_empty_agreement_list() {
        let input = format!("{VALID_CSV}\n[recurring]\nagreement_payment_ids = []\n");
        let err = RunConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn rejects_duplicate_agreement_ids() {
        let input = format!("{VALID_CSV}\n[recurring]\nagreement_payment_ids = [3, 7, 3]\n");
        let err = RunConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("duplicate payment id 3"));
    }

    #[test]
    fn rejects_blank_file_name() {
        let input = VALID_CSV.replace("tax_units = \"tax_units.csv\"", "tax_units = \"\"");
        let err = RunConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("source.tax_units"));
    }

    #[test]
    fn rejects_blank_table_name() {
        let input = r#"
name = "db"
[source]
kind = "sqlite"
path = "donations.db"
[source.tables]
tax_units = " "
"#;
        let err = RunConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("source.tables.tax_units"));
    }

    #[test]
    fn rejects_unknown_source_kind() {
        let input = VALID_CSV.replace("kind = \"csv\"", "kind = \"parquet\"");
        let err = RunConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ResolveError::ConfigParse(_)));
    }
}
