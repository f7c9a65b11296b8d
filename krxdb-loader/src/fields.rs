//! Field registry: logical field names → physical storage locations.
//!
//! The built-in table covers everything the store materializes; a TOML
//! overlay can add or override entries without touching the query composer.
//! Only price fields are adjustable; volume and value are never multiplied
//! by cumulative adjustments.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use krxdb_core::error::{KdbError, Result};
use krxdb_core::snapshot;
use krxdb_core::store::Table;
use krxdb_core::transforms::universe::UNIVERSE_TIERS;

/// Where a logical field lives and whether adjustment applies to it.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub table: Table,
    pub column: String,
    pub adjustable: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FieldRegistry {
    fields: BTreeMap<String, FieldMapping>,
}

impl FieldRegistry {
    /// The built-in field table.
    pub fn builtin() -> Self {
        let mut fields = BTreeMap::new();
        let mut insert = |name: &str, column: &str, adjustable: bool, description: &str| {
            fields.insert(
                name.to_string(),
                FieldMapping {
                    table: Table::Snapshots,
                    column: column.to_string(),
                    adjustable,
                    description: Some(description.to_string()),
                },
            );
        };

        insert("close", snapshot::COL_CLOSE, true, "daily closing price (won)");
        insert(
            "base_price",
            snapshot::COL_BASE_PRICE,
            true,
            "prior-day reference price after corporate actions (won)",
        );
        insert(
            "change",
            snapshot::COL_CHANGE,
            false,
            "signed change versus the base price (won)",
        );
        insert("volume", snapshot::COL_VOLUME, false, "accumulated traded volume (shares)");
        insert("value", snapshot::COL_VALUE, false, "accumulated traded value (won)");
        insert("name", snapshot::COL_NAME, false, "security short name");
        insert("market", snapshot::COL_MARKET, false, "market segment");
        insert("fluc_rate", snapshot::COL_FLUC_RATE, false, "fluctuation rate as reported");
        insert("fluc_type", snapshot::COL_FLUC_TYPE, false, "fluctuation type code");
        insert(
            "adj_factor",
            snapshot::COL_ADJ_FACTOR,
            false,
            "single-period corporate-action factor",
        );
        insert(
            "liquidity_rank",
            snapshot::COL_LIQUIDITY_RANK,
            false,
            "cross-sectional dense rank of traded value (1 = most liquid)",
        );

        Self { fields }
    }

    /// Built-in table extended (or overridden) by a TOML file.
    ///
    /// ```toml
    /// [fields.turnover]
    /// table = "snapshots"
    /// column = "ACC_TRDVAL"
    /// adjustable = false
    /// ```
    pub fn with_overlay_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| KdbError::Config(format!("read {}: {e}", path.display())))?;
        Self::with_overlay_toml(&contents)
    }

    pub fn with_overlay_toml(toml_str: &str) -> Result<Self> {
        let file: FieldsFile = toml::from_str(toml_str)
            .map_err(|e| KdbError::Config(format!("fields file parse: {e}")))?;

        let mut registry = Self::builtin();
        for (name, spec) in file.fields {
            registry.fields.insert(
                name,
                FieldMapping {
                    table: parse_table(&spec.table)?,
                    column: spec.column,
                    adjustable: spec.adjustable,
                    description: spec.description,
                },
            );
        }
        Ok(registry)
    }

    pub fn resolve(&self, field: &str) -> Result<&FieldMapping> {
        self.fields.get(field).ok_or_else(|| KdbError::Registry {
            field: field.to_string(),
            known: self.field_names(),
        })
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

#[derive(Debug, Deserialize)]
struct FieldsFile {
    #[serde(default)]
    fields: BTreeMap<String, FieldSpec>,
}

#[derive(Debug, Deserialize)]
struct FieldSpec {
    table: String,
    column: String,
    #[serde(default)]
    adjustable: bool,
    #[serde(default)]
    description: Option<String>,
}

fn parse_table(name: &str) -> Result<Table> {
    match name {
        "snapshots" => Ok(Table::Snapshots),
        "universes" => Ok(Table::Universes),
        "cumulative_adjustments" => Ok(Table::CumulativeAdjustments),
        other => Err(KdbError::Config(format!("unknown table '{other}'"))),
    }
}

/// Resolve a universe name (`top_100`…`top_1000`) to its flag column.
pub fn universe_flag_column(name: &str) -> Result<&'static str> {
    universe_tier(name).map(|(_, column)| column)
}

/// Resolve a universe name to its rank threshold.
pub fn universe_threshold(name: &str) -> Result<i32> {
    universe_tier(name).map(|(threshold, _)| threshold)
}

fn universe_tier(name: &str) -> Result<(i32, &'static str)> {
    UNIVERSE_TIERS
        .iter()
        .find(|(threshold, _)| name == format!("top_{threshold}"))
        .copied()
        .ok_or_else(|| KdbError::Registry {
            field: name.to_string(),
            known: UNIVERSE_TIERS
                .iter()
                .map(|(threshold, _)| format!("top_{threshold}"))
                .collect(),
        })
}
