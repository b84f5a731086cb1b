use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Line-level fields the extractor knows how to map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Customer,
    Sku,
    Description,
    Quantity,
    UnitPrice,
    LineTotal,
    Currency,
    Unit,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 8] = [
        Self::Customer,
        Self::Sku,
        Self::Description,
        Self::Quantity,
        Self::UnitPrice,
        Self::LineTotal,
        Self::Currency,
        Self::Unit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Sku => "sku",
            Self::Description => "description",
            Self::Quantity => "quantity",
            Self::UnitPrice => "unit_price",
            Self::LineTotal => "line_total",
            Self::Currency => "currency",
            Self::Unit => "unit",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Quantity | Self::UnitPrice | Self::LineTotal)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == normalized)
            .ok_or_else(|| format!("unknown field `{value}`"))
    }
}

/// Stable identifier of a source column, its spreadsheet letter ("B").
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(pub String);

impl ColumnId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
