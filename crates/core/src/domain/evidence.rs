use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of an [`EvidenceCell`] inside an order's [`EvidenceStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(pub usize);

/// Zero-based cell coordinate. Serialized in A1 notation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CellAddress {
    pub row: u32,
    pub col: u32,
}

impl CellAddress {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    pub fn column_letter(&self) -> String {
        column_letter(self.col)
    }

    pub fn parse(a1: &str) -> Option<Self> {
        let trimmed = a1.trim();
        let split = trimmed.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = trimmed.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let mut col = 0u32;
        for ch in letters.chars() {
            let value = u32::from(ch.to_ascii_uppercase() as u8 - b'A') + 1;
            col = col.checked_mul(26)?.checked_add(value)?;
        }
        let row = digits.parse::<u32>().ok()?;
        if row == 0 {
            return None;
        }
        Some(Self { row: row - 1, col: col - 1 })
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letter(self.col), self.row + 1)
    }
}

impl From<CellAddress> for String {
    fn from(value: CellAddress) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for CellAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CellAddress::parse(&value).ok_or_else(|| format!("invalid cell address `{value}`"))
    }
}

/// Column index (0-based) to spreadsheet letters (0 → A, 26 → AA).
pub fn column_letter(index: u32) -> String {
    let mut n = index;
    let mut letters = String::new();
    loop {
        letters.insert(0, char::from(b'A' + (n % 26) as u8));
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters
}

/// A value together with its exact source location and raw form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceCell {
    pub id: EvidenceId,
    pub sheet: String,
    pub address: CellAddress,
    pub raw_value: String,
    pub display_value: String,
    pub number_format: Option<String>,
}

/// Append-only arena of evidence cells. Derived values point into it by id,
/// so the owning order stays a plain tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EvidenceStore {
    cells: Vec<EvidenceCell>,
    #[serde(skip)]
    index: BTreeMap<(String, CellAddress), EvidenceId>,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a cell, returning the existing id when the same location was
    /// already captured.
    pub fn record(
        &mut self,
        sheet: &str,
        address: CellAddress,
        raw_value: impl Into<String>,
        display_value: impl Into<String>,
        number_format: Option<String>,
    ) -> EvidenceId {
        let key = (sheet.to_string(), address);
        if let Some(id) = self.index.get(&key) {
            return *id;
        }

        let id = EvidenceId(self.cells.len());
        self.cells.push(EvidenceCell {
            id,
            sheet: sheet.to_string(),
            address,
            raw_value: raw_value.into(),
            display_value: display_value.into(),
            number_format,
        });
        self.index.insert(key, id);
        id
    }

    pub fn get(&self, id: EvidenceId) -> Option<&EvidenceCell> {
        self.cells.get(id.0)
    }

    pub fn resolve(&self, ids: &[EvidenceId]) -> Vec<EvidenceCell> {
        ids.iter().filter_map(|id| self.get(*id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceCell> {
        self.cells.iter()
    }

    /// Rebuilds the location index after deserialization.
    pub fn reindex(&mut self) {
        self.index = self
            .cells
            .iter()
            .map(|cell| ((cell.sheet.clone(), cell.address), cell.id))
            .collect();
    }
}

impl PartialEq for EvidenceStore {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
    }
}

impl Eq for EvidenceStore {}

#[cfg(test)]
mod tests {
    use super::{column_letter, CellAddress, EvidenceStore};

    #[test]
    fn column_letters_roll_over_after_z() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn a1_notation_parses_back_to_zero_based_coordinates() {
        let address = CellAddress::parse("AB12").expect("valid address");
        assert_eq!(address, CellAddress::new(11, 27));
        assert_eq!(address.to_string(), "AB12");
        assert!(CellAddress::parse("12").is_none());
        assert!(CellAddress::parse("A0").is_none());
    }

    #[test]
    fn recording_same_location_twice_reuses_the_id() {
        let mut store = EvidenceStore::new();
        let first = store.record("Orders", CellAddress::new(1, 2), "10", "10", None);
        let second = store.record("Orders", CellAddress::new(1, 2), "10", "10", None);
        let other = store.record("Orders", CellAddress::new(2, 2), "4", "4", None);

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn addresses_serialize_in_a1_form() {
        let json = serde_json::to_string(&CellAddress::new(0, 2)).expect("serialize");
        assert_eq!(json, "\"C1\"");
        let parsed: CellAddress = serde_json::from_str("\"C1\"").expect("deserialize");
        assert_eq!(parsed, CellAddress::new(0, 2));
    }
}
