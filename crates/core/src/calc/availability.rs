use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::schedule::RentalWindow;
use super::CalcError;

/// One line of the stock model. `aliases` let colloquial names
/// ("martillo demoledor") resolve to the canonical product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub product: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub units: u32,
    #[serde(default)]
    pub next_available: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub product: String,
    pub available: bool,
    pub units_on_hand: u32,
    pub next_available: Option<NaiveDate>,
}

/// Static stock table. A live inventory feed would slot in behind the
/// same `check` contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockTable {
    entries: Vec<StockEntry>,
}

impl StockTable {
    pub fn new(entries: Vec<StockEntry>) -> Self {
        Self { entries }
    }

    /// Default inventory for the construction-equipment catalog.
    pub fn standard() -> Self {
        let entry = |product: &str, units: u32| StockEntry {
            product: product.to_string(),
            aliases: Vec::new(),
            units,
            next_available: None,
        };
        Self {
            entries: vec![
                entry("demoledor", 3),
                entry("rotomartillo", 5),
                entry("compactador", 0),
                entry("bailarina", 2),
            ],
        }
    }

    pub fn products(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.product.as_str())
    }

    pub fn into_entries(self) -> Vec<StockEntry> {
        self.entries
    }

    /// Looks up a product by name or alias; the match is case-insensitive
    /// and tolerates the product name being embedded in a longer phrase.
    /// Unknown products are an error, never a fabricated "in stock".
    pub fn check(
        &self,
        product: &str,
        window: Option<&RentalWindow>,
    ) -> Result<Availability, CalcError> {
        let needle = product.trim().to_lowercase();
        if needle.is_empty() {
            return Err(CalcError::InvalidArgument("product name must not be empty".to_string()));
        }

        let entry = self
            .entries
            .iter()
            .find(|entry| {
                needle.contains(&entry.product.to_lowercase())
                    || entry.aliases.iter().any(|alias| needle.contains(&alias.to_lowercase()))
            })
            .ok_or_else(|| CalcError::ProductNotFound(product.trim().to_string()))?;

        let in_stock = entry.units > 0;
        let back_in_time = match (window, entry.next_available) {
            (Some(window), Some(next)) => next <= window.start,
            _ => false,
        };

        Ok(Availability {
            product: entry.product.clone(),
            available: in_stock || back_in_time,
            units_on_hand: entry.units,
            next_available: entry.next_available,
        })
    }
}

impl Default for StockTable {
    fn default() -> Self {
        Self::standard()
    }
}
