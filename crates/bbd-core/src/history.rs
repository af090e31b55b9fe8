//! Historical return data interchange.
//!
//! Hosts provide history in one of two shapes: a denormalized tabular stream
//! of `(symbol, name, asset_class, year, annual_return)` records, or the
//! structured export payload `{ version, exported_at, assets: [...] }`.
//! Either shape normalizes into [`ReturnHistory`]: per-year rows aligned
//! across asset classes, so that bootstrap sampling of a single row index
//! preserves cross-asset correlations implicitly.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BbdError;
use crate::types::AssetClass;
use crate::BbdResult;

pub const EXPORT_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Interchange shapes
// ---------------------------------------------------------------------------

/// One row of the denormalized tabular interchange stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalReturnRecord {
    pub symbol: String,
    pub name: String,
    pub asset_class: AssetClass,
    pub year: i32,
    pub annual_return: f64,
}

/// A dated return observation inside the structured payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatedReturn {
    pub date: NaiveDate,
    #[serde(rename = "return")]
    pub value: f64,
}

/// One asset series inside the structured payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetExport {
    pub symbol: String,
    pub name: String,
    pub asset_class: AssetClass,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub returns: Vec<DatedReturn>,
}

/// The structured export payload (version 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalDataExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub assets: Vec<AssetExport>,
}

// ---------------------------------------------------------------------------
// Normalized form consumed by the engine
// ---------------------------------------------------------------------------

/// Aligned annual return history.
///
/// `rows[r][i]` is the return of `classes[i]` in calendar year `years[r]`.
/// Rows cover the intersection of years available for every class, so a
/// single row always couples all classes in the same market year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnHistory {
    pub classes: Vec<AssetClass>,
    pub years: Vec<i32>,
    pub rows: Vec<Vec<f64>>,
}

impl ReturnHistory {
    /// Build from the denormalized tabular stream.
    ///
    /// When several symbols map to the same asset class, their returns for a
    /// year are averaged (equal weight) before alignment.
    pub fn from_records(records: &[HistoricalReturnRecord]) -> BbdResult<Self> {
        if records.is_empty() {
            return Err(BbdError::InsufficientData(
                "Historical return stream is empty".into(),
            ));
        }

        // class -> year -> (sum, count)
        let mut by_class: BTreeMap<String, BTreeMap<i32, (f64, u32)>> = BTreeMap::new();
        let mut class_order: Vec<AssetClass> = Vec::new();
        for rec in records {
            if !rec.annual_return.is_finite() {
                return Err(BbdError::ConfigInvalid {
                    field: "annual_return".into(),
                    reason: format!(
                        "Non-finite return for {} in {}",
                        rec.symbol, rec.year
                    ),
                });
            }
            let key = class_key(&rec.asset_class);
            if !class_order.iter().any(|c| class_key(c) == key) {
                class_order.push(rec.asset_class.clone());
            }
            let entry = by_class
                .entry(key)
                .or_default()
                .entry(rec.year)
                .or_insert((0.0, 0));
            entry.0 += rec.annual_return;
            entry.1 += 1;
        }

        Self::align(class_order, &by_class)
    }

    /// Build from the structured export payload. Observation years are taken
    /// from the date of each return entry.
    pub fn from_export(export: &HistoricalDataExport) -> BbdResult<Self> {
        if export.version != EXPORT_FORMAT_VERSION {
            return Err(BbdError::ConfigInvalid {
                field: "version".into(),
                reason: format!(
                    "Unsupported export version {} (expected {})",
                    export.version, EXPORT_FORMAT_VERSION
                ),
            });
        }
        let records: Vec<HistoricalReturnRecord> = export
            .assets
            .iter()
            .flat_map(|asset| {
                asset.returns.iter().map(move |r| HistoricalReturnRecord {
                    symbol: asset.symbol.clone(),
                    name: asset.name.clone(),
                    asset_class: asset.asset_class.clone(),
                    year: chrono::Datelike::year(&r.date),
                    annual_return: r.value,
                })
            })
            .collect();
        Self::from_records(&records)
    }

    fn align(
        class_order: Vec<AssetClass>,
        by_class: &BTreeMap<String, BTreeMap<i32, (f64, u32)>>,
    ) -> BbdResult<Self> {
        // Intersection of years across all classes
        let mut common: Option<Vec<i32>> = None;
        for class in &class_order {
            let years: Vec<i32> = by_class[&class_key(class)].keys().copied().collect();
            common = Some(match common {
                None => years,
                Some(prev) => prev.into_iter().filter(|y| years.contains(y)).collect(),
            });
        }
        let years = common.unwrap_or_default();
        if years.is_empty() {
            return Err(BbdError::InsufficientData(
                "No overlapping years across asset classes".into(),
            ));
        }

        let rows: Vec<Vec<f64>> = years
            .iter()
            .map(|y| {
                class_order
                    .iter()
                    .map(|c| {
                        let (sum, count) = by_class[&class_key(c)][y];
                        sum / count as f64
                    })
                    .collect()
            })
            .collect();

        Ok(ReturnHistory {
            classes: class_order,
            years,
            rows,
        })
    }

    pub fn num_years(&self) -> usize {
        self.rows.len()
    }

    /// Column index of an asset class, if present.
    pub fn column_of(&self, class: &AssetClass) -> Option<usize> {
        self.classes
            .iter()
            .position(|c| class_key(c) == class_key(class))
    }
}

fn class_key(class: &AssetClass) -> String {
    match class {
        AssetClass::Other(s) => format!("other:{s}"),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(symbol: &str, class: AssetClass, year: i32, r: f64) -> HistoricalReturnRecord {
        HistoricalReturnRecord {
            symbol: symbol.into(),
            name: symbol.into(),
            asset_class: class,
            year,
            annual_return: r,
        }
    }

    #[test]
    fn test_from_records_aligns_on_intersection() {
        let records = vec![
            rec("VTI", AssetClass::UsEquity, 2019, 0.30),
            rec("VTI", AssetClass::UsEquity, 2020, 0.20),
            rec("VTI", AssetClass::UsEquity, 2021, 0.25),
            rec("BND", AssetClass::Bonds, 2020, 0.07),
            rec("BND", AssetClass::Bonds, 2021, -0.02),
        ];
        let history = ReturnHistory::from_records(&records).unwrap();
        // 2019 has no bond observation, so only 2020-2021 survive
        assert_eq!(history.years, vec![2020, 2021]);
        assert_eq!(history.rows.len(), 2);
        assert_eq!(history.rows[0], vec![0.20, 0.07]);
        assert_eq!(history.rows[1], vec![0.25, -0.02]);
    }

    #[test]
    fn test_from_records_averages_symbols_in_same_class() {
        let records = vec![
            rec("VTI", AssetClass::UsEquity, 2021, 0.20),
            rec("SPY", AssetClass::UsEquity, 2021, 0.30),
        ];
        let history = ReturnHistory::from_records(&records).unwrap();
        assert_eq!(history.rows[0][0], 0.25);
    }

    #[test]
    fn test_from_records_rejects_empty() {
        assert!(ReturnHistory::from_records(&[]).is_err());
    }

    #[test]
    fn test_from_records_rejects_nan() {
        let records = vec![rec("VTI", AssetClass::UsEquity, 2021, f64::NAN)];
        assert!(ReturnHistory::from_records(&records).is_err());
    }

    #[test]
    fn test_from_export_round_trip() {
        let export = HistoricalDataExport {
            version: 1,
            exported_at: DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            assets: vec![AssetExport {
                symbol: "VTI".into(),
                name: "Total Market".into(),
                asset_class: AssetClass::UsEquity,
                start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
                returns: vec![
                    DatedReturn {
                        date: NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
                        value: 0.18,
                    },
                    DatedReturn {
                        date: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
                        value: 0.22,
                    },
                ],
            }],
        };
        let history = ReturnHistory::from_export(&export).unwrap();
        assert_eq!(history.years, vec![2020, 2021]);
        assert_eq!(history.rows, vec![vec![0.18], vec![0.22]]);
    }

    #[test]
    fn test_from_export_rejects_unknown_version() {
        let export = HistoricalDataExport {
            version: 2,
            exported_at: Utc::now(),
            assets: vec![],
        };
        assert!(ReturnHistory::from_export(&export).is_err());
    }

    #[test]
    fn test_column_of() {
        let records = vec![
            rec("VTI", AssetClass::UsEquity, 2021, 0.2),
            rec("BND", AssetClass::Bonds, 2021, 0.01),
        ];
        let history = ReturnHistory::from_records(&records).unwrap();
        assert_eq!(history.column_of(&AssetClass::Bonds), Some(1));
        assert_eq!(history.column_of(&AssetClass::Cash), None);
    }
}
