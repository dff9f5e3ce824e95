use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use super::error::SalaryError;
use super::types::AgeBand;

const BUILTIN_TAX_TABLES: &str = include_str!("../../config/tax_tables.toml");

/// Errors raised while loading or validating tax tables.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot read tax tables from '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tax table TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no tax years configured")]
    NoTaxYears,

    #[error("tax year {year}: {reason}")]
    Invalid { year: String, reason: String },
}

impl TableError {
    fn invalid(year: &str, reason: impl Into<String>) -> Self {
        TableError::Invalid {
            year: year.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxBracket {
    pub min: f64,
    /// `f64::INFINITY` for the top bracket.
    pub max: f64,
    pub rate: f64,
    /// Tax owed at `min`.
    pub base: f64,
}

impl TaxBracket {
    pub fn is_open_ended(&self) -> bool {
        self.max.is_infinite()
    }

    /// Tax owed on `income` within this bracket, before rebates.
    ///
    /// The extra unit added to `income - min` is part of the published
    /// calculation and shifts every result by one marginal-rate step.
    pub fn tax_for(&self, income: f64) -> f64 {
        self.base + self.rate * (income - self.min + 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaxYearTable {
    pub brackets: Vec<TaxBracket>,
    pub rebates: BTreeMap<AgeBand, f64>,
    /// Cap on the gross pay that attracts UIF, compared against period gross.
    pub uif_ceiling: f64,
    pub uif_rate: f64,
}

impl TaxYearTable {
    /// Bracket that applies to `income`: the last one whose `min` is at or
    /// below it. Incomes between one bracket's `max` and the next `min`
    /// stay in the lower bracket.
    ///
    /// Tax is non-decreasing over whole-unit steps. Between two whole units
    /// it can dip: the lower bracket's `+1` offset makes 237100.9 owe a few
    /// cents more than 237101.
    pub fn bracket_for(&self, income: f64) -> Option<&TaxBracket> {
        self.brackets.iter().rev().find(|bracket| income >= bracket.min)
    }

    pub fn rebate(&self, age_band: AgeBand) -> Option<f64> {
        self.rebates.get(&age_band).copied()
    }

    fn validate(&self, year: &str) -> Result<(), TableError> {
        let Some(last) = self.brackets.last() else {
            return Err(TableError::invalid(year, "no tax brackets"));
        };

        for bracket in &self.brackets {
            if !bracket.min.is_finite() || bracket.min < 0.0 {
                return Err(TableError::invalid(
                    year,
                    format!("bracket minimum {} must be >= 0", bracket.min),
                ));
            }
            if !bracket.base.is_finite() || bracket.base < 0.0 {
                return Err(TableError::invalid(
                    year,
                    format!("bracket base {} must be >= 0", bracket.base),
                ));
            }
            if !(0.0..=1.0).contains(&bracket.rate) {
                return Err(TableError::invalid(
                    year,
                    format!("bracket rate {} must be between 0 and 1", bracket.rate),
                ));
            }
            if bracket.max < bracket.min {
                return Err(TableError::invalid(
                    year,
                    format!("bracket {}..{} is inverted", bracket.min, bracket.max),
                ));
            }
        }

        if !last.is_open_ended() {
            return Err(TableError::invalid(year, "top bracket must have no maximum"));
        }

        for pair in self.brackets.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if lower.is_open_ended() {
                return Err(TableError::invalid(
                    year,
                    format!(
                        "bracket starting at {} has no maximum but is not the top bracket",
                        lower.min
                    ),
                ));
            }
            if lower.max + 1.0 != upper.min {
                return Err(TableError::invalid(
                    year,
                    format!(
                        "brackets are not contiguous: {} is followed by {}",
                        lower.max, upper.min
                    ),
                ));
            }
            if upper.rate <= lower.rate {
                return Err(TableError::invalid(
                    year,
                    format!(
                        "bracket rates must increase: {} is followed by {}",
                        lower.rate, upper.rate
                    ),
                ));
            }
        }

        if !self.uif_ceiling.is_finite() || self.uif_ceiling < 0.0 {
            return Err(TableError::invalid(year, "uif_ceiling must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.uif_rate) {
            return Err(TableError::invalid(year, "uif_rate must be between 0 and 1"));
        }

        for (band, rebate) in &self.rebates {
            if !rebate.is_finite() || *rebate < 0.0 {
                return Err(TableError::invalid(
                    year,
                    format!("rebate for {band} must be >= 0"),
                ));
            }
        }
        let ordered: Vec<(AgeBand, f64)> = AgeBand::ALL
            .iter()
            .filter_map(|band| self.rebate(*band).map(|rebate| (*band, rebate)))
            .collect();
        for pair in ordered.windows(2) {
            let ((younger, younger_rebate), (older, older_rebate)) = (pair[0], pair[1]);
            if older_rebate < younger_rebate {
                return Err(TableError::invalid(
                    year,
                    format!("rebate for {older} must be >= rebate for {younger}"),
                ));
            }
        }

        Ok(())
    }
}

/// Read-only tax tables keyed by tax year, loaded once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxTableStore {
    years: BTreeMap<String, TaxYearTable>,
}

impl TaxTableStore {
    /// Tables compiled into the binary from `config/tax_tables.toml`.
    pub fn builtin() -> Result<Self, TableError> {
        Self::from_toml_str(BUILTIN_TAX_TABLES)
    }

    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let contents = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads tables from `path` when given, otherwise the built-in tables.
    pub fn load(path: Option<&Path>) -> Result<Self, TableError> {
        let store = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::builtin()?,
        };
        let source = path.map_or_else(|| "builtin".to_string(), |p| p.display().to_string());
        tracing::debug!(
            %source,
            years = ?store.years().collect::<Vec<_>>(),
            "loaded tax tables"
        );
        Ok(store)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, TableError> {
        let raw: RawTaxTables = toml::from_str(contents)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawTaxTables) -> Result<Self, TableError> {
        if raw.years.is_empty() {
            return Err(TableError::NoTaxYears);
        }

        let mut years = BTreeMap::new();
        for (year, raw_year) in raw.years {
            let mut rebates = BTreeMap::new();
            for (key, amount) in raw_year.rebates {
                let band = AgeBand::from_key(&key).ok_or_else(|| {
                    TableError::invalid(&year, format!("unknown age band '{key}'"))
                })?;
                rebates.insert(band, amount);
            }

            let table = TaxYearTable {
                brackets: raw_year
                    .brackets
                    .into_iter()
                    .map(|b| TaxBracket {
                        min: b.min,
                        max: b.max.unwrap_or(f64::INFINITY),
                        rate: b.rate,
                        base: b.base,
                    })
                    .collect(),
                rebates,
                uif_ceiling: raw_year.uif_ceiling,
                uif_rate: raw_year.uif_rate,
            };
            table.validate(&year)?;
            years.insert(year, table);
        }

        Ok(Self { years })
    }

    pub fn table(&self, tax_year: &str) -> Result<&TaxYearTable, SalaryError> {
        self.years
            .get(tax_year)
            .ok_or_else(|| SalaryError::UnknownTaxYear(tax_year.to_string()))
    }

    /// Configured tax years, oldest first.
    pub fn years(&self) -> impl Iterator<Item = &str> {
        self.years.keys().map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct RawTaxTables {
    #[serde(default)]
    years: BTreeMap<String, RawTaxYear>,
}

#[derive(Debug, Deserialize)]
struct RawTaxYear {
    brackets: Vec<RawBracket>,
    #[serde(default)]
    rebates: BTreeMap<String, f64>,
    uif_ceiling: f64,
    #[serde(default = "default_uif_rate")]
    uif_rate: f64,
}

#[derive(Debug, Deserialize)]
struct RawBracket {
    min: f64,
    max: Option<f64>,
    rate: f64,
    base: f64,
}

fn default_uif_rate() -> f64 {
    0.01
}
