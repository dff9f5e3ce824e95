use std::fmt;

use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SalaryPeriod {
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
}

impl SalaryPeriod {
    pub const ALL: [SalaryPeriod; 4] = [
        SalaryPeriod::Weekly,
        SalaryPeriod::Biweekly,
        SalaryPeriod::Monthly,
        SalaryPeriod::Yearly,
    ];

    /// Parses a period key. Anything unrecognised is treated as monthly.
    pub fn from_key(key: &str) -> Self {
        match key {
            "weekly" => SalaryPeriod::Weekly,
            "biweekly" => SalaryPeriod::Biweekly,
            "monthly" => SalaryPeriod::Monthly,
            "yearly" => SalaryPeriod::Yearly,
            other => {
                tracing::debug!(period = other, "unrecognised salary period, using monthly");
                SalaryPeriod::Monthly
            }
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            SalaryPeriod::Weekly => "weekly",
            SalaryPeriod::Biweekly => "biweekly",
            SalaryPeriod::Monthly => "monthly",
            SalaryPeriod::Yearly => "yearly",
        }
    }

    pub fn periods_per_year(self) -> f64 {
        match self {
            SalaryPeriod::Weekly => 52.0,
            SalaryPeriod::Biweekly => 26.0,
            SalaryPeriod::Monthly => 12.0,
            SalaryPeriod::Yearly => 1.0,
        }
    }

    pub fn annualize(self, amount: f64) -> f64 {
        amount * self.periods_per_year()
    }

    pub fn deannualize(self, amount: f64) -> f64 {
        amount / self.periods_per_year()
    }
}

impl fmt::Display for SalaryPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum AgeBand {
    #[serde(rename = "under65")]
    Under65,
    #[serde(rename = "65to75")]
    From65To75,
    #[serde(rename = "over75")]
    Over75,
}

impl AgeBand {
    /// Youngest first; rebates must not decrease along this order.
    pub const ALL: [AgeBand; 3] = [AgeBand::Under65, AgeBand::From65To75, AgeBand::Over75];

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "under65" => Some(AgeBand::Under65),
            "65to75" => Some(AgeBand::From65To75),
            "over75" => Some(AgeBand::Over75),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            AgeBand::Under65 => "under65",
            AgeBand::From65To75 => "65to75",
            AgeBand::Over75 => "over75",
        }
    }
}

impl fmt::Display for AgeBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMode {
    Forward,
    Backward,
}

/// One salary calculation. `amount` is the basic salary for a forward
/// calculation and the desired net salary for a backward one, both in
/// `period` units.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationRequest {
    pub mode: CalculationMode,
    pub tax_year: String,
    pub period: SalaryPeriod,
    pub age_band: String,
    pub amount: f64,
    pub travel_allowance: f64,
}

impl CalculationRequest {
    pub fn forward(
        basic_salary: f64,
        travel_allowance: f64,
        tax_year: impl Into<String>,
        period: SalaryPeriod,
        age_band: impl Into<String>,
    ) -> Self {
        Self {
            mode: CalculationMode::Forward,
            tax_year: tax_year.into(),
            period,
            age_band: age_band.into(),
            amount: basic_salary,
            travel_allowance,
        }
    }

    pub fn backward(
        net_salary: f64,
        travel_allowance: f64,
        tax_year: impl Into<String>,
        period: SalaryPeriod,
        age_band: impl Into<String>,
    ) -> Self {
        Self {
            mode: CalculationMode::Backward,
            tax_year: tax_year.into(),
            period,
            age_band: age_band.into(),
            amount: net_salary,
            travel_allowance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    pub basic: f64,
    pub travel: f64,
    pub gross: f64,
    pub paye: f64,
    pub uif: f64,
    pub net: f64,
    pub annual_taxable_income: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackwardResolution {
    pub result: CalculationResult,
    pub strategy: &'static str,
    pub iterations: u32,
    /// False when the answer is a best-effort midpoint that did not reach
    /// the net tolerance.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Forward(CalculationResult),
    Backward(BackwardResolution),
}

impl Resolution {
    pub fn result(&self) -> &CalculationResult {
        match self {
            Resolution::Forward(result) => result,
            Resolution::Backward(resolution) => &resolution.result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_period_falls_back_to_monthly() {
        assert_eq!(SalaryPeriod::from_key("fortnightly"), SalaryPeriod::Monthly);
        assert_eq!(SalaryPeriod::from_key(""), SalaryPeriod::Monthly);
        assert_eq!(SalaryPeriod::from_key("Weekly"), SalaryPeriod::Monthly);
    }

    #[test]
    fn period_keys_round_trip() {
        for period in SalaryPeriod::ALL {
            assert_eq!(SalaryPeriod::from_key(period.key()), period);
        }
    }

    #[test]
    fn annual_conversion_uses_period_multipliers() {
        assert_eq!(SalaryPeriod::Weekly.annualize(100.0), 5_200.0);
        assert_eq!(SalaryPeriod::Biweekly.annualize(100.0), 2_600.0);
        assert_eq!(SalaryPeriod::Monthly.annualize(100.0), 1_200.0);
        assert_eq!(SalaryPeriod::Yearly.annualize(100.0), 100.0);
        assert_eq!(SalaryPeriod::Monthly.deannualize(360_000.0), 30_000.0);
    }

    #[test]
    fn age_band_keys_parse() {
        assert_eq!(AgeBand::from_key("under65"), Some(AgeBand::Under65));
        assert_eq!(AgeBand::from_key("65to75"), Some(AgeBand::From65To75));
        assert_eq!(AgeBand::from_key("over75"), Some(AgeBand::Over75));
        assert_eq!(AgeBand::from_key("65-75"), None);
    }

    #[test]
    fn calculation_result_serializes_camel_case() {
        let result = CalculationResult {
            basic: 1.0,
            travel: 0.0,
            gross: 1.0,
            paye: 0.0,
            uif: 0.01,
            net: 0.99,
            annual_taxable_income: 12.0,
        };
        let json = serde_json::to_string(&result).expect("result should serialize");
        assert!(json.contains("\"annualTaxableIncome\":12.0"));
        assert!(json.contains("\"net\":0.99"));
    }
}
