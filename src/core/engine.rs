use super::error::{SalaryError, require_non_negative, require_positive};
use super::solver::resolve_backward;
use super::tables::{TaxTableStore, TaxYearTable};
use super::types::{
    AgeBand, CalculationMode, CalculationRequest, CalculationResult, Resolution, SalaryPeriod,
};

/// Share of a travel allowance that counts as taxable income.
pub const TRAVEL_ALLOWANCE_TAXABLE_RATE: f64 = 0.8;

pub fn to_annual(amount: f64, period: SalaryPeriod) -> f64 {
    period.annualize(amount)
}

pub fn from_annual(amount: f64, period: SalaryPeriod) -> f64 {
    period.deannualize(amount)
}

/// A tax year's table together with the rebate for one age band.
#[derive(Debug, Clone, Copy)]
pub struct TaxProfile<'a> {
    pub table: &'a TaxYearTable,
    pub age_band: AgeBand,
    pub rebate: f64,
}

impl<'a> TaxProfile<'a> {
    pub fn resolve(
        store: &'a TaxTableStore,
        tax_year: &str,
        age_band: &str,
    ) -> Result<Self, SalaryError> {
        let table = store.table(tax_year)?;
        let band = AgeBand::from_key(age_band)
            .ok_or_else(|| SalaryError::UnknownAgeBand(age_band.to_string()))?;
        let rebate = table
            .rebate(band)
            .ok_or_else(|| SalaryError::UnknownAgeBand(age_band.to_string()))?;
        Ok(Self {
            table,
            age_band: band,
            rebate,
        })
    }

    pub fn annual_paye(&self, annual_taxable_income: f64) -> f64 {
        let tax = self
            .table
            .bracket_for(annual_taxable_income)
            .map(|bracket| bracket.tax_for(annual_taxable_income))
            .unwrap_or(0.0);
        (tax - self.rebate).max(0.0)
    }

    pub fn period_uif(&self, period_gross: f64) -> f64 {
        uif_for(self.table, period_gross)
    }

    /// Gross, PAYE, UIF and net for one period. Inputs are assumed valid.
    pub fn forward(
        &self,
        basic_salary: f64,
        travel_allowance: f64,
        period: SalaryPeriod,
    ) -> CalculationResult {
        let period_gross = basic_salary + travel_allowance;
        let annual_basic = to_annual(basic_salary, period);
        let annual_travel = to_annual(travel_allowance, period);
        let taxable_travel = annual_travel * TRAVEL_ALLOWANCE_TAXABLE_RATE;
        let annual_taxable_income = annual_basic + taxable_travel;

        let annual_paye = self.annual_paye(annual_taxable_income);
        let period_paye = from_annual(annual_paye, period);
        let period_uif = self.period_uif(period_gross);

        CalculationResult {
            basic: basic_salary,
            travel: travel_allowance,
            gross: period_gross,
            paye: period_paye,
            uif: period_uif,
            net: period_gross - period_paye - period_uif,
            annual_taxable_income,
        }
    }
}

fn uif_for(table: &TaxYearTable, period_gross: f64) -> f64 {
    period_gross.min(table.uif_ceiling) * table.uif_rate
}

/// Annual PAYE after the age band's rebate, never below zero.
pub fn calculate_paye(
    store: &TaxTableStore,
    annual_taxable_income: f64,
    tax_year: &str,
    age_band: &str,
) -> Result<f64, SalaryError> {
    let income = require_non_negative("annual taxable income", annual_taxable_income)?;
    let profile = TaxProfile::resolve(store, tax_year, age_band)?;
    Ok(profile.annual_paye(income))
}

/// UIF for one period. The ceiling is compared with the period's gross as is.
pub fn calculate_uif(
    store: &TaxTableStore,
    period_gross: f64,
    tax_year: &str,
) -> Result<f64, SalaryError> {
    let gross = require_non_negative("period gross", period_gross)?;
    let table = store.table(tax_year)?;
    Ok(uif_for(table, gross))
}

/// Derives net pay from a basic salary. `request.amount` is read as the
/// basic salary.
pub fn resolve_forward(
    store: &TaxTableStore,
    request: &CalculationRequest,
) -> Result<CalculationResult, SalaryError> {
    let basic_salary = require_positive("basic salary", request.amount)?;
    let travel_allowance = require_non_negative("travel allowance", request.travel_allowance)?;
    let profile = TaxProfile::resolve(store, &request.tax_year, &request.age_band)?;

    let result = profile.forward(basic_salary, travel_allowance, request.period);
    tracing::debug!(
        tax_year = %request.tax_year,
        period = %request.period,
        age_band = %profile.age_band,
        basic = result.basic,
        net = result.net,
        "forward calculation"
    );
    Ok(result)
}

pub fn resolve(
    store: &TaxTableStore,
    request: &CalculationRequest,
) -> Result<Resolution, SalaryError> {
    match request.mode {
        CalculationMode::Forward => resolve_forward(store, request).map(Resolution::Forward),
        CalculationMode::Backward => resolve_backward(store, request).map(Resolution::Backward),
    }
}
