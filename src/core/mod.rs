mod engine;
mod error;
mod solver;
mod tables;
mod types;

pub use engine::{
    TRAVEL_ALLOWANCE_TAXABLE_RATE, TaxProfile, calculate_paye, calculate_uif, from_annual,
    resolve, resolve_forward, to_annual,
};
pub use error::SalaryError;
pub use solver::{
    BackwardProblem, BackwardStrategy, Bisection, BisectionIteration, LinearEstimate,
    MAX_ITERATIONS, MAX_RELATIVE_ERROR, NET_TOLERANCE, SolveAttempt, StrategyOutcome,
    UPPER_BOUND_MULTIPLIER, default_strategies, resolve_backward, resolve_backward_with,
};
pub use tables::{TableError, TaxBracket, TaxTableStore, TaxYearTable};
pub use types::{
    AgeBand, BackwardResolution, CalculationMode, CalculationRequest, CalculationResult,
    Resolution, SalaryPeriod,
};
