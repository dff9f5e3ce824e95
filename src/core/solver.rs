use super::engine::TaxProfile;
use super::error::{SalaryError, require_non_negative, require_positive};
use super::tables::TaxTableStore;
use super::types::{BackwardResolution, CalculationRequest, CalculationResult, SalaryPeriod};

/// Net salary tolerance, in period currency units.
pub const NET_TOLERANCE: f64 = 0.1;
pub const MAX_ITERATIONS: u32 = 50;
/// Upper search bound as a multiple of the net salary left after the travel
/// allowance. Wide enough for marginal rates up to 45% when the allowance is
/// small next to the salary.
pub const UPPER_BOUND_MULTIPLIER: f64 = 2.5;
/// Doublings allowed while widening an upper bound that falls short.
pub const MAX_EXPANSIONS: u32 = 32;
pub const MAX_RELATIVE_ERROR: f64 = 0.05;

/// The inputs a backward strategy searches over: everything but the basic
/// salary is fixed.
#[derive(Debug, Clone, Copy)]
pub struct BackwardProblem<'a> {
    pub profile: TaxProfile<'a>,
    pub period: SalaryPeriod,
    pub travel_allowance: f64,
    pub target_net: f64,
}

impl BackwardProblem<'_> {
    pub fn evaluate(&self, basic_salary: f64) -> CalculationResult {
        self.profile.forward(basic_salary, self.travel_allowance, self.period)
    }

    fn error(&self, result: &CalculationResult) -> f64 {
        result.net - self.target_net
    }
}

/// What a failed strategy tried, kept for error reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveAttempt {
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub best: Option<CalculationResult>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StrategyOutcome {
    Resolved(BackwardResolution),
    Failed(SolveAttempt),
}

pub trait BackwardStrategy {
    fn name(&self) -> &'static str;
    fn solve(&self, problem: &BackwardProblem<'_>) -> StrategyOutcome;
}

#[derive(Debug, Clone, Copy)]
pub struct BisectionIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_basic: f64,
    pub candidate_net: f64,
}

/// Where a bisection starts searching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchBounds {
    /// `[net - travel, (net - travel) * multiplier]`.
    NetMultiple { multiplier: f64 },
    /// `[0, net]`, with the upper bound doubled until it reaches the target.
    Widening { max_expansions: u32 },
}

/// Binary search on basic salary. Net pay rises with basic salary, so the
/// search moves towards the target from either side. The search only runs
/// on an interval whose ends straddle the target net.
#[derive(Debug, Clone, Copy)]
pub struct Bisection {
    pub tolerance: f64,
    pub max_iterations: u32,
    pub bounds: SearchBounds,
}

impl Default for Bisection {
    fn default() -> Self {
        Self::anchored()
    }
}

impl Bisection {
    pub const fn anchored() -> Self {
        Self {
            tolerance: NET_TOLERANCE,
            max_iterations: MAX_ITERATIONS,
            bounds: SearchBounds::NetMultiple {
                multiplier: UPPER_BOUND_MULTIPLIER,
            },
        }
    }

    pub const fn widening() -> Self {
        Self {
            tolerance: NET_TOLERANCE,
            max_iterations: MAX_ITERATIONS,
            bounds: SearchBounds::Widening {
                max_expansions: MAX_EXPANSIONS,
            },
        }
    }

    pub fn initial_bounds(&self, problem: &BackwardProblem<'_>) -> (f64, f64) {
        match self.bounds {
            SearchBounds::NetMultiple { multiplier } => {
                let span = problem.target_net - problem.travel_allowance;
                (span.max(0.0), span * multiplier)
            }
            SearchBounds::Widening { .. } => (0.0, problem.target_net.max(1.0)),
        }
    }

    /// Pushes `hi` up until its net reaches the target. Returns the final
    /// upper bound and its evaluation.
    fn widen(&self, problem: &BackwardProblem<'_>, hi: f64) -> (f64, CalculationResult) {
        let mut hi = hi;
        let mut eval = problem.evaluate(hi);
        if let SearchBounds::Widening { max_expansions } = self.bounds {
            let mut expansions = 0;
            while problem.error(&eval) < 0.0 && expansions < max_expansions {
                expansions += 1;
                hi *= 2.0;
                eval = problem.evaluate(hi);
            }
            tracing::trace!(expansions, upper_bound = hi, "widened bisection bounds");
        }
        (hi, eval)
    }
}

impl BackwardStrategy for Bisection {
    fn name(&self) -> &'static str {
        match self.bounds {
            SearchBounds::NetMultiple { .. } => "bisection",
            SearchBounds::Widening { .. } => "widening-bisection",
        }
    }

    fn solve(&self, problem: &BackwardProblem<'_>) -> StrategyOutcome {
        let (mut lo, hi) = self.initial_bounds(problem);
        let lower_bound = lo;

        if !hi.is_finite() || hi < lo {
            return StrategyOutcome::Failed(SolveAttempt {
                lower_bound,
                upper_bound: hi,
                best: None,
            });
        }

        let (mut hi, at_hi) = self.widen(problem, hi);
        let upper_bound = hi;
        let at_lo = problem.evaluate(lo);
        let mut best = if problem.error(&at_lo).abs() < problem.error(&at_hi).abs() {
            at_lo
        } else {
            at_hi
        };

        if problem.error(&at_lo) > 0.0 || problem.error(&at_hi) < 0.0 {
            tracing::debug!(
                lower_bound,
                upper_bound,
                lower_net = at_lo.net,
                upper_net = at_hi.net,
                "bisection bounds do not straddle the target"
            );
            return StrategyOutcome::Failed(SolveAttempt {
                lower_bound,
                upper_bound,
                best: Some(best),
            });
        }

        let mut it = 0;
        while it < self.max_iterations {
            it += 1;
            let mid = (lo + hi) * 0.5;
            let eval = problem.evaluate(mid);
            let error = problem.error(&eval);
            let step = BisectionIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_basic: mid,
                candidate_net: eval.net,
            };
            tracing::trace!(?step, "bisection step");

            if error.abs() < self.tolerance {
                return StrategyOutcome::Resolved(BackwardResolution {
                    result: eval,
                    strategy: self.name(),
                    iterations: it,
                    converged: true,
                });
            }

            if error < 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }

            // The target lies within the remaining interval.
            if hi - lo < self.tolerance {
                return StrategyOutcome::Resolved(BackwardResolution {
                    result: eval,
                    strategy: self.name(),
                    iterations: it,
                    converged: false,
                });
            }

            if problem.error(&best).abs() > error.abs() {
                best = eval;
            }
        }

        StrategyOutcome::Failed(SolveAttempt {
            lower_bound,
            upper_bound,
            best: Some(best),
        })
    }
}

/// Closed-form estimate from the marginal rate of the bracket holding the
/// annualised target, refined by one Newton step on the net pay curve.
#[derive(Debug, Clone, Copy)]
pub struct LinearEstimate {
    pub max_relative_error: f64,
    pub tolerance: f64,
}

impl Default for LinearEstimate {
    fn default() -> Self {
        Self {
            max_relative_error: MAX_RELATIVE_ERROR,
            tolerance: NET_TOLERANCE,
        }
    }
}

impl LinearEstimate {
    /// Slope is measured over one currency unit.
    const SLOPE_STEP: f64 = 1.0;

    pub fn initial_estimate(&self, problem: &BackwardProblem<'_>) -> Option<f64> {
        let table = problem.profile.table;
        let annual_target = problem.period.annualize(problem.target_net);
        let marginal_rate = table
            .bracket_for(annual_target)
            .map(|bracket| bracket.rate)
            .unwrap_or(0.0);
        let retained = 1.0 - marginal_rate - table.uif_rate;
        if retained <= 0.0 {
            return None;
        }
        Some((problem.target_net / retained - problem.travel_allowance).max(0.0))
    }
}

impl BackwardStrategy for LinearEstimate {
    fn name(&self) -> &'static str {
        "linear-estimate"
    }

    fn solve(&self, problem: &BackwardProblem<'_>) -> StrategyOutcome {
        let Some(estimate) = self.initial_estimate(problem) else {
            return StrategyOutcome::Failed(SolveAttempt {
                lower_bound: 0.0,
                upper_bound: 0.0,
                best: None,
            });
        };

        let first = problem.evaluate(estimate);
        let slope =
            (problem.evaluate(estimate + Self::SLOPE_STEP).net - first.net) / Self::SLOPE_STEP;
        let refined_basic = if slope > 0.0 {
            (estimate - problem.error(&first) / slope).max(0.0)
        } else {
            estimate
        };
        let refined = problem.evaluate(refined_basic);

        let best = if problem.error(&refined).abs() <= problem.error(&first).abs() {
            refined
        } else {
            first
        };
        let relative_error = problem.error(&best).abs() / problem.target_net;
        tracing::debug!(estimate, refined_basic, slope, relative_error, "linear estimate");

        if relative_error <= self.max_relative_error {
            StrategyOutcome::Resolved(BackwardResolution {
                result: best,
                strategy: self.name(),
                iterations: 1,
                converged: problem.error(&best).abs() < self.tolerance,
            })
        } else {
            StrategyOutcome::Failed(SolveAttempt {
                lower_bound: estimate.min(refined_basic),
                upper_bound: estimate.max(refined_basic),
                best: Some(best),
            })
        }
    }
}

/// Anchored bisection, then a bisection that widens its own bounds, then the
/// linear estimate.
pub fn default_strategies() -> [&'static dyn BackwardStrategy; 3] {
    static BISECTION: Bisection = Bisection::anchored();
    static WIDENING_BISECTION: Bisection = Bisection::widening();
    static LINEAR_ESTIMATE: LinearEstimate = LinearEstimate {
        max_relative_error: MAX_RELATIVE_ERROR,
        tolerance: NET_TOLERANCE,
    };
    [&BISECTION, &WIDENING_BISECTION, &LINEAR_ESTIMATE]
}

/// Finds the basic salary whose forward calculation yields `request.amount`
/// as net pay.
pub fn resolve_backward(
    store: &TaxTableStore,
    request: &CalculationRequest,
) -> Result<BackwardResolution, SalaryError> {
    resolve_backward_with(store, request, &default_strategies())
}

/// Tries each strategy in order and returns the first resolution.
pub fn resolve_backward_with(
    store: &TaxTableStore,
    request: &CalculationRequest,
    strategies: &[&dyn BackwardStrategy],
) -> Result<BackwardResolution, SalaryError> {
    let target_net = require_positive("net salary", request.amount)?;
    let travel_allowance = require_non_negative("travel allowance", request.travel_allowance)?;
    let problem = BackwardProblem {
        profile: TaxProfile::resolve(store, &request.tax_year, &request.age_band)?,
        period: request.period,
        travel_allowance,
        target_net,
    };

    let mut first_attempt: Option<SolveAttempt> = None;
    let mut best: Option<CalculationResult> = None;
    for strategy in strategies {
        match strategy.solve(&problem) {
            StrategyOutcome::Resolved(resolution) => {
                tracing::debug!(
                    strategy = resolution.strategy,
                    iterations = resolution.iterations,
                    converged = resolution.converged,
                    target_net,
                    basic = resolution.result.basic,
                    "backward calculation resolved"
                );
                return Ok(resolution);
            }
            StrategyOutcome::Failed(attempt) => {
                tracing::warn!(
                    strategy = strategy.name(),
                    target_net,
                    lower_bound = attempt.lower_bound,
                    upper_bound = attempt.upper_bound,
                    "backward strategy failed"
                );
                if let Some(candidate) = attempt.best {
                    let candidate_error = problem.error(&candidate).abs();
                    if best.is_none_or(|b| problem.error(&b).abs() > candidate_error) {
                        best = Some(candidate);
                    }
                }
                first_attempt.get_or_insert(attempt);
            }
        }
    }

    let (lower_bound, upper_bound) = first_attempt
        .map(|attempt| (attempt.lower_bound, attempt.upper_bound))
        .unwrap_or((0.0, 0.0));
    Err(SalaryError::UnresolvableBackwardCalculation {
        target_net,
        lower_bound,
        upper_bound,
        best_basic: best.map(|b| b.basic),
        best_net: best.map(|b| b.net),
    })
}
