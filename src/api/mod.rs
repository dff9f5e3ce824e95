use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::core::{
    AgeBand, CalculationRequest, CalculationResult, Resolution, SalaryError, SalaryPeriod,
    TRAVEL_ALLOWANCE_TAXABLE_RATE, TaxBracket, TaxTableStore, resolve,
};

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

const UNRESOLVABLE_MESSAGE: &str = "Could not calculate gross salary accurately.";

#[derive(Clone)]
pub struct AppState {
    tables: Arc<TaxTableStore>,
}

impl AppState {
    pub fn new(tables: Arc<TaxTableStore>) -> Self {
        Self { tables }
    }
}

/// A JSON value that may arrive as a number or as text, the way HTML forms
/// tend to send it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    fn as_amount(&self) -> f64 {
        match self {
            Scalar::Number(value) => *value,
            Scalar::Text(text) => text.trim().parse().unwrap_or(f64::NAN),
        }
    }

    fn as_key(&self) -> String {
        match self {
            Scalar::Number(value) => value.to_string(),
            Scalar::Text(text) => text.trim().to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CalculatePayload {
    calculation_type: Option<String>,
    tax_year: Option<Scalar>,
    salary_period: Option<String>,
    age: Option<String>,
    basic_salary: Option<Scalar>,
    net_salary: Option<Scalar>,
    travel_allowance: Option<Scalar>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketResponse {
    pub min: f64,
    /// `None` for the open-ended top bracket.
    pub max: Option<f64>,
    pub rate: f64,
}

impl From<&TaxBracket> for BracketResponse {
    fn from(bracket: &TaxBracket) -> Self {
        Self {
            min: bracket.min,
            max: (!bracket.is_open_ended()).then_some(bracket.max),
            rate: bracket.rate,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverResponse {
    pub strategy: &'static str,
    pub iterations: u32,
    pub converged: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(flatten)]
    pub result: CalculationResult,
    pub taxable_travel: f64,
    pub tax_bracket: Option<BracketResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solver: Option<SolverResponse>,
}

impl CalculateResponse {
    /// Decorates a resolution with the taxable travel share and the bracket
    /// its annual taxable income fell into.
    pub fn from_resolution(store: &TaxTableStore, tax_year: &str, resolution: &Resolution) -> Self {
        let result = *resolution.result();
        let tax_bracket = store
            .table(tax_year)
            .ok()
            .and_then(|table| table.bracket_for(result.annual_taxable_income))
            .map(BracketResponse::from);

        let (success, solver) = match resolution {
            Resolution::Forward(_) => (None, None),
            Resolution::Backward(backward) => (
                Some(true),
                Some(SolverResponse {
                    strategy: backward.strategy,
                    iterations: backward.iterations,
                    converged: backward.converged,
                }),
            ),
        };

        Self {
            success,
            result,
            taxable_travel: result.travel * TRAVEL_ALLOWANCE_TAXABLE_RATE,
            tax_bracket,
            solver,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnresolvableDetails {
    target_net: f64,
    lower_bound: f64,
    upper_bound: f64,
    best_basic: Option<f64>,
    best_net: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<UnresolvableDetails>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaxYearsResponse {
    tax_years: Vec<String>,
    age_bands: [AgeBand; 3],
    salary_periods: [SalaryPeriod; 4],
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/styles.css", get(styles_handler))
        .route("/app.js", get(app_js_handler))
        .route("/api/calculate", post(calculate_handler))
        .route("/api/tax-years", get(tax_years_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(addr: SocketAddr, tables: Arc<TaxTableStore>) -> std::io::Result<()> {
    let app = router(AppState::new(tables));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "salary calculator listening");
    tracing::info!("local access: http://127.0.0.1:{}/", addr.port());

    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn styles_handler() -> impl IntoResponse {
    with_cache_control((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLES_CSS,
    ))
}

async fn app_js_handler() -> impl IntoResponse {
    with_cache_control((
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        APP_JS,
    ))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn tax_years_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        TaxYearsResponse {
            tax_years: state.tables.years().map(str::to_string).collect(),
            age_bands: AgeBand::ALL,
            salary_periods: SalaryPeriod::ALL,
        },
    )
}

async fn calculate_handler(
    State(state): State<AppState>,
    payload: Result<Json<CalculatePayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected calculate body");
            return error_response(StatusCode::BAD_REQUEST, &rejection.body_text());
        }
    };
    calculate_handler_impl(&state.tables, payload)
}

fn calculate_handler_impl(store: &TaxTableStore, payload: CalculatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match resolve(store, &request) {
        Ok(resolution) => {
            tracing::info!(
                mode = ?request.mode,
                tax_year = %request.tax_year,
                period = %request.period,
                "calculation handled"
            );
            json_response(
                StatusCode::OK,
                CalculateResponse::from_resolution(store, &request.tax_year, &resolution),
            )
        }
        Err(err) => salary_error_response(err),
    }
}

fn salary_error_response(err: SalaryError) -> Response {
    match err {
        SalaryError::UnresolvableBackwardCalculation {
            target_net,
            lower_bound,
            upper_bound,
            best_basic,
            best_net,
        } => {
            tracing::warn!(target_net, lower_bound, upper_bound, "backward calculation unresolved");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: UNRESOLVABLE_MESSAGE.to_string(),
                    details: Some(UnresolvableDetails {
                        target_net,
                        lower_bound,
                        upper_bound,
                        best_basic,
                        best_net,
                    }),
                },
            )
        }
        other => error_response(StatusCode::BAD_REQUEST, &other.to_string()),
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
            details: None,
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<CalculationRequest, String> {
    let payload: CalculatePayload =
        serde_json::from_str(json).map_err(|e| format!("Invalid JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: CalculatePayload) -> Result<CalculationRequest, String> {
    let tax_year = payload
        .tax_year
        .as_ref()
        .map(Scalar::as_key)
        .unwrap_or_default();
    let period = SalaryPeriod::from_key(payload.salary_period.as_deref().unwrap_or_default());
    let age_band = payload.age.unwrap_or_default();
    // Absent and zero allowances are the same thing.
    let travel_allowance = payload
        .travel_allowance
        .as_ref()
        .map(Scalar::as_amount)
        .unwrap_or(0.0);

    match payload.calculation_type.as_deref() {
        Some("forward") => {
            let basic = positive_amount(payload.basic_salary.as_ref())
                .ok_or_else(|| "Invalid basic salary".to_string())?;
            Ok(CalculationRequest::forward(
                basic,
                travel_allowance,
                tax_year,
                period,
                age_band,
            ))
        }
        Some("backward") => {
            let net = positive_amount(payload.net_salary.as_ref())
                .ok_or_else(|| "Invalid net salary".to_string())?;
            Ok(CalculationRequest::backward(
                net,
                travel_allowance,
                tax_year,
                period,
                age_band,
            ))
        }
        _ => Err("Invalid calculation type".to_string()),
    }
}

fn positive_amount(value: Option<&Scalar>) -> Option<f64> {
    value
        .map(Scalar::as_amount)
        .filter(|amount| amount.is_finite() && *amount > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CalculationMode;
    use axum::body::to_bytes;
    use serde_json::{Value, json};

    const EPS: f64 = 1e-6;

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn state() -> AppState {
        AppState::new(Arc::new(
            TaxTableStore::builtin().expect("builtin tables must load"),
        ))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    async fn post_calculate(body: Value) -> (StatusCode, Value) {
        let payload: CalculatePayload =
            serde_json::from_value(body).expect("payload should deserialize");
        let response = calculate_handler(State(state()), Ok(Json(payload))).await;
        let status = response.status();
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
        (status, body_json(response).await)
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let request = api_request_from_json(
            r#"{
                "calculationType": "forward",
                "taxYear": "2026",
                "salaryPeriod": "weekly",
                "age": "65to75",
                "basicSalary": 5000,
                "travelAllowance": "250.5"
            }"#,
        )
        .expect("valid payload");

        assert_eq!(request.mode, CalculationMode::Forward);
        assert_eq!(request.tax_year, "2026");
        assert_eq!(request.period, SalaryPeriod::Weekly);
        assert_eq!(request.age_band, "65to75");
        assert_eq!(request.amount, 5_000.0);
        assert_eq!(request.travel_allowance, 250.5);
    }

    #[test]
    fn tax_year_may_be_an_integer() {
        let request = api_request_from_json(
            r#"{"calculationType": "backward", "taxYear": 2025, "netSalary": "20000"}"#,
        )
        .expect("valid payload");
        assert_eq!(request.mode, CalculationMode::Backward);
        assert_eq!(request.tax_year, "2025");
        assert_eq!(request.amount, 20_000.0);
        assert_eq!(request.period, SalaryPeriod::Monthly);
        assert_eq!(request.travel_allowance, 0.0);
    }

    #[test]
    fn api_request_rejects_missing_or_non_positive_amounts() {
        for body in [
            r#"{"calculationType": "forward"}"#,
            r#"{"calculationType": "forward", "basicSalary": 0}"#,
            r#"{"calculationType": "forward", "basicSalary": -100}"#,
            r#"{"calculationType": "forward", "basicSalary": "lots"}"#,
            r#"{"calculationType": "forward", "netSalary": 1000}"#,
        ] {
            assert_eq!(
                api_request_from_json(body),
                Err("Invalid basic salary".to_string()),
                "{body}"
            );
        }
        assert_eq!(
            api_request_from_json(r#"{"calculationType": "backward", "basicSalary": 1000}"#),
            Err("Invalid net salary".to_string())
        );
        assert_eq!(
            api_request_from_json(r#"{"calculationType": "sideways", "basicSalary": 1000}"#),
            Err("Invalid calculation type".to_string())
        );
        assert_eq!(
            api_request_from_json(r#"{"basicSalary": 1000}"#),
            Err("Invalid calculation type".to_string())
        );
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = api_request_from_json("{\"calculationType\": ").expect_err("must fail");
        assert!(err.starts_with("Invalid JSON payload"), "{err}");
    }

    #[tokio::test]
    async fn forward_calculation_returns_result_with_bracket() {
        let (status, body) = post_calculate(json!({
            "calculationType": "forward",
            "taxYear": "2025",
            "salaryPeriod": "monthly",
            "age": "under65",
            "basicSalary": 30000,
            "travelAllowance": 0
        }))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_approx_tol(body["annualTaxableIncome"].as_f64().unwrap(), 360_000.0, EPS);
        assert_approx_tol(body["uif"].as_f64().unwrap(), 177.12, EPS);
        assert_approx_tol(body["net"].as_f64().unwrap(), 25_039.80, 0.01);
        assert_eq!(body["taxableTravel"], json!(0.0));
        assert_eq!(body["taxBracket"]["rate"], json!(0.26));
        assert_eq!(body["taxBracket"]["min"], json!(237_101.0));
        assert!(body.get("success").is_none());
        assert!(body.get("solver").is_none());
    }

    #[tokio::test]
    async fn top_bracket_reports_null_max() {
        let (status, body) = post_calculate(json!({
            "calculationType": "forward",
            "taxYear": 2025,
            "salaryPeriod": "yearly",
            "age": "over75",
            "basicSalary": 3000000,
            "travelAllowance": 12000
        }))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["taxBracket"]["max"], Value::Null);
        assert_eq!(body["taxBracket"]["rate"], json!(0.45));
        assert_approx_tol(body["taxableTravel"].as_f64().unwrap(), 9_600.0, EPS);
    }

    #[tokio::test]
    async fn backward_calculation_reports_solver() {
        let (status, body) = post_calculate(json!({
            "calculationType": "backward",
            "taxYear": "2025",
            "salaryPeriod": "monthly",
            "age": "under65",
            "netSalary": 25038.07
        }))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["solver"]["strategy"], json!("bisection"));
        assert_approx_tol(body["basic"].as_f64().unwrap(), 29_997.67, 0.2);
        assert_approx_tol(body["net"].as_f64().unwrap(), 25_038.07, 0.1);
    }

    #[tokio::test]
    async fn backward_with_large_travel_widens_the_search() {
        let (status, body) = post_calculate(json!({
            "calculationType": "backward",
            "taxYear": "2025",
            "salaryPeriod": "monthly",
            "age": "under65",
            "netSalary": 18461.115,
            "travelAllowance": 20000
        }))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["solver"]["strategy"], json!("widening-bisection"));
        assert_eq!(body["solver"]["converged"], json!(true));
        assert_approx_tol(body["basic"].as_f64().unwrap(), 100.0, 0.5);
    }

    #[tokio::test]
    async fn validation_failures_are_bad_requests() {
        let (status, body) = post_calculate(json!({
            "calculationType": "forward",
            "taxYear": "2025",
            "age": "under65"
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid basic salary"}));

        let (status, body) = post_calculate(json!({
            "calculationType": "forward",
            "taxYear": "1999",
            "age": "under65",
            "basicSalary": 1000
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "unknown tax year '1999'"}));

        let (status, body) = post_calculate(json!({
            "calculationType": "forward",
            "taxYear": "2025",
            "age": "centenarian",
            "basicSalary": 1000
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "unknown age band 'centenarian'"}));

        let (status, body) = post_calculate(json!({
            "calculationType": "forward",
            "taxYear": "2025",
            "age": "under65",
            "basicSalary": 1000,
            "travelAllowance": -5
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "invalid travel allowance: -5"}));
    }

    #[tokio::test]
    async fn unresolvable_errors_are_server_errors_with_details() {
        let response = salary_error_response(SalaryError::UnresolvableBackwardCalculation {
            target_net: 500.0,
            lower_bound: 0.0,
            upper_bound: 1_250.0,
            best_basic: Some(480.0),
            best_net: None,
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({
                "error": "Could not calculate gross salary accurately.",
                "details": {
                    "targetNet": 500.0,
                    "lowerBound": 0.0,
                    "upperBound": 1250.0,
                    "bestBasic": 480.0,
                    "bestNet": null
                }
            })
        );
    }

    #[tokio::test]
    async fn tax_years_lists_selectors() {
        let response = tax_years_handler(State(state())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({
                "taxYears": ["2024", "2025", "2026"],
                "ageBands": ["under65", "65to75", "over75"],
                "salaryPeriods": ["weekly", "biweekly", "monthly", "yearly"]
            })
        );
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let response = not_found_handler().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "Not found"}));
    }

    #[tokio::test]
    async fn static_assets_are_not_cached() {
        let response = styles_handler().await.into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/css; charset=utf-8"))
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
        assert!(INDEX_HTML.contains("/api/calculate") || APP_JS.contains("/api/calculate"));
    }

    #[test]
    fn router_builds_with_all_routes() {
        let _app: Router = router(state());
    }
}
