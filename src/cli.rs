use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::api::{CalculateResponse, run_http_server};
use crate::core::{
    AgeBand, CalculationRequest, SalaryError, SalaryPeriod, TableError, TaxTableStore, resolve,
};
use crate::logging::DEFAULT_LOG_LEVEL;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Tables(#[from] TableError),

    #[error(transparent)]
    Salary(#[from] SalaryError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("cannot render result: {0}")]
    Render(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliSalaryPeriod {
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
}

impl From<CliSalaryPeriod> for SalaryPeriod {
    fn from(value: CliSalaryPeriod) -> Self {
        match value {
            CliSalaryPeriod::Weekly => SalaryPeriod::Weekly,
            CliSalaryPeriod::Biweekly => SalaryPeriod::Biweekly,
            CliSalaryPeriod::Monthly => SalaryPeriod::Monthly,
            CliSalaryPeriod::Yearly => SalaryPeriod::Yearly,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliAgeBand {
    #[value(name = "under65")]
    Under65,
    #[value(name = "65to75")]
    From65To75,
    #[value(name = "over75")]
    Over75,
}

impl From<CliAgeBand> for AgeBand {
    fn from(value: CliAgeBand) -> Self {
        match value {
            CliAgeBand::Under65 => AgeBand::Under65,
            CliAgeBand::From65To75 => AgeBand::From65To75,
            CliAgeBand::Over75 => AgeBand::Over75,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "za-paye",
    about = "South African PAYE and UIF calculator (basic salary to net pay and back)"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_LOG_LEVEL,
        help = "Log filter used when RUST_LOG is unset, e.g. debug or za_paye=trace"
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API and the web form.
    Serve(ServeArgs),
    /// Net pay from a basic salary.
    Forward(ForwardArgs),
    /// Basic salary needed for a net pay.
    Backward(BackwardArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,
    #[arg(long, default_value_t = 3000)]
    pub port: u16,
    #[arg(long, help = "TOML file replacing the built-in tax tables")]
    pub tax_tables: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CalculationArgs {
    #[arg(long, default_value_t = 0.0, help = "Travel allowance per period")]
    pub travel_allowance: f64,
    #[arg(long, default_value = "2025")]
    pub tax_year: String,
    #[arg(long, value_enum, default_value_t = CliSalaryPeriod::Monthly)]
    pub period: CliSalaryPeriod,
    #[arg(long, value_enum, default_value_t = CliAgeBand::Under65)]
    pub age: CliAgeBand,
    #[arg(long, help = "TOML file replacing the built-in tax tables")]
    pub tax_tables: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ForwardArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub basic_salary: f64,
    #[command(flatten)]
    pub calculation: CalculationArgs,
}

#[derive(Args, Debug)]
pub struct BackwardArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub net_salary: f64,
    #[command(flatten)]
    pub calculation: CalculationArgs,
}

impl ForwardArgs {
    fn request(&self) -> CalculationRequest {
        let args = &self.calculation;
        CalculationRequest::forward(
            self.basic_salary,
            args.travel_allowance,
            args.tax_year.clone(),
            args.period.into(),
            AgeBand::from(args.age).key(),
        )
    }
}

impl BackwardArgs {
    fn request(&self) -> CalculationRequest {
        let args = &self.calculation;
        CalculationRequest::backward(
            self.net_salary,
            args.travel_allowance,
            args.tax_year.clone(),
            args.period.into(),
            AgeBand::from(args.age).key(),
        )
    }
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve(args) => {
            let tables = TaxTableStore::load(args.tax_tables.as_deref())?;
            run_http_server(SocketAddr::new(args.host, args.port), Arc::new(tables)).await?;
            Ok(())
        }
        Command::Forward(args) => {
            let json = calculate(args.calculation.tax_tables.as_deref(), &args.request())?;
            println!("{json}");
            Ok(())
        }
        Command::Backward(args) => {
            let json = calculate(args.calculation.tax_tables.as_deref(), &args.request())?;
            println!("{json}");
            Ok(())
        }
    }
}

/// Resolves one request and renders it the way the HTTP API does.
fn calculate(
    tax_tables: Option<&std::path::Path>,
    request: &CalculationRequest,
) -> Result<String, CliError> {
    let store = TaxTableStore::load(tax_tables)?;
    let resolution = resolve(&store, request)?;
    let response = CalculateResponse::from_resolution(&store, &request.tax_year, &resolution);
    Ok(serde_json::to_string_pretty(&response)?)
}
