//! Spendlens CLI - Command-line interface for Spendlens
//!
//! Commands:
//! - detect: Run the detectors over a transaction snapshot
//! - validate: Report records the detectors will skip
//! - config: Print or check detection configuration
//! - doctor: Diagnose engine health and configuration

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spendlens::{
    AdvisoryEncoder, BehavioralContextAggregator, BudgetContext, Clock, DetectionConfig,
    DetectionError, DetectorKind, FixedClock, SystemClock, Transaction, TransactionAdapter,
    ENGINE_VERSION, MAX_MONTHS_BACK, PRODUCER_NAME,
};

/// Spendlens - On-device behavioral spending pattern detection
#[derive(Parser)]
#[command(name = "spendlens")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Detect behavioral spending patterns in transaction data", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detectors over a transaction snapshot
    Detect {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Run a single detector (small_recurring, stress_spending, end_of_month)
        #[arg(short, long)]
        detector: Option<DetectorKind>,

        /// Complete past months examined by the end-of-month detector (at most 120)
        #[arg(
            long,
            value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_MONTHS_BACK))
        )]
        months_back: Option<u32>,

        /// Treat this date (YYYY-MM-DD) as today
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Detection configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Active budgets file (JSON)
        #[arg(long)]
        budgets: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Report records the detectors will skip
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration, or check a configuration file
    Config {
        /// Configuration file to check
        #[arg(long)]
        check: Option<PathBuf>,
    },

    /// Diagnose engine health and configuration
    Doctor {
        /// Check configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// JSON array of transactions
    Json,
    /// Newline-delimited JSON (one transaction per line)
    Ndjson,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Sanitized advisory payload
    Advisory,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Priority: RUST_LOG env var > --verbose flag > default (warn). Logs go to stderr so
/// stdout stays machine-readable.
fn init_logging(verbose: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(io::stderr)
                .compact(),
        )
        .init();
}

fn run(cli: Cli) -> Result<(), SpendlensCliError> {
    match cli.command {
        Commands::Detect {
            input,
            input_format,
            detector,
            months_back,
            as_of,
            config,
            budgets,
            output_format,
        } => {
            let options = DetectOptions {
                detector,
                months_back,
                as_of,
                config: config.as_deref(),
                budgets: budgets.as_deref(),
                output_format,
            };
            cmd_detect(&input, input_format, options)
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Config { check } => cmd_config(check.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

struct DetectOptions<'a> {
    detector: Option<DetectorKind>,
    months_back: Option<u32>,
    as_of: Option<NaiveDate>,
    config: Option<&'a Path>,
    budgets: Option<&'a Path>,
    output_format: OutputFormat,
}

fn cmd_detect(
    input: &Path,
    input_format: InputFormat,
    options: DetectOptions<'_>,
) -> Result<(), SpendlensCliError> {
    let transactions = read_transactions(input, &input_format)?;

    let config = match options.config {
        Some(path) => DetectionConfig::load(path)?,
        None => DetectionConfig::default(),
    };
    config.validate()?;

    let budgets = match options.budgets {
        Some(path) => TransactionAdapter::parse_budgets(&fs::read_to_string(path)?)?,
        None => BudgetContext::default(),
    };

    let clock: Arc<dyn Clock> = match options.as_of {
        Some(date) => Arc::new(FixedClock::on(date)),
        None => Arc::new(SystemClock),
    };

    let mut aggregator =
        BehavioralContextAggregator::with_clock(config, clock).with_budgets(budgets);
    if let Some(months_back) = options.months_back {
        aggregator = aggregator.with_months_back(months_back);
    }

    let output = match (&options.output_format, options.detector) {
        (OutputFormat::Advisory, only) => {
            let context = aggregator.analyze(&transactions);
            let mut payload = AdvisoryEncoder::new().encode(&context);
            if let Some(kind) = only {
                payload.detectors.retain(|d| d.detector == kind);
            }
            serde_json::to_string_pretty(&payload)?
        }
        (format, Some(kind)) => {
            let detector = aggregator
                .detector(kind)
                .ok_or(SpendlensCliError::UnknownDetector(kind))?;
            let result = detector.detect(&transactions)?;
            to_json(&result, format)?
        }
        (format, None) => {
            let context = aggregator.analyze(&transactions);
            to_json(&context, format)?
        }
    };

    println!("{}", output);
    Ok(())
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), SpendlensCliError> {
    let transactions = read_transactions(input, &input_format)?;
    let issues = TransactionAdapter::validate_transactions(&transactions);

    let report = ValidationReport {
        total_transactions: transactions.len(),
        valid_transactions: transactions.len() - issues.len(),
        invalid_transactions: issues.len(),
        errors: issues
            .iter()
            .map(|issue| ValidationErrorDetail {
                index: issue.index,
                transaction_id: issue.transaction_id.clone(),
                error: issue.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total transactions:   {}", report.total_transactions);
        println!("Valid transactions:   {}", report.valid_transactions);
        println!("Invalid transactions: {}", report.invalid_transactions);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                let id = if err.transaction_id.is_empty() {
                    "<empty>"
                } else {
                    err.transaction_id.as_str()
                };
                println!("  - Transaction {} (index {}): {}", id, err.index, err.error);
            }
        }
    }

    if report.invalid_transactions > 0 {
        Err(SpendlensCliError::ValidationFailed(report.invalid_transactions))
    } else {
        Ok(())
    }
}

fn cmd_config(check: Option<&Path>) -> Result<(), SpendlensCliError> {
    let config = match check {
        Some(path) => DetectionConfig::load(path)?,
        None => DetectionConfig::default(),
    };
    println!("{}", config.to_json()?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), SpendlensCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Spendlens version {}", ENGINE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "detectors".to_string(),
        status: CheckStatus::Ok,
        message: DetectorKind::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    });

    // Check configuration file if provided
    if let Some(config_path) = config {
        if config_path.exists() {
            match DetectionConfig::load(config_path) {
                Ok(config) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Configuration valid (threshold {:.2}, lookback {} days)",
                        config.small_purchase_threshold, config.lookback_days
                    ),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration file does not exist".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready to read transactions)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Spendlens Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SpendlensCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_transactions(
    input: &Path,
    input_format: &InputFormat,
) -> Result<Vec<Transaction>, SpendlensCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let transactions = match input_format {
        InputFormat::Json => TransactionAdapter::parse_array(&input_data)?,
        InputFormat::Ndjson => TransactionAdapter::parse_ndjson(&input_data)?,
    };

    tracing::debug!(count = transactions.len(), "Transactions loaded");
    Ok(transactions)
}

fn to_json<T: serde::Serialize>(
    value: &T,
    format: &OutputFormat,
) -> Result<String, SpendlensCliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(value)?),
        OutputFormat::JsonPretty | OutputFormat::Advisory => Ok(serde_json::to_string_pretty(value)?),
    }
}

// Error types

#[derive(Debug)]
enum SpendlensCliError {
    Io(io::Error),
    Detection(DetectionError),
    Json(serde_json::Error),
    UnknownDetector(DetectorKind),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for SpendlensCliError {
    fn from(e: io::Error) -> Self {
        SpendlensCliError::Io(e)
    }
}

impl From<DetectionError> for SpendlensCliError {
    fn from(e: DetectionError) -> Self {
        SpendlensCliError::Detection(e)
    }
}

impl From<serde_json::Error> for SpendlensCliError {
    fn from(e: serde_json::Error) -> Self {
        SpendlensCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SpendlensCliError> for CliError {
    fn from(e: SpendlensCliError) -> Self {
        match e {
            SpendlensCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SpendlensCliError::Detection(DetectionError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run 'spendlens config' to see valid defaults".to_string()),
            },
            SpendlensCliError::Detection(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input is a JSON array or NDJSON of transactions".to_string()),
            },
            SpendlensCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SpendlensCliError::UnknownDetector(kind) => CliError {
                code: "UNKNOWN_DETECTOR".to_string(),
                message: format!("No detector registered for {}", kind),
                hint: None,
            },
            SpendlensCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} transactions failed validation", count),
                hint: Some("Records without a date or with a non-finite amount are skipped".to_string()),
            },
            SpendlensCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_transactions: usize,
    valid_transactions: usize,
    invalid_transactions: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    transaction_id: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
