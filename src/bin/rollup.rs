//! Rollup CLI - Command-line interface for the exam rollup engine
//!
//! Commands:
//! - transform: Build rollup tables from one or more record files
//! - validate: Report records the engine would drop
//! - doctor: Diagnose configuration
//! - schema: Describe the input and output formats

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use exam_rollup::encoder::display_digits;
use exam_rollup::schema::{CsvColumns, RecordAdapter, SCHEMA_VERSION};
use exam_rollup::{
    NormalizationPolicy, RawRecord, ReportEncoder, RollupConfig, RollupError, RollupProcessor,
    PRODUCER_NAME, ROLLUP_VERSION,
};

/// Rollup - daily/weekly/monthly/quarterly/yearly tables from exam logs
#[derive(Parser)]
#[command(name = "rollup")]
#[command(version = ROLLUP_VERSION)]
#[command(about = "Build period rollup tables from exam records", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build rollup tables from record files
    Transform {
        /// Input file path, repeatable; each file is one source (use - for stdin)
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Output file (json) or directory (csv); use - for stdout with json
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        /// Load configuration from a JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Entity label canonicalization (overrides the config file)
        #[arg(long)]
        normalization: Option<Normalization>,

        #[command(flatten)]
        columns: ColumnArgs,
    },

    /// Report records that would be dropped
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Entity label canonicalization
        #[arg(long, default_value = "alnum-only")]
        normalization: Normalization,

        #[command(flatten)]
        columns: ColumnArgs,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(clap::Args)]
struct ColumnArgs {
    /// CSV header of the entity column
    #[arg(long, default_value = "Room")]
    entity_column: String,

    /// CSV header of the study date column
    #[arg(long, default_value = "Study Date")]
    date_column: String,
}

impl ColumnArgs {
    fn to_columns(&self) -> CsvColumns {
        CsvColumns {
            entity: self.entity_column.clone(),
            date: self.date_column.clone(),
        }
    }
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// CSV with a header row
    Csv,
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// One JSON document with every source and table
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// One CSV file per source and table
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum Normalization {
    /// Trim and collapse whitespace, keep case
    Strict,
    /// Uppercase and keep only letters and digits
    AlnumOnly,
}

impl From<Normalization> for NormalizationPolicy {
    fn from(value: Normalization) -> Self {
        match value {
            Normalization::Strict => NormalizationPolicy::Strict,
            Normalization::AlnumOnly => NormalizationPolicy::AlnumOnly,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (exam.raw_record.v1)
    Input,
    /// Output report document
    Output,
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

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> Result<(), RollupCliError> {
    match cli.command {
        Commands::Transform {
            input,
            output,
            input_format,
            output_format,
            config,
            normalization,
            columns,
        } => cmd_transform(
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
            normalization,
            &columns.to_columns(),
        ),

        Commands::Validate {
            input,
            input_format,
            normalization,
            columns,
            json,
        } => cmd_validate(
            &input,
            input_format,
            normalization.into(),
            &columns.to_columns(),
            json,
        ),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_transform(
    inputs: &[PathBuf],
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config_path: Option<&Path>,
    normalization: Option<Normalization>,
    columns: &CsvColumns,
) -> Result<(), RollupCliError> {
    // Load configuration, then apply flag overrides
    let mut config = match config_path {
        Some(path) => RollupConfig::from_json(&fs::read_to_string(path)?)?,
        None => RollupConfig::default(),
    };
    if let Some(policy) = normalization {
        config.normalization = policy.into();
    }
    let processor = RollupProcessor::with_config(config)?;

    // Read every source
    let mut sources: Vec<(String, Vec<RawRecord>)> = Vec::new();
    for path in inputs {
        let records = read_records(path, &input_format, columns)?;
        log::info!("read {} records from {}", records.len(), path.display());
        sources.push((source_name(path), records));
    }

    if sources.iter().all(|(_, records)| records.is_empty()) {
        return Err(RollupCliError::NoRecords);
    }

    let reports = processor.process_sources(sources)?;
    let encoder = ReportEncoder::new();

    match output_format {
        OutputFormat::Json | OutputFormat::JsonPretty => {
            let pretty = matches!(output_format, OutputFormat::JsonPretty);
            let json = encoder.encode_to_json(reports.values(), pretty)?;
            if output.to_string_lossy() == "-" {
                println!("{}", json);
            } else {
                fs::write(output, json)?;
            }
        }
        OutputFormat::Csv => {
            if output.to_string_lossy() == "-" {
                return Err(RollupCliError::Usage(
                    "csv output needs a directory, not stdout".to_string(),
                ));
            }
            fs::create_dir_all(output)?;
            for report in reports.values() {
                for (name, table) in report.tables() {
                    let path = output.join(format!("{}_{}.csv", report.source, name));
                    let file = fs::File::create(&path)?;
                    encoder.write_csv(table, display_digits(name), file)?;
                    log::debug!("wrote {}", path.display());
                }
            }
        }
    }

    Ok(())
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    policy: NormalizationPolicy,
    columns: &CsvColumns,
    json: bool,
) -> Result<(), RollupCliError> {
    let records = read_records(input, &input_format, columns)?;
    let issues = RecordAdapter::validate_records(&records, policy);

    let report = ValidationReport {
        total_records: records.len(),
        valid_records: records.len() - issues.len(),
        invalid_records: issues.len(),
        errors: issues
            .iter()
            .map(|issue| ValidationErrorDetail {
                index: issue.index,
                entity: issue.entity.clone(),
                reason: issue.reason.as_str().to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Record {} ({:?}): {}",
                    err.index, err.entity, err.reason
                );
            }
        }
    }

    if report.invalid_records > 0 {
        Err(RollupCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), RollupCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "rollup_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Rollup version {}", ROLLUP_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    match config_path {
        Some(path) if path.exists() => match fs::read_to_string(path) {
            Ok(content) => match RollupConfig::from_json(&content) {
                Ok(config) => {
                    checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Config valid (normalization {}, default {} days/week, {} overrides, {} rules)",
                            config.normalization.as_str(),
                            config.schedule.default_days,
                            config.schedule.overrides.len(),
                            config.schedule.rules.len()
                        ),
                    });
                }
                Err(e) => {
                    checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: e.to_string(),
                    });
                }
            },
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read config file: {}", e),
                });
            }
        },
        Some(_) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist".to_string(),
            });
        }
        None => {
            let config = RollupConfig::default();
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Using defaults (normalization {}, default {} days/week)",
                    config.normalization.as_str(),
                    config.schedule.default_days
                ),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass files with -i)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (-i - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ROLLUP_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Rollup Doctor Report");
        println!("====================");
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
        Err(RollupCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), RollupCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("Each record names an entity and when the exam happened:");
                println!();
                println!("- entity: room or modality label (free text, normalized)");
                println!("- timestamp: date or datetime, optional");
                println!("  - RFC 3339, YYYY-MM-DD, YYYY-MM-DD HH:MM[:SS], MM/DD/YYYY, ...");
                println!("  - records without a usable timestamp are dropped and counted");
                println!();
                println!("CSV input selects columns by header (default \"Room\" and \"Study Date\").");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: rollup report document");
                println!();
                println!("- producer: {{ name, version, instance_id }}");
                println!("- computed_at_utc");
                println!("- sources: Array, one per input, containing:");
                println!("  - source");
                println!("  - diagnostics: {{ total_records, accepted_records, dropped, first_date, last_date, entities }}");
                println!("  - tables: Daily, Weekly, Monthly, Monthly_MoM_%, Quarterly, Yearly, Yearly_YoY_%");
                println!("    each {{ name, columns, rows }}; rows start with the period label");
            }
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<String, RollupCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn read_records(
    path: &Path,
    format: &InputFormat,
    columns: &CsvColumns,
) -> Result<Vec<RawRecord>, RollupCliError> {
    let data = read_input(path)?;
    let records = match format {
        InputFormat::Csv => RecordAdapter::parse_csv(data.as_bytes(), columns)?,
        InputFormat::Ndjson => RecordAdapter::parse_ndjson(&data)?,
        InputFormat::Json => RecordAdapter::parse_array(&data)?,
    };
    Ok(records)
}

/// Source name for an input path: the file stem, or "stdin"
fn source_name(path: &Path) -> String {
    if path.to_string_lossy() == "-" {
        return "stdin".to_string();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": SCHEMA_VERSION,
        "title": "Exam raw record",
        "type": "object",
        "required": ["entity"],
        "properties": {
            "entity": { "type": "string" },
            "timestamp": {
                "type": ["string", "null"],
                "description": "Date or datetime of the exam"
            }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Rollup report document",
        "type": "object",
        "required": ["producer", "computed_at_utc", "sources"],
        "properties": {
            "producer": {
                "type": "object",
                "required": ["name", "version", "instance_id"],
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" },
                    "instance_id": { "type": "string" }
                }
            },
            "computed_at_utc": { "type": "string", "format": "date-time" },
            "sources": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["source", "diagnostics", "tables"],
                    "properties": {
                        "source": { "type": "string" },
                        "diagnostics": { "type": "object" },
                        "tables": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["name", "columns", "rows"],
                                "properties": {
                                    "name": { "type": "string" },
                                    "columns": { "type": "array", "items": { "type": "string" } },
                                    "rows": { "type": "array", "items": { "type": "array" } }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum RollupCliError {
    Io(io::Error),
    Rollup(RollupError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
    DoctorFailed,
    Usage(String),
}

impl From<io::Error> for RollupCliError {
    fn from(e: io::Error) -> Self {
        RollupCliError::Io(e)
    }
}

impl From<RollupError> for RollupCliError {
    fn from(e: RollupError) -> Self {
        RollupCliError::Rollup(e)
    }
}

impl From<serde_json::Error> for RollupCliError {
    fn from(e: serde_json::Error) -> Self {
        RollupCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<RollupCliError> for CliError {
    fn from(e: RollupCliError) -> Self {
        match e {
            RollupCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            RollupCliError::Rollup(e) => {
                let (code, hint) = match &e {
                    RollupError::MissingColumn(_) => (
                        "MISSING_COLUMN",
                        "Set --entity-column and --date-column to match the CSV header",
                    ),
                    RollupError::ConfigError(_) | RollupError::InvalidSchedule(_) => {
                        ("CONFIG_ERROR", "Run 'rollup doctor --config <file>' for details")
                    }
                    RollupError::DuplicateSource(_) => (
                        "DUPLICATE_SOURCE",
                        "Each input becomes a source named by its file stem; rename inputs that share one",
                    ),
                    RollupError::CsvError(_) => ("CSV_ERROR", "Check CSV syntax"),
                    RollupError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    _ => (
                        "PARSE_ERROR",
                        "Ensure input matches the exam.raw_record.v1 schema",
                    ),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            RollupCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            RollupCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input files are not empty".to_string()),
            },
            RollupCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Unusable records are dropped by transform".to_string()),
            },
            RollupCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            RollupCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'rollup transform --help'".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    entity: String,
    reason: String,
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
