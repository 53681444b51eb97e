use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::process::ExitCode;

use dashguard::error::{determine_severity, ErrorClassifier, ErrorNormalizer, RawError};
use dashguard::logging::{init_logging, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "dashguard")]
#[command(version)]
#[command(about = "Classify and normalize dashboard errors")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Print compact JSON instead of pretty-printed JSON
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Describe an HTTP status code
    Status {
        /// HTTP status code, e.g. 429
        code: u16,
    },
    /// Classify a free-form error message
    Message {
        /// Error text, e.g. "Network error: connection refused"
        text: String,
    },
    /// Normalize an error payload
    Parse {
        /// JSON error value; input that is not valid JSON is treated as text
        input: String,

        /// Print the logging shape (with severity) instead of the display shape
        #[arg(long)]
        logging: bool,
    },
    /// Show the severity assigned to an error code
    Severity {
        /// Error code, e.g. RATE_LIMITED
        code: String,

        /// HTTP status used when the code is not in a severity list
        #[arg(long)]
        status: Option<u16>,
    },
}

#[derive(Serialize)]
struct SeverityReport<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    severity: dashguard::error::Severity,
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<(), serde_json::Error> {
    let json = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", json);
    Ok(())
}

fn raw_input(input: &str) -> RawError {
    match serde_json::from_str::<Value>(input) {
        Ok(value) => RawError::Value(value),
        Err(err) => {
            tracing::debug!(error = %err, "Input is not JSON, classifying as text");
            RawError::Text(input.to_string())
        }
    }
}

fn run(cli: Cli) -> Result<(), serde_json::Error> {
    match cli.command {
        Commands::Status { code } => {
            let info = ErrorClassifier::new().from_status_code(code);
            print_json(&info, cli.compact)
        }
        Commands::Message { text } => {
            let info = ErrorClassifier::new().from_message(&text);
            print_json(&info, cli.compact)
        }
        Commands::Parse { input, logging } => {
            let normalizer = ErrorNormalizer::new();
            let raw = raw_input(&input);
            if logging {
                print_json(&normalizer.parse_api_error(&raw), cli.compact)
            } else {
                print_json(&normalizer.parse_error(&raw), cli.compact)
            }
        }
        Commands::Severity { code, status } => {
            let report = SeverityReport {
                code: &code,
                status,
                severity: determine_severity(&code, status),
            };
            print_json(&report, cli.compact)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(LoggingConfig::from_verbosity(cli.verbose));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
