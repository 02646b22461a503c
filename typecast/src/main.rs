#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand, ValueEnum};
use miette::{Diagnostic, NamedSource, SourceOffset, SourceSpan};
use thiserror::Error;
use tracing::{debug, info};

use typecast_ast::Unit;
use typecast_core::{AnalysisOptions, TargetLayout};

mod manifest;
mod report;

#[derive(Parser, Debug)]
#[command(name = "typecast", version, about = "Type resolution and cast-legality analysis")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Args, Debug)]
struct AnalyzeArgs {
    /// JSON-encoded analysis unit (declarations + statement tree)
    input: PathBuf,

    /// Treat notes and ownership violations as fatal (exit 2)
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Target triple for storage widths. Defaults to the host.
    #[arg(long)]
    target: Option<String>,

    /// Config file. Defaults to the nearest `typecast.toml` above the input.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Also write the JSON report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (e.g. "debug", "typecast_core=trace")
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Resolve every expression and classify every conversion
    Analyze(AnalyzeArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, Error, Diagnostic)]
enum InputError {
    #[error("failed to read {path}")]
    #[diagnostic(code(typecast::input::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {message}")]
    #[diagnostic(
        code(typecast::input::decode),
        help("input must be a JSON object with `declarations` and `body`")
    )]
    Decode {
        path: String,
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        at: SourceSpan,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.cmd {
        Cmd::Analyze(args) => analyze(args),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{e:?}");
            ExitCode::from(2)
        }
    }
}

fn analyze(args: AnalyzeArgs) -> miette::Result<u8> {
    let config = manifest::load_config(&args.input, args.config.as_deref())?;
    let level = args
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "warn".to_string());
    init_logging(&level);

    if let Some(path) = &config.config_path {
        debug!(config = %path.display(), "loaded config");
    }

    let strict = args.strict || config.strict;
    let layout = match args.target.as_deref().or(config.target.as_deref()) {
        Some(triple) => TargetLayout::from_triple(triple)?,
        None => TargetLayout::host(),
    };

    let (raw, unit) = read_unit(&args.input)?;
    let analysis = typecast_core::analyze(&unit, &AnalysisOptions { layout });
    let exit = analysis.exit_code(strict);
    info!(
        severity = analysis.severity().display(),
        expressions = analysis.expressions.len(),
        casts = analysis.casts.len(),
        violations = analysis.violations.len(),
        exit,
        "analysis finished"
    );

    let json = report::build_json_report(&args.input, &raw, layout, &analysis, strict);
    if let Some(out) = &args.report {
        report::write_json_report(&json, out)?;
    }

    match args.format {
        Format::Json => {
            let text = serde_json::to_string_pretty(&json).map_err(|e| miette::miette!("{e}"))?;
            println!("{text}");
        }
        Format::Text => print!("{}", report::render_text(&analysis)),
    }

    if let Some(fatal) = &analysis.fatal {
        let rendered = match &unit.source {
            Some(src) => miette::Report::new(fatal.clone())
                .with_source_code(NamedSource::new(src.name.clone(), src.text.clone())),
            None => miette::Report::new(fatal.clone()),
        };
        eprintln!("{rendered:?}");
    }

    Ok(exit)
}

fn read_unit(path: &Path) -> Result<(Vec<u8>, Unit), InputError> {
    let raw = fs::read(path).map_err(|source| InputError::Read {
        path: path.display().to_string(),
        source,
    })?;
    match serde_json::from_slice::<Unit>(&raw) {
        Ok(unit) => Ok((raw, unit)),
        Err(e) => {
            let text = String::from_utf8_lossy(&raw).into_owned();
            let offset = SourceOffset::from_location(&text, e.line(), e.column());
            Err(InputError::Decode {
                path: path.display().to_string(),
                message: e.to_string(),
                src: NamedSource::new(path.display().to_string(), text),
                at: SourceSpan::new(offset, 0),
            })
        }
    }
}

fn init_logging(level: &str) {
    use std::io::IsTerminal;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let use_ansi = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();

    let subscriber = fmt::fmt()
        .with_env_filter(filter)
        .with_ansi(use_ansi)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
