//! gherkin-tdl CLI
//!
//! Command-line interface for converting Gherkin scenarios into GITB TDL test cases.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::*;
use gherkin_tdl::config::{parse_service, Settings, CONFIG_ENV, CONFIG_FILE};
use gherkin_tdl::diagnostic::merge_external;
use gherkin_tdl::validate::{validate_structure, HttpSchemaService, SchemaService};
use gherkin_tdl::{samples, Converter, Diagnostic, Severity};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gherkin-tdl")]
#[command(author = "GITB TDL Tools Team")]
#[command(version)]
#[command(about = "Convert Gherkin scenarios into GITB TDL test cases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./gherkin-tdl.toml when present)
    #[arg(long, global = true, value_name = "PATH", env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Load catalogs from a directory (<DIR>/<locale>.yml)
    #[arg(long, global = true, value_name = "DIR")]
    catalog_dir: Option<PathBuf>,

    /// Load catalogs over HTTP (<URL>/<locale>.yml)
    #[arg(long, global = true, value_name = "URL")]
    catalog_url: Option<String>,

    /// Catalog locale
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Data model id (fhir, EIRA, smart-guidelines, ...)
    #[arg(long, short = 'm', global = true)]
    model: Option<String>,

    /// Available service version, repeatable
    #[arg(long = "service", global = true, value_name = "NAME=VERSION")]
    services: Vec<String>,

    /// Treat unmet service requirements as errors
    #[arg(long, global = true)]
    strict: bool,

    /// Debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a scenario file into a test case document
    ///
    /// Examples:
    ///   gherkin-tdl convert scenario.feature -o testcase.xml
    ///   gherkin-tdl convert scenario.feature --model openehr
    ///   cat scenario.feature | gherkin-tdl convert -
    Convert {
        /// Scenario file, or - for stdin
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Write the document here instead of stdout
        #[arg(long, short = 'o', value_name = "OUT")]
        output: Option<PathBuf>,

        /// Print a JSON bundle (document, scriptlets, IR, diagnostics) instead of XML
        #[arg(long)]
        ir_json: bool,

        /// Fixed generation timestamp (RFC 3339)
        #[arg(long, value_name = "RFC3339")]
        timestamp: Option<String>,

        /// Also validate against a remote schema service
        #[arg(long, value_name = "URL")]
        schema_endpoint: Option<String>,
    },
    /// Parse and expand a scenario, reporting diagnostics only
    Check {
        /// Scenario file, or - for stdin
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output diagnostics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the IR of each step as JSON
    Ir {
        /// Scenario file, or - for stdin
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Check a test case document
    Validate {
        /// Document file, or - for stdin
        #[arg(value_name = "XML")]
        file: PathBuf,

        /// Remote schema validation endpoint
        #[arg(long, value_name = "URL")]
        schema_endpoint: Option<String>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the data models of the catalog
    Models,
    /// List built-in sample scenarios, or print one
    Samples {
        /// Sample id
        id: Option<String>,
    },
    /// Generate a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Convert {
            file,
            output,
            ir_json,
            timestamp,
            schema_endpoint,
        } => convert_file(
            &cli,
            file,
            output.as_deref(),
            *ir_json,
            timestamp.as_deref(),
            schema_endpoint.as_deref(),
        ),
        Commands::Check { file, json } => check_file(&cli, file, *json),
        Commands::Ir { file } => print_ir(&cli, file),
        Commands::Validate {
            file,
            schema_endpoint,
            json,
        } => validate_file(&cli, file, schema_endpoint.as_deref(), *json),
        Commands::Models => list_models(&cli),
        Commands::Samples { id } => show_samples(id.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "gherkin-tdl", &mut io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("gherkin_tdl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Config file, then command-line overrides
fn resolve_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let mut settings = Settings::load_or_default(cli.config.as_deref(), &cwd)?;

    if let Some(locale) = &cli.locale {
        settings.locale = locale.clone();
    }
    if let Some(model) = &cli.model {
        settings.model = model.clone();
    }
    if let Some(dir) = &cli.catalog_dir {
        settings.catalog.dir = Some(dir.clone());
        settings.catalog.url = None;
    }
    if let Some(url) = &cli.catalog_url {
        settings.catalog.url = Some(url.clone());
        settings.catalog.dir = None;
    }
    for spec in &cli.services {
        let (name, version) = parse_service(spec)?;
        settings.services.insert(name, version);
    }
    if cli.strict {
        settings.strict_requirements = true;
    }

    settings.validate()?;
    Ok(settings)
}

fn load_converter(settings: &Settings) -> anyhow::Result<Converter> {
    let cache = settings.catalog_cache();
    let catalog = cache.load(&settings.locale)?;
    Ok(Converter::new(catalog, &settings.model, settings.expand_options())?)
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("cannot read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn print_diagnostics(path: &Path, diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        let severity = match d.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        eprintln!(
            "{}:{}:{}: {}: {}",
            path.display(),
            d.line,
            d.column,
            severity,
            d.message()
        );
    }
}

fn summary_line(diagnostics: &[Diagnostic]) -> (usize, usize) {
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    (errors, diagnostics.len() - errors)
}

fn schema_endpoint(flag: Option<&str>, settings: Option<&Settings>) -> Option<String> {
    flag.map(str::to_string)
        .or_else(|| settings.and_then(|s| s.validation.endpoint.clone()))
}

fn convert_file(
    cli: &Cli,
    path: &Path,
    output: Option<&Path>,
    ir_json: bool,
    timestamp: Option<&str>,
    endpoint: Option<&str>,
) -> anyhow::Result<()> {
    let settings = resolve_settings(cli)?;
    let mut converter = load_converter(&settings)?;
    if let Some(ts) = timestamp {
        let parsed = DateTime::parse_from_rfc3339(ts)
            .with_context(|| format!("invalid timestamp '{}'", ts))?;
        converter = converter.with_timestamp(parsed.with_timezone(&Utc));
    }

    let text = read_input(path)?;
    let mut conversion = converter.convert(&text);

    if let Some(endpoint) = schema_endpoint(endpoint, Some(&settings)) {
        let external = HttpSchemaService::new(endpoint).validate(&conversion.document.xml);
        merge_external(&mut conversion.diagnostics, external);
    }

    print_diagnostics(path, &conversion.diagnostics);

    let rendered = if ir_json {
        let bundle = serde_json::json!({
            "testcase": conversion.document.testcase_name,
            "model": converter.model().id,
            "document": conversion.document.xml,
            "scriptlets": conversion.scriptlets(),
            "steps": conversion.outcomes,
            "diagnostics": conversion.diagnostics.iter().map(Diagnostic::to_json).collect::<Vec<_>>(),
        });
        serde_json::to_string_pretty(&bundle)?
    } else {
        conversion.document.xml.clone()
    };

    match output {
        Some(out) => {
            fs::write(out, rendered.as_bytes())
                .with_context(|| format!("cannot write {}", out.display()))?;
            let (errors, warnings) = summary_line(&conversion.diagnostics);
            eprintln!(
                "{} Wrote {} scriptlets to {} ({} errors, {} warnings)",
                "✓".green(),
                conversion.scriptlets().len(),
                out.display(),
                errors,
                warnings
            );
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

fn check_file(cli: &Cli, path: &Path, json: bool) -> anyhow::Result<()> {
    let settings = resolve_settings(cli)?;
    let converter = load_converter(&settings)?;
    let text = read_input(path)?;
    let expansion = converter.expand(&text);

    if json {
        let (errors, warnings) = summary_line(&expansion.diagnostics);
        let report = serde_json::json!({
            "file": path.display().to_string(),
            "model": converter.model().id,
            "steps": expansion.outcomes.len(),
            "diagnostics": expansion.diagnostics.iter().map(Diagnostic::to_json).collect::<Vec<_>>(),
            "summary": { "errors": errors, "warnings": warnings },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_diagnostics(path, &expansion.diagnostics);
        let (errors, warnings) = summary_line(&expansion.diagnostics);
        if errors == 0 {
            println!(
                "{} No errors found in {} ({} steps, {} warnings)",
                "✓".green(),
                path.display(),
                expansion.outcomes.len(),
                warnings
            );
        } else {
            println!(
                "{} {} errors, {} warnings in {}",
                "✗".red(),
                errors,
                warnings,
                path.display()
            );
        }
    }

    if expansion.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_ir(cli: &Cli, path: &Path) -> anyhow::Result<()> {
    let settings = resolve_settings(cli)?;
    let converter = load_converter(&settings)?;
    let text = read_input(path)?;
    let expansion = converter.expand(&text);

    print_diagnostics(path, &expansion.diagnostics);
    println!("{}", serde_json::to_string_pretty(&expansion.outcomes)?);
    Ok(())
}

fn validate_file(
    cli: &Cli,
    path: &Path,
    endpoint: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let xml = read_input(path)?;
    let report = validate_structure(&xml);
    let mut issues = report.issues;

    // Only read settings when no endpoint was given explicitly
    let settings = match endpoint {
        Some(_) => None,
        None => Some(resolve_settings(cli)?),
    };
    if let Some(endpoint) = schema_endpoint(endpoint, settings.as_ref()) {
        let external = HttpSchemaService::new(endpoint).validate(&xml);
        merge_external(&mut issues, external);
    }

    let (errors, warnings) = summary_line(&issues);
    if json {
        let report = serde_json::json!({
            "file": path.display().to_string(),
            "valid": errors == 0,
            "errors": issues.iter().map(Diagnostic::to_json).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_diagnostics(path, &issues);
        if errors == 0 {
            println!(
                "{} {} is a structurally valid test case ({} warnings)",
                "✓".green(),
                path.display(),
                warnings
            );
        } else {
            println!("{} {} errors in {}", "✗".red(), errors, path.display());
        }
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn list_models(cli: &Cli) -> anyhow::Result<()> {
    let settings = resolve_settings(cli)?;
    let cache = settings.catalog_cache();
    let catalog = cache.load(&settings.locale)?;

    println!(
        "{}",
        format!("Data models ({}, catalog v{})", catalog.locale, catalog.version).bold()
    );
    for model in &catalog.models {
        let marker = if model.id == settings.model { "*" } else { " " };
        println!(
            "{} {:<18} {} ({} extensions, {} rules)",
            marker,
            model.id.cyan(),
            model.name,
            model.extensions.len(),
            model.entry_count()
        );
    }
    Ok(())
}

fn show_samples(id: Option<&str>) -> anyhow::Result<()> {
    match id {
        Some(id) => {
            let sample = samples::find(id).ok_or_else(|| {
                anyhow!("unknown sample '{}' (run `gherkin-tdl samples` to list them)", id)
            })?;
            print!("{}", sample.content);
        }
        None => {
            for sample in samples::all() {
                println!(
                    "{:<24} {:<18} {}",
                    sample.id.cyan(),
                    sample.model,
                    sample.description
                );
            }
            println!(
                "\nPut project defaults in {} (see `gherkin-tdl --help`).",
                CONFIG_FILE
            );
        }
    }
    Ok(())
}
