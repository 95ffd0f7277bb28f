//! CLI for the custodial treasury.
//!
//! Pipeline: read scenario files -> validate -> parallel run -> report / sink.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use treasury_core::AssetKind;
use treasury_engine::reporter::Report;
use treasury_engine::sink::json_stream::JsonStreamSink;
use treasury_engine::{run_batch, Scenario, ScenarioOutcome};

#[derive(Parser, Debug)]
#[command(name = "treasury", version, about = "Custodial treasury scenario runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run scenario files against fresh treasuries.
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print outcomes as JSON instead of the text report.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Sink output: "ndjson" writes NDJSON to stdout,
        /// "ndjson:/path/to/file" writes to file.
        #[arg(long, env = "TREASURY_SINK", value_parser = parse_sink)]
        sink: Option<SinkTarget>,

        /// Exit with an error if any step missed its expected outcome.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Parse and validate scenario files without running them.
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Where `--sink` sends NDJSON rows.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkTarget {
    Stdout,
    File(PathBuf),
}

fn parse_sink(spec: &str) -> Result<SinkTarget, String> {
    if spec == "ndjson" {
        return Ok(SinkTarget::Stdout);
    }
    match spec.strip_prefix("ndjson:") {
        Some(path) if !path.is_empty() => Ok(SinkTarget::File(PathBuf::from(path))),
        _ => Err(format!("unknown sink '{spec}'. Use 'ndjson' or 'ndjson:/path'")),
    }
}

async fn load(files: &[PathBuf]) -> Result<Vec<Scenario>, Box<dyn std::error::Error>> {
    let mut scenarios = Vec::with_capacity(files.len());
    for path in files {
        let text = tokio::fs::read_to_string(path).await?;
        let scenario = Scenario::from_json(&text)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        scenarios.push(scenario);
    }
    Ok(scenarios)
}

fn write_rows<W: Write>(
    sink: &mut JsonStreamSink<W>,
    outcomes: &[ScenarioOutcome],
) -> std::io::Result<()> {
    for outcome in outcomes {
        let (summary, steps, events) = Report::build(outcome).to_rows(outcome);
        sink.write_summary(&summary)?;
        sink.write_steps(&steps)?;
        sink.write_events(&events)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            files,
            json,
            sink,
            strict,
        } => {
            let t0 = Instant::now();

            // 1. Load.
            let scenarios = load(&files).await?;
            tracing::info!(
                scenarios = scenarios.len(),
                elapsed_ms = t0.elapsed().as_millis(),
                "loaded scenarios"
            );

            // 2. Run. Each scenario is single-threaded; the batch is not.
            let results = tokio::task::spawn_blocking(move || run_batch(&scenarios)).await?;
            let outcomes = results.into_iter().collect::<Result<Vec<_>, _>>()?;

            let mismatches: usize = outcomes.iter().map(|o| o.mismatches()).sum();
            tracing::info!(
                scenarios = outcomes.len(),
                mismatches,
                elapsed_ms = t0.elapsed().as_millis(),
                "run complete"
            );

            // 3. Output.
            if let Some(target) = sink {
                match target {
                    SinkTarget::Stdout => {
                        let mut s = JsonStreamSink::stdout();
                        write_rows(&mut s, &outcomes)?;
                        let n = s.finish()?;
                        tracing::info!(rows = n, "ndjson sink: wrote to stdout");
                    }
                    SinkTarget::File(path) => {
                        let file = std::fs::File::create(&path)?;
                        let mut s = JsonStreamSink::new(file);
                        write_rows(&mut s, &outcomes)?;
                        let n = s.finish()?;
                        tracing::info!(rows = n, path = %path.display(), "ndjson sink: wrote to file");
                    }
                }

                // Report goes to stderr so stdout stays machine-readable.
                for outcome in &outcomes {
                    eprint!("{}", Report::build(outcome).render(outcome));
                }
            } else if json {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            } else {
                for outcome in &outcomes {
                    print!("{}", Report::build(outcome).render(outcome));
                }
            }

            if strict && mismatches > 0 {
                return Err(format!("{mismatches} step(s) did not match their expected outcome").into());
            }
        }
        Commands::Check { files } => {
            let scenarios = load(&files).await?;
            for (path, scenario) in files.iter().zip(&scenarios) {
                scenario
                    .validate()
                    .map_err(|e| format!("{}: {e}", path.display()))?;
                let count = |kind| scenario.assets.iter().filter(|a| a.kind == kind).count();
                println!(
                    "{}: ok ({} steps, {} {}, {} {})",
                    path.display(),
                    scenario.steps.len(),
                    count(AssetKind::Erc20),
                    AssetKind::Erc20,
                    count(AssetKind::Erc721),
                    AssetKind::Erc721,
                );
            }
        }
    }

    Ok(())
}
