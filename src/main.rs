// pii-ner: flattens JSON records into sentences, recognizes PII values in them and
// maps the hits back onto the original payload. Serves predictions over HTTP.
use std::fs::{self, File};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod nlp;
mod server;
mod service;

use config::ServeConfig;
use nlp::label::{process_data, source_files, PiiTable};
use nlp::train::{train, DEFAULT_MODEL_NAME};
use nlp::{build_jsonp, convert_json_to_lines, map_entities, MappedEntity};
use service::ScoringService;

#[derive(Parser)]
#[command(name = "pii-ner", about = "PII entity recognition for JSON records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve /ping and /invocations.
    Serve {
        #[arg(long, env = "PII_NER_BIND", default_value = config::DEFAULT_BIND)]
        bind: SocketAddr,
        #[arg(long, env = "PII_NER_MODEL_ROOT", default_value = config::DEFAULT_MODEL_ROOT)]
        model_root: PathBuf,
        #[arg(long, env = "PII_NER_MODEL_NAME", default_value = config::DEFAULT_MODEL_NAME)]
        model_name: String,
        #[arg(long, default_value_t = config::DEFAULT_MAX_BODY_BYTES)]
        max_body_bytes: usize,
        /// Load the model before accepting requests.
        #[arg(long)]
        eager: bool,
    },
    /// Print the sentences a JSON file flattens to.
    Flatten {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Label flattened training files with known PII values.
    Label {
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        pii: PathBuf,
        /// Write examples here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Build a model directory from labeled training files.
    Train {
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        pii: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        #[arg(short, long, default_value = DEFAULT_MODEL_NAME)]
        name: String,
    },
    /// Run the prediction pipeline on one JSON file.
    Extract {
        #[arg(short, long)]
        model: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
        /// Report JSON paths instead of payload offsets.
        #[arg(long)]
        jsonpath: bool,
        /// Print the same JSON body /invocations would return.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pii_ner=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn training_files(data_dir: &Path, pii: &Path) -> Vec<PathBuf> {
    let pii = fs::canonicalize(pii).unwrap_or_else(|_| pii.to_path_buf());
    source_files(data_dir)
        .into_iter()
        .filter(|p| fs::canonicalize(p).map(|c| c != pii).unwrap_or(true))
        .collect()
}

fn run_flatten(input: &Path) -> Result<()> {
    for line in convert_json_to_lines(input)? {
        println!("{}", line);
    }
    Ok(())
}

fn run_label(data_dir: &Path, pii: &Path, out: Option<&Path>) -> Result<()> {
    let table = PiiTable::load(pii)?;
    let files = training_files(data_dir, pii);
    let (examples, labels) = process_data(&files, &table)?;
    let annotated = examples.iter().filter(|e| !e.entities.is_empty()).count();
    tracing::info!(examples = examples.len(), annotated, labels = ?labels, "labeling done");

    let body = serde_json::json!({ "labels": labels, "examples": examples });
    match out {
        Some(path) => {
            let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            serde_json::to_writer_pretty(f, &body)?;
            println!("Wrote {} examples to {}", examples.len(), path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&body)?),
    }
    Ok(())
}

fn run_train(data_dir: &Path, pii: &Path, out: &Path, name: &str) -> Result<()> {
    let table = PiiTable::load(pii)?;
    let files = training_files(data_dir, pii);
    let (examples, labels) = process_data(&files, &table)?;
    let (model, report) = train(&examples, &labels, name)?;
    model.save(out)?;

    println!("Saved model {} to {}", name, out.display());
    println!(
        "examples: {}  patterns: {}  precision: {:.3}  recall: {:.3}  f1: {:.3}",
        report.examples, report.patterns, report.precision, report.recall, report.f1
    );
    Ok(())
}

fn run_extract(model: &Path, input: &Path, jsonpath: bool, as_json: bool) -> Result<()> {
    let payload = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let record: Value =
        serde_json::from_str(&payload).with_context(|| format!("parsing {}", input.display()))?;

    let service = ScoringService::from_dir(model.to_path_buf());
    if service.get_model().is_none() {
        anyhow::bail!("no usable model at {}", model.display());
    }
    let predictions = service.predict(&record).unwrap_or_default();
    let entities = if jsonpath {
        build_jsonp(&record, &predictions)
    } else {
        map_entities(&payload, &predictions)
    };

    if as_json {
        println!("{}", serde_json::json!({ "entities": entities }));
        return Ok(());
    }
    print_entities(&entities)?;
    Ok(())
}

fn print_entities(entities: &[MappedEntity]) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    if entities.is_empty() {
        writeln!(stdout, "(no entities)")?;
        return Ok(());
    }
    for e in entities {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
        write!(stdout, "{:<16}", e.label)?;
        stdout.reset()?;
        write!(stdout, " {:?} [{}..{}]", e.text, e.start, e.end)?;
        if let Some(path) = &e.path {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
            write!(stdout, " {}", path)?;
            stdout.reset()?;
        }
        writeln!(stdout)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            bind,
            model_root,
            model_name,
            max_body_bytes,
            eager,
        } => {
            let config = ServeConfig {
                bind,
                model_root,
                model_name,
                max_body_bytes,
                eager,
            };
            server::serve(config).await?
        }
        Commands::Flatten { input } => run_flatten(&input)?,
        Commands::Label { data_dir, pii, out } => run_label(&data_dir, &pii, out.as_deref())?,
        Commands::Train {
            data_dir,
            pii,
            out,
            name,
        } => run_train(&data_dir, &pii, &out, &name)?,
        Commands::Extract {
            model,
            input,
            jsonpath,
            json,
        } => run_extract(&model, &input, jsonpath, json)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["pii-ner", "serve"]).unwrap();
        match cli.command {
            Commands::Serve {
                bind,
                model_root,
                model_name,
                eager,
                ..
            } => {
                assert_eq!(bind, ServeConfig::default().bind);
                assert_eq!(model_root, PathBuf::from("/opt/ml/model"));
                assert_eq!(model_name, "pii_ner");
                assert!(!eager);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_training_files_skip_pii_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pii = dir.path().join("PII_Data.json");
        std::fs::write(&pii, r#"[["PID1234", "PassengerID"]]"#)?;
        std::fs::write(dir.path().join("00_record.json"), r#"{"PassengerID": "PID1234"}"#)?;

        let files = training_files(dir.path(), &pii);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("00_record.json"));
        Ok(())
    }

    #[test]
    fn test_train_then_extract_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let data = dir.path().join("data");
        std::fs::create_dir(&data)?;
        std::fs::write(
            data.join("00_flight.json"),
            r#"{"Passenger": {"PassengerID": "PID1234", "name": "Jim Bob"}}"#,
        )?;
        let pii = dir.path().join("PII_Data.json");
        std::fs::write(&pii, r#"[["PID1234", "PassengerID"], ["Jim Bob", "Name"]]"#)?;
        let model_dir = dir.path().join("model").join("pii_ner");

        run_train(&data, &pii, &model_dir, DEFAULT_MODEL_NAME)?;
        assert!(model_dir.join(nlp::ner::MODEL_FILE).is_file());

        let service = ScoringService::from_dir(model_dir);
        let payload = r#"{"id":"PID1234","note":"dup PID1234 dup"}"#;
        let record: Value = serde_json::from_str(payload)?;
        let predictions = service.predict(&record).unwrap_or_default();
        let mapped = map_entities(payload, &predictions);
        assert_eq!(mapped.len(), 2);
        assert!(mapped.iter().all(|m| m.label == "PASSENGER_ID"));
        Ok(())
    }
}
