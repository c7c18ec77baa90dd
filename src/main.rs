//! Command line front end for training, inspecting and querying the models.

use std::path::PathBuf;

use annolab::annotations::{AnnotationStore, JsonAnnotationStore};
use annolab::config::{self, OrchestratorConfig};
use annolab::training::JobOutcome;
use annolab::{ModelKind, Orchestrator, logging};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    let config = match &options.config_path {
        Some(path) => config::load_from(path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())?;
    let orchestrator = Orchestrator::from_config(&config).map_err(|err| err.to_string())?;

    match options.command {
        Command::Train { kind, store } => train(&orchestrator, &config, kind, store),
        Command::Status { kind } => {
            let kinds = kind.map(|kind| vec![kind]).unwrap_or(ModelKind::ALL.to_vec());
            for kind in kinds {
                let status = orchestrator.status(kind);
                println!("{kind}: {}", to_json(&status)?);
                if let Some(err) = orchestrator.last_error(kind) {
                    println!("{kind} last error: {err}");
                }
            }
            Ok(())
        }
        Command::Predict { kind, files } => {
            println!("{}", to_json(&orchestrator.predict(kind, &files))?);
            Ok(())
        }
        Command::Uncertainty { file } => {
            println!("{}", to_json(&orchestrator.compute_uncertainty(&file))?);
            Ok(())
        }
        Command::Reset { kind } => {
            orchestrator.reset(kind).map_err(|err| err.to_string())?;
            println!("{kind} model reset");
            Ok(())
        }
        Command::Check { kind, repair } => {
            if repair {
                let summary = orchestrator
                    .repair_consistency(kind)
                    .map_err(|err| err.to_string())?;
                println!(
                    "fixed {} files ({} lines reassigned, {} dropped), manifest rewritten: {}",
                    summary.files_fixed,
                    summary.lines_fixed,
                    summary.lines_dropped,
                    summary.manifest_rewritten
                );
            }
            let report = orchestrator
                .check_consistency(kind)
                .map_err(|err| err.to_string())?;
            println!(
                "classes: {} (manifest nc {}), train {}/{} images/labels, val {}/{}",
                report.class_count,
                report.manifest_nc,
                report.train.images,
                report.train.labels,
                report.val.images,
                report.val.labels
            );
            for issue in &report.issues {
                println!("  {issue:?}");
            }
            if report.is_consistent() {
                println!("dataset is consistent");
            }
            Ok(())
        }
    }
}

fn train(
    orchestrator: &Orchestrator,
    config: &OrchestratorConfig,
    kind: ModelKind,
    store: Option<PathBuf>,
) -> Result<(), String> {
    let store_path = store
        .or_else(|| config.paths.annotations_file.clone())
        .ok_or_else(|| "No annotation store given; pass --store <file>".to_string())?;
    let images = JsonAnnotationStore::new(store_path)
        .fully_annotated()
        .map_err(|err| err.to_string())?;
    println!("training {kind} on {} fully annotated images", images.len());
    let job = orchestrator
        .start_training_job(kind, images)
        .ok_or_else(|| format!("{kind} training already running"))?;
    match job.wait() {
        JobOutcome::Ready { artifact } => {
            println!("{kind} model ready: {}", artifact.display());
            Ok(())
        }
        JobOutcome::Failed(message) => Err(format!("{kind} training failed: {message}")),
        JobOutcome::Stale => Err(format!("{kind} training was superseded by a reset")),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|err| err.to_string())
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Train {
        kind: ModelKind,
        store: Option<PathBuf>,
    },
    Status {
        kind: Option<ModelKind>,
    },
    Predict {
        kind: ModelKind,
        files: Vec<String>,
    },
    Uncertainty {
        file: String,
    },
    Reset {
        kind: ModelKind,
    },
    Check {
        kind: ModelKind,
        repair: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_kind(value: Option<&String>) -> Result<ModelKind, String> {
    let value = value.ok_or_else(|| "Missing model kind (detector or few_shot)".to_string())?;
    value
        .parse::<ModelKind>()
        .map_err(|_| format!("Unknown model kind: {value}"))
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut config_path: Option<PathBuf> = None;
    let mut store: Option<PathBuf> = None;
    let mut repair = false;
    let mut positional: Vec<String> = Vec::new();

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            "--store" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--store requires a value".to_string())?;
                store = Some(PathBuf::from(value));
            }
            "--repair" => {
                repair = true;
            }
            other if other.starts_with("--") => {
                return Err(format!("Unknown argument: {other}\n\n{}", help_text()));
            }
            other => positional.push(other.to_string()),
        }
        idx += 1;
    }

    let (name, rest) = positional
        .split_first()
        .ok_or_else(help_text)?;
    let command = match name.as_str() {
        "train" => Command::Train {
            kind: parse_kind(rest.first())?,
            store,
        },
        "status" => Command::Status {
            kind: rest.first().map(|value| parse_kind(Some(value))).transpose()?,
        },
        "predict" => {
            let kind = parse_kind(rest.first())?;
            let files = rest[1..].to_vec();
            if files.is_empty() {
                return Err("predict requires at least one image filename".to_string());
            }
            Command::Predict { kind, files }
        }
        "uncertainty" => Command::Uncertainty {
            file: rest
                .first()
                .cloned()
                .ok_or_else(|| "uncertainty requires an image filename".to_string())?,
        },
        "reset" => Command::Reset {
            kind: parse_kind(rest.first())?,
        },
        "check" => Command::Check {
            kind: parse_kind(rest.first())?,
            repair,
        },
        other => return Err(format!("Unknown command: {other}\n\n{}", help_text())),
    };
    Ok(CliOptions {
        config_path,
        command,
    })
}

fn help_text() -> String {
    [
        "annolab",
        "",
        "Train and query the detector and few-shot models.",
        "",
        "Usage:",
        "  annolab [--config <file>] train <kind> [--store <annotations.json>]",
        "  annolab [--config <file>] status [<kind>]",
        "  annolab [--config <file>] predict <kind> <image>...",
        "  annolab [--config <file>] uncertainty <image>",
        "  annolab [--config <file>] reset <kind>",
        "  annolab [--config <file>] check <kind> [--repair]",
        "",
        "Kinds: detector, few_shot",
    ]
    .join("\n")
}
