use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use botc_scripts::config::{self, AppConfig};
use botc_scripts::model::{Night, Team};
use botc_scripts::{AppContext, ScriptDocument};

#[derive(Parser)]
#[command(name = "botc-script")]
#[command(about = "Inspect, check and repackage Blood on the Clocktower scripts", long_about = None)]
struct Cli {
    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Official character repository (directory or zip); overrides the config file
    #[arg(long, global = true)]
    repository: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a summary of a script
    Info {
        /// Script archive (.zip) or script.json
        path: PathBuf,
    },

    /// Report problems found while loading a script
    Validate {
        path: PathBuf,

        /// Also resolve every token image and report placeholders
        #[arg(long)]
        images: bool,
    },

    /// Turn an official character into an editable homebrew copy
    Fork {
        path: PathBuf,

        /// Id of the official character on the script
        id: String,

        /// Requested new id; `_new` is appended until it is free
        new_id: String,

        /// Where to write the result (defaults to overwriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Re-save a script as a normalized archive
    Repack {
        input: PathBuf,
        output: PathBuf,

        /// Download remote token images into the archive first
        #[arg(long)]
        fetch: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    botc_scripts::logging::init_logging(cli.verbose);

    let mut app_config = config::load_config();
    if let Some(path) = &cli.repository {
        app_config.official_repository = Some(path.to_string_lossy().to_string());
    }
    let ctx = AppContext::from_config(&app_config).context("Could not open the official repository")?;

    match cli.command {
        Commands::Info { path } => info_cmd(&ctx, &path),
        Commands::Validate { path, images } => validate_cmd(&ctx, &path, images).await,
        Commands::Fork {
            path,
            id,
            new_id,
            output,
        } => fork_cmd(&ctx, &mut app_config, &path, &id, &new_id, output.as_deref()),
        Commands::Repack { input, output, fetch } => {
            repack_cmd(&ctx, &mut app_config, &input, &output, fetch).await
        }
    }
}

fn open(ctx: &AppContext, path: &Path) -> anyhow::Result<botc_scripts::LoadOutcome> {
    ScriptDocument::open(ctx, path).with_context(|| format!("Could not open {}", path.display()))
}

fn info_cmd(ctx: &AppContext, path: &Path) -> anyhow::Result<()> {
    let doc = open(ctx, path)?.document;
    let meta = doc.meta();
    println!("{}", if meta.name().is_empty() { "(untitled)".to_string() } else { meta.name() });
    if !meta.author().is_empty() {
        println!("by {}", meta.author());
    }
    println!();

    for team in Team::ALL {
        let members: Vec<String> = doc
            .characters()
            .to_vec()
            .iter()
            .filter(|c| c.team() == team)
            .map(|c| {
                if doc.is_official(c) {
                    c.name()
                } else {
                    format!("{} (homebrew)", c.name())
                }
            })
            .collect();
        if !members.is_empty() {
            println!("{:<10} {}", team.as_str(), members.join(", "));
        }
    }

    for (label, night) in [("First night", Night::First), ("Other nights", Night::Other)] {
        let order: Vec<String> = doc.meta().night_order(night).to_vec().iter().map(|c| c.name()).collect();
        println!("\n{label}: {}", order.join(" > "));
    }

    let jinxes = doc.jinxes().to_vec();
    if !jinxes.is_empty() {
        println!("\nJinxes:");
        for jinx in jinxes {
            println!("  {} / {}: {}", jinx.parent(), jinx.child(), jinx.rule());
        }
    }
    Ok(())
}

async fn validate_cmd(ctx: &AppContext, path: &Path, check_images: bool) -> anyhow::Result<()> {
    let outcome = open(ctx, path)?;
    let doc = outcome.document;
    let mut problems: Vec<String> = outcome.issues.iter().map(|i| i.to_string()).collect();

    for jinx in doc.dangling_jinxes() {
        problems.push(format!(
            "jinx {} / {} refers to a character not on the script",
            jinx.parent(),
            jinx.child()
        ));
    }

    if check_images {
        for character in doc.characters().to_vec() {
            for slot in 0..character.team().token_slots() {
                let key = doc.image_key(&character, slot);
                let loaded = doc.images().get_image(&key).await;
                if loaded.is_network_error() {
                    problems.push(format!("{} slot {slot}: image could not be fetched", character.id()));
                } else if loaded.is_placeholder() {
                    problems.push(format!("{} slot {slot}: no image, using default", character.id()));
                }
            }
        }
    }

    if problems.is_empty() {
        println!("{}: OK", path.display());
        return Ok(());
    }
    for problem in &problems {
        println!("{problem}");
    }
    bail!("{} problem(s) found in {}", problems.len(), path.display())
}

fn fork_cmd(
    ctx: &AppContext,
    app_config: &mut AppConfig,
    path: &Path,
    id: &str,
    new_id: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let doc = open(ctx, path)?.document;
    let character = doc
        .character(id)
        .with_context(|| format!("'{id}' is not on the script"))?;
    let assigned = doc.fork(&character, new_id)?;

    let output = output.map(Path::to_path_buf).unwrap_or_else(|| archive_path(path));
    doc.write_archive(&output)
        .with_context(|| format!("Could not write {}", output.display()))?;
    println!("Forked {id} as {assigned} into {}", output.display());
    remember(app_config, &doc, &output);
    Ok(())
}

async fn repack_cmd(
    ctx: &AppContext,
    app_config: &mut AppConfig,
    input: &Path,
    output: &Path,
    fetch: bool,
) -> anyhow::Result<()> {
    let doc = open(ctx, input)?.document;

    if fetch {
        let mut failed = 0;
        for character in doc.characters().to_vec() {
            if doc.is_official(&character) {
                continue;
            }
            for slot in 0..character.team().token_slots() {
                let loaded = doc.images().get_image(&doc.image_key(&character, slot)).await;
                if loaded.is_network_error() {
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            warn!("{failed} image(s) could not be downloaded and keep their URLs");
        }
    }

    doc.write_archive(output)
        .with_context(|| format!("Could not write {}", output.display()))?;
    info!(input = %input.display(), output = %output.display(), "Repacked script");
    println!("Wrote {}", output.display());
    remember(app_config, &doc, output);
    Ok(())
}

// A bare script.json has nowhere to keep token art, so forks of one are
// written next to it as a zip.
fn archive_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
        path.with_extension("zip")
    } else {
        path.to_path_buf()
    }
}

fn remember(app_config: &mut AppConfig, doc: &ScriptDocument, path: &Path) {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    app_config.remember_script(&doc.meta().name(), &path.to_string_lossy(), None);
    if let Err(e) = config::save_config(app_config) {
        warn!("Could not update recent scripts: {e}");
    }
}
