//! Rosterkit CLI
//!
//! Thin wrapper around rosterkit-core for working with roster documents.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a roster file
//! rosterkit check roster.xml
//!
//! # Rewrite a file in canonical form
//! rosterkit fmt roster.xml --in-place
//!
//! # Show the tree, as text or JSON
//! rosterkit tree roster.xml --json
//!
//! # List every via and the node that claims it
//! rosterkit vias roster.xml
//!
//! # Mirror a synced document into the roster through the sync engine
//! rosterkit mirror roster.xml bookmarks.xml --tag bookmarks
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rosterkit_core::roster::bookmark;
use rosterkit_core::sync::SyncEvent;
use rosterkit_core::{
    xml, LoadReport, MemoryStore, Node, NodeKind, Roster, RosterMirror, SyncConfig, SyncEngine,
    WriteOptions,
};
use serde::Serialize;
use tracing::info;

/// Rosterkit - contact roster documents
#[derive(Parser)]
#[command(name = "rosterkit")]
#[command(version = "0.1.0")]
#[command(about = "Inspect, validate and normalize roster documents")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not build group chat bookmarks; keep them as opaque entries
    #[arg(long, global = true)]
    no_bookmarks: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a roster file and report problems
    Check {
        /// Roster XML file
        file: PathBuf,

        /// Succeed even if entries were skipped or rejected
        #[arg(long)]
        lenient: bool,
    },

    /// Print a roster file in canonical form
    Fmt {
        /// Roster XML file
        file: PathBuf,

        /// Spaces per nesting level
        #[arg(long, default_value_t = 2, conflicts_with = "compact")]
        indent: usize,

        /// Write everything on one line
        #[arg(long)]
        compact: bool,

        /// Overwrite the file instead of printing
        #[arg(short, long)]
        in_place: bool,
    },

    /// Show the roster tree
    Tree {
        /// Roster XML file
        file: PathBuf,

        /// Emit JSON instead of an indented outline
        #[arg(long)]
        json: bool,
    },

    /// List vias and the nodes that claim them
    Vias {
        /// Roster XML file
        file: PathBuf,
    },

    /// Apply a synced tag document to the roster and print the result
    Mirror {
        /// Roster XML file
        file: PathBuf,

        /// Document of the synced tag, as the private store would hold it
        document: PathBuf,

        /// Name of the synced tag
        #[arg(short, long, default_value = "bookmarks")]
        tag: String,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

fn new_roster(bookmarks: bool) -> Roster {
    let mut roster = Roster::new();
    if bookmarks {
        bookmark::register(roster.factories_mut());
    }
    roster
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Load a roster file
fn load(path: &Path, bookmarks: bool) -> Result<(Roster, LoadReport)> {
    let text = read_file(path)?;
    let mut roster = new_roster(bookmarks);
    let report = roster
        .load_xml(&text)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    info!(
        path = %path.display(),
        nodes = roster.len(),
        clean = report.is_clean(),
        "Loaded roster file"
    );
    Ok((roster, report))
}

fn print_report(report: &LoadReport) {
    println!("Attached: {}", report.attached.len());
    println!("Skipped: {}", report.skipped.len());
    for problem in &report.skipped {
        println!("  {}", problem);
    }
    println!("Rejected: {}", report.rejected.len());
    for problem in &report.rejected {
        println!("  {}", problem);
    }
}

/// JSON form of a node for `tree --json`
#[derive(Serialize)]
struct TreeEntry {
    tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    vias: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    opaque: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<TreeEntry>,
}

impl TreeEntry {
    fn from_node(node: &Node) -> Self {
        let vias = match node.kind() {
            NodeKind::Contact(_) => Vec::new(),
            _ => node.vias().iter().map(ToString::to_string).collect(),
        };
        Self {
            tag: node.tag().to_string(),
            label: node.label().map(str::to_string),
            vias,
            opaque: matches!(node.kind(), NodeKind::Opaque(_)),
            children: node.children().iter().map(Self::from_node).collect(),
        }
    }
}

fn print_outline(node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    let mut line = format!("{}{}", indent, node.tag());
    if let Some(label) = node.label() {
        line.push_str(&format!(" \"{}\"", label));
    }
    match node.kind() {
        NodeKind::Via(entry) => line.push_str(&format!(" {}", entry.via())),
        NodeKind::Plugin(_) => {
            for via in node.vias() {
                line.push_str(&format!(" {}", via));
            }
        }
        NodeKind::Opaque(_) => line.push_str(" (opaque)"),
        _ => {}
    }
    println!("{}", line);
    for child in node.children() {
        print_outline(child, depth + 1);
    }
}

/// Path of labels from the root down to `node`
fn node_path(roster: &Roster, node: &Node) -> String {
    let mut parts = vec![node.label().unwrap_or(node.tag()).to_string()];
    let mut current = node.parent();
    while let Some(id) = current {
        let Some(parent) = roster.node(id) else { break };
        if parent.is_root() {
            break;
        }
        parts.push(parent.label().unwrap_or(parent.tag()).to_string());
        current = parent.parent();
    }
    parts.reverse();
    parts.join("/")
}

async fn mirror(roster: Roster, document: xml::Element, tag: &str) -> Result<Roster> {
    let store = Arc::new(MemoryStore::new());
    store.put(tag, document);

    let roster = roster.into_shared();
    let target = roster.read().root_id();
    let engine = SyncEngine::new(store, roster.clone(), SyncConfig::default());
    engine.register_tag(tag, Arc::new(RosterMirror::new(tag, target)));

    let mut events = engine.subscribe();
    let changes = engine.sync_tag(tag).await?;
    engine.shutdown().await;

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::HandlerError { id, message, .. } = event {
            eprintln!("warning: {} not mirrored: {}", id, message);
            failures += 1;
        }
    }
    eprintln!("Applied {} change(s), {} failed", changes.len(), failures);

    drop(engine);
    let roster = Arc::try_unwrap(roster)
        .map_err(|_| anyhow::anyhow!("Roster still shared after sync"))?
        .into_inner();
    Ok(roster)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    let bookmarks = !cli.no_bookmarks;

    match cli.command {
        Commands::Check { file, lenient } => {
            let (roster, report) = load(&file, bookmarks)?;
            println!("{}: {} node(s)", file.display(), roster.len());
            print_report(&report);
            if !report.is_clean() && !lenient {
                anyhow::bail!(
                    "{} has {} skipped and {} rejected entries",
                    file.display(),
                    report.skipped.len(),
                    report.rejected.len()
                );
            }
        }

        Commands::Fmt {
            file,
            indent,
            compact,
            in_place,
        } => {
            let (roster, report) = load(&file, bookmarks)?;
            if !report.is_clean() {
                anyhow::bail!(
                    "Refusing to format {}: entries would be dropped (run `rosterkit check`)",
                    file.display()
                );
            }
            let options = if compact {
                WriteOptions::compact()
            } else {
                WriteOptions {
                    indent: Some(indent),
                    declaration: true,
                }
            };
            let mut output = roster.to_xml(&options)?;
            output.push('\n');

            if in_place {
                std::fs::write(&file, output)
                    .with_context(|| format!("Failed to write {}", file.display()))?;
                println!("Formatted {}", file.display());
            } else {
                print!("{}", output);
            }
        }

        Commands::Tree { file, json } => {
            let (roster, _) = load(&file, bookmarks)?;
            if json {
                let entry = TreeEntry::from_node(roster.root());
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                print_outline(roster.root(), 0);
            }
        }

        Commands::Vias { file } => {
            let (roster, _) = load(&file, bookmarks)?;
            let mut rows = Vec::new();
            roster.root().walk(&mut |node| {
                let Some(group) = node.as_group() else {
                    return;
                };
                for (via, owner) in group.scope().vias().iter() {
                    if let Some(owner) = roster.node(*owner) {
                        rows.push(format!("{}\t{}", via, node_path(&roster, owner)));
                    }
                }
            });
            rows.sort();
            if rows.is_empty() {
                println!("No vias.");
            }
            for row in rows {
                println!("{}", row);
            }
        }

        Commands::Mirror {
            file,
            document: document_path,
            tag,
        } => {
            let (roster, _) = load(&file, bookmarks)?;
            let document = xml::parse(&read_file(&document_path)?)
                .with_context(|| format!("Failed to parse {}", document_path.display()))?;
            let roster = mirror(roster, document, &tag).await?;
            println!("{}", roster.to_xml(&WriteOptions::default())?);
        }
    }

    Ok(())
}
