//! Command-line interface for the harvester.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::client::HarvestClient;
use crate::config::{parse_date, ClientConfig, DEFAULT_CANDIDATE_SIZES};
use crate::diagnostics::{DiagnosticsHook, HarvestEvent};
use crate::error::Result;
use crate::snapshot::save_snapshot;
use crate::types::{Endpoint, QuerySpec, Record};

/// PNCP Harvester - Download procurement records from the PNCP API.
#[derive(Parser)]
#[command(name = "pncp-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Paginated listings that can be harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Listing {
    /// Procurements by publication date.
    Publicacao,
    /// Procurements with proposals open.
    Proposta,
}

impl Listing {
    fn endpoint(self) -> Endpoint {
        match self {
            Self::Publicacao => Endpoint::publications(),
            Self::Proposta => Endpoint::open_proposals(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Harvest all records published in a date range and save them as JSON.
    Harvest {
        /// First day, YYYY-MM-DD or YYYYMMDD
        #[arg(long)]
        from: String,

        /// Last day, inclusive (default: same as --from)
        #[arg(long)]
        to: Option<String>,

        /// Modality code (codigoModalidadeContratacao), e.g. 8 for Dispensa
        #[arg(short, long)]
        category: Option<u32>,

        /// Only purchases by this agency (14-digit CNPJ)
        #[arg(long)]
        cnpj: Option<String>,

        /// Requested page size (clamped to the endpoint's ceiling)
        #[arg(short, long)]
        page_size: Option<usize>,

        /// Stop after this many pages
        #[arg(long)]
        max_pages: Option<u32>,

        /// Listing to harvest
        #[arg(long, value_enum, default_value_t = Listing::Publicacao)]
        listing: Listing,

        /// Output file or directory (default: current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Find the largest page size a listing accepts.
    Discover {
        /// Candidate sizes, tried in order
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<usize>,

        /// Listing to probe
        #[arg(long, value_enum, default_value_t = Listing::Publicacao)]
        listing: Listing,
    },

    /// List the items of one purchase.
    Items {
        /// Agency CNPJ (14 digits)
        cnpj: String,
        /// Purchase year
        year: u16,
        /// Purchase sequence number
        sequence: u32,
        /// Write the items to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the documents attached to one purchase.
    Files {
        /// Agency CNPJ (14 digits)
        cnpj: String,
        /// Purchase year
        year: u16,
        /// Purchase sequence number
        sequence: u32,
        /// Write the file list to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Harvest {
            from,
            to,
            category,
            cnpj,
            page_size,
            max_pages,
            listing,
            output,
        } => {
            let spec = build_spec(listing, &from, to.as_deref(), category, cnpj)?;
            harvest_command(spec, page_size, max_pages, output.as_deref())
        }
        Commands::Discover {
            candidates,
            listing,
        } => discover_command(listing, &candidates),
        Commands::Items {
            cnpj,
            year,
            sequence,
            output,
        } => {
            let endpoint = Endpoint::purchase_items(&cnpj, year, sequence)?;
            list_command(&endpoint, "items", output.as_deref())
        }
        Commands::Files {
            cnpj,
            year,
            sequence,
            output,
        } => {
            let endpoint = Endpoint::purchase_files(&cnpj, year, sequence)?;
            list_command(&endpoint, "files", output.as_deref())
        }
    }
}

/// Validate the harvest arguments into a query.
fn build_spec(
    listing: Listing,
    from: &str,
    to: Option<&str>,
    category: Option<u32>,
    cnpj: Option<String>,
) -> Result<QuerySpec> {
    let start = parse_date(from)?;
    let end = to.map(parse_date).transpose()?.unwrap_or(start);

    let mut spec = QuerySpec::new(listing.endpoint(), start, end)?;
    if let Some(category) = category {
        spec = spec.with_category(category);
    }
    if let Some(cnpj) = cnpj {
        spec = spec.with_agency(cnpj);
        spec.validate()?;
    }
    Ok(spec)
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Execute the harvest command.
fn harvest_command(
    spec: QuerySpec,
    page_size: Option<usize>,
    max_pages: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    let mut config = ClientConfig::from_env()?;
    if max_pages.is_some() {
        config = config.with_max_pages(max_pages);
    }
    let page_size = page_size.unwrap_or(config.default_page_size);

    println!(
        "{} {} from {} to {}",
        style("Harvesting").bold(),
        style(&spec.endpoint).cyan(),
        style(spec.start).green(),
        style(spec.end).green()
    );
    println!();

    let pb = spinner();
    pb.set_message("Requesting page 1...");

    let progress = pb.clone();
    let hook = DiagnosticsHook::new(move |event| match event {
        HarvestEvent::PageFetched {
            page, total_pages, ..
        } => match total_pages {
            Some(total) => progress.set_message(format!("Fetched page {page} of {total}")),
            None => progress.set_message(format!("Fetched page {page}")),
        },
        HarvestEvent::CeilingLowered { ceiling, .. } => {
            progress.set_message(format!("Page size rejected, retrying with {ceiling}"));
        }
        HarvestEvent::Retry { attempt, .. } => {
            progress.set_message(format!("Transient failure, attempt {attempt}"));
        }
        _ => {}
    });

    let client = HarvestClient::new(config)?.with_diagnostics(hook);

    let mut harvest = client.harvest(spec.clone(), page_size)?;
    let mut records: Vec<Record> = Vec::new();
    for record in harvest.by_ref() {
        match record {
            Ok(record) => records.push(record),
            Err(e) => {
                pb.finish_and_clear();
                if let Some(page) = e.resume_page() {
                    eprintln!(
                        "{} {} records fetched before the failure; resume from page {page}",
                        style("Note:").yellow().bold(),
                        records.len()
                    );
                }
                return Err(e);
            }
        }
    }

    pb.set_message("Saving snapshot...");
    let pages = harvest.pages_fetched();
    let final_size = harvest.page_size();
    let path = match save_snapshot(&records, &spec, output) {
        Ok(path) => path,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };
    pb.finish_and_clear();

    println!("  Pages: {pages}");
    println!("  Page size: {final_size}");
    println!("  Records: {}", style(records.len()).green());
    println!();
    println!("{} {}", style("Saved to:").green().bold(), path.display());

    Ok(())
}

/// Execute the discover command.
fn discover_command(listing: Listing, candidates: &[usize]) -> Result<()> {
    let candidates = if candidates.is_empty() {
        DEFAULT_CANDIDATE_SIZES.to_vec()
    } else {
        candidates.to_vec()
    };
    let endpoint = listing.endpoint();
    let client = HarvestClient::new(ClientConfig::from_env()?)?;

    let pb = spinner();
    pb.set_message(format!("Probing {endpoint} with sizes {candidates:?}..."));
    let result = client.discover_page_size_ceiling(&endpoint, &candidates);
    pb.finish_and_clear();

    let ceiling = result?;
    println!(
        "{} {} accepts page size {}",
        style("Ceiling:").green().bold(),
        style(&endpoint).cyan(),
        style(ceiling).green()
    );
    Ok(())
}

/// Execute the items and files commands.
fn list_command(endpoint: &Endpoint, what: &str, output: Option<&Path>) -> Result<()> {
    let client = HarvestClient::new(ClientConfig::from_env()?)?;
    let records = client.list_resources(endpoint)?;
    let json = serde_json::to_string_pretty(&records)?;

    match output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))?;
            println!(
                "{} {} {what} to {}",
                style("Saved").green().bold(),
                records.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}
