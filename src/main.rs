use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use sli_pipeline::index::{validate_harvested_entries, SolrIndex};
use sli_pipeline::settings::{
    PipelineSettings, DEFAULT_INDEX_ROWS, DEFAULT_SOLR_COLLECTION, DEFAULT_SOLR_HOST,
};
use sli_pipeline::stage::{discover_datasets, register_commands, PipelineDriver, PluginRegistry, PluginResolver};
use sli_pipeline::{
    logging, DatasetId, JsonLinesStore, LogStore, RunMode, StageRunner, StatusReporter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Harvest and process every dataset
    All,
    /// Harvest every dataset
    Harvest,
    /// Process every dataset
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Steps {
    Harvest,
    Process,
    All,
}

#[derive(Parser, Debug)]
#[command(version, about = "Sea level indicators pipeline", long_about = None)]
struct Args {
    /// Pipeline root holding `datasets/` and `src/{harvesters,processors}/`
    #[arg(long, env = "SLI_ROOT", default_value = ".")]
    root: PathBuf,

    /// Directory receiving pipeline output and `pipeline.log`
    #[arg(long, env = "SLI_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Stages to run over all datasets
    #[arg(long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Run a single dataset instead of all of them
    #[arg(long)]
    dataset: Option<String>,

    /// Stages to run for `--dataset`
    #[arg(long, value_enum, default_value_t = Steps::All, requires = "dataset")]
    steps: Steps,

    /// Remove index entries whose harvested file no longer exists
    #[arg(long)]
    harvested_entry_validation: bool,

    #[arg(long, env = "SLI_SOLR_HOST", default_value = DEFAULT_SOLR_HOST)]
    solr_host: String,

    #[arg(long, env = "SLI_SOLR_COLLECTION", default_value = DEFAULT_SOLR_COLLECTION)]
    solr_collection: String,

    #[arg(long, default_value_t = DEFAULT_INDEX_ROWS)]
    index_rows: usize,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Disable colors in the status summary
    #[arg(long)]
    no_color: bool,
}

impl Args {
    fn run_mode(&self) -> RunMode {
        match &self.dataset {
            Some(id) => {
                let id = DatasetId::new(id.as_str());
                match self.steps {
                    Steps::Harvest => RunMode::HarvestOne(id),
                    Steps::Process => RunMode::ProcessOne(id),
                    Steps::All => RunMode::HarvestAndProcessOne(id),
                }
            }
            None => match self.mode {
                Mode::All => RunMode::HarvestThenProcessAll,
                Mode::Harvest => RunMode::HarvestAll,
                Mode::Process => RunMode::ProcessAll,
            },
        }
    }

    fn settings(&self) -> PipelineSettings {
        let mut settings = PipelineSettings::new(&self.root, &self.output_dir)
            .with_index(&self.solr_host, &self.solr_collection);
        settings.index_rows = self.index_rows;
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let settings = args.settings();

    if args.harvested_entry_validation {
        let index = SolrIndex::new(&settings.solr_host, &settings.solr_collection)
            .with_rows(settings.index_rows);
        match validate_harvested_entries(&index).await {
            Ok(summary) => info!(
                checked = summary.checked,
                removed = summary.removed.len(),
                "Successfully removed entries from index"
            ),
            Err(e) => {
                error!(error = %e, "Harvested entry validation failed");
                bail!(e);
            }
        }
    }

    settings.validate()?;
    info!(output_dir = %settings.output_dir.display(), "Using output directory");

    let datasets = discover_datasets(&settings.datasets_dir()).with_context(|| {
        format!(
            "Failed to list datasets in {}",
            settings.datasets_dir().display()
        )
    })?;
    let mode = args.run_mode();
    if let Some(id) = mode.selected() {
        if !datasets.contains(id) {
            bail!("Invalid dataset '{}'; available: {:?}", id, datasets);
        }
    }

    let log_path = settings.log_path();
    let store: Arc<dyn LogStore> = Arc::new(
        JsonLinesStore::create(&log_path)
            .with_context(|| format!("Failed to create {}", log_path.display()))?,
    );

    let mut registry = PluginRegistry::new();
    register_commands(&mut registry, &settings.code_dir());
    let resolver = Arc::new(PluginResolver::new(
        Arc::new(registry),
        settings.datasets_dir(),
    ));

    let runner = StageRunner::new(resolver, Arc::clone(&store));
    let mut driver = PipelineDriver::new(runner, &settings.output_dir);
    driver.drive(&datasets, &mode).await;

    let records = store.read_all().context("Failed to read pipeline log")?;
    let stdout = std::io::stdout();
    StatusReporter::new()
        .with_color(!args.no_color)
        .render(&records, &mut stdout.lock())
        .context("Failed to print status")?;

    Ok(())
}
