use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ncbi_virus_etl::cache::ContentCache;
use ncbi_virus_etl::config::{ConfigLoader, ResolvedConfig};
use ncbi_virus_etl::domain::PayloadKind;
use ncbi_virus_etl::error::EtlError;
use ncbi_virus_etl::ncbi::{NcbiClient, NcbiHttpClient};
use ncbi_virus_etl::output::{JsonOutput, LogProgress, TextOutput};
use ncbi_virus_etl::pipeline::{
    AbortReason, Pipeline, PipelineSettings, ProgressSink, RunOutcome, RunSummary,
};
use ncbi_virus_etl::relational::RelationalLoader;
use ncbi_virus_etl::search::{ElasticsearchHttpClient, SearchIndexLoader};

#[derive(Parser)]
#[command(name = "ncbi-virus-etl")]
#[command(about = "Load NCBI virus sequence records into SQLite and Elasticsearch")]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Path to a JSON config file")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the full fetch-cache-load pipeline (default)")]
    Run(RunArgs),
    #[command(about = "Print the identifiers matching the query")]
    Search(SearchArgs),
    #[command(about = "List cached files of one kind")]
    Cache(CacheArgs),
}

#[derive(Args, Default)]
struct RunArgs {
    #[arg(long, help = "Override the configured search term")]
    query: Option<String>,

    #[arg(long, help = "Print the run summary as JSON on stdout")]
    json: bool,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(long)]
    query: Option<String>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[arg(long, value_enum, default_value = "fasta")]
    kind: PayloadKind,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("run aborted: {0}")]
struct Aborted(AbortReason);

fn main() -> ExitCode {
    if let Err(report) = run() {
        tracing::error!("ETL failed: {report}");
        eprintln!("{report:?}");
        if report.downcast_ref::<Aborted>().is_some() {
            return ExitCode::from(2);
        }
        if let Some(err) = report.downcast_ref::<EtlError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EtlError) -> u8 {
    match error {
        EtlError::ConfigRead(_) | EtlError::ConfigParse(_) | EtlError::InvalidConfig(_) => 2,
        EtlError::NcbiHttp(_)
        | EtlError::NcbiStatus { .. }
        | EtlError::NcbiResponse(_)
        | EtlError::Relational(_)
        | EtlError::SearchHttp(_)
        | EtlError::SearchStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_pipeline(args, config),
        Commands::Search(args) => run_search(args, config),
        Commands::Cache(args) => run_cache(args, config),
    }
}

fn run_pipeline(args: RunArgs, mut config: ResolvedConfig) -> miette::Result<()> {
    if let Some(query) = args.query {
        config.query = query;
    }
    tracing::info!("starting ETL pipeline");

    let ncbi = NcbiHttpClient::new(&config.eutils_base_url, &config.database)?;
    let relational = RelationalLoader::open(&config.relational_path, &config.relational_table)?;
    let search = SearchIndexLoader::new(
        ElasticsearchHttpClient::new(&config.search_url)?,
        &config.search_index,
    );
    let pipeline = Pipeline::new(
        ContentCache::new(config.cache_dir.clone()),
        ncbi,
        relational,
        search,
        PipelineSettings::from_config(&config),
    );

    let progress: &dyn ProgressSink = if args.json { &JsonOutput } else { &LogProgress };
    match pipeline.run(progress)? {
        RunOutcome::Completed(summary) => {
            log_summary(&summary);
            if args.json {
                JsonOutput::print_summary(&summary).into_diagnostic()?;
            }
            Ok(())
        }
        RunOutcome::Aborted(reason) => Err(Aborted(reason).into()),
    }
}

fn run_search(args: SearchArgs, config: ResolvedConfig) -> miette::Result<()> {
    let query = args.query.unwrap_or(config.query);
    let ncbi = NcbiHttpClient::new(&config.eutils_base_url, &config.database)?;
    let uids = ncbi.search(&query, config.retmax)?;
    tracing::info!("{} identifiers matched", uids.len());
    if args.json {
        JsonOutput::print_uids(&uids).into_diagnostic()
    } else {
        TextOutput::print_lines(&uids).into_diagnostic()
    }
}

fn run_cache(args: CacheArgs, config: ResolvedConfig) -> miette::Result<()> {
    let cache = ContentCache::new(config.cache_dir);
    let paths = cache
        .entries(args.kind)?
        .iter()
        .map(|uid| cache.path(args.kind, uid))
        .collect::<Vec<_>>();
    tracing::info!("{} cached {} entries under {}", paths.len(), args.kind, cache.root());
    TextOutput::print_paths(&paths).into_diagnostic()
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        identifiers = summary.identifiers,
        unique = summary.unique_records,
        metadata_cache_hits = summary.metadata.cache_hits,
        fasta_cache_hits = summary.sequences.cache_hits,
        sequences_missing = summary.sequences_missing,
        rows = summary.relational.written,
        documents = summary.search_index.written,
        bulk_errors = summary.search_index.errors,
        elapsed_ms = summary.elapsed_ms as u64,
        "ETL pipeline finished"
    );
}
