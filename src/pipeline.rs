use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::cache::ContentCache;
use crate::config::ResolvedConfig;
use crate::dedupe::{dedupe, join};
use crate::domain::{JoinedRecord, Uid};
use crate::error::EtlError;
use crate::fetch::{FetchStats, MetadataFetcher, SequenceFetcher};
use crate::ncbi::NcbiClient;
use crate::retry::RetryPolicy;

pub trait RecordSink {
    fn name(&self) -> &str;
    fn load(&self, records: &[JoinedRecord]) -> Result<LoadReport, EtlError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub written: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Search,
    FetchMetadata,
    Dedupe,
    FetchSequences,
    LoadRelational,
    LoadSearchIndex,
    Done,
    Abort,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Search => "Search",
            Phase::FetchMetadata => "FetchMetadata",
            Phase::Dedupe => "Dedupe",
            Phase::FetchSequences => "FetchSequences",
            Phase::LoadRelational => "LoadRelational",
            Phase::LoadSearchIndex => "LoadSearchIndex",
            Phase::Done => "Done",
            Phase::Abort => "Abort",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbortReason {
    NoIdentifiers,
    NoMetadata,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::NoIdentifiers => f.write_str("no IDs returned from NCBI search"),
            AbortReason::NoMetadata => f.write_str("no metadata found"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub query: String,
    pub started_at: String,
    pub identifiers: usize,
    pub metadata: FetchStats,
    pub metadata_records: usize,
    pub unique_records: usize,
    pub sequences: FetchStats,
    pub sequences_missing: usize,
    pub relational: LoadReport,
    pub search_index: LoadReport,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    Aborted(AbortReason),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub query: String,
    pub retmax: u32,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            query: config.query.clone(),
            retmax: config.retmax,
            concurrency: config.concurrency,
            retry: RetryPolicy::new(config.retry_attempts, config.retry_delay),
        }
    }
}

pub struct Pipeline<N: NcbiClient, R: RecordSink, S: RecordSink> {
    cache: ContentCache,
    ncbi: N,
    relational: R,
    search_index: S,
    settings: PipelineSettings,
}

impl<N: NcbiClient, R: RecordSink, S: RecordSink> Pipeline<N, R, S> {
    pub fn new(
        cache: ContentCache,
        ncbi: N,
        relational: R,
        search_index: S,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            cache,
            ncbi,
            relational,
            search_index,
            settings,
        }
    }

    pub fn ncbi(&self) -> &N {
        &self.ncbi
    }

    pub fn relational(&self) -> &R {
        &self.relational
    }

    pub fn search_index(&self) -> &S {
        &self.search_index
    }

    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunOutcome, EtlError> {
        let started = Instant::now();
        let started_at = Utc::now().to_rfc3339();
        let settings = &self.settings;

        emit(sink, Phase::Search, format!("query: {}", settings.query), None);
        let uids = self.ncbi.search(&settings.query, settings.retmax)?;
        if uids.is_empty() {
            return Ok(abort(sink, AbortReason::NoIdentifiers));
        }
        let identifiers = uids.len();

        let phase_start = Instant::now();
        emit(
            sink,
            Phase::FetchMetadata,
            format!("{identifiers} identifiers"),
            None,
        );
        let fetcher =
            MetadataFetcher::new(&self.ncbi, &self.cache, settings.retry, settings.concurrency);
        let (metadata, metadata_stats) = fetcher.fetch_all(&uids);
        let metadata_records = metadata.len();
        emit(
            sink,
            Phase::FetchMetadata,
            format!("fetched {metadata_records} metadata records"),
            Some(phase_start.elapsed()),
        );
        if metadata.is_empty() {
            return Ok(abort(sink, AbortReason::NoMetadata));
        }

        let unique = dedupe(metadata);
        let unique_records = unique.len();
        emit(
            sink,
            Phase::Dedupe,
            format!("deduplicated to {unique_records} unique records"),
            None,
        );

        let phase_start = Instant::now();
        let unique_uids: Vec<Uid> = unique.iter().map(|record| record.uid.clone()).collect();
        let fetcher =
            SequenceFetcher::new(&self.ncbi, &self.cache, settings.retry, settings.concurrency);
        let (sequences, sequence_stats) = fetcher.fetch_all(&unique_uids);
        let sequences_missing = sequences
            .iter()
            .filter(|record| record.sequence.is_empty())
            .count();
        emit(
            sink,
            Phase::FetchSequences,
            format!(
                "{} FASTA records, {sequences_missing} empty",
                sequences.len()
            ),
            Some(phase_start.elapsed()),
        );

        let joined = join(unique, sequences);

        let relational = self.load(sink, Phase::LoadRelational, &self.relational, &joined)?;
        let search_index = self.load(sink, Phase::LoadSearchIndex, &self.search_index, &joined)?;

        let summary = RunSummary {
            query: settings.query.clone(),
            started_at,
            identifiers,
            metadata: metadata_stats,
            metadata_records,
            unique_records,
            sequences: sequence_stats,
            sequences_missing,
            relational,
            search_index,
            elapsed_ms: started.elapsed().as_millis(),
        };
        emit(
            sink,
            Phase::Done,
            "ETL pipeline completed successfully".to_string(),
            Some(started.elapsed()),
        );
        Ok(RunOutcome::Completed(summary))
    }

    fn load(
        &self,
        sink: &dyn ProgressSink,
        phase: Phase,
        target: &dyn RecordSink,
        records: &[JoinedRecord],
    ) -> Result<LoadReport, EtlError> {
        let phase_start = Instant::now();
        emit(
            sink,
            phase,
            format!("loading {} records into {}", records.len(), target.name()),
            None,
        );
        let report = target.load(records).inspect_err(|err| {
            tracing::error!("{} load failed: {err}", target.name());
        })?;
        emit(
            sink,
            phase,
            format!(
                "{}: {} written, {} errors",
                target.name(),
                report.written,
                report.errors
            ),
            Some(phase_start.elapsed()),
        );
        Ok(report)
    }
}

fn emit(sink: &dyn ProgressSink, phase: Phase, message: String, elapsed: Option<Duration>) {
    sink.event(ProgressEvent {
        phase,
        message,
        elapsed,
    });
}

fn abort(sink: &dyn ProgressSink, reason: AbortReason) -> RunOutcome {
    tracing::error!("{reason}, exiting");
    emit(sink, Phase::Abort, reason.to_string(), None);
    RunOutcome::Aborted(reason)
}
