use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::{Map, Value};

use ncbi_virus_etl::cache::ContentCache;
use ncbi_virus_etl::domain::{JoinedRecord, PayloadKind, Uid};
use ncbi_virus_etl::error::EtlError;
use ncbi_virus_etl::ncbi::NcbiClient;
use ncbi_virus_etl::output::JsonOutput;
use ncbi_virus_etl::pipeline::{
    AbortReason, LoadReport, Phase, Pipeline, PipelineSettings, ProgressEvent, ProgressSink,
    RecordSink, RunOutcome,
};
use ncbi_virus_etl::relational::RelationalLoader;
use ncbi_virus_etl::retry::RetryPolicy;
use ncbi_virus_etl::search::{BulkResponse, SearchIndex, SearchIndexLoader};

#[derive(Default)]
struct MockNcbi {
    search_result: Vec<&'static str>,
    failing_summaries: HashSet<&'static str>,
    failing_fasta: HashSet<&'static str>,
    summary_calls: AtomicUsize,
    fasta_calls: AtomicUsize,
}

impl NcbiClient for MockNcbi {
    fn search(&self, _query: &str, _retmax: u32) -> Result<Vec<Uid>, EtlError> {
        self.search_result.iter().map(|uid| uid.parse()).collect()
    }

    fn fetch_summary(&self, uid: &Uid) -> Result<Map<String, Value>, EtlError> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_summaries.contains(uid.as_str()) {
            return Err(EtlError::NcbiHttp("connection reset".to_string()));
        }
        let mut document = Map::new();
        document.insert("uid".to_string(), Value::from(uid.as_str()));
        document.insert("organism".to_string(), Value::from("Severe acute respiratory syndrome coronavirus 2"));
        Ok(document)
    }

    fn fetch_fasta(&self, uid: &Uid) -> Result<String, EtlError> {
        self.fasta_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_fasta.contains(uid.as_str()) {
            return Err(EtlError::NcbiStatus {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        Ok(format!(">{uid}\nATTAAAGGTT\n"))
    }
}

#[derive(Default)]
struct RecordingSink {
    fail: bool,
    calls: Mutex<Vec<Vec<JoinedRecord>>>,
}

impl RecordingSink {
    fn calls(&self) -> Vec<Vec<JoinedRecord>> {
        self.calls.lock().unwrap().clone()
    }
}

impl RecordSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn load(&self, records: &[JoinedRecord]) -> Result<LoadReport, EtlError> {
        self.calls.lock().unwrap().push(records.to_vec());
        if self.fail {
            return Err(EtlError::Relational("disk I/O error".to_string()));
        }
        Ok(LoadReport {
            written: records.len(),
            errors: 0,
        })
    }
}

#[derive(Default)]
struct PhaseLog(Mutex<Vec<Phase>>);

impl ProgressSink for PhaseLog {
    fn event(&self, event: ProgressEvent) {
        let mut phases = self.0.lock().unwrap();
        if phases.last() != Some(&event.phase) {
            phases.push(event.phase);
        }
    }
}

#[derive(Default)]
struct MemoryIndex {
    docs: Mutex<BTreeMap<String, Value>>,
}

impl SearchIndex for MemoryIndex {
    fn index_exists(&self, _index: &str) -> Result<bool, EtlError> {
        Ok(true)
    }

    fn create_index(&self, _index: &str) -> Result<(), EtlError> {
        Ok(())
    }

    fn bulk(&self, body: String) -> Result<BulkResponse, EtlError> {
        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let mut docs = self.docs.lock().unwrap();
        for pair in lines.chunks(2) {
            let id = pair[0]["index"]["_id"].as_str().unwrap().to_string();
            docs.insert(id, pair[1].clone());
        }
        Ok(BulkResponse::default())
    }
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        query: "SARS-CoV-2[Organism]".to_string(),
        retmax: 1000,
        concurrency: 3,
        retry: RetryPolicy::new(5, Duration::ZERO),
    }
}

#[test]
fn duplicate_search_hits_and_failed_sequence_are_joined() {
    let temp = tempfile::tempdir().unwrap();
    let cache = ContentCache::new(temp.path().to_str().unwrap());
    let ncbi = MockNcbi {
        search_result: vec!["A", "B", "A"],
        failing_fasta: HashSet::from(["B"]),
        ..MockNcbi::default()
    };
    let phases = PhaseLog::default();
    let pipeline = Pipeline::new(
        cache,
        ncbi,
        RecordingSink::default(),
        RecordingSink::default(),
        settings(),
    );

    let outcome = pipeline.run(&phases).unwrap();
    let summary = match outcome {
        RunOutcome::Completed(summary) => summary,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(summary.identifiers, 3);
    assert_eq!(summary.unique_records, 2);
    assert_eq!(summary.sequences_missing, 1);

    for sink in [pipeline.relational(), pipeline.search_index()] {
        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        let loaded: Vec<(&str, Option<&str>)> = calls[0]
            .iter()
            .map(|record| (record.uid.as_str(), record.sequence.as_deref()))
            .collect();
        assert_eq!(
            loaded,
            vec![("A", Some(">A\nATTAAAGGTT\n")), ("B", Some(""))]
        );
    }
    assert_eq!(pipeline.ncbi().fasta_calls.load(Ordering::SeqCst), 1 + 5);

    assert_eq!(
        *phases.0.lock().unwrap(),
        vec![
            Phase::Search,
            Phase::FetchMetadata,
            Phase::Dedupe,
            Phase::FetchSequences,
            Phase::LoadRelational,
            Phase::LoadSearchIndex,
            Phase::Done,
        ]
    );
}

#[test]
fn empty_search_aborts_before_loading() {
    let temp = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        ContentCache::new(temp.path().to_str().unwrap()),
        MockNcbi::default(),
        RecordingSink::default(),
        RecordingSink::default(),
        settings(),
    );

    let outcome = pipeline.run(&JsonOutput).unwrap();

    assert_matches!(outcome, RunOutcome::Aborted(AbortReason::NoIdentifiers));
    assert!(pipeline.relational().calls().is_empty());
    assert!(pipeline.search_index().calls().is_empty());
    assert_eq!(pipeline.ncbi().summary_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn all_metadata_failing_aborts_before_loading() {
    let temp = tempfile::tempdir().unwrap();
    let ncbi = MockNcbi {
        search_result: vec!["X", "Y"],
        failing_summaries: HashSet::from(["X", "Y"]),
        ..MockNcbi::default()
    };
    let pipeline = Pipeline::new(
        ContentCache::new(temp.path().to_str().unwrap()),
        ncbi,
        RecordingSink::default(),
        RecordingSink::default(),
        settings(),
    );

    let outcome = pipeline.run(&JsonOutput).unwrap();

    assert_matches!(outcome, RunOutcome::Aborted(AbortReason::NoMetadata));
    assert!(pipeline.relational().calls().is_empty());
    assert!(pipeline.search_index().calls().is_empty());
    assert_eq!(pipeline.ncbi().fasta_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn relational_failure_ends_run_before_search_index() {
    let temp = tempfile::tempdir().unwrap();
    let ncbi = MockNcbi {
        search_result: vec!["A"],
        ..MockNcbi::default()
    };
    let pipeline = Pipeline::new(
        ContentCache::new(temp.path().to_str().unwrap()),
        ncbi,
        RecordingSink {
            fail: true,
            ..RecordingSink::default()
        },
        RecordingSink::default(),
        settings(),
    );

    let err = pipeline.run(&JsonOutput).unwrap_err();

    assert_matches!(err, EtlError::Relational(_));
    assert_eq!(pipeline.relational().calls().len(), 1);
    assert!(pipeline.search_index().calls().is_empty());
}

#[test]
fn end_to_end_into_sqlite_and_index_then_rerun_from_cache() {
    let temp = tempfile::tempdir().unwrap();
    let cache_root = temp.path().join("cache");
    let db_path = temp.path().join("records.sqlite");

    let run = |ncbi: MockNcbi| {
        let relational = RelationalLoader::open(
            camino::Utf8Path::from_path(&db_path).unwrap(),
            "ncbi_records",
        )
        .unwrap();
        let pipeline = Pipeline::new(
            ContentCache::new(cache_root.to_str().unwrap()),
            ncbi,
            relational,
            SearchIndexLoader::new(MemoryIndex::default(), "ncbi_records"),
            settings(),
        );
        let outcome = pipeline.run(&JsonOutput).unwrap();
        assert_matches!(outcome, RunOutcome::Completed(_));
        pipeline
    };

    let first = run(MockNcbi {
        search_result: vec!["100", "200"],
        ..MockNcbi::default()
    });
    assert_eq!(first.relational().count().unwrap(), 2);
    let docs = first.search_index().index().docs.lock().unwrap().clone();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs["100"]["fasta"], ">100\nATTAAAGGTT\n");
    assert_eq!(docs["200"]["metadata"]["uid"], "200");

    let cache = ContentCache::new(cache_root.to_str().unwrap());
    assert_eq!(cache.entries(PayloadKind::Fasta).unwrap().len(), 2);

    let second = run(MockNcbi {
        search_result: vec!["100", "200"],
        ..MockNcbi::default()
    });
    assert_eq!(second.ncbi().summary_calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.ncbi().fasta_calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.relational().count().unwrap(), 2);
}
