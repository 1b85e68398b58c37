use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::{Map, Value, json};

use ncbi_virus_etl::domain::{JoinedRecord, MetadataRecord, Uid};
use ncbi_virus_etl::error::EtlError;
use ncbi_virus_etl::pipeline::RecordSink;
use ncbi_virus_etl::search::{BulkResponse, SearchIndex, SearchIndexLoader, bulk_body};

#[derive(Default)]
struct MemoryIndex {
    exists: Mutex<bool>,
    creates: Mutex<usize>,
    bulk_calls: Mutex<usize>,
    docs: Mutex<BTreeMap<String, Value>>,
    reject: Option<&'static str>,
}

impl SearchIndex for MemoryIndex {
    fn index_exists(&self, _index: &str) -> Result<bool, EtlError> {
        Ok(*self.exists.lock().unwrap())
    }

    fn create_index(&self, _index: &str) -> Result<(), EtlError> {
        *self.exists.lock().unwrap() = true;
        *self.creates.lock().unwrap() += 1;
        Ok(())
    }

    fn bulk(&self, body: String) -> Result<BulkResponse, EtlError> {
        *self.bulk_calls.lock().unwrap() += 1;
        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let mut items = Vec::new();
        let mut errors = false;
        let mut docs = self.docs.lock().unwrap();
        for pair in lines.chunks(2) {
            let id = pair[0]["index"]["_id"].as_str().unwrap().to_string();
            if Some(id.as_str()) == self.reject {
                errors = true;
                items.push(json!({"index": {"_id": id, "status": 400, "error": {"type": "mapper_parsing_exception"}}}));
                continue;
            }
            items.push(json!({"index": {"_id": id, "status": 201}}));
            docs.insert(id, pair[1].clone());
        }
        Ok(BulkResponse { errors, items })
    }
}

fn joined(uid: &str, strain: &str, fasta: Option<&str>) -> JoinedRecord {
    let uid: Uid = uid.parse().unwrap();
    let mut document = Map::new();
    document.insert("uid".to_string(), Value::from(uid.as_str()));
    document.insert("strain".to_string(), Value::from(strain));
    JoinedRecord {
        uid: uid.clone(),
        metadata: MetadataRecord::new(uid, document),
        sequence: fasta.map(str::to_string),
    }
}

#[test]
fn creates_missing_index_once() {
    let loader = SearchIndexLoader::new(MemoryIndex::default(), "ncbi_records");

    loader.load(&[joined("1", "a", None)]).unwrap();
    loader.load(&[joined("2", "b", None)]).unwrap();

    assert_eq!(*loader.index().creates.lock().unwrap(), 1);
    assert_eq!(loader.index().docs.lock().unwrap().len(), 2);
}

#[test]
fn reindexing_same_uid_replaces_document() {
    let loader = SearchIndexLoader::new(MemoryIndex::default(), "ncbi_records");

    loader.load(&[joined("X", "old", Some(">X\nA\n"))]).unwrap();
    loader.load(&[joined("X", "new", None)]).unwrap();

    let docs = loader.index().docs.lock().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(
        docs["X"],
        json!({"metadata": {"uid": "X", "strain": "new"}, "fasta": null})
    );
}

#[test]
fn empty_load_skips_bulk_request() {
    let loader = SearchIndexLoader::new(MemoryIndex::default(), "ncbi_records");
    let report = loader.load(&[]).unwrap();
    assert_eq!(report.written, 0);
    assert_eq!(*loader.index().bulk_calls.lock().unwrap(), 0);
    assert!(*loader.index().exists.lock().unwrap());
}

#[test]
fn partial_bulk_errors_are_reported_not_raised() {
    let index = MemoryIndex {
        reject: Some("2"),
        ..MemoryIndex::default()
    };
    let loader = SearchIndexLoader::new(index, "ncbi_records");

    let report = loader
        .load(&[joined("1", "a", None), joined("2", "b", None), joined("3", "c", None)])
        .unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.written, 2);
    assert_eq!(loader.index().docs.lock().unwrap().len(), 2);
}

#[test]
fn bulk_body_pairs_action_and_document() {
    let body = bulk_body("ncbi_records", &[joined("9", "s", Some(">9\nT\n"))]).unwrap();
    let lines: Vec<Value> = body
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert!(body.ends_with('\n'));
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], json!({"index": {"_index": "ncbi_records", "_id": "9"}}));
    assert_eq!(lines[1]["fasta"], ">9\nT\n");
    assert_eq!(lines[1]["metadata"]["strain"], "s");
}
