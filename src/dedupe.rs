use std::collections::HashMap;

use crate::domain::{JoinedRecord, MetadataRecord, SequenceRecord, Uid};

pub fn dedupe(records: Vec<MetadataRecord>) -> Vec<MetadataRecord> {
    let mut positions: HashMap<Uid, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<MetadataRecord> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(&record.uid) {
            Some(&index) => unique[index] = record,
            None => {
                positions.insert(record.uid.clone(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

pub fn join(metadata: Vec<MetadataRecord>, sequences: Vec<SequenceRecord>) -> Vec<JoinedRecord> {
    let mut by_uid: HashMap<Uid, String> = sequences
        .into_iter()
        .map(|record| (record.uid, record.sequence))
        .collect();
    metadata
        .into_iter()
        .map(|record| JoinedRecord {
            uid: record.uid.clone(),
            sequence: by_uid.remove(&record.uid),
            metadata: record,
        })
        .collect()
}
