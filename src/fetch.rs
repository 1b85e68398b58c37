use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::cache::ContentCache;
use crate::domain::{MetadataRecord, PayloadKind, SequenceRecord, Uid};
use crate::ncbi::NcbiClient;
use crate::pool::run_bounded;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub requested: usize,
    pub cache_hits: usize,
    pub fetched: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicUsize,
    fetched: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn snapshot(&self, requested: usize) -> FetchStats {
        FetchStats {
            requested,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct MetadataFetcher<'a, N: NcbiClient> {
    ncbi: &'a N,
    cache: &'a ContentCache,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<'a, N: NcbiClient> MetadataFetcher<'a, N> {
    pub fn new(ncbi: &'a N, cache: &'a ContentCache, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            ncbi,
            cache,
            retry,
            concurrency,
        }
    }

    pub fn fetch_all(&self, uids: &[Uid]) -> (Vec<MetadataRecord>, FetchStats) {
        let counters = Counters::default();
        let documents: HashMap<Uid, Map<String, Value>> =
            run_bounded(&distinct(uids), self.concurrency, |uid| {
                self.fetch_one(uid, &counters)
                    .map(|document| (uid.clone(), document))
            })
            .into_iter()
            .collect();

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(uids.len());
        for uid in uids {
            let repeat = !seen.insert(uid);
            match documents.get(uid) {
                Some(document) => {
                    if repeat {
                        counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    records.push(MetadataRecord::new(uid.clone(), document.clone()));
                }
                None if repeat => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                None => {}
            }
        }
        (records, counters.snapshot(uids.len()))
    }

    fn fetch_one(&self, uid: &Uid, counters: &Counters) -> Option<Map<String, Value>> {
        if let Some(document) = self.read_cached(uid) {
            counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(document);
        }

        let label = format!("metadata {uid}");
        let Some(document) = self.retry.attempt(&label, || self.ncbi.fetch_summary(uid)) else {
            tracing::error!(
                "failed to fetch metadata for ID {uid} after {} attempts; dropping it",
                self.retry.attempts
            );
            counters.failed.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        tracing::info!("fetched record for ID {uid}");
        counters.fetched.fetch_add(1, Ordering::Relaxed);

        match serde_json::to_string(&document) {
            Ok(payload) => {
                if let Err(err) = self.cache.write(PayloadKind::Metadata, uid, &payload) {
                    tracing::error!("error writing metadata cache for ID {uid}: {err}");
                }
            }
            Err(err) => tracing::error!("error encoding metadata for ID {uid}: {err}"),
        }
        Some(document)
    }

    fn read_cached(&self, uid: &Uid) -> Option<Map<String, Value>> {
        if !self.cache.has(PayloadKind::Metadata, uid) {
            return None;
        }
        let payload = match self.cache.read(PayloadKind::Metadata, uid) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!("failed to read metadata cache for ID {uid}: {err}");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Object(document)) => {
                tracing::debug!("metadata cache hit for ID {uid}");
                Some(document)
            }
            Ok(_) => {
                tracing::warn!("metadata cache for ID {uid} is not a JSON object; refetching");
                None
            }
            Err(err) => {
                tracing::warn!("corrupt metadata cache for ID {uid}: {err}; refetching");
                None
            }
        }
    }
}

pub struct SequenceFetcher<'a, N: NcbiClient> {
    ncbi: &'a N,
    cache: &'a ContentCache,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<'a, N: NcbiClient> SequenceFetcher<'a, N> {
    pub fn new(ncbi: &'a N, cache: &'a ContentCache, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            ncbi,
            cache,
            retry,
            concurrency,
        }
    }

    pub fn fetch_all(&self, uids: &[Uid]) -> (Vec<SequenceRecord>, FetchStats) {
        let counters = Counters::default();
        let sequences: HashMap<Uid, String> =
            run_bounded(&distinct(uids), self.concurrency, |uid| {
                Some((uid.clone(), self.fetch_one(uid, &counters)))
            })
            .into_iter()
            .collect();

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(uids.len());
        for uid in uids {
            let sequence = sequences.get(uid).cloned().unwrap_or_default();
            if !seen.insert(uid) {
                let counter = if sequence.is_empty() {
                    &counters.failed
                } else {
                    &counters.cache_hits
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            records.push(SequenceRecord {
                uid: uid.clone(),
                sequence,
            });
        }
        (records, counters.snapshot(uids.len()))
    }

    fn fetch_one(&self, uid: &Uid, counters: &Counters) -> String {
        if self.cache.has(PayloadKind::Fasta, uid) {
            match self.cache.read(PayloadKind::Fasta, uid) {
                Ok(sequence) => {
                    tracing::debug!("FASTA cache hit for ID {uid}");
                    counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return sequence;
                }
                Err(err) => tracing::warn!("failed to read FASTA cache for ID {uid}: {err}"),
            }
        }

        let label = format!("FASTA {uid}");
        let Some(sequence) = self.retry.attempt(&label, || self.ncbi.fetch_fasta(uid)) else {
            tracing::warn!(
                "failed to fetch FASTA for ID {uid} after {} attempts; using empty FASTA",
                self.retry.attempts
            );
            counters.failed.fetch_add(1, Ordering::Relaxed);
            return String::new();
        };
        counters.fetched.fetch_add(1, Ordering::Relaxed);

        // Empty bodies pass through for this run and are never cached.
        if sequence.trim().is_empty() {
            tracing::warn!("empty FASTA returned for ID {uid}; not caching it");
            return String::new();
        }
        tracing::info!("fetched FASTA for ID {uid}");
        if let Err(err) = self.cache.write(PayloadKind::Fasta, uid, &sequence) {
            tracing::error!("error writing FASTA cache for ID {uid}: {err}");
        }
        sequence
    }
}

fn distinct(uids: &[Uid]) -> Vec<Uid> {
    let mut seen = HashSet::new();
    uids.iter()
        .filter(|uid| seen.insert(*uid))
        .cloned()
        .collect()
}
