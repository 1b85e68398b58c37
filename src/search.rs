use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::JoinedRecord;
use crate::error::EtlError;
use crate::pipeline::{LoadReport, RecordSink};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<Value>,
}

impl BulkResponse {
    pub fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter(|item| {
                item.as_object()
                    .and_then(|actions| actions.values().next())
                    .is_some_and(|result| result.get("error").is_some())
            })
            .count()
    }
}

pub trait SearchIndex {
    fn index_exists(&self, index: &str) -> Result<bool, EtlError>;
    fn create_index(&self, index: &str) -> Result<(), EtlError>;
    fn bulk(&self, body: String) -> Result<BulkResponse, EtlError>;
}

#[derive(Clone)]
pub struct ElasticsearchHttpClient {
    client: Client,
    base_url: String,
}

impl ElasticsearchHttpClient {
    pub fn new(base_url: &str) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ncbi-virus-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| EtlError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn handle_status(response: Response) -> Result<Response, EtlError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "search index request failed".to_string());
        Err(EtlError::SearchStatus { status, message })
    }
}

impl SearchIndex for ElasticsearchHttpClient {
    fn index_exists(&self, index: &str) -> Result<bool, EtlError> {
        let response = self
            .client
            .head(format!("{}/{index}", self.base_url))
            .send()
            .map_err(|err| EtlError::SearchHttp(err.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(EtlError::SearchStatus {
                status: status.as_u16(),
                message: format!("HEAD /{index}"),
            }),
        }
    }

    fn create_index(&self, index: &str) -> Result<(), EtlError> {
        let response = self
            .client
            .put(format!("{}/{index}", self.base_url))
            .send()
            .map_err(|err| EtlError::SearchHttp(err.to_string()))?;
        Self::handle_status(response)?;
        Ok(())
    }

    fn bulk(&self, body: String) -> Result<BulkResponse, EtlError> {
        let response = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .map_err(|err| EtlError::SearchHttp(err.to_string()))?;
        Self::handle_status(response)?
            .json::<BulkResponse>()
            .map_err(|err| EtlError::SearchHttp(err.to_string()))
    }
}

pub struct SearchIndexLoader<I: SearchIndex> {
    index: I,
    index_name: String,
}

impl<I: SearchIndex> SearchIndexLoader<I> {
    pub fn new(index: I, index_name: &str) -> Self {
        Self {
            index,
            index_name: index_name.to_string(),
        }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn ensure_index(&self) -> Result<(), EtlError> {
        if !self.index.index_exists(&self.index_name)? {
            self.index.create_index(&self.index_name)?;
            tracing::info!("created index {} in Elasticsearch", self.index_name);
        }
        Ok(())
    }
}

pub fn bulk_body(index_name: &str, records: &[JoinedRecord]) -> Result<String, EtlError> {
    let mut body = String::new();
    for record in records {
        let action = json!({ "index": { "_index": index_name, "_id": record.uid.as_str() } });
        let document = json!({
            "metadata": record.metadata.to_value(),
            "fasta": record.sequence,
        });
        for line in [action, document] {
            let line = serde_json::to_string(&line)
                .map_err(|err| EtlError::SearchHttp(err.to_string()))?;
            body.push_str(&line);
            body.push('\n');
        }
    }
    Ok(body)
}

impl<I: SearchIndex> RecordSink for SearchIndexLoader<I> {
    fn name(&self) -> &str {
        "search-index"
    }

    fn load(&self, records: &[JoinedRecord]) -> Result<LoadReport, EtlError> {
        tracing::info!("loading {} records into index {}", records.len(), self.index_name);
        self.ensure_index()?;
        if records.is_empty() {
            return Ok(LoadReport::default());
        }

        let response = self.index.bulk(bulk_body(&self.index_name, records)?)?;
        if response.errors {
            let failed = response.failed_items().max(1);
            tracing::error!(
                "errors occurred during bulk insert to Elasticsearch ({failed} of {} documents)",
                records.len()
            );
            return Ok(LoadReport {
                written: records.len() - failed.min(records.len()),
                errors: failed,
            });
        }
        tracing::info!("successfully loaded data to Elasticsearch");
        Ok(LoadReport {
            written: records.len(),
            errors: 0,
        })
    }
}
