use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value};

use crate::domain::Uid;
use crate::error::EtlError;

pub trait NcbiClient: Send + Sync {
    fn search(&self, query: &str, retmax: u32) -> Result<Vec<Uid>, EtlError>;
    fn fetch_summary(&self, uid: &Uid) -> Result<Map<String, Value>, EtlError>;
    fn fetch_fasta(&self, uid: &Uid) -> Result<String, EtlError>;
}

#[derive(Clone)]
pub struct NcbiHttpClient {
    client: Client,
    base_url: String,
    database: String,
    api_key: Option<String>,
}

impl NcbiHttpClient {
    pub fn new(base_url: &str, database: &str) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ncbi-virus-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::NcbiHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EtlError::NcbiHttp(err.to_string()))?;

        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            database: database.to_string(),
            api_key,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}{name}", self.base_url)
    }

    fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> RequestBuilder {
        let mut request = self
            .client
            .get(self.endpoint(endpoint))
            .query(&[("db", self.database.as_str())])
            .query(params);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }
        request
    }

    fn send(&self, label: &str, request: RequestBuilder) -> Result<Response, EtlError> {
        let request = request
            .build()
            .map_err(|err| EtlError::NcbiHttp(err.to_string()))?;
        tracing::info!("NCBI {label} URL: {}", redact_api_key(request.url().as_str()));
        self.client
            .execute(request)
            .map_err(|err| EtlError::NcbiHttp(err.to_string()))
    }

    fn json(response: Response) -> Result<Value, EtlError> {
        let response = handle_status(response)?;
        response
            .json::<Value>()
            .map_err(|err| EtlError::NcbiResponse(err.to_string()))
    }
}

impl NcbiClient for NcbiHttpClient {
    fn search(&self, query: &str, retmax: u32) -> Result<Vec<Uid>, EtlError> {
        let retmax = retmax.to_string();
        let request = self.get(
            "esearch.fcgi",
            &[("term", query), ("retmode", "json"), ("retmax", retmax.as_str())],
        );
        let body = Self::json(self.send("search", request)?)?;
        parse_search_response(&body)
    }

    fn fetch_summary(&self, uid: &Uid) -> Result<Map<String, Value>, EtlError> {
        let request = self.get("esummary.fcgi", &[("id", uid.as_str()), ("retmode", "json")]);
        let body = Self::json(self.send(&format!("summary ({uid})"), request)?)?;
        parse_summary_response(body, uid)
    }

    // Non-success statuses come back as ordinary errors so the caller's
    // retry policy treats them like any other failed attempt.
    fn fetch_fasta(&self, uid: &Uid) -> Result<String, EtlError> {
        let request = self.get(
            "efetch.fcgi",
            &[("id", uid.as_str()), ("rettype", "fasta"), ("retmode", "text")],
        );
        handle_status(self.send(&format!("FASTA ({uid})"), request)?)?
            .text()
            .map_err(|err| EtlError::NcbiHttp(err.to_string()))
    }
}

fn handle_status(response: Response) -> Result<Response, EtlError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "NCBI request failed".to_string());
    Err(EtlError::NcbiStatus { status, message })
}

pub fn parse_search_response(body: &Value) -> Result<Vec<Uid>, EtlError> {
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        return Err(EtlError::NcbiResponse(message.to_string()));
    }
    let Some(ids) = body
        .get("esearchresult")
        .and_then(|result| result.get("idlist"))
        .and_then(Value::as_array)
    else {
        return Ok(Vec::new());
    };
    ids.iter()
        .map(|id| match id {
            Value::String(id) => id.parse(),
            Value::Number(id) => id.to_string().parse(),
            other => Err(EtlError::NcbiResponse(format!(
                "unexpected id in idlist: {other}"
            ))),
        })
        .collect()
}

pub fn parse_summary_response(mut body: Value, uid: &Uid) -> Result<Map<String, Value>, EtlError> {
    let record = body
        .get_mut("result")
        .and_then(|result| result.get_mut(uid.as_str()))
        .map(Value::take);
    match record {
        Some(Value::Object(document)) if !document.contains_key("error") => Ok(document),
        Some(Value::Object(document)) => Err(EtlError::NcbiResponse(format!(
            "summary for {uid} reported an error: {}",
            document["error"]
        ))),
        _ => Err(EtlError::NcbiResponse(format!("no summary for {uid}"))),
    }
}

fn redact_api_key(url: &str) -> String {
    match url.find("api_key=") {
        Some(start) => {
            let value_start = start + "api_key=".len();
            let end = url[value_start..]
                .find('&')
                .map(|offset| value_start + offset)
                .unwrap_or(url.len());
            format!("{}***{}", &url[..value_start], &url[end..])
        }
        None => url.to_string(),
    }
}
