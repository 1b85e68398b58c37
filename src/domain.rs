use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EtlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Metadata,
    Fasta,
}

impl PayloadKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            PayloadKind::Metadata => "metadata",
            PayloadKind::Fasta => "fasta",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            PayloadKind::Metadata => "json",
            PayloadKind::Fasta => "fasta",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uid(String);

impl Uid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Uid {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized != "."
            && normalized != ".."
            && !normalized.contains(['/', '\\'])
            && !normalized.chars().any(char::is_control);
        if !is_valid {
            return Err(EtlError::InvalidUid(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for Uid {
    type Error = EtlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Uid> for String {
    fn from(uid: Uid) -> Self {
        uid.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub uid: Uid,
    pub document: Map<String, Value>,
}

impl MetadataRecord {
    pub fn new(uid: Uid, document: Map<String, Value>) -> Self {
        Self { uid, document }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.document.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceRecord {
    pub uid: Uid,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord {
    pub uid: Uid,
    pub metadata: MetadataRecord,
    pub sequence: Option<String>,
}
