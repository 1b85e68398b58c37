use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{PayloadKind, Uid};
use crate::error::EtlError;

#[derive(Debug, Clone)]
pub struct ContentCache {
    root: Utf8PathBuf,
}

impl ContentCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn kind_dir(&self, kind: PayloadKind) -> Utf8PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn path(&self, kind: PayloadKind, uid: &Uid) -> Utf8PathBuf {
        self.kind_dir(kind).join(format!("{uid}.{}", kind.extension()))
    }

    pub fn has(&self, kind: PayloadKind, uid: &Uid) -> bool {
        self.path(kind, uid).as_std_path().is_file()
    }

    pub fn read(&self, kind: PayloadKind, uid: &Uid) -> Result<String, EtlError> {
        let path = self.path(kind, uid);
        fs::read_to_string(path.as_std_path()).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => EtlError::CacheMiss {
                kind,
                uid: uid.to_string(),
            },
            _ => EtlError::Filesystem(format!("read {path}: {err}")),
        })
    }

    pub fn write(&self, kind: PayloadKind, uid: &Uid, payload: &str) -> Result<(), EtlError> {
        let dir = self.kind_dir(kind);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("create {dir}: {err}")))?;
        let path = self.path(kind, uid);
        fs::write(path.as_std_path(), payload)
            .map_err(|err| EtlError::Filesystem(format!("write {path}: {err}")))
    }

    pub fn entries(&self, kind: PayloadKind) -> Result<Vec<Uid>, EtlError> {
        let dir = self.kind_dir(kind);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let listing = fs::read_dir(dir.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("list {dir}: {err}")))?;
        let mut uids = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|err| EtlError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(kind.extension()) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Ok(uid) = stem.parse() {
                uids.push(uid);
            }
        }
        uids.sort();
        Ok(uids)
    }
}
