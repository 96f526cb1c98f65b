use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::feed::AppRecord;

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    SerdeJson(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::SerdeJson(e) => write!(f, "json error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::SerdeJson(e) => Some(e),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerdeJson(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnownApp {
    pub version_code: u64,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Last successfully observed state of the feed, keyed by app id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Snapshot {
    pub apps: BTreeMap<String, KnownApp>,
}

impl Snapshot {
    pub fn from_records(records: &[AppRecord]) -> Self {
        let apps = records
            .iter()
            .map(|r| {
                (
                    r.id.clone(),
                    KnownApp {
                        version_code: r.version_code,
                        fingerprint: r.fingerprint.clone(),
                        name: r.name.clone(),
                    },
                )
            })
            .collect();
        Self { apps }
    }

    pub fn get(&self, id: &str) -> Option<&KnownApp> {
        self.apps.get(id)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Missing,
    Loaded,
    Corrupt,
}

pub fn load(path: &Path) -> Snapshot {
    load_with_status(path).0
}

/// Unreadable or corrupt state is logged and treated as empty.
pub fn load_with_status(path: &Path) -> (Snapshot, LoadStatus) {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return (Snapshot::default(), LoadStatus::Missing);
        }
        Err(err) => {
            error!(path = %path.display(), error = %err, "state file unreadable; starting fresh");
            return (Snapshot::default(), LoadStatus::Corrupt);
        }
    };

    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) => (snapshot, LoadStatus::Loaded),
        Err(err) => {
            error!(path = %path.display(), error = %err, "state file corrupted; starting fresh");
            (Snapshot::default(), LoadStatus::Corrupt)
        }
    }
}

pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!("{}.tmp", file_name.to_string_lossy()));
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }

    #[cfg(windows)]
    {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}
