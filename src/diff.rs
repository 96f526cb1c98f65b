use std::collections::BTreeMap;

use crate::{feed::AppRecord, state::Snapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Added {
        id: String,
        version_code: u64,
    },
    Removed {
        id: String,
    },
    Updated {
        id: String,
        old_version: u64,
        new_version: u64,
    },
    CertificateChanged {
        id: String,
        old_fingerprint: String,
        new_fingerprint: String,
    },
}

impl ChangeEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Added { id, .. }
            | Self::Removed { id }
            | Self::Updated { id, .. }
            | Self::CertificateChanged { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Removed { .. } => "removed",
            Self::Updated { .. } => "updated",
            Self::CertificateChanged { .. } => "certificate_changed",
        }
    }
}

/// Events come out grouped as added, removed, updated, certificate changed,
/// each group in ascending id order.
pub fn diff(previous: &Snapshot, current: &[AppRecord]) -> Vec<ChangeEvent> {
    let current: BTreeMap<&str, &AppRecord> =
        current.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut added = Vec::new();
    let mut updated = Vec::new();
    let mut cert_changed = Vec::new();

    for (id, record) in &current {
        let Some(old) = previous.get(id) else {
            added.push(ChangeEvent::Added {
                id: (*id).to_string(),
                version_code: record.version_code,
            });
            continue;
        };

        if old.version_code != record.version_code {
            updated.push(ChangeEvent::Updated {
                id: (*id).to_string(),
                old_version: old.version_code,
                new_version: record.version_code,
            });
        }
        if old.fingerprint != record.fingerprint {
            cert_changed.push(ChangeEvent::CertificateChanged {
                id: (*id).to_string(),
                old_fingerprint: old.fingerprint.clone(),
                new_fingerprint: record.fingerprint.clone(),
            });
        }
    }

    let removed = previous
        .apps
        .keys()
        .filter(|id| !current.contains_key(id.as_str()))
        .map(|id| ChangeEvent::Removed { id: id.clone() });

    let mut events = added;
    events.extend(removed);
    events.extend(updated);
    events.extend(cert_changed);
    events
}
