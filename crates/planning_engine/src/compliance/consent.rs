use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::terms::normalize_host;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub domain: String,
    pub granted: bool,
    pub granted_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Who granted it, for the audit trail.
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentStatus {
    Granted,
    Expired,
    Revoked,
    Missing,
}

/// Consent grants keyed by domain.
#[derive(Debug, Default)]
pub struct ConsentStore {
    records: RwLock<HashMap<String, ConsentRecord>>,
}

impl ConsentStore {
    pub fn new(records: impl IntoIterator<Item = ConsentRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (normalize_host(&record.domain), record))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn grant(
        &self,
        domain: &str,
        contact: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        let record = ConsentRecord {
            domain: domain.to_string(),
            granted: true,
            granted_at: Utc::now(),
            expires_at,
            contact,
        };
        self.write().insert(normalize_host(domain), record);
    }

    /// Keeps the record so the revocation itself stays visible.
    pub fn revoke(&self, domain: &str) {
        if let Some(record) = self.write().get_mut(&normalize_host(domain)) {
            record.granted = false;
        }
    }

    pub fn status(&self, domain: &str, now: DateTime<Utc>) -> ConsentStatus {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match records.get(&normalize_host(domain)) {
            None => ConsentStatus::Missing,
            Some(record) if !record.granted => ConsentStatus::Revoked,
            Some(record) if record.expires_at.is_some_and(|at| at <= now) => {
                ConsentStatus::Expired
            }
            Some(_) => ConsentStatus::Granted,
        }
    }

    pub fn snapshot(&self) -> Vec<ConsentRecord> {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| a.domain.cmp(&b.domain));
        all
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ConsentRecord>> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
