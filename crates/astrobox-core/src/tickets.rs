//! Short-lived access tickets for the progress stream and file download.
//!
//! Browsers cannot attach the API token header to `EventSource` or a plain
//! download link, so a token holder mints a ticket bound to one job and one
//! purpose and passes it as a query parameter instead.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketScope {
    /// Progress event stream; reusable until expiry.
    #[serde(alias = "sse")]
    Stream,
    /// File download; consumed by the first successful use.
    File,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct TicketEntry {
    scope: TicketScope,
    job_id: JobId,
    expires_at: Instant,
}

pub struct TicketIssuer {
    ttl: Duration,
    tickets: Mutex<HashMap<String, TicketEntry>>,
}

impl TicketIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a ticket. The caller checks that `job_id` exists.
    pub fn issue(&self, scope: TicketScope, job_id: JobId) -> Ticket {
        let value = Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut tickets = self.tickets.lock();
        tickets.retain(|_, t| t.expires_at > now);
        tickets.insert(
            value.clone(),
            TicketEntry {
                scope,
                job_id,
                expires_at: now + self.ttl,
            },
        );
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        Ticket {
            ticket: value,
            expires_at: Utc::now() + ttl,
        }
    }

    /// True if `value` is live, bound to `job_id` and issued for `scope`.
    /// File tickets are removed on success; a mismatch never consumes.
    pub fn verify(&self, value: &str, job_id: JobId, scope: TicketScope) -> bool {
        let now = Instant::now();
        let mut tickets = self.tickets.lock();
        tickets.retain(|_, t| t.expires_at > now);
        let Some(entry) = tickets.get(value).copied() else {
            return false;
        };
        if entry.job_id != job_id || entry.scope != scope {
            return false;
        }
        if entry.scope == TicketScope::File {
            tickets.remove(value);
        }
        true
    }

    /// Live ticket count.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let now = Instant::now();
        self.tickets
            .lock()
            .values()
            .filter(|t| t.expires_at > now)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
