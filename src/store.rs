//! # Account and Ticket Store
//!
//! The protocol layer only needs three things from persistence: the SRP
//! verifier record for an identity, a way to mint a session ticket after a
//! successful proof, and single-use redemption of that ticket on the
//! gameplay listener. [`AccountStore`] is that seam; [`MemoryAccountStore`]
//! is the in-process implementation used by the server binary and tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::crypto::srp6::{self, SALT_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::TICKET_LEN;

/// 16-byte secret that keys the session cipher.
pub type SessionTicket = [u8; TICKET_LEN];

/// SRP6 credentials for one account. The password itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub identity: String,
    pub salt: [u8; SALT_LEN],
    /// Little-endian verifier bytes
    pub verifier: Vec<u8>,
}

impl AccountRecord {
    pub fn from_password(identity: &str, password: &str) -> Self {
        let (salt, verifier) = srp6::generate_account(identity, password);
        Self {
            identity: identity.to_string(),
            salt,
            verifier,
        }
    }
}

pub trait AccountStore: Send + Sync {
    /// Look up credentials. Identities compare case-insensitively.
    fn account(&self, identity: &str) -> Result<Option<AccountRecord>>;

    /// Mint a fresh ticket for an authenticated identity.
    fn issue_ticket(&self, identity: &str) -> Result<SessionTicket>;

    /// Consume a ticket. Returns `Some(())` only the first time a live ticket
    /// issued to `identity` is presented.
    fn redeem_ticket(&self, identity: &str, ticket: &SessionTicket) -> Result<Option<()>>;
}

#[derive(Debug)]
struct IssuedTicket {
    ticket: SessionTicket,
    issued_at: Instant,
}

/// Lock-guarded in-memory store.
#[derive(Debug)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, AccountRecord>>,
    tickets: RwLock<HashMap<String, IssuedTicket>>,
    ticket_ttl: Duration,
}

fn normalize(identity: &str) -> String {
    srp6::canonical_identity(identity)
}

fn poisoned<T>(_: T) -> ProtocolError {
    ProtocolError::Custom(constants::ERR_LOCK_POISONED.into())
}

impl MemoryAccountStore {
    pub fn new(ticket_ttl: Duration) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            tickets: RwLock::new(HashMap::new()),
            ticket_ttl,
        }
    }

    /// Create or replace an account from a plaintext password.
    pub fn register(&self, identity: &str, password: &str) -> Result<()> {
        self.insert(AccountRecord::from_password(identity, password))
    }

    pub fn insert(&self, record: AccountRecord) -> Result<()> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        accounts.insert(normalize(&record.identity), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.accounts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl AccountStore for MemoryAccountStore {
    fn account(&self, identity: &str) -> Result<Option<AccountRecord>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(&normalize(identity)).cloned())
    }

    fn issue_ticket(&self, identity: &str) -> Result<SessionTicket> {
        let mut ticket = [0u8; TICKET_LEN];
        getrandom::fill(&mut ticket)
            .map_err(|_| ProtocolError::Custom(constants::ERR_RANDOM_SOURCE.into()))?;

        let mut tickets = self.tickets.write().map_err(poisoned)?;
        // Only the latest ticket per identity is redeemable.
        tickets.insert(
            normalize(identity),
            IssuedTicket {
                ticket,
                issued_at: Instant::now(),
            },
        );
        debug!(identity, "Session ticket issued");
        Ok(ticket)
    }

    fn redeem_ticket(&self, identity: &str, ticket: &SessionTicket) -> Result<Option<()>> {
        let key = normalize(identity);
        let mut tickets = self.tickets.write().map_err(poisoned)?;

        let Some(issued) = tickets.get(&key) else {
            return Ok(None);
        };
        if issued.issued_at.elapsed() > self.ticket_ttl {
            tickets.remove(&key);
            debug!(identity, "Expired session ticket discarded");
            return Ok(None);
        }

        let matches = issued
            .ticket
            .iter()
            .zip(ticket.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;
        if !matches {
            warn!(identity, "Session ticket mismatch");
            return Ok(None);
        }

        tickets.remove(&key);
        Ok(Some(()))
    }
}
