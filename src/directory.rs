//! Accounts and the identity directory.
//!
//! The directory is an external collaborator (in production, a relational
//! user table). The pipeline only needs to look accounts up and to persist a
//! new bound address after a successful wallet binding; registration and
//! password handling live elsewhere.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MedledgerError;
use crate::eth::Address;

/// The three roles an account can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Doctor => "doctor",
            Self::Patient => "patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MedledgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "doctor" => Ok(Self::Doctor),
            "patient" => Ok(Self::Patient),
            other => Err(MedledgerError::Precondition(format!("invalid role: {}", other))),
        }
    }
}

/// An application account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique email-like login handle.
    pub handle: String,
    pub name: String,
    /// Opaque password credential (a hash produced by the login service).
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    /// Set only by the identity binder.
    pub bound_address: Option<Address>,
}

impl Account {
    pub fn new(handle: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
            password_hash: String::new(),
            role,
            bound_address: None,
        }
    }

    /// The bound address, or the "wallet not linked" precondition failure.
    pub fn require_bound(&self) -> Result<Address, MedledgerError> {
        self.bound_address
            .ok_or_else(|| MedledgerError::Precondition("wallet not linked".into()))
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("bound_address", &self.bound_address)
            .finish()
    }
}

/// Lookup and update of account records.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Fetch an account by handle.
    ///
    /// Returns `Precondition` if no such account exists.
    async fn lookup(&self, handle: &str) -> Result<Account, MedledgerError>;

    /// Persist a new bound address, replacing any previous one.
    async fn set_bound_address(&self, handle: &str, address: Address) -> Result<(), MedledgerError>;
}

/// In-memory directory. Thread-safe via `RwLock`; not persistent.
#[derive(Default)]
pub struct MemoryDirectory {
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account. Registration proper is out of scope; this exists
    /// so tests and embedders can seed the directory.
    pub fn insert(&self, account: Account) -> Result<(), MedledgerError> {
        let mut accounts = self.write()?;
        if accounts.contains_key(&account.handle) {
            return Err(MedledgerError::Precondition(format!(
                "account already exists: {}",
                account.handle
            )));
        }
        accounts.insert(account.handle.clone(), account);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.accounts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Account>>, MedledgerError> {
        self.accounts
            .write()
            .map_err(|_| MedledgerError::poisoned("directory"))
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn lookup(&self, handle: &str) -> Result<Account, MedledgerError> {
        self.accounts
            .read()
            .map_err(|_| MedledgerError::poisoned("directory"))?
            .get(handle)
            .cloned()
            .ok_or_else(|| MedledgerError::Precondition(format!("unknown account: {}", handle)))
    }

    async fn set_bound_address(&self, handle: &str, address: Address) -> Result<(), MedledgerError> {
        let mut accounts = self.write()?;
        let account = accounts
            .get_mut(handle)
            .ok_or_else(|| MedledgerError::Precondition(format!("unknown account: {}", handle)))?;
        account.bound_address = Some(address);
        Ok(())
    }
}
