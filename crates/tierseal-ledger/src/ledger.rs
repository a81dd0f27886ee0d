//! Ledger client abstraction.
//!
//! The engine only reads objects and events, builds and dry-runs unsigned
//! transactions, and submits signed ones. Implementations may talk to a full
//! node over RPC; [`crate::memory::MemoryLedger`] evaluates a small set of
//! known calls in process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tierseal_core::{Address, ObjectId};

use crate::error::Result;
use crate::transaction::{SignedTransaction, TransactionData};

/// A ledger object as returned by a read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerObject {
    pub id: ObjectId,

    /// `None` for shared objects.
    pub owner: Option<Address>,

    /// Fully qualified type, e.g. `0xpkg::subscription::Subscription`.
    pub type_tag: String,

    pub version: u64,

    /// Move struct fields as JSON.
    pub fields: Value,
}

impl LedgerObject {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn field_id(&self, name: &str) -> Option<ObjectId> {
        json_id(&self.fields, name)
    }

    pub fn field_address(&self, name: &str) -> Option<Address> {
        json_address(&self.fields, name)
    }

    /// A `u64` field. Nodes render large integers as strings, so both forms
    /// are accepted.
    pub fn field_u64(&self, name: &str) -> Option<u64> {
        json_u64(&self.fields, name)
    }

    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Value::as_bool)
    }

    /// Whether `type_tag` is `<module>::<name>` in any package.
    pub fn is_type(&self, module: &str, name: &str) -> bool {
        self.type_tag.ends_with(&format!("::{}::{}", module, name))
    }
}

/// An emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_type: String,
    pub sender: Address,
    pub timestamp_ms: i64,
    pub parsed: Value,
}

impl LedgerEvent {
    pub fn field_id(&self, name: &str) -> Option<ObjectId> {
        json_id(&self.parsed, name)
    }

    pub fn field_address(&self, name: &str) -> Option<Address> {
        json_address(&self.parsed, name)
    }
}

/// Outcome of a finalized transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEffects {
    /// Hex digest of the signed bytes.
    pub digest: String,
    pub created: Vec<ObjectId>,
    pub events: Vec<LedgerEvent>,
}

fn json_id(value: &Value, name: &str) -> Option<ObjectId> {
    value
        .get(name)
        .and_then(Value::as_str)
        .and_then(|s| ObjectId::from_hex(s).ok())
}

fn json_address(value: &Value, name: &str) -> Option<Address> {
    value
        .get(name)
        .and_then(Value::as_str)
        .and_then(|s| Address::from_hex(s).ok())
}

fn json_u64(value: &Value, name: &str) -> Option<u64> {
    match value.get(name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Ledger client trait.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Read one object by id. `Ok(None)` if it does not exist.
    async fn get_object(&self, id: &ObjectId) -> Result<Option<LedgerObject>>;

    /// Objects owned by `owner` with exactly this type.
    async fn owned_objects(&self, owner: &Address, type_tag: &str) -> Result<Vec<LedgerObject>>;

    /// Events of a type, newest first, at most `limit`.
    async fn query_events(&self, event_type: &str, limit: usize) -> Result<Vec<LedgerEvent>>;

    /// Resolve references and gas, returning the bytes a signer would sign.
    async fn build_transaction(&self, data: &TransactionData) -> Result<Vec<u8>>;

    /// Evaluate built bytes without side effects. Aborts surface as
    /// [`crate::LedgerError::Aborted`].
    async fn dry_run_transaction(&self, tx_bytes: &[u8]) -> Result<()>;

    /// Execute a signed transaction and wait for finalization.
    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<TransactionEffects>;
}
