//! Unsigned transaction model.
//!
//! A transaction is a sender plus an ordered list of Move calls. Access proofs
//! are transactions of this shape that are built and dry-run but never
//! submitted. Everything here encodes to deterministic CBOR.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tierseal_core::{Address, Ed25519PublicKey, Ed25519Signature, ObjectId};

use crate::error::{LedgerError, Result};

/// One argument of a Move call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallArg {
    /// A ledger object passed by id.
    Object(ObjectId),

    /// A pure value, CBOR-encoded.
    Pure(Vec<u8>),
}

impl CallArg {
    /// Encode a pure value.
    pub fn pure<T: Serialize>(value: &T) -> Result<Self> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(CallArg::Pure(buf))
    }

    /// The object id, if this is an object argument.
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            CallArg::Object(id) => Some(*id),
            CallArg::Pure(_) => None,
        }
    }

    /// Decode a pure value.
    pub fn decode_pure<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            CallArg::Pure(bytes) => ciborium::from_reader(bytes.as_slice())
                .map_err(|e| LedgerError::InvalidTransaction(e.to_string())),
            CallArg::Object(id) => Err(LedgerError::InvalidTransaction(format!(
                "expected pure argument, got object {}",
                id
            ))),
        }
    }
}

/// A call to `<package>::<module>::<function>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCall {
    pub target: String,
    pub arguments: Vec<CallArg>,
}

impl MoveCall {
    pub fn new(package: &str, module: &str, function: &str, arguments: Vec<CallArg>) -> Self {
        Self {
            target: format!("{}::{}::{}", package, module, function),
            arguments,
        }
    }

    /// Split the target into `(package, module, function)`.
    pub fn parts(&self) -> Result<(&str, &str, &str)> {
        let mut it = self.target.rsplitn(3, "::");
        match (it.next(), it.next(), it.next()) {
            (Some(function), Some(module), Some(package)) if !package.is_empty() => {
                Ok((package, module, function))
            }
            _ => Err(LedgerError::InvalidTransaction(format!(
                "malformed call target: {}",
                self.target
            ))),
        }
    }

    /// Every object id this call references.
    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.arguments.iter().filter_map(CallArg::as_object)
    }

    /// Object argument at `index`.
    pub fn object_arg(&self, index: usize) -> Result<ObjectId> {
        self.arguments
            .get(index)
            .and_then(CallArg::as_object)
            .ok_or_else(|| {
                LedgerError::InvalidTransaction(format!(
                    "{}: argument {} is not an object",
                    self.target, index
                ))
            })
    }

    /// Pure argument at `index`.
    pub fn pure_arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        self.arguments
            .get(index)
            .ok_or_else(|| {
                LedgerError::InvalidTransaction(format!(
                    "{}: missing argument {}",
                    self.target, index
                ))
            })?
            .decode_pure()
    }
}

/// Transaction contents before the ledger client fills in gas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    pub sender: Address,
    pub calls: Vec<MoveCall>,

    /// Epoch after which the transaction is invalid; `None` for proofs.
    pub expiration: Option<u64>,
}

impl TransactionData {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            calls: Vec::new(),
            expiration: None,
        }
    }

    pub fn with_call(mut self, call: MoveCall) -> Self {
        self.calls.push(call);
        self
    }
}

/// A transaction as returned by `build_transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltTransaction {
    pub data: TransactionData,
    pub gas_budget: u64,
}

impl BuiltTransaction {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| LedgerError::InvalidTransaction(e.to_string()))
    }
}

/// Built transaction bytes with the sender's signature.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub bytes: Vec<u8>,
    pub public_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parts() {
        let call = MoveCall::new("0xabc", "subscription", "create_access_proof", vec![]);
        assert_eq!(call.target, "0xabc::subscription::create_access_proof");
        assert_eq!(
            call.parts().unwrap(),
            ("0xabc", "subscription", "create_access_proof")
        );

        let bad = MoveCall {
            target: "subscription::create_access_proof".into(),
            arguments: vec![],
        };
        assert!(bad.parts().is_err());
    }

    #[test]
    fn test_pure_arguments_decode() {
        let tier = Some(ObjectId::from_bytes([4; 32]));
        let call = MoveCall::new(
            "0xabc",
            "content",
            "publish_content",
            vec![
                CallArg::Object(ObjectId::from_bytes([1; 32])),
                CallArg::pure(&"title").unwrap(),
                CallArg::pure(&true).unwrap(),
                CallArg::pure(&tier).unwrap(),
            ],
        );

        assert_eq!(call.object_arg(0).unwrap(), ObjectId::from_bytes([1; 32]));
        assert_eq!(call.pure_arg::<String>(1).unwrap(), "title");
        assert!(call.pure_arg::<bool>(2).unwrap());
        assert_eq!(call.pure_arg::<Option<ObjectId>>(3).unwrap(), tier);
        assert!(call.object_arg(1).is_err());
        assert!(call.pure_arg::<bool>(9).is_err());
    }

    #[test]
    fn test_built_transaction_bytes_are_deterministic() {
        let data = TransactionData::new(Address::from_bytes([9; 32])).with_call(MoveCall::new(
            "0xabc",
            "subscription",
            "create_access_proof",
            vec![CallArg::Object(ObjectId::CLOCK)],
        ));
        let built = BuiltTransaction {
            data,
            gas_budget: 10,
        };

        let a = built.to_bytes().unwrap();
        let b = built.clone().to_bytes().unwrap();
        assert_eq!(a, b);
        assert_eq!(BuiltTransaction::from_bytes(&a).unwrap(), built);
        assert!(BuiltTransaction::from_bytes(b"garbage").is_err());
    }
}
