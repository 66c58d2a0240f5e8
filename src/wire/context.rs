//! Request context: string key/value pairs sent alongside the payload.
//!
//! On the wire the context is a single `j` field whose data is itself a
//! sequence of `k` (key) and `v` (value) netstrings.

use crate::error::{Fault, FaultCode};
use crate::wire::netstring::{NetStringWriter, parse_all};
use crate::wire::packet::field;

use std::collections::BTreeMap;

/// Keys starting with this prefix are reserved for the engine.
pub const RESERVED_PREFIX: &str = "sockrpc.";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Context {
    entries: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), Fault> {
        if key.is_empty() {
            return Err(Fault::new(FaultCode::ContextFormatError, "context key is empty"));
        }
        if key.starts_with(RESERVED_PREFIX) {
            return Err(Fault::new(
                FaultCode::ContextReservedNamespace,
                format!("context key {key:?} is in the reserved namespace"),
            ));
        }

        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut writer = NetStringWriter::new();
        for (key, value) in &self.entries {
            writer.append(field::CONTEXT_KEY, key.as_bytes());
            writer.append(field::CONTEXT_VALUE, value.as_bytes());
        }

        writer.into_bytes()
    }

    /// Decodes the data of a `j` field. Reserved keys are accepted here
    /// since the engine itself may be the sender.
    pub(crate) fn decode(data: &[u8]) -> Result<Self, String> {
        let mut entries = BTreeMap::new();
        let mut pending_key: Option<String> = None;

        for ns in parse_all(data)? {
            let text = String::from_utf8(data[ns.data].to_vec())
                .map_err(|_| "context entry is not UTF-8".to_string())?;

            match (ns.field, pending_key.take()) {
                (field::CONTEXT_KEY, None) => pending_key = Some(text),
                (field::CONTEXT_VALUE, Some(key)) => {
                    entries.insert(key, text);
                }
                (field::CONTEXT_KEY, Some(_)) => return Err("context key without value".to_string()),
                (field::CONTEXT_VALUE, None) => return Err("context value without key".to_string()),
                (other, _) => {
                    return Err(format!("unexpected context field type {:?}", other as char));
                }
            }
        }
        if pending_key.is_some() {
            return Err("context key without value".to_string());
        }

        Ok(Self { entries })
    }
}
