//! JSON control envelopes carried over the relay connection.
//!
//! Negotiation frames ride the ordinary relay transport as JSON arrays keyed
//! by a caller-assigned subscription id: `NEG-OPEN` starts a negotiation,
//! `NEG-MSG` carries hex-encoded messages in either direction, `NEG-ERR`
//! reports a relay-side failure, `NEG-CLOSE` ends the channel.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ProtocolError, Result};
use crate::message::Message;

fn frame_array(value: &Value, kind: &str, len: usize) -> Result<Vec<Value>> {
    let array = value
        .as_array()
        .ok_or_else(|| ProtocolError::InvalidFrame("not a JSON array".to_string()))?;
    if array.len() != len {
        return Err(ProtocolError::InvalidFrame(format!(
            "{kind}: expected {len} elements, got {}",
            array.len()
        )));
    }
    let tag = array[0]
        .as_str()
        .ok_or_else(|| ProtocolError::InvalidFrame("frame tag is not a string".to_string()))?;
    if tag != kind {
        return Err(ProtocolError::InvalidFrame(format!(
            "expected {kind}, got {tag}"
        )));
    }
    Ok(array.clone())
}

fn string_at(array: &[Value], index: usize, what: &str) -> Result<String> {
    array[index]
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| ProtocolError::InvalidFrame(format!("{what} is not a string")))
}

/// `["NEG-OPEN", subscription_id, filter, initial_message_hex]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegOpen {
    pub subscription_id: String,
    pub filter: Value,
    pub initial_message: String,
}

impl NegOpen {
    pub fn new(subscription_id: String, filter: Value, message: &Message) -> Self {
        Self {
            subscription_id,
            filter,
            initial_message: message.encode_hex(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!([
            "NEG-OPEN",
            self.subscription_id,
            self.filter,
            self.initial_message
        ])
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let array = frame_array(value, "NEG-OPEN", 4)?;
        Ok(Self {
            subscription_id: string_at(&array, 1, "subscription id")?,
            filter: array[2].clone(),
            initial_message: string_at(&array, 3, "initial message")?,
        })
    }
}

/// `["NEG-MSG", subscription_id, message_hex]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegMsg {
    pub subscription_id: String,
    pub message: String,
}

impl NegMsg {
    pub fn new(subscription_id: String, message: &Message) -> Self {
        Self {
            subscription_id,
            message: message.encode_hex(),
        }
    }

    /// Decode the carried negotiation message.
    pub fn decode_message(&self) -> Result<Message> {
        Message::decode_hex(&self.message)
    }

    pub fn to_json(&self) -> Value {
        json!(["NEG-MSG", self.subscription_id, self.message])
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let array = frame_array(value, "NEG-MSG", 3)?;
        Ok(Self {
            subscription_id: string_at(&array, 1, "subscription id")?,
            message: string_at(&array, 2, "message")?,
        })
    }
}

/// `["NEG-ERR", subscription_id, reason]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegErr {
    pub subscription_id: String,
    pub reason: String,
}

impl NegErr {
    pub fn new(subscription_id: String, reason: String) -> Self {
        Self {
            subscription_id,
            reason,
        }
    }

    pub fn to_json(&self) -> Value {
        json!(["NEG-ERR", self.subscription_id, self.reason])
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let array = frame_array(value, "NEG-ERR", 3)?;
        Ok(Self {
            subscription_id: string_at(&array, 1, "subscription id")?,
            reason: string_at(&array, 2, "reason")?,
        })
    }
}

/// `["NEG-CLOSE", subscription_id]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegClose {
    pub subscription_id: String,
}

impl NegClose {
    pub fn new(subscription_id: String) -> Self {
        Self { subscription_id }
    }

    pub fn to_json(&self) -> Value {
        json!(["NEG-CLOSE", self.subscription_id])
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let array = frame_array(value, "NEG-CLOSE", 2)?;
        Ok(Self {
            subscription_id: string_at(&array, 1, "subscription id")?,
        })
    }
}
