//! Payload interpreters
//!
//! Command modules register one interpreter per command id. The registry is
//! assembled once at start-up and then shared read-only (behind an `Arc`)
//! with the monitor and the commander.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Frame;

/// Human-readable rendering of a payload plus a structured summary
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    /// Text for people, may span several lines
    pub human: String,
    /// Machine-readable summary
    pub summary: Value,
}

impl Interpretation {
    /// Create an interpretation
    pub fn new(human: impl Into<String>, summary: Value) -> Self {
        Self {
            human: human.into(),
            summary,
        }
    }

    /// Fallback rendering used when no interpreter applies
    pub fn raw(human: impl Into<String>, payload: &[u8]) -> Self {
        Self::new(human, json!({ "payload_hex": hex::encode(payload) }))
    }
}

/// Turns a decoded frame into an [`Interpretation`]
pub trait PayloadInterpreter: Send + Sync {
    /// Interpret the frame's payload; `Err` carries a reason
    fn interpret(&self, frame: &Frame) -> Result<Interpretation, String>;
}

impl<F> PayloadInterpreter for F
where
    F: Fn(&Frame) -> Result<Interpretation, String> + Send + Sync,
{
    fn interpret(&self, frame: &Frame) -> Result<Interpretation, String> {
        self(frame)
    }
}

/// Immutable mapping from command id to interpreter
#[derive(Clone, Default)]
pub struct InterpreterRegistry {
    interpreters: HashMap<u16, Arc<dyn PayloadInterpreter>>,
}

impl fmt::Debug for InterpreterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.interpreters.keys().collect();
        ids.sort();
        f.debug_struct("InterpreterRegistry")
            .field("command_ids", &ids)
            .finish()
    }
}

impl InterpreterRegistry {
    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with no interpreters; every frame renders as raw hex
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether an interpreter exists for `command_id`
    pub fn contains(&self, command_id: u16) -> bool {
        self.interpreters.contains_key(&command_id)
    }

    /// Number of registered command ids
    pub fn len(&self) -> usize {
        self.interpreters.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.interpreters.is_empty()
    }

    /// Render a frame. Never fails: missing or failing interpreters fall
    /// back to a hex dump of the payload.
    pub fn interpret(&self, frame: &Frame) -> Interpretation {
        let payload_hex = hex::encode(&frame.payload);
        match self.interpreters.get(&frame.command_id) {
            Some(interpreter) => match interpreter.interpret(frame) {
                Ok(interpretation) => interpretation,
                Err(e) => Interpretation::raw(
                    format!(
                        "Parser for 0x{:04X} raised: {}. Payload hex: {}",
                        frame.command_id, e, payload_hex
                    ),
                    &frame.payload,
                ),
            },
            None => Interpretation::raw(
                format!(
                    "No parser for 0x{:04X}. Payload hex: {}",
                    frame.command_id, payload_hex
                ),
                &frame.payload,
            ),
        }
    }
}

/// Collects interpreters before freezing them into an [`InterpreterRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    interpreters: HashMap<u16, Arc<dyn PayloadInterpreter>>,
}

impl RegistryBuilder {
    /// Register an interpreter; a later registration for the same id wins
    pub fn register<I>(mut self, command_id: u16, interpreter: I) -> Self
    where
        I: PayloadInterpreter + 'static,
    {
        if self
            .interpreters
            .insert(command_id, Arc::new(interpreter))
            .is_some()
        {
            tracing::warn!("interpreter for 0x{:04X} registered twice", command_id);
        }
        self
    }

    /// Freeze the registry
    pub fn build(self) -> InterpreterRegistry {
        InterpreterRegistry {
            interpreters: self.interpreters,
        }
    }
}
