// 11.0: audit tickets. every state change is documented by exactly one ticket, written
// in the same unit of work as the change itself. tickets are the source of truth for
// "what happened and why" queries and are never deleted.

use crate::types::{Actor, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Human readable ticket id, `PREFIX-YEAR-NNNNNN`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(pub String);

impl TicketId {
    pub fn format(prefix: &str, year: i32, sequence: u64) -> Self {
        Self(format!("{}-{}-{:06}", prefix, year, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AccountOpened,
    AccountUpdated,
    BalanceCredited,
    BalanceDebited,
    OrderPlaced,
    OrderCancelled,
    TradeExecuted,
    InternalTradeExecuted,
    RuleCreated,
    RuleUpdated,
    RuleDeleted,
    RuleEnabled,
    RuleDisabled,
    RuleExecuted,
    LiquiditySettingsUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Account,
    Holding,
    Order,
    Trade,
    Rule,
    LiquiditySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTicket {
    pub id: TicketId,
    pub sequence: u64,
    pub action: AuditAction,
    pub entity_type: EntityType,
    /// Empty until the entity exists. backfilled once, never changed afterwards.
    pub entity_id: Option<String>,
    pub actor: Actor,
    pub payload: Value,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub related: Vec<TicketId>,
    pub tags: Vec<String>,
    pub created_at: Timestamp,
}

/// Everything a caller supplies to issue a ticket. id, sequence and time are filled in
/// by the registry.
#[derive(Debug, Clone)]
pub struct TicketDraft {
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: Option<String>,
    pub actor: Actor,
    pub payload: Value,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub related: Vec<TicketId>,
    pub tags: Vec<String>,
}

impl TicketDraft {
    pub fn new(action: AuditAction, entity_type: EntityType, actor: Actor) -> Self {
        Self {
            action,
            entity_type,
            entity_id: None,
            actor,
            payload: Value::Null,
            before: None,
            after: None,
            related: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn entity(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn before(mut self, state: Value) -> Self {
        self.before = Some(state);
        self
    }

    pub fn after(mut self, state: Value) -> Self {
        self.after = Some(state);
        self
    }

    pub fn related(mut self, ticket: TicketId) -> Self {
        if !self.related.contains(&ticket) {
            self.related.push(ticket);
        }
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn into_ticket(self, id: TicketId, sequence: u64, created_at: Timestamp) -> AuditTicket {
        AuditTicket {
            id,
            sequence,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            actor: self.actor,
            payload: self.payload,
            before: self.before,
            after: self.after,
            related: self.related,
            tags: self.tags,
            created_at,
        }
    }
}

/// Allocates ticket sequence numbers. injected so tests can substitute a fake.
pub trait TicketSequencer: Send {
    /// Next number for the given year. strictly increasing within a year.
    fn next(&mut self, year: i32) -> u64;
}

/// Default sequencer: one counter per calendar year, starting at 1.
#[derive(Debug, Default, Clone)]
pub struct YearlySequencer {
    counters: HashMap<i32, u64>,
}

impl YearlySequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, year: i32) -> u64 {
        self.counters.get(&year).copied().unwrap_or(0)
    }
}

impl TicketSequencer for YearlySequencer {
    fn next(&mut self, year: i32) -> u64 {
        let counter = self.counters.entry(year).or_insert(0);
        *counter += 1;
        *counter
    }
}
