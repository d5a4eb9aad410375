//! Audit ticket registry.

use super::core::Engine;
use super::results::EngineError;
use crate::audit::{AuditTicket, EntityType, TicketDraft, TicketId};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

impl Engine {
    /// Allocate the next id for the clock's year and persist the ticket. sequence
    /// numbers are not returned on rollback, so ids can skip.
    pub(super) fn issue(&mut self, draft: TicketDraft) -> TicketId {
        let year = self.current_time.year();
        let sequence = self.sequencer.next(year);
        let id = TicketId::format(&self.config.ticket_prefix, year, sequence);

        debug!(ticket = %id, action = ?draft.action, "ticket issued");
        let ticket = draft.into_ticket(id.clone(), sequence, self.current_time);
        self.store.insert_ticket(ticket);
        id
    }

    /// Issue a ticket for an action taken outside the engine. related tickets must exist.
    pub fn issue_ticket(&mut self, draft: TicketDraft) -> Result<AuditTicket, EngineError> {
        self.atomically(|engine| {
            for related in &draft.related {
                engine.ticket(related)?;
            }
            let id = engine.issue(draft);
            engine.ticket(&id).cloned()
        })
    }

    /// Append related ids. already linked ids are skipped.
    pub fn link(&mut self, ticket_id: &TicketId, related: &[TicketId]) -> Result<(), EngineError> {
        self.atomically(|engine| engine.link_tickets(ticket_id, related))
    }

    pub(super) fn link_tickets(&mut self, ticket_id: &TicketId, related: &[TicketId]) -> Result<(), EngineError> {
        let mut ticket = self.ticket(ticket_id)?.clone();
        let mut changed = false;
        for id in related {
            self.ticket(id)?;
            if id != ticket_id && !ticket.related.contains(id) {
                ticket.related.push(id.clone());
                changed = true;
            }
        }
        if changed {
            self.store.update_ticket(ticket);
        }
        Ok(())
    }

    /// Record the affected entity once it exists. only an empty id can be filled.
    pub fn backfill_entity_id(&mut self, ticket_id: &TicketId, entity_id: &str) -> Result<(), EngineError> {
        self.atomically(|engine| engine.backfill(ticket_id, entity_id))
    }

    pub(super) fn backfill(&mut self, ticket_id: &TicketId, entity_id: &str) -> Result<(), EngineError> {
        let mut ticket = self.ticket(ticket_id)?.clone();
        if let Some(existing) = &ticket.entity_id {
            return Err(EngineError::InvalidState(format!(
                "ticket {} already documents {}",
                ticket_id, existing
            )));
        }
        ticket.entity_id = Some(entity_id.to_string());
        self.store.update_ticket(ticket);
        Ok(())
    }

    pub fn ticket(&self, id: &TicketId) -> Result<&AuditTicket, EngineError> {
        self.store
            .ticket(id)
            .ok_or_else(|| EngineError::TicketNotFound(id.clone()))
    }

    pub fn tickets(&self) -> impl Iterator<Item = &AuditTicket> {
        self.store.tickets()
    }

    pub fn tickets_for(&self, entity_type: EntityType, entity_id: &str) -> Vec<&AuditTicket> {
        self.store.tickets_for(entity_type, entity_id)
    }

    /// Breadth-first walk over related links starting at `id`, the start included.
    pub fn ticket_chain(&self, id: &TicketId) -> Result<Vec<&AuditTicket>, EngineError> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        let mut chain = Vec::new();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            let ticket = self.ticket(&next)?;
            queue.extend(ticket.related.iter().cloned());
            chain.push(ticket);
        }
        Ok(chain)
    }
}
