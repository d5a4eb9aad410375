//! Periodic rule driver.

use super::core::Engine;
use crate::rules::{RuleExecutionRecord, RuleState};
use tracing::{debug, warn};

impl Engine {
    /// Execute every enabled rule whose next run is due, one after another, earliest
    /// first. a rule that errors is logged and skipped, the rest still run.
    pub fn run_due_rules(&mut self) -> Vec<RuleExecutionRecord> {
        let now = self.current_time;
        let due: Vec<_> = self
            .store
            .scheduled_before(now)
            .into_iter()
            .filter(|id| self.store.rule(*id).map_or(false, |rule| rule.is_due(now)))
            .collect();

        for id in &due {
            if let Some(rule) = self.store.rule(*id) {
                let mut rule = rule.clone();
                rule.state = RuleState::Due;
                self.store.put_rule(rule);
            }
        }
        debug!(due = due.len(), at = %now, "scheduler tick");

        let mut records = Vec::with_capacity(due.len());
        for id in due {
            match self.execute_rule(id) {
                Ok(record) => records.push(record),
                Err(err) => warn!(rule_id = %id, error = %err, "rule skipped"),
            }
        }
        records
    }
}

/// Fixed-cadence clock for the simulation loop. each tick advances the engine clock
/// and runs whatever came due.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    pub tick_secs: u64,
}

impl Scheduler {
    pub fn new(tick_secs: u64) -> Self {
        Self { tick_secs: tick_secs.max(1) }
    }

    pub fn for_engine(engine: &Engine) -> Self {
        Self::new(engine.config().tick_interval_secs)
    }

    pub fn tick(&self, engine: &mut Engine) -> Vec<RuleExecutionRecord> {
        engine.advance_time(self.tick_millis());
        engine.run_due_rules()
    }

    /// Tick until `seconds` of engine time have passed. a trailing partial tick still
    /// advances the clock and runs what came due. returns every record produced.
    pub fn run_for(&self, engine: &mut Engine, seconds: u64) -> Vec<RuleExecutionRecord> {
        let ticks = seconds / self.tick_secs;
        let mut records: Vec<_> = (0..ticks).flat_map(|_| self.tick(engine)).collect();

        let remainder = seconds % self.tick_secs;
        if remainder > 0 {
            engine.advance_time(secs_to_millis(remainder));
            records.extend(engine.run_due_rules());
        }
        records
    }

    fn tick_millis(&self) -> i64 {
        secs_to_millis(self.tick_secs)
    }
}

fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
}
