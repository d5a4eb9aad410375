// 8.0 engine/core.rs: main engine. owns the store, the clock, the rng and the
// injected collaborators (ticket sequencer, price source, notification sinks).

use super::config::EngineConfig;
use super::results::EngineError;
use crate::account::{Account, AccountError, AccountKind};
use crate::audit::{AuditAction, EntityType, TicketDraft, TicketSequencer, YearlySequencer};
use crate::config::ExchangeConfig;
use crate::events::{Notification, NotificationCollector, NotificationId, NotificationPayload, NotificationSink};
use crate::market::{InstrumentConfig, MarketState};
use crate::price_feed::{NoPriceSource, PriceSource};
use crate::store::Store;
use crate::types::{AccountId, Actor, Instrument, Timestamp};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

/** 8.1: main engine struct. all state lives in the store */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) store: Store,
    pub(super) sequencer: Box<dyn TicketSequencer>,
    pub(super) prices: Box<dyn PriceSource>,
    pub(super) sinks: Vec<Box<dyn NotificationSink>>,
    pub(super) notifications: NotificationCollector,
    pub(super) pending: Vec<NotificationPayload>,
    pub(super) rng: ChaCha8Rng,
    pub(super) next_account_id: u64,
    pub(super) next_order_id: u64,
    pub(super) next_trade_id: u64,
    pub(super) next_rule_id: u64,
    pub(super) next_transaction_id: u64,
    pub(super) next_notification_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
        let notifications = NotificationCollector::new(config.max_notifications);
        Self {
            config,
            store: Store::new(),
            sequencer: Box::new(YearlySequencer::new()),
            prices: Box::new(NoPriceSource),
            sinks: Vec::new(),
            notifications,
            pending: Vec::new(),
            rng,
            next_account_id: 1,
            next_order_id: 1,
            next_trade_id: 1,
            next_rule_id: 1,
            next_transaction_id: 1,
            next_notification_id: 1,
            current_time: Timestamp::from_millis(0),
        }
    }

    /// Build an engine with the instruments and liquidity targets of a validated config.
    pub fn from_config(config: &ExchangeConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let mut engine = Self::new(config.engine.clone());
        for instrument in &config.instruments {
            engine.add_instrument(instrument.clone())?;
        }
        for target in &config.liquidity {
            let settings = target.to_settings(config.engine.liquidity_tolerance_pct, engine.current_time);
            engine.upsert_liquidity_settings(settings, Actor::System)?;
        }
        Ok(engine)
    }

    pub fn with_sequencer(mut self, sequencer: Box<dyn TicketSequencer>) -> Self {
        self.sequencer = sequencer;
        self
    }

    pub fn with_price_source(mut self, prices: Box<dyn PriceSource>) -> Self {
        self.prices = prices;
        self
    }

    pub fn set_price_source(&mut self, prices: Box<dyn PriceSource>) {
        self.prices = prices;
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = self.current_time.plus_millis(millis);
    }

    /// Run `f` as one unit of work. any error rolls the store back to where it was
    /// when `f` started, and drops the notifications `f` queued. units nest.
    pub fn atomically<T, F>(&mut self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<T, EngineError>,
    {
        let savepoint = self.store.begin();
        let queued = self.pending.len();

        match f(self) {
            Ok(value) => {
                self.store.commit(savepoint);
                if !self.store.in_unit() {
                    self.flush_notifications();
                }
                Ok(value)
            }
            Err(err) => {
                self.store.rollback(savepoint);
                self.pending.truncate(queued);
                Err(err)
            }
        }
    }

    // ---- instruments ----

    pub fn add_instrument(&mut self, config: InstrumentConfig) -> Result<Instrument, EngineError> {
        config.validate()?;
        let instrument = config.instrument;
        if self.store.market(instrument).is_some() {
            return Err(EngineError::InvalidState(format!("instrument {} already listed", instrument)));
        }
        let state = MarketState::new(config, self.current_time);
        self.store.put_market(state);
        info!(%instrument, "instrument listed");
        Ok(instrument)
    }

    pub fn market(&self, instrument: Instrument) -> Result<&MarketState, EngineError> {
        self.store
            .market(instrument)
            .ok_or(EngineError::InstrumentNotFound(instrument))
    }

    // ---- accounts ----

    pub fn open_account(&mut self, kind: AccountKind, actor: Actor) -> Result<AccountId, EngineError> {
        self.atomically(|engine| {
            let id = AccountId(engine.next_account_id);
            engine.next_account_id += 1;

            let account = Account::new(id, kind, engine.current_time);
            engine.issue(
                TicketDraft::new(AuditAction::AccountOpened, EntityType::Account, actor)
                    .entity(id)
                    .after(snapshot(&account)),
            );
            engine.store.put_account(account);
            Ok(id)
        })
    }

    pub fn get_account(&self, account_id: AccountId) -> Result<&Account, EngineError> {
        self.store
            .account(account_id)
            .ok_or(EngineError::AccountNotFound(account_id))
    }

    /// Give a liquidity provider the instrument it quotes and its balance check mode.
    pub fn configure_liquidity_provider(
        &mut self,
        account_id: AccountId,
        role: Instrument,
        relaxed_balance_checks: bool,
        actor: Actor,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            let before = engine.get_account(account_id)?.clone();
            if !before.is_liquidity_provider() {
                return Err(AccountError::RelaxedChecksNotAllowed(account_id).into());
            }
            if !role.asset.is_certificate() {
                return Err(AccountError::InvalidRole(role).into());
            }
            engine.market(role)?;

            let mut account = before.clone();
            account.role = Some(role);
            account.relaxed_balance_checks = relaxed_balance_checks;
            engine.update_account(before, account, actor);
            Ok(())
        })
    }

    /// Deactivated accounts keep receiving settlements but cannot place orders.
    pub fn set_account_active(&mut self, account_id: AccountId, active: bool, actor: Actor) -> Result<(), EngineError> {
        self.atomically(|engine| {
            let before = engine.get_account(account_id)?.clone();
            let mut account = before.clone();
            account.active = active;
            engine.update_account(before, account, actor);
            Ok(())
        })
    }

    fn update_account(&mut self, before: Account, after: Account, actor: Actor) {
        self.issue(
            TicketDraft::new(AuditAction::AccountUpdated, EntityType::Account, actor)
                .entity(after.id)
                .before(snapshot(&before))
                .after(snapshot(&after)),
        );
        self.store.put_account(after);
    }

    // ---- notifications ----

    pub fn notifications(&self) -> &[Notification] {
        self.notifications.notifications()
    }

    /// Queue a notification. delivered once the outermost unit of work commits.
    pub(super) fn notify(&mut self, payload: NotificationPayload) {
        self.pending.push(payload);
        if !self.store.in_unit() {
            self.flush_notifications();
        }
    }

    fn flush_notifications(&mut self) {
        for payload in std::mem::take(&mut self.pending) {
            let notification = Notification::new(NotificationId(self.next_notification_id), self.current_time, payload);
            self.next_notification_id += 1;

            for sink in self.sinks.iter_mut() {
                if let Err(err) = sink.deliver(&notification) {
                    warn!(kind = notification.payload.kind(), error = %err, "notification dropped");
                }
            }
            self.notifications.push(notification);
        }
    }
}

/// JSON snapshot for ticket before/after fields.
pub(super) fn snapshot<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| json!({ "unserializable": err.to_string() }))
}
