//! In-memory store with savepoints.
//!
//! Keyed tables journal the previous value of every row they overwrite while a unit
//! of work is open, append-only logs remember their length. Rolling back a savepoint
//! replays the journals in reverse and truncates the logs, then rebuilds the derived
//! indexes (book, open orders per account, rule schedule, tickets per entity).
//!
//! Holdings and orders are version-checked: a write must carry the version it read.

use crate::account::{Account, Holding, LedgerTransaction};
use crate::audit::{AuditTicket, EntityType, TicketId};
use crate::liquidity::LiquidityMarketSettings;
use crate::market::MarketState;
use crate::order::{Order, OrderBook, Trade};
use crate::rules::{AutoTradeRule, RuleExecutionRecord};
use crate::types::{AccountId, AssetType, Instrument, OrderId, RuleId, Side, Timestamp};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {key} changed underneath: expected version {expected}, found {actual}")]
    VersionConflict {
        entity: &'static str,
        key: String,
        expected: u64,
        actual: u64,
    },
}

/// Keyed rows plus an undo journal of (key, previous value).
#[derive(Debug, Clone)]
pub struct Table<K, V> {
    rows: HashMap<K, V>,
    journal: Vec<(K, Option<V>)>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            journal: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Table<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.rows.contains_key(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn insert(&mut self, key: K, value: V, journal: bool) -> Option<V> {
        let previous = self.rows.insert(key.clone(), value);
        if journal {
            self.journal.push((key, previous.clone()));
        }
        previous
    }

    fn remove(&mut self, key: &K, journal: bool) -> Option<V> {
        let previous = self.rows.remove(key);
        if journal && previous.is_some() {
            self.journal.push((key.clone(), previous.clone()));
        }
        previous
    }

    fn mark(&self) -> usize {
        self.journal.len()
    }

    /// Undo everything journaled after `mark`. true when anything changed.
    fn rollback_to(&mut self, mark: usize) -> bool {
        let touched = self.journal.len() > mark;
        while self.journal.len() > mark {
            let Some((key, previous)) = self.journal.pop() else { break };
            match previous {
                Some(value) => {
                    self.rows.insert(key, value);
                }
                None => {
                    self.rows.remove(&key);
                }
            }
        }
        touched
    }

    fn clear_journal(&mut self) {
        self.journal.clear();
    }
}

/// Append-only rows. rollback truncates.
#[derive(Debug, Clone)]
pub struct AppendLog<T> {
    rows: Vec<T>,
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> AppendLog<T> {
    pub fn all(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn push(&mut self, row: T) {
        self.rows.push(row);
    }

    fn truncate(&mut self, len: usize) -> bool {
        let touched = self.rows.len() > len;
        self.rows.truncate(len);
        touched
    }
}

/// Journal and log positions at the start of a unit of work.
#[derive(Debug, Clone, Copy)]
pub struct Savepoint {
    depth: usize,
    accounts: usize,
    markets: usize,
    holdings: usize,
    orders: usize,
    tickets: usize,
    rules: usize,
    settings: usize,
    trades: usize,
    transactions: usize,
    ticket_log: usize,
    executions: usize,
}

// Never-run rules sort first in the schedule.
const UNSCHEDULED: Timestamp = Timestamp(i64::MIN);

#[derive(Debug, Default)]
pub struct Store {
    accounts: Table<AccountId, Account>,
    markets: Table<Instrument, MarketState>,
    holdings: Table<(AccountId, AssetType), Holding>,
    orders: Table<OrderId, Order>,
    tickets: Table<TicketId, AuditTicket>,
    rules: Table<RuleId, AutoTradeRule>,
    settings: Table<(Instrument, Side), LiquidityMarketSettings>,

    trades: AppendLog<Trade>,
    transactions: AppendLog<LedgerTransaction>,
    ticket_log: AppendLog<TicketId>,
    executions: AppendLog<RuleExecutionRecord>,

    // derived indexes
    books: HashMap<Instrument, OrderBook>,
    open_orders: HashMap<AccountId, BTreeSet<OrderId>>,
    schedule: BTreeSet<(Timestamp, RuleId)>,
    tickets_by_entity: HashMap<(EntityType, String), Vec<TicketId>>,

    depth: usize,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- units of work ----

    pub fn begin(&mut self) -> Savepoint {
        self.depth += 1;
        Savepoint {
            depth: self.depth,
            accounts: self.accounts.mark(),
            markets: self.markets.mark(),
            holdings: self.holdings.mark(),
            orders: self.orders.mark(),
            tickets: self.tickets.mark(),
            rules: self.rules.mark(),
            settings: self.settings.mark(),
            trades: self.trades.len(),
            transactions: self.transactions.len(),
            ticket_log: self.ticket_log.len(),
            executions: self.executions.len(),
        }
    }

    pub fn commit(&mut self, savepoint: Savepoint) {
        debug_assert_eq!(savepoint.depth, self.depth, "savepoints must close innermost first");
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.clear_journals();
        }
    }

    pub fn rollback(&mut self, savepoint: Savepoint) {
        debug_assert_eq!(savepoint.depth, self.depth, "savepoints must close innermost first");

        self.accounts.rollback_to(savepoint.accounts);
        self.markets.rollback_to(savepoint.markets);
        self.holdings.rollback_to(savepoint.holdings);
        self.settings.rollback_to(savepoint.settings);
        let orders_touched = self.orders.rollback_to(savepoint.orders);
        let rules_touched = self.rules.rollback_to(savepoint.rules);
        let mut tickets_touched = self.tickets.rollback_to(savepoint.tickets);

        self.trades.truncate(savepoint.trades);
        self.transactions.truncate(savepoint.transactions);
        tickets_touched |= self.ticket_log.truncate(savepoint.ticket_log);
        self.executions.truncate(savepoint.executions);

        if orders_touched {
            self.rebuild_order_indexes();
        }
        if rules_touched {
            self.rebuild_schedule();
        }
        if tickets_touched {
            self.rebuild_ticket_index();
        }

        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.clear_journals();
        }
    }

    pub fn in_unit(&self) -> bool {
        self.depth > 0
    }

    fn clear_journals(&mut self) {
        self.accounts.clear_journal();
        self.markets.clear_journal();
        self.holdings.clear_journal();
        self.orders.clear_journal();
        self.tickets.clear_journal();
        self.rules.clear_journal();
        self.settings.clear_journal();
    }

    fn rebuild_order_indexes(&mut self) {
        self.books.clear();
        self.open_orders.clear();
        for order in self.orders.values().filter(|o| o.is_active()) {
            self.books.entry(order.instrument).or_default().insert(order);
            self.open_orders.entry(order.account_id).or_default().insert(order.id);
        }
    }

    fn rebuild_schedule(&mut self) {
        self.schedule = self
            .rules
            .values()
            .map(|rule| (rule.next_execution_at.unwrap_or(UNSCHEDULED), rule.id))
            .collect();
    }

    fn rebuild_ticket_index(&mut self) {
        self.tickets_by_entity.clear();
        for id in self.ticket_log.all() {
            let Some(ticket) = self.tickets.get(id) else { continue };
            if let Some(entity_id) = &ticket.entity_id {
                self.tickets_by_entity
                    .entry((ticket.entity_type, entity_id.clone()))
                    .or_default()
                    .push(id.clone());
            }
        }
    }

    // ---- accounts and markets ----

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn put_account(&mut self, account: Account) {
        let journal = self.in_unit();
        self.accounts.insert(account.id, account, journal);
    }

    pub fn market(&self, instrument: Instrument) -> Option<&MarketState> {
        self.markets.get(&instrument)
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketState> {
        self.markets.values()
    }

    pub fn put_market(&mut self, market: MarketState) {
        let journal = self.in_unit();
        self.markets.insert(market.config.instrument, market, journal);
    }

    // ---- holdings ----

    pub fn holding(&self, account: AccountId, asset: AssetType) -> Option<&Holding> {
        self.holdings.get(&(account, asset))
    }

    pub fn holdings(&self) -> impl Iterator<Item = &Holding> {
        self.holdings.values()
    }

    /// Compare-and-swap write. `holding.version` must be the version that was read
    /// (0 for a row that does not exist yet). returns the stored row.
    pub fn write_holding(&mut self, mut holding: Holding) -> Result<Holding, StoreError> {
        let key = (holding.account_id, holding.asset);
        let actual = self.holdings.get(&key).map(|h| h.version).unwrap_or(0);
        if actual != holding.version {
            return Err(StoreError::VersionConflict {
                entity: "holding",
                key: format!("{}/{}", holding.account_id, holding.asset),
                expected: holding.version,
                actual,
            });
        }
        holding.version += 1;
        let journal = self.in_unit();
        self.holdings.insert(key, holding.clone(), journal);
        Ok(holding)
    }

    // ---- orders ----

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn book(&self, instrument: Instrument) -> Option<&OrderBook> {
        self.books.get(&instrument)
    }

    /// Active orders of one account
    pub fn open_orders_of(&self, account: AccountId) -> impl Iterator<Item = &Order> {
        self.open_orders
            .get(&account)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.orders.get(id))
    }

    /// Compare-and-swap write that also keeps the book and open-order index current.
    pub fn write_order(&mut self, mut order: Order) -> Result<Order, StoreError> {
        let previous = self.orders.get(&order.id).cloned();
        let actual = previous.as_ref().map(|o| o.version).unwrap_or(0);
        if actual != order.version {
            return Err(StoreError::VersionConflict {
                entity: "order",
                key: order.id.to_string(),
                expected: order.version,
                actual,
            });
        }

        if let Some(prev) = previous.as_ref().filter(|o| o.is_active()) {
            if let Some(book) = self.books.get_mut(&prev.instrument) {
                book.remove(prev);
            }
            if let Some(ids) = self.open_orders.get_mut(&prev.account_id) {
                ids.remove(&prev.id);
            }
        }

        order.version += 1;
        if order.is_active() {
            self.books.entry(order.instrument).or_default().insert(&order);
            self.open_orders.entry(order.account_id).or_default().insert(order.id);
        }

        let journal = self.in_unit();
        self.orders.insert(order.id, order.clone(), journal);
        Ok(order)
    }

    // ---- trades, ledger, executions ----

    pub fn append_trade(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    pub fn trades(&self) -> &[Trade] {
        self.trades.all()
    }

    pub fn append_transaction(&mut self, transaction: LedgerTransaction) {
        self.transactions.push(transaction);
    }

    pub fn transactions(&self) -> &[LedgerTransaction] {
        self.transactions.all()
    }

    pub fn append_execution(&mut self, record: RuleExecutionRecord) {
        self.executions.push(record);
    }

    pub fn executions(&self) -> &[RuleExecutionRecord] {
        self.executions.all()
    }

    // ---- tickets ----

    pub fn ticket(&self, id: &TicketId) -> Option<&AuditTicket> {
        self.tickets.get(id)
    }

    /// All tickets in issue order
    pub fn tickets(&self) -> impl Iterator<Item = &AuditTicket> {
        self.ticket_log.all().iter().filter_map(|id| self.tickets.get(id))
    }

    pub fn tickets_for(&self, entity_type: EntityType, entity_id: &str) -> Vec<&AuditTicket> {
        self.tickets_by_entity
            .get(&(entity_type, entity_id.to_string()))
            .map(|ids| ids.iter().filter_map(|id| self.tickets.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn insert_ticket(&mut self, ticket: AuditTicket) {
        if let Some(entity_id) = &ticket.entity_id {
            self.tickets_by_entity
                .entry((ticket.entity_type, entity_id.clone()))
                .or_default()
                .push(ticket.id.clone());
        }
        self.ticket_log.push(ticket.id.clone());
        let journal = self.in_unit();
        self.tickets.insert(ticket.id.clone(), ticket, journal);
    }

    /// Rewrite an existing ticket. only linking and entity backfill go through here.
    pub fn update_ticket(&mut self, ticket: AuditTicket) {
        let newly_identified = self
            .tickets
            .get(&ticket.id)
            .map(|old| old.entity_id.is_none() && ticket.entity_id.is_some())
            .unwrap_or(false);
        if newly_identified {
            if let Some(entity_id) = &ticket.entity_id {
                self.tickets_by_entity
                    .entry((ticket.entity_type, entity_id.clone()))
                    .or_default()
                    .push(ticket.id.clone());
            }
        }
        let journal = self.in_unit();
        self.tickets.insert(ticket.id.clone(), ticket, journal);
    }

    // ---- rules ----

    pub fn rule(&self, id: RuleId) -> Option<&AutoTradeRule> {
        self.rules.get(&id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &AutoTradeRule> {
        self.rules.values()
    }

    pub fn put_rule(&mut self, rule: AutoTradeRule) {
        if let Some(old) = self.rules.get(&rule.id) {
            self.schedule.remove(&(old.next_execution_at.unwrap_or(UNSCHEDULED), old.id));
        }
        self.schedule.insert((rule.next_execution_at.unwrap_or(UNSCHEDULED), rule.id));
        let journal = self.in_unit();
        self.rules.insert(rule.id, rule, journal);
    }

    pub fn remove_rule(&mut self, id: RuleId) -> Option<AutoTradeRule> {
        let journal = self.in_unit();
        let removed = self.rules.remove(&id, journal);
        if let Some(rule) = &removed {
            self.schedule.remove(&(rule.next_execution_at.unwrap_or(UNSCHEDULED), rule.id));
        }
        removed
    }

    /// Rules whose next run is at or before `now`, earliest first. includes disabled
    /// rules, the caller filters.
    pub fn scheduled_before(&self, now: Timestamp) -> Vec<RuleId> {
        self.schedule
            .range(..=(now, RuleId(u64::MAX)))
            .map(|(_, id)| *id)
            .collect()
    }

    // ---- liquidity settings ----

    pub fn settings(&self, instrument: Instrument, side: Side) -> Option<&LiquidityMarketSettings> {
        self.settings.get(&(instrument, side))
    }

    pub fn all_settings(&self) -> impl Iterator<Item = &LiquidityMarketSettings> {
        self.settings.values()
    }

    pub fn put_settings(&mut self, settings: LiquidityMarketSettings) {
        let journal = self.in_unit();
        self.settings.insert((settings.instrument, settings.side), settings, journal);
    }
}
