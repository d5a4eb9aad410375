//! Serializable command and query surface.
//!
//! Admin and trading front ends talk to the engine through these envelopes. Every
//! reply is an `ApiResponse` holding either JSON data or a machine readable error.

use crate::account::TransactionKind;
use crate::audit::TicketId;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::liquidity::LiquidityMarketSettings;
use crate::order::OrderRequest;
use crate::rules::RuleConfig;
use crate::types::{AccountId, Actor, AssetType, Instrument, OrderId, RuleId, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error codes exposed to callers.
pub type ErrorCode = ErrorKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EngineCommand {
    /// Place, then run a matching pass.
    PlaceOrder { request: OrderRequest },
    CancelOrder {
        order_id: OrderId,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    Credit {
        account_id: AccountId,
        asset: AssetType,
        amount: Decimal,
        kind: TransactionKind,
        #[serde(default)]
        related: Option<TicketId>,
    },
    Debit {
        account_id: AccountId,
        asset: AssetType,
        amount: Decimal,
        kind: TransactionKind,
        #[serde(default)]
        related: Option<TicketId>,
    },
    CreateRule { account_id: AccountId, config: RuleConfig },
    UpdateRule { rule_id: RuleId, config: RuleConfig },
    DeleteRule { rule_id: RuleId },
    EnableRule { rule_id: RuleId, enabled: bool },
    UpsertLiquiditySettings { settings: LiquidityMarketSettings },
    EnforceLiquidity { instrument: Instrument, side: Side },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum EngineQuery {
    OrderBook { instrument: Instrument },
    Balances { account_id: AccountId },
    Order { order_id: OrderId },
    Ticket { ticket_id: TicketId },
    TicketChain { ticket_id: TicketId },
    RuleExecutions { rule_id: RuleId },
    LiquidityStatus { instrument: Instrument, side: Side },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&EngineError> for ApiError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }

    fn from_result<T: Serialize>(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(data) => Self::ok(data),
                Err(err) => Self::err(ErrorKind::InvalidState, format!("response not serializable: {}", err)),
            },
            Err(err) => Self {
                success: false,
                data: None,
                error: Some(ApiError::from(&err)),
            },
        }
    }
}

impl Engine {
    /// Dispatch one mutating command on behalf of `actor`.
    pub fn execute(&mut self, command: EngineCommand, actor: Actor) -> ApiResponse {
        match command {
            EngineCommand::PlaceOrder { request } => ApiResponse::from_result(
                self.submit_order(request, actor)
                    .map(|s| json!({ "order": s.order, "trades": s.trades })),
            ),
            EngineCommand::CancelOrder { order_id, expected_version } => {
                let result = match expected_version {
                    Some(version) => self.cancel_order_checked(order_id, version, actor),
                    None => self.cancel_order(order_id, actor),
                };
                ApiResponse::from_result(result)
            }
            EngineCommand::Credit {
                account_id,
                asset,
                amount,
                kind,
                related,
            } => ApiResponse::from_result(
                self.credit(account_id, asset, amount, kind, actor, related)
                    .map(|total| json!({ "total": total })),
            ),
            EngineCommand::Debit {
                account_id,
                asset,
                amount,
                kind,
                related,
            } => ApiResponse::from_result(
                self.debit(account_id, asset, amount, kind, actor, related)
                    .map(|total| json!({ "total": total })),
            ),
            EngineCommand::CreateRule { account_id, config } => {
                ApiResponse::from_result(self.create_rule(account_id, config, actor).map(|id| json!({ "rule_id": id })))
            }
            EngineCommand::UpdateRule { rule_id, config } => ApiResponse::from_result(self.update_rule(rule_id, config, actor)),
            EngineCommand::DeleteRule { rule_id } => ApiResponse::from_result(self.delete_rule(rule_id, actor)),
            EngineCommand::EnableRule { rule_id, enabled } => {
                ApiResponse::from_result(self.set_rule_enabled(rule_id, enabled, actor))
            }
            EngineCommand::UpsertLiquiditySettings { settings } => {
                ApiResponse::from_result(self.upsert_liquidity_settings(settings, actor))
            }
            EngineCommand::EnforceLiquidity { instrument, side } => {
                ApiResponse::from_result(self.enforce_liquidity(instrument, side))
            }
        }
    }

    /// Read-only lookups.
    pub fn query(&self, query: EngineQuery) -> ApiResponse {
        match query {
            EngineQuery::OrderBook { instrument } => ApiResponse::from_result(self.get_book(instrument)),
            EngineQuery::Balances { account_id } => ApiResponse::from_result(self.balances(account_id).map(|rows| {
                rows.into_iter()
                    .map(|(asset, view)| json!({ "asset": asset, "balance": view }))
                    .collect::<Vec<_>>()
            })),
            EngineQuery::Order { order_id } => ApiResponse::from_result(self.get_order(order_id)),
            EngineQuery::Ticket { ticket_id } => ApiResponse::from_result(self.ticket(&ticket_id)),
            EngineQuery::TicketChain { ticket_id } => ApiResponse::from_result(self.ticket_chain(&ticket_id)),
            EngineQuery::RuleExecutions { rule_id } => {
                ApiResponse::from_result(self.rule(rule_id).map(|_| self.executions_for(rule_id)))
            }
            EngineQuery::LiquidityStatus { instrument, side } => {
                ApiResponse::from_result(self.liquidity_status(instrument, side))
            }
        }
    }
}
