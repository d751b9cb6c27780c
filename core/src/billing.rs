//! Component E: synchronous admission control plus post-hoc LLM token-cost
//! accrual (§4.5). Currency math uses `rust_decimal::Decimal` with half-up
//! rounding to 6 places rather than `f64`, per §4.5.1.

use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde_json::Value;

use crate::error::{BillingError, StoreError};

#[derive(Debug, Clone, Copy)]
pub struct TokenPricing {
    /// USD per input token.
    pub input_price: Decimal,
    /// USD per cached input token (typically cheaper than `input_price`).
    pub cached_input_price: Decimal,
    /// USD per output token.
    pub output_price: Decimal,
}

pub type PricingTable = HashMap<(String, String), TokenPricing>;

/// One row of the pricing config file loaded at startup (prices are input,
/// never computed by this codebase — see non-goals).
#[derive(Debug, Clone, serde::Deserialize)]
struct PricingEntry {
    provider: String,
    model: String,
    input_price: Decimal,
    cached_input_price: Decimal,
    output_price: Decimal,
}

/// Loads the `(provider, model) -> TokenPricing` table from a YAML file of
/// `PricingEntry` rows, the same `serde_yaml` convention the pod's launch
/// config uses.
pub fn load_pricing_table(path: &std::path::Path) -> anyhow::Result<PricingTable> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<PricingEntry> = serde_yaml::from_str(&raw)?;
    Ok(entries
        .into_iter()
        .map(|e| {
            (
                (e.provider, e.model),
                TokenPricing {
                    input_price: e.input_price,
                    cached_input_price: e.cached_input_price,
                    output_price: e.output_price,
                },
            )
        })
        .collect())
}

#[async_trait]
pub trait CreditsLedger: Send + Sync {
    async fn balance(&self, user_id: &str) -> Result<Decimal, BillingError>;
    async fn debit(
        &self,
        user_id: &str,
        amount: Decimal,
        action: &str,
        description: &str,
        metadata: Value,
    ) -> Result<(), BillingError>;
}

pub struct BillingGuard<L: CreditsLedger> {
    ledger: L,
    pricing: PricingTable,
}

impl<L: CreditsLedger> BillingGuard<L> {
    pub fn new(ledger: L, pricing: PricingTable) -> Self {
        Self { ledger, pricing }
    }

    pub async fn enforce_minimum(
        &self,
        user_id: &str,
        required_credits: Decimal,
        action: &str,
    ) -> Result<(), BillingError> {
        let balance = self.ledger.balance(user_id).await?;
        if balance < required_credits {
            return Err(BillingError::InsufficientCredits {
                user_id: user_id.to_string(),
                required: required_credits,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    pub async fn charge_fixed(
        &self,
        user_id: &str,
        amount: Decimal,
        action: &str,
        description: &str,
        metadata: Value,
    ) -> Result<(), BillingError> {
        self.ledger.debit(user_id, amount, action, description, metadata).await
    }

    /// Looks up `(provider, model)` and debits the computed cost. A missing
    /// pricing entry is logged and the debit is skipped (§4.5) — this never
    /// raises, so ingestion of the `token-usage` webhook always succeeds.
    #[allow(clippy::too_many_arguments)]
    pub async fn charge_for_llm_usage(
        &self,
        user_id: &str,
        conversation_id: &str,
        provider: &str,
        model: &str,
        input_tokens: i64,
        cached_input_tokens: i64,
        output_tokens: i64,
        description: &str,
        run_id: Option<&str>,
    ) -> Result<(), BillingError> {
        let Some(pricing) = self.pricing.get(&(provider.to_string(), model.to_string())) else {
            eprintln!(
                "⚠️  no pricing entry for provider={provider} model={model}; skipping debit for conversation={conversation_id}"
            );
            return Ok(());
        };

        let cost = compute_llm_cost(pricing, input_tokens, cached_input_tokens, output_tokens);
        let metadata = serde_json::json!({
            "conversation_id": conversation_id,
            "provider": provider,
            "model": model,
            "input_tokens": input_tokens,
            "cached_input_tokens": cached_input_tokens,
            "output_tokens": output_tokens,
            "run_id": run_id,
        });
        self.ledger
            .debit(user_id, cost, "llm_token_usage", description, metadata)
            .await
    }
}

/// Default [`CreditsLedger`] backed by a `user_credits(user_id, balance)`
/// table and an append-only `credit_transactions` audit log, the same
/// "balance row plus audit log" shape the run store uses for `runs` /
/// `run_events`.
pub struct PostgresCreditsLedger {
    pool: Pool,
}

impl PostgresCreditsLedger {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditsLedger for PostgresCreditsLedger {
    async fn balance(&self, user_id: &str) -> Result<Decimal, BillingError> {
        let client = self.pool.get().await.map_err(StoreError::from)?;
        let row = client
            .query_opt(
                "SELECT balance FROM user_credits WHERE user_id = $1",
                &[&user_id],
            )
            .await
            .map_err(StoreError::from)?;
        Ok(row.map(|r| r.get("balance")).unwrap_or(Decimal::ZERO))
    }

    async fn debit(
        &self,
        user_id: &str,
        amount: Decimal,
        action: &str,
        description: &str,
        metadata: Value,
    ) -> Result<(), BillingError> {
        let mut client = self.pool.get().await.map_err(StoreError::from)?;
        let txn = client.transaction().await.map_err(StoreError::from)?;
        txn.execute(
            "INSERT INTO user_credits (user_id, balance) VALUES ($1, -$2)
             ON CONFLICT (user_id) DO UPDATE SET balance = user_credits.balance - $2",
            &[&user_id, &amount],
        )
        .await
        .map_err(StoreError::from)?;
        txn.execute(
            "INSERT INTO credit_transactions (user_id, amount, action, description, metadata, occurred_at)
             VALUES ($1, $2, $3, $4, $5, now())",
            &[&user_id, &amount, &action, &description, &metadata],
        )
        .await
        .map_err(StoreError::from)?;
        txn.commit().await.map_err(StoreError::from)?;
        Ok(())
    }
}

fn compute_llm_cost(
    pricing: &TokenPricing,
    input_tokens: i64,
    cached_input_tokens: i64,
    output_tokens: i64,
) -> Decimal {
    let uncached_input = Decimal::from(input_tokens.saturating_sub(cached_input_tokens).max(0));
    let cached_input = Decimal::from(cached_input_tokens);
    let output = Decimal::from(output_tokens);

    let cost = uncached_input * pricing.input_price
        + cached_input * pricing.cached_input_price
        + output * pricing.output_price;

    cost.round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cached_tokens_are_priced_separately_from_uncached() {
        let pricing = TokenPricing {
            input_price: dec!(0.000003),
            cached_input_price: dec!(0.0000015),
            output_price: dec!(0.000015),
        };
        let cost = compute_llm_cost(&pricing, 1000, 400, 200);
        // 600 uncached * 0.000003 + 400 cached * 0.0000015 + 200 output * 0.000015
        let expected = dec!(600) * dec!(0.000003) + dec!(400) * dec!(0.0000015) + dec!(200) * dec!(0.000015);
        assert_eq!(cost, expected.round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero));
    }
}
