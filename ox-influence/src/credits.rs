//! Sponsor credit flow.
//!
//! `purchase` mints into the wallet (payment capture is an external
//! collaborator); `allocate` moves wallet credits onto an agent. Both write
//! their ledger rows and events in one transaction, so conservation holds
//! or nothing committed.

use crate::error::{InfluenceError, Result};
use ox_domain::events::{event_types, TOPIC_AGENTS};
use ox_eventlog::{persist_event_tx, Event};
use ox_store::credits;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

/// Mint purchased credits into a sponsor wallet. Returns the new balance.
pub async fn purchase(
    pool: &PgPool,
    sponsor_id: Uuid,
    amount: Decimal,
    correlation_id: Option<Uuid>,
    idempotency_key: Option<&str>,
) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(InfluenceError::NonPositiveAmount);
    }

    let mut tx = pool.begin().await.map_err(ox_store::StoreError::from)?;

    let balance = credits::purchase_credits(&mut tx, sponsor_id, amount, idempotency_key).await?;

    let mut event = Event::new(
        event_types::CREDITS_PURCHASED,
        json!({
            "sponsor_id": sponsor_id,
            "amount": amount,
            "wallet_balance": balance,
        }),
    )
    .with_actor(format!("sponsor:{sponsor_id}"), None);
    if let Some(correlation_id) = correlation_id {
        event = event.with_correlation_id(correlation_id);
    }
    if let Some(key) = idempotency_key {
        event = event.with_idempotency_key(key);
    }
    persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;

    tx.commit().await.map_err(ox_store::StoreError::from)?;

    info!(%sponsor_id, %amount, %balance, "Credits purchased");
    Ok(balance)
}

/// Move credits from sponsor wallet to agent balance.
///
/// Returns (wallet_balance, agent_balance) after the move. Fails with the
/// store's insufficient-credits error when the wallet is short; nothing
/// commits in that case.
pub async fn allocate(
    pool: &PgPool,
    sponsor_id: Uuid,
    agent_id: Uuid,
    amount: Decimal,
    correlation_id: Option<Uuid>,
    idempotency_key: Option<&str>,
) -> Result<(Decimal, Decimal)> {
    if amount <= Decimal::ZERO {
        return Err(InfluenceError::NonPositiveAmount);
    }

    let mut tx = pool.begin().await.map_err(ox_store::StoreError::from)?;

    let (wallet_balance, agent_balance) =
        credits::allocate_credits(&mut tx, sponsor_id, agent_id, amount, idempotency_key).await?;

    let mut event = Event::new(
        event_types::CREDITS_ALLOCATED,
        json!({
            "sponsor_id": sponsor_id,
            "agent_id": agent_id,
            "amount": amount,
            "wallet_balance": wallet_balance,
            "agent_balance": agent_balance,
        }),
    )
    .with_actor(format!("sponsor:{sponsor_id}"), None);
    if let Some(correlation_id) = correlation_id {
        event = event.with_correlation_id(correlation_id);
    }
    if let Some(key) = idempotency_key {
        event = event.with_idempotency_key(key);
    }
    persist_event_tx(&mut tx, TOPIC_AGENTS, event).await?;

    tx.commit().await.map_err(ox_store::StoreError::from)?;

    info!(%sponsor_id, %agent_id, %amount, "Credits allocated");
    Ok((wallet_balance, agent_balance))
}
