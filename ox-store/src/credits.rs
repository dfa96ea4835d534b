//! Credit economy repository.
//!
//! Conservation invariant: every movement writes its ledger row in the same
//! transaction as the balance change. Wallets never go negative; the check
//! happens under a `FOR UPDATE` lock, not optimistically.

use crate::error::{Result, StoreError};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Ledger row types.
pub mod tx_types {
    pub const PURCHASE: &str = "purchase";
    pub const ALLOCATION: &str = "allocation";
    pub const PRESSURE_DEBIT: &str = "pressure_debit";
    pub const POLICY_DELTA: &str = "policy_delta";
}

pub async fn wallet_balance(pool: &PgPool, sponsor_id: Uuid) -> Result<Decimal> {
    let balance: Option<Decimal> =
        sqlx::query_scalar("SELECT balance FROM sponsor_wallets WHERE sponsor_id = $1")
            .bind(sponsor_id)
            .fetch_optional(pool)
            .await?;

    Ok(balance.unwrap_or(Decimal::ZERO))
}

pub async fn agent_credit_balance(pool: &PgPool, agent_id: Uuid) -> Result<Decimal> {
    let balance: Option<Decimal> =
        sqlx::query_scalar("SELECT balance FROM agent_credit_balances WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_optional(pool)
            .await?;

    Ok(balance.unwrap_or(Decimal::ZERO))
}

/// Mint credits into a sponsor wallet (purchase stub; payment capture is an
/// external collaborator). Returns the new wallet balance.
pub async fn purchase_credits(
    tx: &mut Transaction<'_, Postgres>,
    sponsor_id: Uuid,
    amount: Decimal,
    idempotency_key: Option<&str>,
) -> Result<Decimal> {
    let balance: Decimal = sqlx::query_scalar(
        r#"
        INSERT INTO sponsor_wallets (sponsor_id, balance, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (sponsor_id)
            DO UPDATE SET balance = sponsor_wallets.balance + $2, updated_at = NOW()
        RETURNING balance
        "#,
    )
    .bind(sponsor_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    record_transaction(tx, Some(sponsor_id), None, tx_types::PURCHASE, amount, idempotency_key)
        .await?;

    Ok(balance)
}

/// Lock a wallet row, creating it empty if the sponsor has never purchased.
async fn lock_wallet(tx: &mut Transaction<'_, Postgres>, sponsor_id: Uuid) -> Result<Decimal> {
    sqlx::query(
        "INSERT INTO sponsor_wallets (sponsor_id, balance) VALUES ($1, 0) \
         ON CONFLICT (sponsor_id) DO NOTHING",
    )
    .bind(sponsor_id)
    .execute(&mut **tx)
    .await?;

    let balance: Decimal =
        sqlx::query_scalar("SELECT balance FROM sponsor_wallets WHERE sponsor_id = $1 FOR UPDATE")
            .bind(sponsor_id)
            .fetch_one(&mut **tx)
            .await?;

    Ok(balance)
}

/// Debit a sponsor wallet, failing when the balance is short.
///
/// Used by both credit allocation and pressure issuance; the caller names
/// the ledger row type.
pub async fn debit_wallet(
    tx: &mut Transaction<'_, Postgres>,
    sponsor_id: Uuid,
    amount: Decimal,
    tx_type: &str,
    idempotency_key: Option<&str>,
) -> Result<Decimal> {
    let balance = lock_wallet(tx, sponsor_id).await?;
    if balance < amount {
        return Err(StoreError::InsufficientCredits {
            holder: format!("sponsor:{sponsor_id}"),
            available: balance,
            required: amount,
        });
    }

    let new_balance: Decimal = sqlx::query_scalar(
        "UPDATE sponsor_wallets SET balance = balance - $2, updated_at = NOW() \
         WHERE sponsor_id = $1 RETURNING balance",
    )
    .bind(sponsor_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    record_transaction(tx, Some(sponsor_id), None, tx_type, -amount, idempotency_key).await?;

    Ok(new_balance)
}

/// Move credits from a sponsor wallet to an agent balance, atomically.
///
/// Returns (wallet_balance, agent_balance) after the move.
pub async fn allocate_credits(
    tx: &mut Transaction<'_, Postgres>,
    sponsor_id: Uuid,
    agent_id: Uuid,
    amount: Decimal,
    idempotency_key: Option<&str>,
) -> Result<(Decimal, Decimal)> {
    let balance = lock_wallet(tx, sponsor_id).await?;
    if balance < amount {
        return Err(StoreError::InsufficientCredits {
            holder: format!("sponsor:{sponsor_id}"),
            available: balance,
            required: amount,
        });
    }

    let wallet_balance: Decimal = sqlx::query_scalar(
        "UPDATE sponsor_wallets SET balance = balance - $2, updated_at = NOW() \
         WHERE sponsor_id = $1 RETURNING balance",
    )
    .bind(sponsor_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    let agent_balance: Decimal = sqlx::query_scalar(
        r#"
        INSERT INTO agent_credit_balances (agent_id, balance, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (agent_id)
            DO UPDATE SET balance = agent_credit_balances.balance + $2, updated_at = NOW()
        RETURNING balance
        "#,
    )
    .bind(agent_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    record_transaction(
        tx,
        Some(sponsor_id),
        Some(agent_id),
        tx_types::ALLOCATION,
        amount,
        idempotency_key,
    )
    .await?;

    Ok((wallet_balance, agent_balance))
}

/// Adjust an agent's credit balance by a signed delta (policy engine).
///
/// A negative delta clamps at zero rather than failing; sponsors drain, they
/// do not overdraw their agents.
pub async fn adjust_agent_credits(
    tx: &mut Transaction<'_, Postgres>,
    agent_id: Uuid,
    delta: Decimal,
    idempotency_key: Option<&str>,
) -> Result<Decimal> {
    let balance: Decimal = sqlx::query_scalar(
        r#"
        INSERT INTO agent_credit_balances (agent_id, balance, updated_at)
        VALUES ($1, GREATEST($2, 0), NOW())
        ON CONFLICT (agent_id)
            DO UPDATE SET balance = GREATEST(agent_credit_balances.balance + $2, 0),
                          updated_at = NOW()
        RETURNING balance
        "#,
    )
    .bind(agent_id)
    .bind(delta)
    .fetch_one(&mut **tx)
    .await?;

    record_transaction(tx, None, Some(agent_id), tx_types::POLICY_DELTA, delta, idempotency_key)
        .await?;

    Ok(balance)
}

async fn record_transaction(
    tx: &mut Transaction<'_, Postgres>,
    sponsor_id: Option<Uuid>,
    agent_id: Option<Uuid>,
    tx_type: &str,
    amount: Decimal,
    idempotency_key: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO credit_transactions (
            transaction_id, sponsor_id, agent_id, tx_type, amount, idempotency_key
        ) VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(sponsor_id)
    .bind(agent_id)
    .bind(tx_type)
    .bind(amount)
    .bind(idempotency_key)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
