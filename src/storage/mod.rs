use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::warn;

use crate::models::{ContractInfo, EventLog, SiblingTx, TokenTransfer};

pub mod rows;

pub use rows::{BlockRow, TxRow};

pub type DbPool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    ensure_dir_exists(database_url)?;

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url {}", database_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to SQLite")?;

    apply_schema(&pool).await?;
    Ok(pool)
}

fn ensure_dir_exists(database_url: &str) -> Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if path != ":memory:" {
            if let Some(dir) = Path::new(path).parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed creating db directory {:?}", dir))?;
            }
        }
    }
    Ok(())
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blocks (
            number INTEGER PRIMARY KEY,
            hash TEXT NOT NULL,
            parent_hash TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            gas_used TEXT NOT NULL,
            gas_limit TEXT NOT NULL,
            base_fee_per_gas TEXT,
            miner TEXT NOT NULL,
            size INTEGER NOT NULL,
            transaction_count INTEGER NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            hash TEXT PRIMARY KEY,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            tx_index INTEGER NOT NULL,
            from_addr TEXT NOT NULL,
            to_addr TEXT,
            value TEXT NOT NULL,
            gas_limit TEXT NOT NULL,
            gas_price TEXT NOT NULL,
            gas_used TEXT NOT NULL,
            effective_gas_price TEXT NOT NULL,
            status INTEGER,
            input_data TEXT NOT NULL DEFAULT '0x',
            nonce INTEGER NOT NULL,
            tx_type INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS token_transfers (
            tx_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            token_address TEXT NOT NULL,
            token_symbol TEXT,
            from_addr TEXT NOT NULL,
            to_addr TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (tx_hash, log_index)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_logs (
            tx_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            address TEXT NOT NULL,
            event_name TEXT,
            topic0 TEXT,
            PRIMARY KEY (tx_hash, log_index)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contracts (
            address TEXT PRIMARY KEY,
            name TEXT,
            verified INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions(block_number, tx_index);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_transactions_from_addr ON transactions(from_addr);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    verify_big_number_columns(pool).await?;
    Ok(())
}

pub async fn ping(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1;")
        .execute(pool)
        .await
        .context("database ping failed")?;
    Ok(())
}

pub async fn insert_block(pool: &SqlitePool, block: &BlockRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO blocks (
            number, hash, parent_hash, timestamp, gas_used, gas_limit,
            base_fee_per_gas, miner, size, transaction_count
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(number) DO NOTHING;
        "#,
    )
    .bind(block.number)
    .bind(&block.hash)
    .bind(&block.parent_hash)
    .bind(block.timestamp)
    .bind(&block.gas_used)
    .bind(&block.gas_limit)
    .bind(&block.base_fee_per_gas)
    .bind(&block.miner)
    .bind(block.size)
    .bind(block.transaction_count)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_transactions(pool: &SqlitePool, txs: &[TxRow]) -> Result<()> {
    let mut txn = pool.begin().await?;

    for tx in txs {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                hash, block_number, block_timestamp, tx_index, from_addr, to_addr,
                value, gas_limit, gas_price, gas_used, effective_gas_price,
                status, input_data, nonce, tx_type
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(hash) DO NOTHING;
            "#,
        )
        .bind(tx.hash.to_lowercase())
        .bind(tx.block_number)
        .bind(tx.block_timestamp)
        .bind(tx.tx_index)
        .bind(&tx.from_addr)
        .bind(&tx.to_addr)
        .bind(&tx.value)
        .bind(&tx.gas_limit)
        .bind(&tx.gas_price)
        .bind(&tx.gas_used)
        .bind(&tx.effective_gas_price)
        .bind(tx.status)
        .bind(&tx.input_data)
        .bind(tx.nonce)
        .bind(tx.tx_type)
        .execute(&mut *txn)
        .await?;
    }

    txn.commit().await?;
    Ok(())
}

pub async fn insert_token_transfers(
    pool: &SqlitePool,
    tx_hash: &str,
    transfers: &[TokenTransfer],
) -> Result<()> {
    let mut txn = pool.begin().await?;
    for t in transfers {
        sqlx::query(
            r#"
            INSERT INTO token_transfers (
                tx_hash, log_index, token_address, token_symbol, from_addr, to_addr, value
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(tx_hash, log_index) DO NOTHING;
            "#,
        )
        .bind(tx_hash.to_lowercase())
        .bind(t.log_index)
        .bind(&t.token_address)
        .bind(&t.token_symbol)
        .bind(&t.from)
        .bind(&t.to)
        .bind(&t.value)
        .execute(&mut *txn)
        .await?;
    }
    txn.commit().await?;
    Ok(())
}

pub async fn insert_event_logs(pool: &SqlitePool, tx_hash: &str, logs: &[EventLog]) -> Result<()> {
    let mut txn = pool.begin().await?;
    for log in logs {
        sqlx::query(
            r#"
            INSERT INTO event_logs (tx_hash, log_index, address, event_name, topic0)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(tx_hash, log_index) DO NOTHING;
            "#,
        )
        .bind(tx_hash.to_lowercase())
        .bind(log.log_index)
        .bind(&log.address)
        .bind(&log.event_name)
        .bind(&log.topic0)
        .execute(&mut *txn)
        .await?;
    }
    txn.commit().await?;
    Ok(())
}

pub async fn upsert_contract(pool: &SqlitePool, contract: &ContractInfo) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contracts (address, name, verified)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(address) DO UPDATE SET name = excluded.name, verified = excluded.verified;
        "#,
    )
    .bind(contract.address.to_lowercase())
    .bind(&contract.name)
    .bind(contract.verified)
    .execute(pool)
    .await?;
    Ok(())
}

const TX_COLUMNS: &str = "hash, block_number, block_timestamp, tx_index, from_addr, to_addr, \
     value, gas_limit, gas_price, gas_used, effective_gas_price, status, input_data, nonce, tx_type";

const BLOCK_COLUMNS: &str = "number, hash, parent_hash, timestamp, gas_used, gas_limit, \
     base_fee_per_gas, miner, size, transaction_count";

pub async fn fetch_transaction(pool: &SqlitePool, hash: &str) -> sqlx::Result<Option<TxRow>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE hash = ?1 LIMIT 1;",
        TX_COLUMNS
    );
    sqlx::query_as::<_, TxRow>(&sql)
        .bind(hash)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_block(pool: &SqlitePool, number: i64) -> sqlx::Result<Option<BlockRow>> {
    let sql = format!("SELECT {} FROM blocks WHERE number = ?1 LIMIT 1;", BLOCK_COLUMNS);
    sqlx::query_as::<_, BlockRow>(&sql)
        .bind(number)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_latest_block_number(pool: &SqlitePool) -> sqlx::Result<Option<i64>> {
    let row = sqlx::query("SELECT MAX(number) AS latest FROM blocks;")
        .fetch_one(pool)
        .await?;
    row.try_get::<Option<i64>, _>("latest")
}

pub async fn fetch_block_transactions(
    pool: &SqlitePool,
    block_number: i64,
    limit: i64,
) -> sqlx::Result<Vec<TxRow>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE block_number = ?1 ORDER BY tx_index ASC LIMIT ?2;",
        TX_COLUMNS
    );
    sqlx::query_as::<_, TxRow>(&sql)
        .bind(block_number)
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Transactions of the same block positioned within `radius` of `index`.
pub async fn fetch_siblings(
    pool: &SqlitePool,
    block_number: i64,
    index: i64,
    radius: i64,
) -> sqlx::Result<Vec<SiblingTx>> {
    #[derive(FromRow)]
    struct SiblingRow {
        hash: String,
        tx_index: i64,
        from_addr: String,
        to_addr: Option<String>,
    }

    let rows = sqlx::query_as::<_, SiblingRow>(
        r#"
        SELECT hash, tx_index, from_addr, to_addr
        FROM transactions
        WHERE block_number = ?1
          AND tx_index BETWEEN ?2 AND ?3
          AND tx_index != ?4
        ORDER BY tx_index ASC;
        "#,
    )
    .bind(block_number)
    .bind(index - radius)
    .bind(index + radius)
    .bind(index)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SiblingTx {
            hash: row.hash,
            index: row.tx_index,
            from: row.from_addr,
            to: row.to_addr,
        })
        .collect())
}

pub async fn fetch_token_transfers(
    pool: &SqlitePool,
    tx_hash: &str,
) -> sqlx::Result<Vec<TokenTransfer>> {
    #[derive(FromRow)]
    struct TransferRow {
        log_index: i64,
        token_address: String,
        token_symbol: Option<String>,
        from_addr: String,
        to_addr: String,
        value: String,
    }

    let rows = sqlx::query_as::<_, TransferRow>(
        r#"
        SELECT log_index, token_address, token_symbol, from_addr, to_addr, value
        FROM token_transfers
        WHERE tx_hash = ?1
        ORDER BY log_index ASC
        LIMIT 200;
        "#,
    )
    .bind(tx_hash)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TokenTransfer {
            log_index: row.log_index,
            token_address: row.token_address,
            token_symbol: row.token_symbol,
            from: row.from_addr,
            to: row.to_addr,
            value: row.value,
        })
        .collect())
}

pub async fn fetch_event_logs(pool: &SqlitePool, tx_hash: &str) -> sqlx::Result<Vec<EventLog>> {
    #[derive(FromRow)]
    struct LogRow {
        log_index: i64,
        address: String,
        event_name: Option<String>,
        topic0: Option<String>,
    }

    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT log_index, address, event_name, topic0
        FROM event_logs
        WHERE tx_hash = ?1
        ORDER BY log_index ASC
        LIMIT 200;
        "#,
    )
    .bind(tx_hash)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| EventLog {
            log_index: row.log_index,
            address: row.address,
            event_name: row.event_name,
            topic0: row.topic0,
        })
        .collect())
}

pub async fn fetch_contract(pool: &SqlitePool, address: &str) -> sqlx::Result<Option<ContractInfo>> {
    #[derive(FromRow)]
    struct ContractRow {
        address: String,
        name: Option<String>,
        verified: i64,
    }

    let row = sqlx::query_as::<_, ContractRow>(
        r#"
        SELECT address, name, verified
        FROM contracts
        WHERE address = lower(?1)
        LIMIT 1;
        "#,
    )
    .bind(address)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| ContractInfo {
        address: row.address,
        name: row.name,
        verified: row.verified != 0,
    }))
}

async fn verify_big_number_columns(pool: &SqlitePool) -> Result<()> {
    const TEXT_COLUMNS: &[(&str, &str)] = &[
        ("transactions", "value"),
        ("transactions", "gas_price"),
        ("transactions", "gas_used"),
        ("transactions", "effective_gas_price"),
        ("blocks", "gas_used"),
        ("blocks", "base_fee_per_gas"),
        ("token_transfers", "value"),
    ];

    for table in ["transactions", "blocks", "token_transfers"] {
        let rows = sqlx::query(&format!("PRAGMA table_info({});", table))
            .fetch_all(pool)
            .await?;

        for row in rows {
            let name: String = row.try_get("name")?;
            let col_type: Option<String> = row.try_get("type")?;
            let expected_text = TEXT_COLUMNS
                .iter()
                .any(|(t, c)| *t == table && *c == name.as_str());
            if expected_text && col_type.as_deref() != Some("TEXT") {
                warn!(
                    "{}.{} is not TEXT; delete/recreate DB to pick up new schema",
                    table, name
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0xAbCdEf0000000000000000000000000000000000000000000000000000000001";

    async fn temp_pool(tag: &str) -> DbPool {
        let path = std::env::temp_dir().join(format!(
            "chain_insight_storage_{}_{}.sqlite",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        init_pool(&format!("sqlite://{}", path.to_string_lossy()))
            .await
            .unwrap()
    }

    fn tx(hash: &str) -> TxRow {
        TxRow {
            hash: hash.to_string(),
            block_number: 1,
            block_timestamp: 1_700_000_000,
            tx_index: 0,
            from_addr: "0xa".to_string(),
            to_addr: None,
            value: "0".to_string(),
            gas_limit: "21000".to_string(),
            gas_price: "1".to_string(),
            gas_used: "21000".to_string(),
            effective_gas_price: "1".to_string(),
            status: Some(1),
            input_data: "0x".to_string(),
            nonce: 0,
            tx_type: 2,
        }
    }

    #[tokio::test]
    async fn hashes_are_stored_lowercase() {
        let pool = temp_pool("case").await;
        insert_transactions(&pool, &[tx(HASH)]).await.unwrap();
        insert_token_transfers(
            &pool,
            HASH,
            &[TokenTransfer {
                log_index: 0,
                token_address: "0xt".to_string(),
                token_symbol: None,
                from: "0xa".to_string(),
                to: "0xb".to_string(),
                value: "1".to_string(),
            }],
        )
        .await
        .unwrap();

        let lower = HASH.to_lowercase();
        let row = fetch_transaction(&pool, &lower).await.unwrap().unwrap();
        assert_eq!(row.hash, lower);
        assert_eq!(fetch_token_transfers(&pool, &lower).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hash_lookups_use_the_primary_key() {
        let pool = temp_pool("plan").await;
        let plans = [
            "EXPLAIN QUERY PLAN SELECT hash FROM transactions WHERE hash = ?1 LIMIT 1;",
            "EXPLAIN QUERY PLAN SELECT log_index FROM token_transfers WHERE tx_hash = ?1;",
            "EXPLAIN QUERY PLAN SELECT log_index FROM event_logs WHERE tx_hash = ?1;",
        ];
        for sql in plans {
            let rows = sqlx::query(sql).bind("0x00").fetch_all(&pool).await.unwrap();
            let detail: Vec<String> = rows
                .iter()
                .map(|r| r.try_get::<String, _>("detail").unwrap())
                .collect();
            assert!(
                detail.iter().any(|d| d.starts_with("SEARCH")),
                "{sql}: {detail:?}"
            );
        }
    }
}
