//! SQLite trade journal.
//!
//! Append-only reporting sink: the bot never reads it back into engine
//! state. Stores:
//! - Bot run state (mode, last tick)
//! - Every trade event as JSON, except per-tick marks
//! - The latest snapshot of each position, for the dashboard and report

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::events::TradeEvent;
use crate::models::Position;

/// Database connection pool for the journal.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Bot state stored in database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BotState {
    pub mode: String,
    pub is_running: bool,
    pub ticks: i64,
    pub last_tick_at: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

/// Stored position record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub id: String,
    pub instrument: String,
    pub side: String,
    pub state: String,
    pub entry_price: f64,
    pub initial_lot_size: f64,
    pub lot_size: f64,
    pub stop_loss: f64,
    /// JSON array of target levels
    pub targets: String,
    pub targets_hit: i64,
    pub last_price: f64,
    pub floating_pnl: f64,
    pub realized_pnl: f64,
    pub close_reason: Option<String>,
    pub close_price: Option<f64>,
    pub opened_at: String,
    pub closed_at: Option<String>,
}

impl StoredPosition {
    /// Target levels decoded from the stored JSON array.
    pub fn target_levels(&self) -> Vec<f64> {
        serde_json::from_str(&self.targets).unwrap_or_default()
    }

    /// Nearest target not reached yet.
    pub fn next_target(&self) -> Option<f64> {
        let hit = usize::try_from(self.targets_hit).unwrap_or(0);
        self.target_levels().get(hit).copied()
    }
}

/// Counts of journaled events by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub opened: i64,
    pub closed: i64,
    pub failed: i64,
    pub rejected: i64,
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn to_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Each connection to `sqlite::memory:` is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Bot state table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                mode TEXT NOT NULL DEFAULT 'paper',
                is_running INTEGER NOT NULL DEFAULT 0,
                ticks INTEGER NOT NULL DEFAULT 0,
                last_tick_at TEXT,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Trade events
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                instrument TEXT NOT NULL,
                position_id TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Latest position snapshots
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                instrument TEXT NOT NULL,
                side TEXT NOT NULL,
                state TEXT NOT NULL,
                entry_price REAL NOT NULL,
                initial_lot_size REAL NOT NULL,
                lot_size REAL NOT NULL,
                stop_loss REAL NOT NULL,
                targets TEXT NOT NULL,
                targets_hit INTEGER NOT NULL DEFAULT 0,
                last_price REAL NOT NULL,
                floating_pnl REAL NOT NULL DEFAULT 0,
                realized_pnl REAL NOT NULL DEFAULT 0,
                close_reason TEXT,
                close_price REAL,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_instrument ON trade_events(instrument)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Bot State ====================

    /// Mark the bot as running in `mode`.
    pub async fn init_bot_state(&self, mode: &str) -> Result<BotState> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (id, mode, is_running, started_at, updated_at)
            VALUES (1, ?, 1, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                mode = excluded.mode,
                is_running = 1,
                ticks = 0,
                started_at = datetime('now'),
                updated_at = datetime('now')
            "#,
        )
        .bind(mode)
        .execute(&self.pool)
        .await?;

        self.get_bot_state().await
    }

    /// Get current bot state.
    pub async fn get_bot_state(&self) -> Result<BotState> {
        sqlx::query_as::<_, BotState>("SELECT * FROM bot_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Bot state not initialized")
    }

    /// Record a completed tick.
    pub async fn record_tick(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bot_state SET
                ticks = ticks + 1,
                last_tick_at = ?,
                updated_at = datetime('now')
            WHERE id = 1
            "#,
        )
        .bind(to_text(at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark bot as stopped.
    pub async fn mark_bot_stopped(&self) -> Result<()> {
        sqlx::query("UPDATE bot_state SET is_running = 0, updated_at = datetime('now') WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Events ====================

    /// Append an event; events carrying a position also refresh its snapshot.
    /// Marks only refresh the snapshot.
    pub async fn record_event(&self, event: &TradeEvent) -> Result<()> {
        if let TradeEvent::PositionMarked { position, .. } = event {
            return self.save_position(position).await;
        }

        let payload = serde_json::to_string(event).context("Failed to serialize event")?;
        let position_id = match event {
            TradeEvent::TargetHit { position_id, .. }
            | TradeEvent::StateChanged { position_id, .. }
            | TradeEvent::PartialClose { position_id, .. }
            | TradeEvent::ExecutionFailed { position_id, .. } => Some(position_id.to_string()),
            _ => event.position().map(|p| p.id.to_string()),
        };

        sqlx::query(
            r#"
            INSERT INTO trade_events (kind, instrument, position_id, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.kind())
        .bind(event.instrument())
        .bind(position_id)
        .bind(payload)
        .bind(to_text(Utc::now()))
        .execute(&self.pool)
        .await?;

        if let Some(position) = event.position() {
            self.save_position(position).await?;
        }

        Ok(())
    }

    /// Count journaled events by outcome.
    pub async fn event_counts(&self) -> Result<EventCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT kind, COUNT(*) FROM trade_events GROUP BY kind")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = EventCounts::default();
        for (kind, count) in rows {
            match kind.as_str() {
                "position_opened" => counts.opened = count,
                "position_closed" => counts.closed = count,
                "execution_failed" => counts.failed = count,
                "signal_rejected" => counts.rejected = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    // ==================== Positions ====================

    /// Insert or replace the snapshot of a position.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        let targets: Vec<f64> = position.targets.iter().map(|t| to_f64(*t)).collect();

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, instrument, side, state, entry_price, initial_lot_size, lot_size,
                stop_loss, targets, targets_hit, last_price, floating_pnl, realized_pnl,
                close_reason, close_price, opened_at, closed_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                lot_size = excluded.lot_size,
                stop_loss = excluded.stop_loss,
                targets_hit = excluded.targets_hit,
                last_price = excluded.last_price,
                floating_pnl = excluded.floating_pnl,
                realized_pnl = excluded.realized_pnl,
                close_reason = excluded.close_reason,
                close_price = excluded.close_price,
                closed_at = excluded.closed_at,
                updated_at = datetime('now')
            "#,
        )
        .bind(position.id.to_string())
        .bind(&position.instrument)
        .bind(position.side.as_str())
        .bind(position.state.as_str())
        .bind(to_f64(position.entry_price))
        .bind(to_f64(position.initial_lot_size))
        .bind(to_f64(position.lot_size))
        .bind(to_f64(position.stop_loss))
        .bind(serde_json::to_string(&targets)?)
        .bind(position.targets_hit.len() as i64)
        .bind(to_f64(position.last_price))
        .bind(to_f64(position.floating_pnl(position.last_price)))
        .bind(to_f64(position.realized_pnl))
        .bind(position.close_reason.map(|r| r.as_str()))
        .bind(position.close_price.map(to_f64))
        .bind(to_text(position.opened_at))
        .bind(position.closed_at.map(to_text))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all open positions.
    pub async fn get_open_positions(&self) -> Result<Vec<StoredPosition>> {
        sqlx::query_as::<_, StoredPosition>(
            "SELECT * FROM positions WHERE closed_at IS NULL ORDER BY instrument",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch positions")
    }

    /// Get closed positions, oldest first.
    pub async fn get_closed_positions(&self) -> Result<Vec<StoredPosition>> {
        sqlx::query_as::<_, StoredPosition>(
            "SELECT * FROM positions WHERE closed_at IS NOT NULL ORDER BY closed_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch closed positions")
    }
}
