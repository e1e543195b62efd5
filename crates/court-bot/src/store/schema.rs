//! Database schema DDL.
//!
//! One SQLite file per book (paper / live), WAL journaling so the
//! long-running settlement pass can coexist with short scheduler ticks.
//! Terminal-state rows are retained indefinitely for audit.

/// Full schema, applied idempotently on open.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trade_jobs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    game_date         TEXT NOT NULL,
    event_slug        TEXT NOT NULL,
    home_team         TEXT NOT NULL,
    away_team         TEXT NOT NULL,
    tipoff_utc        TEXT NOT NULL,
    execute_after     TEXT NOT NULL,
    execute_before    TEXT NOT NULL,
    leg_side          TEXT NOT NULL DEFAULT 'directional',
    status            TEXT NOT NULL DEFAULT 'pending',
    signal_id         INTEGER,
    retry_count       INTEGER NOT NULL DEFAULT 0,
    error_message     TEXT,
    dca_entries_count INTEGER NOT NULL DEFAULT 0,
    dca_max_entries   INTEGER NOT NULL DEFAULT 1,
    dca_group_id      TEXT,
    dca_total_budget  TEXT,
    dca_slice_size    TEXT,
    paired_job_id     INTEGER,
    bothside_group_id TEXT,
    merge_status      TEXT NOT NULL DEFAULT 'none',
    merge_operation_id INTEGER,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    UNIQUE(event_slug, leg_side)
);

CREATE TABLE IF NOT EXISTS signals (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id              INTEGER NOT NULL REFERENCES trade_jobs(id),
    event_slug          TEXT NOT NULL,
    game_title          TEXT NOT NULL,
    team                TEXT NOT NULL,
    side                TEXT NOT NULL DEFAULT 'BUY',
    price               TEXT NOT NULL,
    size_usd            TEXT NOT NULL,
    token_id            TEXT NOT NULL,
    condition_id        TEXT,
    signal_role         TEXT NOT NULL DEFAULT 'directional',
    dca_group_id        TEXT NOT NULL,
    dca_sequence        INTEGER NOT NULL DEFAULT 1,
    bothside_group_id   TEXT,
    expected_win_rate   REAL NOT NULL DEFAULT 0.0,
    edge_pct            TEXT NOT NULL DEFAULT '0',
    price_band          TEXT NOT NULL DEFAULT '',
    in_sweet_spot       INTEGER NOT NULL DEFAULT 0,
    liquidity_score     TEXT NOT NULL DEFAULT 'unknown',
    ask_depth_5c        TEXT,
    spread_pct          TEXT,
    balance_usd_at_trade TEXT,
    constraint_binding  TEXT NOT NULL DEFAULT 'kelly',
    order_id            TEXT,
    order_status        TEXT NOT NULL DEFAULT 'pending',
    fill_price          TEXT,
    order_placed_at     TEXT,
    order_original_price TEXT,
    order_replace_count INTEGER NOT NULL DEFAULT 0,
    fee_rate_bps        TEXT NOT NULL DEFAULT '0',
    fee_usd             TEXT NOT NULL DEFAULT '0',
    shares_merged       TEXT NOT NULL DEFAULT '0',
    merge_recovery_usd  TEXT NOT NULL DEFAULT '0',
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS order_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id   INTEGER NOT NULL REFERENCES signals(id),
    event_type  TEXT NOT NULL,
    order_id    TEXT,
    price       TEXT,
    old_price   TEXT,
    best_ask    TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS merge_operations (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    bothside_group_id TEXT NOT NULL,
    condition_id      TEXT NOT NULL,
    event_slug        TEXT NOT NULL,
    dir_shares        TEXT NOT NULL,
    hedge_shares      TEXT NOT NULL,
    merge_amount      TEXT NOT NULL,
    remainder_shares  TEXT NOT NULL,
    remainder_side    TEXT,
    dir_vwap          TEXT NOT NULL,
    hedge_vwap        TEXT NOT NULL,
    combined_vwap     TEXT NOT NULL,
    gross_profit_usd  TEXT,
    gas_cost_usd      TEXT,
    net_profit_usd    TEXT,
    status            TEXT NOT NULL DEFAULT 'pending',
    tx_hash           TEXT,
    error_message     TEXT,
    created_at        TEXT NOT NULL,
    executed_at       TEXT
);

CREATE TABLE IF NOT EXISTS results (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id        INTEGER NOT NULL REFERENCES signals(id),
    won              INTEGER NOT NULL,
    pnl_usd          TEXT NOT NULL,
    settlement_price TEXT NOT NULL,
    score_home       INTEGER,
    score_away       INTEGER,
    method           TEXT NOT NULL DEFAULT 'box_score',
    settled_at       TEXT NOT NULL,
    UNIQUE(signal_id)
);

CREATE TABLE IF NOT EXISTS risk_snapshots (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    checked_at         TEXT NOT NULL,
    level              TEXT NOT NULL DEFAULT 'GREEN',
    level_since        TEXT NOT NULL,
    sizing_multiplier  TEXT NOT NULL DEFAULT '1',
    daily_pnl          TEXT NOT NULL DEFAULT '0',
    weekly_pnl         TEXT NOT NULL DEFAULT '0',
    consecutive_losses INTEGER NOT NULL DEFAULT 0,
    max_drawdown_pct   TEXT NOT NULL DEFAULT '0',
    drift_z_max        REAL NOT NULL DEFAULT 0.0,
    degraded           INTEGER NOT NULL DEFAULT 0,
    manual_ack         INTEGER NOT NULL DEFAULT 0,
    lockout_until      TEXT,
    last_balance_usd   TEXT
);

CREATE INDEX IF NOT EXISTS idx_trade_jobs_status ON trade_jobs(status);
CREATE INDEX IF NOT EXISTS idx_trade_jobs_game_date ON trade_jobs(game_date);
CREATE INDEX IF NOT EXISTS idx_trade_jobs_bothside ON trade_jobs(bothside_group_id);
CREATE INDEX IF NOT EXISTS idx_signals_event_slug ON signals(event_slug);
CREATE INDEX IF NOT EXISTS idx_signals_dca_group ON signals(dca_group_id);
CREATE INDEX IF NOT EXISTS idx_signals_bothside ON signals(bothside_group_id);
CREATE INDEX IF NOT EXISTS idx_signals_order_status ON signals(order_status);
CREATE INDEX IF NOT EXISTS idx_order_events_signal ON order_events(signal_id);
CREATE INDEX IF NOT EXISTS idx_results_settled_at ON results(settled_at);
"#;
