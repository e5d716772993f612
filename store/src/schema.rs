//! Table definitions for the Postgres rate store.

pub const LATEST_TABLE: &str = "exchanger_latest_rates";
pub const HISTORICAL_TABLE: &str = "exchanger_historical_rates";
pub const IMPORT_STATE_TABLE: &str = "exchanger_import_state";

/// Idempotent schema statements, applied in order.
pub const MIGRATIONS: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS exchanger_latest_rates (
        exchanger   VARCHAR(64)     NOT NULL,
        source      CHAR(3)         NOT NULL,
        target      CHAR(3)         NOT NULL,
        value       NUMERIC(24, 6)  NOT NULL,
        manual      BOOLEAN         NOT NULL DEFAULT FALSE,
        updated_at  TIMESTAMPTZ     NOT NULL DEFAULT NOW(),
        PRIMARY KEY (exchanger, source, target)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exchanger_historical_rates (
        exchanger   VARCHAR(64)     NOT NULL,
        source      CHAR(3)         NOT NULL,
        target      CHAR(3)         NOT NULL,
        value       NUMERIC(24, 6)  NOT NULL,
        manual      BOOLEAN         NOT NULL DEFAULT FALSE,
        date        DATE            NOT NULL,
        PRIMARY KEY (exchanger, source, target, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exchanger_import_state (
        exchanger           VARCHAR(64)  PRIMARY KEY,
        last_refreshed_at   TIMESTAMPTZ  NOT NULL
    )
    "#,
];

pub const SELECT_LATEST: &str =
    "SELECT source, target, value, manual FROM exchanger_latest_rates WHERE exchanger = $1";

pub const DELETE_LATEST: &str = "DELETE FROM exchanger_latest_rates WHERE exchanger = $1";

pub const INSERT_LATEST: &str = "INSERT INTO exchanger_latest_rates \
     (exchanger, source, target, value, manual, updated_at) VALUES ($1, $2, $3, $4, $5, $6)";

pub const SELECT_HISTORICAL: &str = "SELECT source, target, value, manual, date \
     FROM exchanger_historical_rates \
     WHERE exchanger = $1 AND ($2::DATE IS NULL OR date = $2)";

pub const UPSERT_HISTORICAL: &str = "INSERT INTO exchanger_historical_rates \
     (exchanger, source, target, value, manual, date) VALUES ($1, $2, $3, $4, $5, $6) \
     ON CONFLICT (exchanger, source, target, date) \
     DO UPDATE SET value = EXCLUDED.value, manual = EXCLUDED.manual";

pub const SELECT_LAST_REFRESHED: &str =
    "SELECT last_refreshed_at FROM exchanger_import_state WHERE exchanger = $1";

pub const UPSERT_LAST_REFRESHED: &str = "INSERT INTO exchanger_import_state \
     (exchanger, last_refreshed_at) VALUES ($1, $2) \
     ON CONFLICT (exchanger) DO UPDATE SET last_refreshed_at = EXCLUDED.last_refreshed_at";

/// Channel announcing replaced latest tables; the payload is the provider id.
pub const LATEST_CHANNEL: &str = "exchanger_latest";

/// Issued inside the replacing transaction so listeners hear it on commit.
pub const NOTIFY_LATEST: &str = "SELECT pg_notify($1, $2)";
