use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema scripts in order; entry `n` upgrades version `n` to `n + 1`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("schema_v1.sql", include_str!("schemas/schema_v1.sql")),
    ("schema_v2.sql", include_str!("schemas/schema_v2.sql")),
];

const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Brings the step store up to the current schema in a single transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "step store is at schema {version} but this build only knows {CURRENT_SCHEMA_VERSION}"
        );
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (name, sql) in MIGRATIONS.iter().skip(version.max(0) as usize) {
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply {name}"))?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_in_memory_database_to_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        // Second run is a no-op.
        run_migrations(&mut conn).unwrap();
    }

    #[test]
    fn refuses_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }

    #[test]
    fn upgrades_v1_store_without_losing_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].1).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO daily_steps (date, steps, updated_at) VALUES ('2024-05-01', 42, '2024-05-01T00:00:00Z')",
            [],
        )
        .unwrap();

        run_migrations(&mut conn).unwrap();

        let steps: i64 = conn
            .query_row("SELECT steps FROM daily_steps WHERE date = '2024-05-01'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(steps, 42);
        let goals: i64 = conn
            .query_row("SELECT COUNT(*) FROM goals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(goals, 0);
    }
}
