use sqlx::migrate::{MigrateError, Migration, Migrator};
use sqlx::PgPool;
use tracing::{info, warn};

fn shipped() -> Migrator {
    sqlx::migrate!("./migrations")
}

/// Applies pending migrations.
///
/// An applied migration whose file was edited gets its stored checksum
/// rewritten instead of aborting startup. Versions recorded in the database
/// but no longer shipped are ignored.
pub async fn run_with_repair(pool: &PgPool) -> Result<(), MigrateError> {
    let mut migrator = shipped();
    let mut repaired = 0usize;

    loop {
        let version = match migrator.run(pool).await {
            Ok(()) => {
                info!(repaired, "database schema up to date");
                return Ok(());
            }
            Err(MigrateError::VersionMismatch(version)) => version,
            Err(MigrateError::VersionMissing(version)) => {
                warn!(version, "database has a migration this build does not ship");
                migrator.set_ignore_missing(true);
                return migrator.run(pool).await;
            }
            Err(error) => return Err(error),
        };

        repaired += 1;
        let migration = edited_migration(&migrator, version, repaired)?;
        warn!(version, "repairing checksum of edited migration");
        store_checksum(pool, migration).await?;
    }
}

/// The shipped migration for a checksum mismatch on `version`. Gives up once
/// more repairs were attempted than there are migrations.
fn edited_migration(
    migrator: &Migrator,
    version: i64,
    repaired: usize,
) -> Result<&Migration, MigrateError> {
    if repaired > migrator.iter().count() {
        return Err(MigrateError::VersionMismatch(version));
    }
    migrator
        .iter()
        .find(|migration| migration.version == version)
        .ok_or(MigrateError::VersionMissing(version))
}

async fn store_checksum(pool: &PgPool, migration: &Migration) -> Result<(), MigrateError> {
    sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
        .bind(migration.checksum.as_ref())
        .bind(migration.version)
        .execute(pool)
        .await
        .map_err(MigrateError::Execute)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_edited_migration() {
        let migrator = shipped();
        let migration = edited_migration(&migrator, 1, 1).unwrap();
        assert_eq!(migration.version, 1);
        assert!(!migration.checksum.is_empty());
    }

    #[test]
    fn unknown_version_is_missing() {
        let migrator = shipped();
        assert!(matches!(
            edited_migration(&migrator, 42, 1),
            Err(MigrateError::VersionMissing(42))
        ));
    }

    #[test]
    fn stops_after_one_repair_per_migration() {
        let migrator = shipped();
        let attempts = migrator.iter().count() + 1;
        assert!(matches!(
            edited_migration(&migrator, 1, attempts),
            Err(MigrateError::VersionMismatch(1))
        ));
    }
}
