//! Database lifecycle commands.

use super::{open_db, CliResult};
use recliner_codec::{to_value, value, Value};
use recliner_core::Recliner;

/// Creates a database.
pub fn create(recliner: &Recliner, name: &str) -> CliResult<Value> {
    recliner.create_database(name)?;
    Ok(value!({"ok": true, "db": name}))
}

/// Deletes a database.
pub fn delete(recliner: &Recliner, name: &str) -> CliResult<Value> {
    recliner.delete_database(name)?;
    Ok(value!({"ok": true, "db": name}))
}

/// Lists database names.
pub fn list(recliner: &Recliner) -> Value {
    let mut names = recliner.all_databases();
    names.sort();
    value!(names)
}

/// Reports document count, update sequence and schema version.
pub fn info(recliner: &Recliner, name: &str) -> CliResult<Value> {
    let db = open_db(recliner, name)?;
    Ok(to_value(&db.info()?)?)
}
