// ABOUTME: Schema introspection for export planning and load validation
// ABOUTME: Discovers tables and resolves column names and kinds in ordinal order

use crate::error::TransferError;
use crate::transfer::encoding::ColumnKind;
use tokio_postgres::Client;

/// One column of a live table, with its kind resolved once at read time.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

/// List user tables in `db` as fully-qualified `<db>.<table>` names.
pub async fn list_tables(client: &Client, db: &str) -> Result<Vec<String>, TransferError> {
    let rows = client
        .query(
            "SELECT table_name
             FROM information_schema.tables
             WHERE table_catalog = $1
               AND table_type = 'BASE TABLE'
               AND table_schema NOT IN ('pg_catalog', 'information_schema', 'crdb_internal')
             ORDER BY table_name",
            &[&db],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| format!("{}.{}", db, row.get::<_, String>(0)))
        .collect())
}

/// Columns of a table (by short name), in ordinal order, with kinds mapped
/// from `udt_name`.
pub async fn table_columns(client: &Client, table: &str) -> Result<Vec<Column>, TransferError> {
    let rows = client
        .query(
            "SELECT column_name, udt_name
             FROM information_schema.columns
             WHERE table_name = $1
             ORDER BY ordinal_position",
            &[&table],
        )
        .await?;

    if rows.is_empty() {
        return Err(TransferError::Validation(format!(
            "table '{}' has no columns (does it exist?)",
            table
        )));
    }

    Ok(rows
        .iter()
        .map(|row| Column {
            name: row.get(0),
            kind: ColumnKind::from_udt(row.get(1)),
        })
        .collect())
}
