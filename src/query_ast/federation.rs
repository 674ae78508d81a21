//! Cross-source joins
//!
//! Two tables living in different sources can't be joined by either source,
//! so both are copied wholesale into one scratch database and the join runs
//! there instead.

use log::debug;

use super::emitter::{SqlDialect, get_dialect};
use super::errors::Result;
use super::executor::{Connection, DriverRegistry, close_quietly};
use super::plan::{JoinSel, TblSel};
use crate::models::enums::ScanKind;
use crate::models::structs::{QueryRows, Source};

/// Copies `tbl` from `src` into `dest` under the same table name, returning
/// the number of rows copied. The source connection is closed on every path.
pub async fn import_table(
    registry: &DriverRegistry,
    src: &Source,
    tbl: &TblSel,
    dest: &mut dyn Connection,
    dest_dialect: &dyn SqlDialect,
) -> Result<u64> {
    let driver = registry.get(src.driver)?;
    let select = get_dialect(src.driver).select_all(tbl)?;

    let mut conn = driver.open(src).await?;
    let rows = match conn.query(&select).await {
        Ok(rows) => rows,
        Err(e) => {
            close_quietly(conn, &src.handle).await;
            return Err(e);
        }
    };
    conn.close().await?;

    let names = rows.column_names();
    let kinds = staged_kinds(&rows);
    let create = dest_dialect.create_table(&tbl.table, &names, &kinds)?;
    let insert = dest_dialect.create_insert_stmt(&tbl.table, &names)?;
    dest.execute(&create, &[]).await?;
    let n = dest.insert_rows(&insert, &rows.rows).await?;
    debug!("imported {} rows from {} into scratch", n, tbl);
    Ok(n)
}

/// Column kinds for the scratch copy: the first non-null value decides, the
/// declared column type otherwise.
fn staged_kinds(rows: &QueryRows) -> Vec<ScanKind> {
    rows.fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            rows.rows
                .iter()
                .filter_map(|r| r.get(i))
                .find(|v| !v.is_null())
                .map_or(field.kind, |v| v.kind())
        })
        .collect()
}

/// Imports both sides of `join` into `dest`: left fully, then right.
pub async fn stage_join(
    registry: &DriverRegistry,
    join: &JoinSel,
    left: &Source,
    right: &Source,
    dest: &mut dyn Connection,
    dest_dialect: &dyn SqlDialect,
) -> Result<()> {
    import_table(registry, left, &join.left, dest, dest_dialect).await?;
    import_table(registry, right, &join.right, dest, dest_dialect).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::structs::{Value, column_descriptors};

    #[test]
    fn staged_kind_follows_values() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let rows = QueryRows {
            fields: column_descriptors(&names, &[ScanKind::Null, ScanKind::Decimal, ScanKind::Text]),
            rows: vec![
                vec![Value::Null, Value::Text("1.50".into()), Value::Null],
                vec![Value::Int(4), Value::Text("2.00".into()), Value::Null],
            ],
        };
        assert_eq!(staged_kinds(&rows), vec![ScanKind::Int, ScanKind::Text, ScanKind::Text]);
    }
}
