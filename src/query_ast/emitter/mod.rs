use super::{
    errors::SlqError,
    plan::{ColExpr, Plan, RowRange, Selectable},
};
use crate::models::enums::DriverType;

pub mod dialect;
pub use dialect::{SqlDialect, get_dialect, sqlite_affinity};

/// `SELECT ... FROM ... [LIMIT ...]` from already rendered fragments.
pub fn assemble(select: &str, from: &str, range: &str) -> String {
    let mut sql = format!("{} {}", select, from);
    if !range.is_empty() {
        sql.push(' ');
        sql.push_str(range);
    }
    sql
}

/// Renders the statement for a plan whose selectable lives in a single source.
pub fn emit_sql(plan: &Plan, driver: DriverType) -> Result<String, SlqError> {
    let dialect = get_dialect(driver);
    let from = match &plan.selectable {
        Selectable::Table(tbl) => dialect.from_table(tbl)?,
        Selectable::Join(join) => dialect.join(join)?,
    };
    emit_with_from(dialect.as_ref(), &plan.cols, &from, plan.range.as_ref())
}

/// Renders the statement around a FROM clause the caller already has.
pub fn emit_with_from(
    dialect: &dyn SqlDialect,
    cols: &[ColExpr],
    from: &str,
    range: Option<&RowRange>,
) -> Result<String, SlqError> {
    let select = dialect.select_cols(cols)?;
    let range = match range {
        Some(r) => dialect.range(r)?,
        None => String::new(),
    };
    Ok(assemble(&select, from, &range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::ScanKind;
    use crate::query_ast::plan::{JoinConstraint, JoinSel, TblSel};

    fn tbl(handle: &str, table: &str) -> TblSel {
        TblSel { handle: handle.into(), table: table.into() }
    }

    #[test]
    fn select_cols_quoting() {
        for driver in [DriverType::MySQL, DriverType::PostgreSQL, DriverType::SQLite] {
            let d = get_dialect(driver);
            let q = if driver == DriverType::MySQL { '`' } else { '"' };
            assert_eq!(d.select_cols(&[]).unwrap(), "SELECT *");
            assert_eq!(d.select_cols(&[ColExpr::new("uid")]).unwrap(), format!("SELECT {q}uid{q}"));
            assert_eq!(
                d.select_cols(&[ColExpr::new("user.uid")]).unwrap(),
                format!("SELECT {q}user{q}.{q}uid{q}")
            );
        }
    }

    #[test]
    fn range_limit_offset_coupling() {
        let pg = get_dialect(DriverType::PostgreSQL);
        assert_eq!(
            pg.range(&RowRange { offset: 5, limit: -1 }).unwrap(),
            format!("LIMIT {} OFFSET 5", i64::MAX)
        );
        assert_eq!(pg.range(&RowRange { offset: -1, limit: 10 }).unwrap(), "LIMIT 10");
        assert_eq!(pg.range(&RowRange { offset: 1, limit: 2 }).unwrap(), "LIMIT 2 OFFSET 1");
        assert_eq!(pg.range(&RowRange { offset: -1, limit: -1 }).unwrap(), "");

        let my = get_dialect(DriverType::MySQL);
        assert_eq!(
            my.range(&RowRange { offset: 5, limit: -1 }).unwrap(),
            "LIMIT 18446744073709551615 OFFSET 5"
        );
    }

    #[test]
    fn join_forms() {
        let d = get_dialect(DriverType::SQLite);
        let mut join = JoinSel {
            left: tbl("@my1", "user"),
            right: tbl("@my1", "address"),
            constraint: JoinConstraint::Natural,
        };
        assert_eq!(d.join(&join).unwrap(), r#"FROM "user" NATURAL JOIN "address""#);

        join.constraint = JoinConstraint::Using("uid".into());
        assert_eq!(
            d.join(&join).unwrap(),
            r#"FROM "user" INNER JOIN "address" ON "user"."uid" = "address"."uid""#
        );

        join.constraint = JoinConstraint::Cmp {
            left: "user.uid".into(),
            op: "==".into(),
            right: "address.uid".into(),
        };
        assert_eq!(
            d.join(&join).unwrap(),
            r#"FROM "user" INNER JOIN "address" ON "user"."uid" = "address"."uid""#
        );

        join.constraint = JoinConstraint::Cmp { left: "user.uid".into(), op: "<".into(), right: "address.uid".into() };
        assert!(d.join(&join).unwrap().ends_with(r#"ON "user"."uid" < "address"."uid""#));
    }

    #[test]
    fn scratch_ddl_only_for_sqlite() {
        let cols = vec!["uid".to_string(), "name".to_string(), "pic".to_string()];
        let kinds = vec![ScanKind::Int, ScanKind::Text, ScanKind::Bytes];
        let d = get_dialect(DriverType::SQLite);
        assert_eq!(
            d.create_table("user", &cols, &kinds).unwrap(),
            r#"CREATE TABLE IF NOT EXISTS "user" ( "uid" INTEGER, "name" TEXT, "pic" BLOB )"#
        );
        assert_eq!(
            d.create_insert_stmt("user", &cols).unwrap(),
            r#"INSERT INTO "user" ( "uid", "name", "pic" ) VALUES ( ?, ?, ? )"#
        );

        let pg = get_dialect(DriverType::PostgreSQL);
        assert!(pg.create_table("user", &cols, &kinds).unwrap_err().is_render());
        assert!(pg.create_insert_stmt("user", &cols).unwrap_err().is_render());
    }

    #[test]
    fn full_statement() {
        let plan = Plan {
            selectable: Selectable::Table(tbl("@my1", "actor")),
            cols: vec![ColExpr::new("first_name")],
            range: Some(RowRange { offset: 0, limit: 3 }),
        };
        assert_eq!(
            emit_sql(&plan, DriverType::MySQL).unwrap(),
            "SELECT `first_name` FROM `actor` LIMIT 3 OFFSET 0"
        );
        let plan = Plan { range: None, cols: vec![], ..plan };
        assert_eq!(emit_sql(&plan, DriverType::PostgreSQL).unwrap(), r#"SELECT * FROM "actor""#);
    }
}
