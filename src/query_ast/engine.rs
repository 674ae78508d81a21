//! Runs a [`Plan`] against its sources.
//!
//! Everything that can be checked without I/O is checked first: sources are
//! resolved, drivers looked up and SQL rendered before any connection opens.

use log::debug;

use super::emitter::{emit_sql, emit_with_from, get_dialect};
use super::errors::{Result, SlqError};
use super::executor::{DriverRegistry, ScratchDb, ScratchStore, close_quietly};
use super::federation::stage_join;
use super::plan::{JoinSel, Plan, Selectable};
use crate::export::RecordWriter;
use crate::models::structs::{QueryRows, Source, SourceSet};

pub struct Engine<'a> {
    srcs: &'a SourceSet,
    registry: &'a DriverRegistry,
    scratch: &'a dyn ScratchStore,
}

/// Where a plan runs, and the statement to run there.
enum Target<'p> {
    Single { src: &'p Source, sql: String },
    Federated { join: &'p JoinSel, left: &'p Source, right: &'p Source, sql: String },
}

impl<'a> Engine<'a> {
    pub fn new(srcs: &'a SourceSet, registry: &'a DriverRegistry, scratch: &'a dyn ScratchStore) -> Self {
        Self { srcs, registry, scratch }
    }

    fn resolve<'p>(&self, plan: &'p Plan) -> Result<Target<'p>>
    where
        'a: 'p,
    {
        match &plan.selectable {
            Selectable::Table(tbl) => {
                let src = self.srcs.get(&tbl.handle)?;
                self.registry.get(src.driver)?;
                Ok(Target::Single { src, sql: emit_sql(plan, src.driver)? })
            }
            Selectable::Join(join) if !join.is_cross_source() => {
                let src = self.srcs.get(&join.left.handle)?;
                self.registry.get(src.driver)?;
                Ok(Target::Single { src, sql: emit_sql(plan, src.driver)? })
            }
            Selectable::Join(join) => {
                if join.left.table == join.right.table {
                    return Err(SlqError::Structure(format!(
                        "cross-source join of {} and {} needs distinct table names",
                        join.left, join.right
                    )));
                }
                let left = self.srcs.get(&join.left.handle)?;
                let right = self.srcs.get(&join.right.handle)?;
                self.registry.get(left.driver)?;
                self.registry.get(right.driver)?;

                let dialect = get_dialect(self.scratch.driver_type());
                let from = dialect.join(join)?;
                let sql = emit_with_from(dialect.as_ref(), &plan.cols, &from, plan.range.as_ref())?;
                Ok(Target::Federated { join, left, right, sql })
            }
        }
    }

    /// Runs `plan` and returns every row.
    pub async fn query(&self, plan: &Plan) -> Result<QueryRows> {
        match self.resolve(plan)? {
            Target::Single { src, sql } => {
                debug!("executing on {}: {}", src.handle, sql);
                let driver = self.registry.get(src.driver)?;
                let mut conn = driver.open(src).await?;
                match conn.query(&sql).await {
                    Ok(rows) => {
                        conn.close().await?;
                        Ok(rows)
                    }
                    Err(e) => {
                        close_quietly(conn, &src.handle).await;
                        Err(e)
                    }
                }
            }
            Target::Federated { join, left, right, sql } => {
                debug!("federating {} with {}: {}", join.left, join.right, sql);
                let ScratchDb { source, mut conn, guard } = self.scratch.open_new().await?;
                let dialect = get_dialect(self.scratch.driver_type());
                let staged = stage_join(self.registry, join, left, right, conn.as_mut(), dialect.as_ref()).await;
                let result = match staged {
                    Ok(()) => conn.query(&sql).await,
                    Err(e) => Err(e),
                };
                let result = match result {
                    Ok(rows) => conn.close().await.map(|()| rows),
                    Err(e) => {
                        close_quietly(conn, &source.handle).await;
                        Err(e)
                    }
                };
                drop(guard);
                result
            }
        }
    }

    /// Runs `plan` and hands the full result to `writer`, then closes it.
    pub async fn execute(&self, plan: &Plan, writer: &mut dyn RecordWriter) -> Result<()> {
        let rows = self.query(plan).await?;
        debug!("query returned {} rows", rows.rows.len());
        writer.open(&rows.fields)?;
        writer.records(&rows.into_records())?;
        writer.close()
    }
}
