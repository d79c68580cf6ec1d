//! Point-cloud format id (pcid) allocation.
//!
//! The registry table `pointcloud_formats(pcid, srid, schema)` pairs each
//! pcid with one point layout. Ids are allocated as `max + 1` (`1` on an empty
//! registry) and never reused. Every read-max-then-insert runs under
//! `LOCK TABLE ... IN SHARE ROW EXCLUSIVE MODE`, which conflicts with itself,
//! so concurrent allocations are serialized by the engine.

use tracing::{debug, info, warn};

use crate::core::{Engine, QualifiedName, Row, SqlTemplate, SqlValue, Statement, Transaction};
use crate::error::{ProvisionError, Result};

const LOCK_SQL: &str = "LOCK TABLE {registry} IN SHARE ROW EXCLUSIVE MODE";

const LOOKUP_SQL: &str = "SELECT pcid FROM {registry}
WHERE srid = {srid}::integer AND schema = {descriptor}::text
ORDER BY pcid
LIMIT 1";

const INSERT_SQL: &str = "INSERT INTO {registry} (pcid, srid, schema)
SELECT coalesce(max(pcid), 0) + 1, {srid}::integer, {descriptor}::text
FROM {registry}
RETURNING pcid";

const NEXT_SQL: &str = "SELECT coalesce(max(pcid), 0) + 1 AS pcid FROM {registry}";

/// Result of [`PcidAllocator::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub pcid: i32,
    /// An identical descriptor was already registered for the srid.
    pub reused: bool,
}

/// Allocates pcids in the format registry.
pub struct PcidAllocator<'a> {
    engine: &'a dyn Engine,
    registry: &'a QualifiedName,
    retries: u32,
}

impl<'a> PcidAllocator<'a> {
    /// `retries` extra attempts are made after an allocation conflict.
    pub fn new(engine: &'a dyn Engine, registry: &'a QualifiedName, retries: u32) -> Self {
        Self {
            engine,
            registry,
            retries,
        }
    }

    /// Return the pcid registered for `(srid, descriptor)`, inserting a new
    /// registry row when there is none.
    pub async fn allocate(&self, srid: i32, descriptor: &str) -> Result<Allocation> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.allocate_once(srid, descriptor).await {
                Err(e) if e.is_unique_violation() => {
                    if attempts > self.retries {
                        return Err(ProvisionError::AllocationConflict {
                            target: format!("srid {}", srid),
                            attempts,
                        });
                    }
                    warn!(
                        "pcid allocation for srid {} conflicted (attempt {}), retrying",
                        srid, attempts
                    );
                }
                result => return result,
            }
        }
    }

    async fn allocate_once(&self, srid: i32, descriptor: &str) -> Result<Allocation> {
        let mut tx = self.engine.begin().await?;
        match self.allocate_in(tx.as_mut(), srid, descriptor).await {
            Ok(allocation) => {
                tx.commit().await?;
                if allocation.reused {
                    debug!("Reusing pcid {} for srid {}", allocation.pcid, srid);
                } else {
                    info!("Allocated pcid {} for srid {}", allocation.pcid, srid);
                }
                Ok(allocation)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("rollback after failed allocation failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn allocate_in(
        &self,
        tx: &mut (dyn Transaction + '_),
        srid: i32,
        descriptor: &str,
    ) -> Result<Allocation> {
        self.lock(tx).await?;

        let lookup = SqlTemplate::query("registry.lookup", LOOKUP_SQL)
            .qualified("registry", self.registry)
            .value("srid", srid)
            .value("descriptor", descriptor)
            .build()?;
        if let Some(pcid) = first_pcid(&tx.query(&lookup).await?) {
            return Ok(Allocation { pcid, reused: true });
        }

        let insert = SqlTemplate::query("registry.insert", INSERT_SQL)
            .qualified("registry", self.registry)
            .value("srid", srid)
            .value("descriptor", descriptor)
            .build()?;
        let pcid = first_pcid(&tx.query(&insert).await?)
            .ok_or_else(|| ProvisionError::engine("registry insert returned no pcid"))?;
        Ok(Allocation {
            pcid,
            reused: false,
        })
    }

    /// Lock the registry inside `tx` and return the pcid the next insert
    /// would receive. The lock holds until `tx` ends.
    pub async fn peek_next(&self, tx: &mut (dyn Transaction + '_)) -> Result<i32> {
        self.lock(tx).await?;
        let next = SqlTemplate::query("registry.next", NEXT_SQL)
            .qualified("registry", self.registry)
            .build()?;
        first_pcid(&tx.query(&next).await?)
            .ok_or_else(|| ProvisionError::engine("registry returned no next pcid"))
    }

    async fn lock(&self, tx: &mut (dyn Transaction + '_)) -> Result<()> {
        tx.execute(&self.lock_statement()?).await?;
        Ok(())
    }

    fn lock_statement(&self) -> Result<Statement> {
        SqlTemplate::utility("registry.lock", LOCK_SQL)
            .qualified("registry", self.registry)
            .build()
    }
}

fn first_pcid(rows: &[Row]) -> Option<i32> {
    rows.first()
        .and_then(|row| row.get("pcid"))
        .and_then(SqlValue::as_i64)
        .and_then(|pcid| i32::try_from(pcid).ok())
}
