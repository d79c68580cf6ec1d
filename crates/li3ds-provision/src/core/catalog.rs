//! Catalog entities as read back from the engine.
//!
//! The engine catalog is the single source of truth: every provisioning
//! operation returns the entity as re-read after its DDL, never as echoed
//! from the request.

use serde::{Deserialize, Serialize};

use super::options::OptionMap;

/// A multicorn foreign server bound to one driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignServer {
    pub name: String,
    /// Driver identifier, e.g. `fdwli3ds.Rosbag`.
    pub driver: String,
    /// Server options without the `wrapper` key.
    pub options: OptionMap,
}

/// A foreign table exposing a `points pcpatch(<pcid>)` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignTable {
    pub schema: String,
    pub table: String,
    pub server: String,
    /// Registry key, `None` when the table was not provisioned by us
    /// (e.g. a relation brought in by schema import without a pcid option).
    pub pcid: Option<i32>,
    /// Spatial reference of the paired registry row, if known.
    pub srid: Option<i32>,
    pub options: OptionMap,
}

impl ForeignTable {
    /// `schema.table` form.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// A materialized view with its definition text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedView {
    pub schema: String,
    pub view: String,
    pub definition: String,
}

impl MaterializedView {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_serializes_with_options() {
        let table = ForeignTable {
            schema: "li3ds".into(),
            table: "bag".into(),
            server: "bags".into(),
            pcid: Some(2),
            srid: Some(0),
            options: [("topic", "/imu")].into_iter().collect(),
        };
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["pcid"], 2);
        assert_eq!(json["options"]["topic"], "/imu");
        assert_eq!(table.qualified(), "li3ds.bag");
    }
}
