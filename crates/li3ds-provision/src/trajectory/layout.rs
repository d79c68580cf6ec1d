//! Canonical trajectory point layout.
//!
//! Eight dimensions: `qw, qx, qy, qz` (double), `x, y` (scaled int32),
//! `z` (scaled int32) and `time` (double). The x/y scale depends on the
//! target reference system, so geographic and projected views register two
//! distinct descriptors and never share a pcid.

use crate::core::{Row, SqlTemplate, SqlValue, Statement};
use crate::error::{ProvisionError, Result};

/// Geographic reference system of SBET positions.
pub const WGS84_SRID: i32 = 4326;

/// Reads whether a reference system uses longitude/latitude coordinates.
const SRS_KIND_SQL: &str = "SELECT proj4text LIKE '+proj=longlat%' AS geographic
FROM spatial_ref_sys
WHERE srid = {srid}::integer";

/// Coordinate family of a target srid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Degrees, stored at 1e-7.
    Geographic,
    /// Meters, stored at 0.01.
    Projected,
}

impl Projection {
    /// Lookup of `srid` in the PostGIS reference system catalog.
    pub fn lookup_statement(srid: i32) -> Result<Statement> {
        SqlTemplate::query("srs.kind", SRS_KIND_SQL)
            .value("srid", srid)
            .build()
    }

    /// Classify `srid` from the rows of [`Projection::lookup_statement`].
    ///
    /// Unknown reference systems and ones without a proj4 definition are
    /// rejected: their scale cannot be chosen safely.
    pub fn from_rows(srid: i32, rows: &[Row]) -> Result<Self> {
        let row = rows.first().ok_or(ProvisionError::InvalidSrid {
            srid,
            reason: "unknown to spatial_ref_sys",
        })?;
        match row.get("geographic") {
            Some(SqlValue::Bool(true)) => Ok(Projection::Geographic),
            Some(SqlValue::Bool(false)) => Ok(Projection::Projected),
            // simple-protocol rows come back as text
            Some(SqlValue::Text(t)) if t == "t" => Ok(Projection::Geographic),
            Some(SqlValue::Text(t)) if t == "f" => Ok(Projection::Projected),
            _ => Err(ProvisionError::InvalidSrid {
                srid,
                reason: "reference system has no proj4 definition",
            }),
        }
    }

    fn xy_scale(&self) -> &'static str {
        match self {
            Projection::Geographic => "0.0000001",
            Projection::Projected => "0.01",
        }
    }
}

struct Dimension {
    name: &'static str,
    size: u8,
    interpretation: &'static str,
    scale: Option<&'static str>,
    description: &'static str,
}

/// Elevation scale in meters.
const Z_SCALE: &str = "0.01";

fn dimensions(projection: Projection) -> [Dimension; 8] {
    let double = |name, description| Dimension {
        name,
        size: 8,
        interpretation: "double",
        scale: None,
        description,
    };
    let scaled = |name, scale, description| Dimension {
        name,
        size: 4,
        interpretation: "int32_t",
        scale: Some(scale),
        description,
    };
    [
        double("qw", "attitude quaternion, scalar part"),
        double("qx", "attitude quaternion, x"),
        double("qy", "attitude quaternion, y"),
        double("qz", "attitude quaternion, z"),
        scaled("x", projection.xy_scale(), "x coordinate"),
        scaled("y", projection.xy_scale(), "y coordinate"),
        scaled("z", Z_SCALE, "elevation in meters"),
        double("time", "seconds since the Unix epoch"),
    ]
}

/// Names of the canonical dimensions, in point order.
pub const DIMENSION_NAMES: [&str; 8] = ["qw", "qx", "qy", "qz", "x", "y", "z", "time"];

/// pgpointcloud schema document of the canonical layout for `projection`.
///
/// The output is deterministic so the allocator can reuse registry rows by
/// comparing descriptors.
pub fn descriptor(projection: Projection) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <pc:PointCloudSchema xmlns:pc=\"http://pointcloud.org/schemas/PC/1.1\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n",
    );
    for (position, dim) in dimensions(projection).iter().enumerate() {
        xml.push_str(&format!(
            "  <pc:dimension>\n    <pc:position>{}</pc:position>\n    <pc:size>{}</pc:size>\n    \
             <pc:description>{}</pc:description>\n    <pc:name>{}</pc:name>\n    \
             <pc:interpretation>{}</pc:interpretation>\n",
            position + 1,
            dim.size,
            dim.description,
            dim.name,
            dim.interpretation
        ));
        if let Some(scale) = dim.scale {
            xml.push_str(&format!("    <pc:scale>{}</pc:scale>\n", scale));
        }
        xml.push_str("  </pc:dimension>\n");
    }
    xml.push_str(
        "  <pc:metadata>\n    <Metadata name=\"compression\">dimensional</Metadata>\n  </pc:metadata>\n\
         </pc:PointCloudSchema>\n",
    );
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::Projection::{Geographic, Projected};

    fn srs_row(geographic: SqlValue) -> Vec<Row> {
        vec![Row::new(vec![("geographic".into(), geographic)])]
    }

    #[test]
    fn test_lookup_statement_binds_srid() {
        let statement = Projection::lookup_statement(4258).unwrap();
        assert_eq!(statement.label(), "srs.kind");
        assert!(statement.to_sql().contains("WHERE srid = $1::integer"));
        assert_eq!(statement.params().len(), 1);
    }

    #[test]
    fn test_projection_from_catalog_rows() {
        let etrs89 = Projection::from_rows(4258, &srs_row(SqlValue::Bool(true))).unwrap();
        assert_eq!(etrs89, Geographic);
        let lambert93 = Projection::from_rows(2154, &srs_row(SqlValue::Bool(false))).unwrap();
        assert_eq!(lambert93, Projected);
        assert_eq!(
            Projection::from_rows(4171, &srs_row(SqlValue::Text("t".into()))).unwrap(),
            Geographic
        );
    }

    #[test]
    fn test_unclassifiable_srid_is_rejected() {
        let err = Projection::from_rows(99999, &[]).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidSrid { srid: 99999, .. }));

        let err = Projection::from_rows(900913, &srs_row(SqlValue::Null)).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_descriptor_lists_dimensions_in_order() {
        let xml = descriptor(Geographic);
        let mut last = 0;
        for name in DIMENSION_NAMES {
            let at = xml
                .find(&format!("<pc:name>{}</pc:name>", name))
                .unwrap_or_else(|| panic!("missing {name}"));
            assert!(at > last);
            last = at;
        }
        assert_eq!(xml.matches("<pc:dimension>").count(), 8);
        assert!(xml.ends_with("</pc:PointCloudSchema>\n"));
    }

    #[test]
    fn test_variants_differ_only_by_xy_scale() {
        let geographic = descriptor(Geographic);
        let projected = descriptor(Projected);
        assert_ne!(geographic, projected);
        assert_eq!(geographic.matches("<pc:scale>0.0000001</pc:scale>").count(), 2);
        assert_eq!(geographic.matches("<pc:scale>0.01</pc:scale>").count(), 1);
        assert_eq!(projected.matches("<pc:scale>0.01</pc:scale>").count(), 3);
        assert_eq!(geographic.replace("0.0000001", "0.01"), projected);
    }
}
