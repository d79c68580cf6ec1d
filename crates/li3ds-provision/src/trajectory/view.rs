//! Materialized view statements.
//!
//! A raw view passes patches through with a synthetic row id. A trajectory
//! view explodes every patch into samples, converts each sample to the
//! canonical layout and packs the samples of one source row back into a patch
//! ordered by time.

use crate::core::{QualifiedName, SqlTemplate, Statement};
use crate::error::Result;

use super::layout::WGS84_SRID;
use super::orientation::sql_components;
use super::time::GpsWeek;

const RAW_VIEW_SQL: &str = "CREATE MATERIALIZED VIEW {view} AS
SELECT row_number() OVER () AS id, points
FROM {table}";

// Half angles are computed once in `angles`; the quaternion expressions are
// spliced in from `sql_components`.
const TRAJECTORY_VIEW_SQL: &str = "CREATE MATERIALIZED VIEW {view} AS
WITH patches AS (
    SELECT row_number() OVER () AS id, points
    FROM {table}
),
samples AS (
    SELECT id, pc_explode(points) AS pt
    FROM patches
),
angles AS (
    SELECT id,
           pc_get(pt, 'x') AS lon,
           pc_get(pt, 'y') AS lat,
           pc_get(pt, 'z') AS z,
           pc_get(pt, 'm_time') AS m_time,
           pc_get(pt, 'm_plateformHeading') / 2 AS h,
           pc_get(pt, 'm_plateformPitch') / 2 AS p,
           pc_get(pt, 'm_plateformRoll') / 2 AS r
    FROM samples
),
transformed AS (
    SELECT id, z, m_time,
           QW AS qw,
           QX AS qx,
           QY AS qy,
           QZ AS qz,
           ST_Transform(ST_SetSRID(ST_MakePoint(lon, lat), {source_srid}), {srid}) AS geom
    FROM angles
)
SELECT id,
       pc_patch(
           pc_makepoint({pcid}, ARRAY[qw, qx, qy, qz, ST_X(geom), ST_Y(geom), z, {week_start} + m_time])
           ORDER BY m_time
       ) AS points
FROM transformed
GROUP BY id";

const UNIQUE_ID_INDEX_SQL: &str = "CREATE UNIQUE INDEX ON {view} (id)";
const TIME_MIN_INDEX_SQL: &str = "CREATE INDEX ON {view} (pc_patchmin(points, 'time'))";
const TIME_MAX_INDEX_SQL: &str = "CREATE INDEX ON {view} (pc_patchmax(points, 'time'))";

/// Layout of a materialized view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewLayout {
    /// Patches as stored in the source table.
    Raw,
    /// Canonical quaternion layout, reprojected to `srid`.
    Trajectory { srid: i32, pcid: i32, week: GpsWeek },
}

/// Statements creating `view` over `table`: the view, the unique index on
/// `id` and, for trajectories, the two time-bound indexes. They are returned
/// as one batch.
pub fn create_view_statement(
    view: &QualifiedName,
    table: &QualifiedName,
    layout: &ViewLayout,
) -> Result<Statement> {
    let mut statements = vec![view_statement(view, table, layout)?];
    statements.push(index_statement(UNIQUE_ID_INDEX_SQL, view)?);
    if matches!(layout, ViewLayout::Trajectory { .. }) {
        statements.push(index_statement(TIME_MIN_INDEX_SQL, view)?);
        statements.push(index_statement(TIME_MAX_INDEX_SQL, view)?);
    }
    Statement::batch("view.create", statements)
}

fn view_statement(
    view: &QualifiedName,
    table: &QualifiedName,
    layout: &ViewLayout,
) -> Result<Statement> {
    match layout {
        ViewLayout::Raw => SqlTemplate::utility("view.create.raw", RAW_VIEW_SQL)
            .qualified("view", view)
            .qualified("table", table)
            .build(),
        ViewLayout::Trajectory { srid, pcid, week } => {
            SqlTemplate::utility("view.create.trajectory", trajectory_template())
                .qualified("view", view)
                .qualified("table", table)
                .value("source_srid", WGS84_SRID)
                .value("srid", *srid)
                .value("pcid", *pcid)
                .value("week_start", week.start as f64)
                .build()
        }
    }
}

fn index_statement(template: &'static str, view: &QualifiedName) -> Result<Statement> {
    SqlTemplate::utility("view.index", template)
        .qualified("view", view)
        .build()
}

/// The trajectory template with the quaternion expressions spliced in.
///
/// Built once; the expressions only reference the fixed column names of the
/// `angles` CTE.
fn trajectory_template() -> &'static str {
    static TEMPLATE: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    TEMPLATE.get_or_init(|| {
        let [qw, qx, qy, qz] = sql_components("h", "p", "r");
        TRAJECTORY_VIEW_SQL
            .replacen("QW", &qw, 1)
            .replacen("QX", &qx, 1)
            .replacen("QY", &qy, 1)
            .replacen("QZ", &qz, 1)
    })
}
