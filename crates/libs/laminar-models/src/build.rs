//! Completed-build rows and the history queries served from them.
//!
//! Everything here is a short, indexed lookup: these queries run
//! synchronously on the engine loop.

use std::collections::HashMap;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Text};

use crate::db::connection::DbConnection;
use crate::prelude::*;
use crate::schema::builds::dsl;

/// Rows shown per page on a job's recent-builds view.
pub const RUNS_PER_PAGE: i64 = 10;

/// One completed build, as persisted.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::builds)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BuildRecord {
    pub name: String,
    pub number: i32,
    pub node: String,
    pub queued_at: i64,
    pub started_at: i64,
    pub completed_at: i64,
    pub result: i32,
    /// Raw log text, or its compressed form when `output_len` is at or
    /// above the codec threshold.
    pub output: Vec<u8>,
    /// Uncompressed log length.
    pub output_len: i64,
    pub parent_job: String,
    pub parent_build: i32,
    pub reason: String,
}

/// Timing and outcome of one build.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::builds)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BuildSummary {
    pub queued_at: i64,
    pub started_at: i64,
    pub completed_at: i64,
    pub result: i32,
    pub reason: String,
}

/// Subset of columns shown on the home page's recent list.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::builds)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RecentRow {
    pub name: String,
    pub number: i32,
    pub node: String,
    pub started_at: i64,
    pub completed_at: i64,
    pub result: i32,
}

/// One row of a job's paginated history.
#[derive(Debug, QueryableByName)]
pub struct HistoryRow {
    #[diesel(sql_type = Integer)]
    pub number: i32,
    #[diesel(sql_type = BigInt)]
    pub started_at: i64,
    #[diesel(sql_type = BigInt)]
    pub completed_at: i64,
    #[diesel(sql_type = Integer)]
    pub result: i32,
    #[diesel(sql_type = Text)]
    pub reason: String,
}

/// Build count per result bucket.
#[derive(Debug, QueryableByName)]
pub struct ResultCount {
    #[diesel(sql_type = Integer)]
    pub result: i32,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

/// Build count per job.
#[derive(Debug, QueryableByName)]
pub struct JobCount {
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

/// Average duration per job.
#[derive(Debug, QueryableByName)]
pub struct JobAverage {
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = BigInt)]
    pub average: i64,
}

/// Newest build of one job, for the jobs index.
#[derive(Debug, QueryableByName)]
pub struct OverviewRow {
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Integer)]
    pub number: i32,
    #[diesel(sql_type = BigInt)]
    pub started_at: i64,
    #[diesel(sql_type = BigInt)]
    pub completed_at: i64,
    #[diesel(sql_type = Integer)]
    pub result: i32,
}

/// ORDER BY fragment for a job's history page.
///
/// Client-supplied field names map onto a closed set of SQL fragments;
/// anything unrecognized falls back to build-number descending. The
/// ordering field cannot be a bound parameter, so nothing client-supplied
/// may reach the statement text any other way.
pub fn order_clause(field: &str, desc: bool) -> &'static str {
    match (field, desc) {
        ("number", false) => "number ASC",
        ("number", true) => "number DESC",
        ("result", false) => "result ASC, number DESC",
        ("result", true) => "result DESC, number DESC",
        ("started", false) => "startedAt ASC, number DESC",
        ("started", true) => "startedAt DESC, number DESC",
        ("duration", false) => "(completedAt-startedAt) ASC, number DESC",
        ("duration", true) => "(completedAt-startedAt) DESC, number DESC",
        _ => "number DESC",
    }
}

impl BuildRecord {
    /// Last assigned build number per job, loaded once at startup.
    pub fn latest_build_numbers(connection: &DbConnection) -> Result<HashMap<String, u32>> {
        let conn = &mut connection.pool.get()?;
        let rows: Vec<(String, Option<i32>)> = dsl::builds
            .group_by(dsl::name)
            .select((dsl::name, diesel::dsl::max(dsl::number)))
            .load(conn)?;
        Ok(rows
            .into_iter()
            .filter_map(|(job, build)| build.map(|b| (job, b as u32)))
            .collect())
    }

    /// Persist a completed build.
    pub fn insert(&self, connection: &DbConnection) -> Result<()> {
        let conn = &mut connection.pool.get()?;
        diesel::insert_into(dsl::builds).values(self).execute(conn)?;
        Ok(())
    }

    /// One full build row.
    pub fn fetch(job: &str, build: u32, connection: &DbConnection) -> Result<Option<BuildRecord>> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds
            .find((job, build as i32))
            .select(BuildRecord::as_select())
            .first(conn)
            .optional()?)
    }

    /// Stored log payload and its uncompressed length.
    pub fn fetch_output(
        job: &str,
        build: u32,
        connection: &DbConnection,
    ) -> Result<Option<(Vec<u8>, i64)>> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds
            .find((job, build as i32))
            .select((dsl::output, dsl::output_len))
            .first(conn)
            .optional()?)
    }

    /// Timing and outcome of one build.
    pub fn fetch_summary(
        job: &str,
        build: u32,
        connection: &DbConnection,
    ) -> Result<Option<BuildSummary>> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds
            .find((job, build as i32))
            .select(BuildSummary::as_select())
            .first(conn)
            .optional()?)
    }

    /// Duration of the most recently completed build of `job`.
    pub fn last_duration(job: &str, connection: &DbConnection) -> Result<Option<i64>> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds
            .filter(dsl::name.eq(job))
            .order(dsl::completed_at.desc())
            .select(dsl::completed_at - dsl::started_at)
            .first::<i64>(conn)
            .optional()?)
    }

    /// Result of the most recently completed build of `job`.
    pub fn last_result(job: &str, connection: &DbConnection) -> Result<Option<i32>> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds
            .filter(dsl::name.eq(job))
            .order(dsl::completed_at.desc())
            .select(dsl::result)
            .first::<i32>(conn)
            .optional()?)
    }

    /// Total number of persisted builds of `job`.
    pub fn count_for_job(job: &str, connection: &DbConnection) -> Result<i64> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds.filter(dsl::name.eq(job)).count().get_result(conn)?)
    }

    /// Most recent build of `job` whose result equals `success_result`.
    pub fn last_success(
        job: &str,
        success_result: i32,
        connection: &DbConnection,
    ) -> Result<Option<(i32, i64)>> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds
            .filter(dsl::name.eq(job))
            .filter(dsl::result.eq(success_result))
            .order(dsl::completed_at.desc())
            .select((dsl::number, dsl::started_at))
            .first(conn)
            .optional()?)
    }

    /// Most recent build of `job` whose result differs from `success_result`.
    pub fn last_failed(
        job: &str,
        success_result: i32,
        connection: &DbConnection,
    ) -> Result<Option<(i32, i64)>> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds
            .filter(dsl::name.eq(job))
            .filter(dsl::result.ne(success_result))
            .order(dsl::completed_at.desc())
            .select((dsl::number, dsl::started_at))
            .first(conn)
            .optional()?)
    }

    /// One page of a job's history, ordered per `order_clause`.
    pub fn history_page(
        job: &str,
        page: u32,
        field: &str,
        desc: bool,
        connection: &DbConnection,
    ) -> Result<Vec<HistoryRow>> {
        let conn = &mut connection.pool.get()?;
        let query = format!(
            "SELECT number, startedAt AS started_at, completedAt AS completed_at, \
             result, reason FROM builds WHERE name = ? ORDER BY {} LIMIT ?,?",
            order_clause(field, desc)
        );
        Ok(diesel::sql_query(query)
            .bind::<Text, _>(job)
            .bind::<BigInt, _>(page as i64 * RUNS_PER_PAGE)
            .bind::<BigInt, _>(RUNS_PER_PAGE)
            .load(conn)?)
    }

    /// The latest completed builds across all jobs.
    pub fn recent_completed(count: i64, connection: &DbConnection) -> Result<Vec<RecentRow>> {
        let conn = &mut connection.pool.get()?;
        Ok(dsl::builds
            .order(dsl::completed_at.desc())
            .limit(count)
            .select(RecentRow::as_select())
            .load(conn)?)
    }

    /// Per-result build counts for completions inside `(start, end)`.
    pub fn results_between(
        start: i64,
        end: i64,
        connection: &DbConnection,
    ) -> Result<Vec<ResultCount>> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::sql_query(
            "SELECT result, COUNT(*) AS count FROM builds \
             WHERE completedAt > ? AND completedAt < ? GROUP BY result",
        )
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(end)
        .load(conn)?)
    }

    /// Top five jobs by build count since `since`.
    pub fn busiest_jobs(since: i64, connection: &DbConnection) -> Result<Vec<JobCount>> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::sql_query(
            "SELECT name, COUNT(*) AS count FROM builds WHERE completedAt > ? \
             GROUP BY name ORDER BY count DESC LIMIT 5",
        )
        .bind::<BigInt, _>(since)
        .load(conn)?)
    }

    /// Top five jobs by average duration since `since`.
    pub fn slowest_jobs(since: i64, connection: &DbConnection) -> Result<Vec<JobAverage>> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::sql_query(
            "SELECT name, CAST(AVG(completedAt - startedAt) AS INTEGER) AS average \
             FROM builds WHERE completedAt > ? GROUP BY name ORDER BY average DESC LIMIT 5",
        )
        .bind::<BigInt, _>(since)
        .load(conn)?)
    }

    /// The newest build of every job, for the jobs index.
    pub fn jobs_overview(connection: &DbConnection) -> Result<Vec<OverviewRow>> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::sql_query(
            "SELECT name, MAX(number) AS number, startedAt AS started_at, \
             completedAt AS completed_at, result FROM builds GROUP BY name ORDER BY name",
        )
        .load(conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::DbConfig;

    const SUCCESS: i32 = 5;
    const FAILED: i32 = 4;

    fn test_db() -> DbConnection {
        DbConnection::new(&DbConfig::in_memory()).setup()
    }

    fn record(job: &str, build: i32, started: i64, completed: i64, outcome: i32) -> BuildRecord {
        BuildRecord {
            name: job.into(),
            number: build,
            node: String::new(),
            queued_at: started - 1,
            started_at: started,
            completed_at: completed,
            result: outcome,
            output: b"log".to_vec(),
            output_len: 3,
            parent_job: String::new(),
            parent_build: 0,
            reason: String::new(),
        }
    }

    #[test]
    fn latest_build_numbers_groups_by_job() {
        let db = test_db();
        record("a", 1, 10, 20, SUCCESS).insert(&db).unwrap();
        record("a", 2, 30, 40, FAILED).insert(&db).unwrap();
        record("b", 7, 50, 60, SUCCESS).insert(&db).unwrap();

        let nums = BuildRecord::latest_build_numbers(&db).unwrap();
        assert_eq!(nums["a"], 2);
        assert_eq!(nums["b"], 7);
        assert_eq!(nums.len(), 2);
    }

    #[test]
    fn fetch_output_and_summary() {
        let db = test_db();
        let mut rec = record("a", 1, 10, 20, SUCCESS);
        rec.reason = "nightly".into();
        rec.insert(&db).unwrap();

        let (data, len) = BuildRecord::fetch_output("a", 1, &db).unwrap().unwrap();
        assert_eq!(data, b"log");
        assert_eq!(len, 3);

        let summary = BuildRecord::fetch_summary("a", 1, &db).unwrap().unwrap();
        assert_eq!(summary.queued_at, 9);
        assert_eq!(summary.started_at, 10);
        assert_eq!(summary.completed_at, 20);
        assert_eq!(summary.reason, "nightly");

        assert!(BuildRecord::fetch_summary("a", 2, &db).unwrap().is_none());
    }

    #[test]
    fn last_duration_uses_latest_completion() {
        let db = test_db();
        record("a", 1, 10, 15, SUCCESS).insert(&db).unwrap();
        record("a", 2, 20, 32, SUCCESS).insert(&db).unwrap();
        assert_eq!(BuildRecord::last_duration("a", &db).unwrap(), Some(12));
        assert_eq!(BuildRecord::last_duration("missing", &db).unwrap(), None);
    }

    #[test]
    fn last_success_and_failure() {
        let db = test_db();
        record("a", 1, 10, 20, SUCCESS).insert(&db).unwrap();
        record("a", 2, 30, 40, FAILED).insert(&db).unwrap();
        record("a", 3, 50, 60, SUCCESS).insert(&db).unwrap();

        assert_eq!(BuildRecord::last_success("a", SUCCESS, &db).unwrap(), Some((3, 50)));
        assert_eq!(BuildRecord::last_failed("a", SUCCESS, &db).unwrap(), Some((2, 30)));
        assert_eq!(BuildRecord::last_result("a", &db).unwrap(), Some(SUCCESS));
        assert_eq!(BuildRecord::count_for_job("a", &db).unwrap(), 3);
    }

    #[test]
    fn history_page_orders_and_paginates() {
        let db = test_db();
        for build in 1..=12 {
            record("a", build, build as i64 * 10, build as i64 * 10 + build as i64, SUCCESS)
                .insert(&db)
                .unwrap();
        }

        let first = BuildRecord::history_page("a", 0, "number", true, &db).unwrap();
        assert_eq!(first.len(), RUNS_PER_PAGE as usize);
        assert_eq!(first[0].number, 12);

        let second = BuildRecord::history_page("a", 1, "number", true, &db).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].number, 2);

        // duration sorts by completedAt - startedAt, longest first
        let by_duration = BuildRecord::history_page("a", 0, "duration", true, &db).unwrap();
        assert_eq!(by_duration[0].number, 12);

        // unknown fields fall back to number DESC
        let fallback = BuildRecord::history_page("a", 0, "; DROP TABLE builds", true, &db).unwrap();
        assert_eq!(fallback[0].number, 12);
    }

    #[test]
    fn home_page_aggregates() {
        let db = test_db();
        record("a", 1, 100, 110, SUCCESS).insert(&db).unwrap();
        record("a", 2, 200, 260, FAILED).insert(&db).unwrap();
        record("b", 1, 300, 302, SUCCESS).insert(&db).unwrap();

        let recent = BuildRecord::recent_completed(15, &db).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].name, "b");

        let counts = BuildRecord::results_between(0, 1000, &db).unwrap();
        let success = counts.iter().find(|c| c.result == SUCCESS).unwrap();
        assert_eq!(success.count, 2);

        let busiest = BuildRecord::busiest_jobs(0, &db).unwrap();
        assert_eq!(busiest[0].name, "a");
        assert_eq!(busiest[0].count, 2);

        let slowest = BuildRecord::slowest_jobs(0, &db).unwrap();
        assert_eq!(slowest[0].name, "a");
        assert_eq!(slowest[0].average, 35);

        let overview = BuildRecord::jobs_overview(&db).unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].name, "a");
        assert_eq!(overview[0].number, 2);
        assert_eq!(overview[0].result, FAILED);
    }
}
