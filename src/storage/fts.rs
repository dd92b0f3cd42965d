//! Full-text matching over the FTS5 shadow indexes.

use super::SqliteStore;
use super::codec::{OBSERVATION_COLUMNS, SUMMARY_COLUMNS, observation_from_row, summary_from_row};
use super::filters;
use crate::error::{MemoryError, Result};
use crate::model::{Observation, Scope, Summary};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

/// One index hit with its raw relevance (negated bm25, higher is better).
#[derive(Debug, Clone, PartialEq)]
pub struct FullTextMatch<T> {
    pub entity: T,
    pub rank: f64,
}

#[derive(Debug, Clone)]
pub struct MatchFilter<'a> {
    pub scope: &'a Scope,
    pub exclude_ids: &'a [String],
    pub include_redacted: bool,
    pub limit: usize,
}

impl<'a> MatchFilter<'a> {
    pub fn new(scope: &'a Scope, limit: usize) -> Self {
        Self {
            scope,
            exclude_ids: &[],
            include_redacted: false,
            limit,
        }
    }

    pub fn excluding(mut self, ids: &'a [String]) -> Self {
        self.exclude_ids = ids;
        self
    }
}

/// FTS5 reports malformed MATCH expressions as ordinary database errors.
fn classify_match_error(err: sqlx::Error) -> MemoryError {
    if let sqlx::Error::Database(db) = &err {
        let message = db.message();
        if message.starts_with("fts5:")
            || message.contains("syntax error")
            || message.contains("no such column")
            || message.contains("unterminated string")
        {
            return MemoryError::QuerySyntax(message.to_string());
        }
    }
    MemoryError::Database(err)
}

fn rank_of(row: &SqliteRow) -> Result<f64> {
    Ok(row.try_get::<f64, _>("relevance")?)
}

impl SqliteStore {
    /// Run an already-sanitized FTS5 expression against observation content.
    pub async fn match_observations(
        &self,
        fts_query: &str,
        filter: &MatchFilter<'_>,
    ) -> Result<Vec<FullTextMatch<Observation>>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBSERVATION_COLUMNS}, -bm25(observations_fts) AS relevance
             FROM observations_fts
             JOIN observations o ON o.row_id = observations_fts.rowid
             WHERE observations_fts MATCH "
        ));
        qb.push_bind(fts_query.to_string());
        filters::push_scope_eq(&mut qb, "o", filter.scope);
        if !filter.include_redacted {
            qb.push(" AND o.redacted = 0");
        }
        filters::push_exclude_ids(&mut qb, "o", filter.exclude_ids);
        qb.push(" ORDER BY relevance DESC, o.id ASC");
        filters::push_limit(&mut qb, Some(filter.limit));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_match_error)?;
        rows.iter()
            .map(|row| {
                Ok(FullTextMatch {
                    entity: observation_from_row(row)?,
                    rank: rank_of(row)?,
                })
            })
            .collect()
    }

    /// Run an already-sanitized FTS5 expression against summary content.
    pub async fn match_summaries(
        &self,
        fts_query: &str,
        filter: &MatchFilter<'_>,
    ) -> Result<Vec<FullTextMatch<Summary>>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SUMMARY_COLUMNS}, -bm25(summaries_fts) AS relevance
             FROM summaries_fts
             JOIN summaries s ON s.row_id = summaries_fts.rowid
             WHERE summaries_fts MATCH "
        ));
        qb.push_bind(fts_query.to_string());
        filters::push_scope_eq(&mut qb, "s", filter.scope);
        filters::push_exclude_ids(&mut qb, "s", filter.exclude_ids);
        qb.push(" ORDER BY relevance DESC, s.id ASC");
        filters::push_limit(&mut qb, Some(filter.limit));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_match_error)?;
        rows.iter()
            .map(|row| {
                Ok(FullTextMatch {
                    entity: summary_from_row(row)?,
                    rank: rank_of(row)?,
                })
            })
            .collect()
    }
}
