//! Bound-parameter filter fragments for scoped queries.
//!
//! Column names come from [`ScopeDimension::column`]; values only ever reach
//! SQLite through `push_bind`.

use crate::model::{Scope, ScopeDimension};
use sqlx::{QueryBuilder, Sqlite};

/// `AND alias.col = ?` for every dimension set on `scope`.
pub(super) fn push_scope_eq(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, scope: &Scope) {
    for (dimension, value) in scope.dimensions() {
        if let Some(value) = value {
            push_column(qb, alias, dimension);
            qb.push(" = ").push_bind(value.to_string());
        }
    }
}

/// Like [`push_scope_eq`] but a NULL column on the row matches any value.
/// Pins created without a dimension apply to every value of it.
pub(super) fn push_scope_wildcard(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, scope: &Scope) {
    for (dimension, value) in scope.dimensions() {
        if let Some(value) = value {
            qb.push(" AND (")
                .push(alias)
                .push('.')
                .push(dimension.column())
                .push(" IS NULL OR ")
                .push(alias)
                .push('.')
                .push(dimension.column())
                .push(" = ")
                .push_bind(value.to_string())
                .push(")");
        }
    }
}

pub(super) fn push_exclude_ids(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    qb.push(" AND ").push(alias).push(".id NOT IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
}

pub(super) fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, ids: &[String]) {
    qb.push(" AND ").push(alias).push(".id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
}

/// `LIMIT ?`; SQLite treats a negative limit as unbounded.
pub(super) fn push_limit(qb: &mut QueryBuilder<'_, Sqlite>, limit: Option<usize>) {
    let bound = limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
    qb.push(" LIMIT ").push_bind(bound);
}

fn push_column(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, dimension: ScopeDimension) {
    qb.push(" AND ")
        .push(alias)
        .push('.')
        .push(dimension.column());
}
