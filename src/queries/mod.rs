//! SQL text builders. Every builder takes the target [`Backend`] and returns the
//! statement rendered for that dialect, with values inlined by sea-query.

use sea_query::{
    DeleteStatement, IndexCreateStatement, InsertStatement, PostgresQueryBuilder,
    SelectStatement, SqliteQueryBuilder, TableCreateStatement,
};

pub mod ddl;
pub mod keys;
pub mod segments;

/// SQL dialect of a backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

pub(crate) fn render_select(backend: Backend, stmt: &SelectStatement) -> String {
    match backend {
        Backend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        Backend::Postgres => stmt.to_string(PostgresQueryBuilder),
    }
}

pub(crate) fn render_insert(backend: Backend, stmt: &InsertStatement) -> String {
    match backend {
        Backend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        Backend::Postgres => stmt.to_string(PostgresQueryBuilder),
    }
}

pub(crate) fn render_delete(backend: Backend, stmt: &DeleteStatement) -> String {
    match backend {
        Backend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        Backend::Postgres => stmt.to_string(PostgresQueryBuilder),
    }
}

pub(crate) fn render_table(backend: Backend, stmt: &TableCreateStatement) -> String {
    match backend {
        Backend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        Backend::Postgres => stmt.to_string(PostgresQueryBuilder),
    }
}

pub(crate) fn render_index(backend: Backend, stmt: &IndexCreateStatement) -> String {
    match backend {
        Backend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        Backend::Postgres => stmt.to_string(PostgresQueryBuilder),
    }
}
