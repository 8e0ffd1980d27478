use sea_query::{Alias, ColumnDef, Index, Table};

use super::{render_index, render_table, Backend};
use crate::schema::{VideoEncrypt, VideoTs};

/// Auto-increment primary key: SQLite only accepts AUTOINCREMENT on INTEGER,
/// PostgreSQL gets BIGSERIAL.
fn id_column<T: sea_query::Iden + 'static>(backend: Backend, column: T) -> ColumnDef {
    let mut col = ColumnDef::new(column);
    match backend {
        Backend::Sqlite => col.integer(),
        Backend::Postgres => col.big_integer(),
    };
    col.not_null().primary_key().auto_increment();
    col
}

/// CREATE TABLE IF NOT EXISTS {table} (
///     video_ts_id INTEGER PRIMARY KEY AUTOINCREMENT,
///     video_id TEXT NOT NULL,
///     ts_sequence BIGINT NOT NULL,
///     ts_path TEXT NOT NULL,
///     duration DOUBLE NOT NULL,
///     definition TEXT NOT NULL DEFAULT '',
///     create_time BIGINT NOT NULL
/// )
pub fn create_segments_table(backend: Backend, table: &str) -> String {
    let stmt = Table::create()
        .table(Alias::new(table))
        .if_not_exists()
        .col(id_column(backend, VideoTs::VideoTsId))
        .col(ColumnDef::new(VideoTs::VideoId).string().not_null())
        .col(ColumnDef::new(VideoTs::TsSequence).big_integer().not_null())
        .col(ColumnDef::new(VideoTs::TsPath).text().not_null())
        .col(ColumnDef::new(VideoTs::Duration).double().not_null())
        .col(
            ColumnDef::new(VideoTs::Definition)
                .string()
                .not_null()
                .default(""),
        )
        .col(ColumnDef::new(VideoTs::CreateTime).big_integer().not_null())
        .to_owned();
    render_table(backend, &stmt)
}

/// CREATE INDEX IF NOT EXISTS idx_{table}_video ON {table}(video_id, definition, ts_sequence)
///
/// Not unique: plain batch inserts append, uniqueness per sequence is kept by
/// the replacing ingestion path.
pub fn create_segments_video_index(backend: Backend, table: &str) -> String {
    let stmt = Index::create()
        .if_not_exists()
        .name(format!("idx_{}_video", table))
        .table(Alias::new(table))
        .col(VideoTs::VideoId)
        .col(VideoTs::Definition)
        .col(VideoTs::TsSequence)
        .to_owned();
    render_index(backend, &stmt)
}

/// CREATE TABLE IF NOT EXISTS {table} (
///     video_encrypt_id INTEGER PRIMARY KEY AUTOINCREMENT,
///     video_id TEXT NOT NULL,
///     key_hex TEXT NOT NULL,
///     iv_hex TEXT NOT NULL,
///     create_time BIGINT NOT NULL
/// )
pub fn create_keys_table(backend: Backend, table: &str) -> String {
    let stmt = Table::create()
        .table(Alias::new(table))
        .if_not_exists()
        .col(id_column(backend, VideoEncrypt::VideoEncryptId))
        .col(ColumnDef::new(VideoEncrypt::VideoId).string().not_null())
        .col(ColumnDef::new(VideoEncrypt::KeyHex).string().not_null())
        .col(ColumnDef::new(VideoEncrypt::IvHex).string().not_null())
        .col(ColumnDef::new(VideoEncrypt::CreateTime).big_integer().not_null())
        .to_owned();
    render_table(backend, &stmt)
}

/// CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_video ON {table}(video_id)
pub fn create_keys_video_index(backend: Backend, table: &str) -> String {
    let stmt = Index::create()
        .if_not_exists()
        .unique()
        .name(format!("idx_{}_video", table))
        .table(Alias::new(table))
        .col(VideoEncrypt::VideoId)
        .to_owned();
    render_index(backend, &stmt)
}
