use sea_query::{Alias, Expr, OnConflict, Query};

use super::{render_delete, render_insert, render_select, Backend};
use crate::schema::VideoEncrypt;

/// INSERT INTO {table} (video_id, key_hex, iv_hex, create_time) VALUES (?, ?, ?, ?)
pub fn insert(
    backend: Backend,
    table: &str,
    video_id: &str,
    key_hex: &str,
    iv_hex: &str,
    create_time: i64,
) -> String {
    let stmt = Query::insert()
        .into_table(Alias::new(table))
        .columns([
            VideoEncrypt::VideoId,
            VideoEncrypt::KeyHex,
            VideoEncrypt::IvHex,
            VideoEncrypt::CreateTime,
        ])
        .values_panic([
            video_id.into(),
            key_hex.into(),
            iv_hex.into(),
            create_time.into(),
        ])
        .to_owned();
    render_insert(backend, &stmt)
}

/// INSERT INTO {table} ... ON CONFLICT (video_id) DO UPDATE SET key_hex, iv_hex, create_time
pub fn upsert(
    backend: Backend,
    table: &str,
    video_id: &str,
    key_hex: &str,
    iv_hex: &str,
    create_time: i64,
) -> String {
    let stmt = Query::insert()
        .into_table(Alias::new(table))
        .columns([
            VideoEncrypt::VideoId,
            VideoEncrypt::KeyHex,
            VideoEncrypt::IvHex,
            VideoEncrypt::CreateTime,
        ])
        .values_panic([
            video_id.into(),
            key_hex.into(),
            iv_hex.into(),
            create_time.into(),
        ])
        .on_conflict(
            OnConflict::column(VideoEncrypt::VideoId)
                .update_columns([
                    VideoEncrypt::KeyHex,
                    VideoEncrypt::IvHex,
                    VideoEncrypt::CreateTime,
                ])
                .to_owned(),
        )
        .to_owned();
    render_insert(backend, &stmt)
}

/// SELECT video_id, key_hex, iv_hex, create_time FROM {table} WHERE video_id = ? LIMIT 1
pub fn select_by_video(backend: Backend, table: &str, video_id: &str) -> String {
    let stmt = Query::select()
        .columns([
            VideoEncrypt::VideoId,
            VideoEncrypt::KeyHex,
            VideoEncrypt::IvHex,
            VideoEncrypt::CreateTime,
        ])
        .from(Alias::new(table))
        .and_where(Expr::col(VideoEncrypt::VideoId).eq(video_id))
        .limit(1)
        .to_owned();
    render_select(backend, &stmt)
}

/// DELETE FROM {table} WHERE video_id = ?
pub fn delete_by_video(backend: Backend, table: &str, video_id: &str) -> String {
    let stmt = Query::delete()
        .from_table(Alias::new(table))
        .and_where(Expr::col(VideoEncrypt::VideoId).eq(video_id))
        .to_owned();
    render_delete(backend, &stmt)
}
