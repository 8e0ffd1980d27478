use sea_query::{Alias, Expr, Func, Order, Query};

use super::{render_delete, render_insert, render_select, Backend};
use crate::schema::VideoTs;
use crate::segments::SegmentRecord;

/// INSERT INTO {table} (video_id, ts_sequence, ts_path, duration, definition, create_time)
/// VALUES (?, ?, ?, ?, ?, ?), (...), ...
pub fn insert_many(backend: Backend, table: &str, rows: &[SegmentRecord]) -> String {
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table)).columns([
        VideoTs::VideoId,
        VideoTs::TsSequence,
        VideoTs::TsPath,
        VideoTs::Duration,
        VideoTs::Definition,
        VideoTs::CreateTime,
    ]);
    for row in rows {
        stmt.values_panic([
            row.video_id.as_str().into(),
            row.sequence.into(),
            row.path.as_str().into(),
            row.duration.into(),
            row.definition.as_str().into(),
            row.created_at.into(),
        ]);
    }
    render_insert(backend, &stmt)
}

/// SELECT video_id, ts_sequence, ts_path, duration, definition, create_time
/// FROM {table} WHERE video_id = ? [AND definition = ?] ORDER BY ts_sequence, video_ts_id
pub fn select_by_video(
    backend: Backend,
    table: &str,
    video_id: &str,
    definition: Option<&str>,
) -> String {
    let mut stmt = Query::select();
    stmt.columns([
        VideoTs::VideoId,
        VideoTs::TsSequence,
        VideoTs::TsPath,
        VideoTs::Duration,
        VideoTs::Definition,
        VideoTs::CreateTime,
    ])
    .from(Alias::new(table))
    .and_where(Expr::col(VideoTs::VideoId).eq(video_id));
    if let Some(definition) = definition {
        stmt.and_where(Expr::col(VideoTs::Definition).eq(definition));
    }
    stmt.order_by(VideoTs::TsSequence, Order::Asc)
        .order_by(VideoTs::VideoTsId, Order::Asc);
    render_select(backend, &stmt)
}

/// SELECT COUNT(video_ts_id) FROM {table} WHERE video_id = ?
pub fn count_by_video(backend: Backend, table: &str, video_id: &str) -> String {
    let stmt = Query::select()
        .expr(Func::count(Expr::col(VideoTs::VideoTsId)))
        .from(Alias::new(table))
        .and_where(Expr::col(VideoTs::VideoId).eq(video_id))
        .to_owned();
    render_select(backend, &stmt)
}

/// DELETE FROM {table} WHERE video_id = ?
pub fn delete_by_video(backend: Backend, table: &str, video_id: &str) -> String {
    let stmt = Query::delete()
        .from_table(Alias::new(table))
        .and_where(Expr::col(VideoTs::VideoId).eq(video_id))
        .to_owned();
    render_delete(backend, &stmt)
}

/// DELETE FROM {table} WHERE video_id = ? AND definition IN (...)
pub fn delete_by_video_definitions(
    backend: Backend,
    table: &str,
    video_id: &str,
    definitions: &[&str],
) -> String {
    let stmt = Query::delete()
        .from_table(Alias::new(table))
        .and_where(Expr::col(VideoTs::VideoId).eq(video_id))
        .and_where(Expr::col(VideoTs::Definition).is_in(definitions.iter().copied()))
        .to_owned();
    render_delete(backend, &stmt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: i64, path: &str) -> SegmentRecord {
        SegmentRecord {
            video_id: "v1".to_string(),
            sequence,
            path: path.to_string(),
            duration: 2.5,
            definition: "720p".to_string(),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn insert_many_renders_one_tuple_per_row() {
        let rows = vec![record(0, "a.ts"), record(1, "b.ts"), record(2, "c'd.ts")];
        let sql = insert_many(Backend::Sqlite, "video_ts_2", &rows);
        assert!(sql.starts_with("INSERT INTO \"video_ts_2\""));
        assert_eq!(sql.matches("'720p'").count(), 3);
        // Quotes in values are escaped, not spliced
        assert!(!sql.contains("'c'd.ts'"));
    }

    #[test]
    fn select_filters_definition_only_when_given() {
        let all = select_by_video(Backend::Postgres, "video_ts", "v1", None);
        assert!(!all.contains("\"definition\" ="));
        assert!(all.contains("ORDER BY \"ts_sequence\" ASC"));

        let hd = select_by_video(Backend::Postgres, "video_ts", "v1", Some("1080p"));
        assert!(hd.contains("\"definition\" = '1080p'"));
    }
}
