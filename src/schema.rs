use sea_query::Iden;

/// Segment (TS) tables - one media chunk per row.
/// The physical table name is resolved per video by the shard router,
/// so `Table` is only used as a logical name.
#[derive(Iden)]
pub enum VideoTs {
    Table,
    VideoTsId,
    VideoId,
    TsSequence,
    TsPath,
    Duration,
    Definition,
    CreateTime,
}

/// Key table - one AES key/IV pair per video
#[derive(Iden)]
pub enum VideoEncrypt {
    Table,
    VideoEncryptId,
    VideoId,
    KeyHex,
    IvHex,
    CreateTime,
}
