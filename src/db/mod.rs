use std::path::Path;
use std::time::Duration;

use log::info;
use sqlx::{SqlitePool, sqlite::*};

pub mod crud;
pub mod model;

pub use model::*;

pub type Database = SqlitePool;

/// 数据库表结构
///
/// id 为自增主键，只增不复用，索引的位置映射依赖该顺序
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS slab (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    origin      TEXT,
    file_name   TEXT NOT NULL,
    hash        BLOB NOT NULL UNIQUE,
    color       TEXT,
    description TEXT,
    image       BLOB NOT NULL,
    vector      BLOB
);
"#;

pub async fn init_db(filename: impl AsRef<Path>) -> Result<Database, sqlx::Error> {
    let filename = filename.as_ref();
    info!("初始化数据库连接: {}", filename.display());

    let options = SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .filename(filename)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;

    sqlx::query(SCHEMA).execute(&pool).await?;

    Ok(pool)
}
