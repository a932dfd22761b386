use sqlx::{Executor, Result, Row, Sqlite, SqlitePool};

use super::SlabRecord;

/// 添加石材记录
pub async fn add_slab<'c, E>(
    executor: E,
    name: &str,
    origin: Option<&str>,
    file_name: &str,
    hash: &[u8],
    image: &[u8],
) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO slab (name, origin, file_name, hash, image)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(origin)
    .bind(file_name)
    .bind(hash)
    .bind(image)
    .fetch_one(executor)
    .await?;

    Ok(row.get(0))
}

/// 检查图片哈希是否存在
pub async fn check_hash(executor: &SqlitePool, hash: &[u8]) -> Result<bool> {
    let row = sqlx::query("SELECT COUNT(*) FROM slab WHERE hash = ?")
        .bind(hash)
        .fetch_one(executor)
        .await?;

    Ok(row.get::<i64, _>(0) > 0)
}

/// 按 ID 升序返回全部记录 ID
///
/// 索引的「位置 -> ID」映射由该顺序导出，不得依赖其他遍历顺序
pub async fn list_ids(executor: &SqlitePool) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT id FROM slab ORDER BY id ASC").fetch_all(executor).await?;

    Ok(rows.into_iter().map(|row| row.get(0)).collect())
}

/// 返回缺少有效颜色标签的记录 ID
pub async fn list_ids_untagged(executor: &SqlitePool) -> Result<Vec<i64>> {
    let rows = sqlx::query(
        r#"
        SELECT id FROM slab
        WHERE color IS NULL OR color = '' OR color IN ('#ffffff', '#000000')
        ORDER BY id ASC
        "#,
    )
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|row| row.get(0)).collect())
}

/// 按 ID 升序返回全部记录的已存储向量，f32 小端字节
pub async fn list_vectors(executor: &SqlitePool) -> Result<Vec<(i64, Option<Vec<u8>>)>> {
    let rows =
        sqlx::query("SELECT id, vector FROM slab ORDER BY id ASC").fetch_all(executor).await?;

    Ok(rows.into_iter().map(|row| (row.get(0), row.get(1))).collect())
}

/// 查询记录总数
pub async fn count_slabs(executor: &SqlitePool) -> Result<u64> {
    let row = sqlx::query("SELECT COUNT(*) FROM slab").fetch_one(executor).await?;

    Ok(row.get::<i64, _>(0) as u64)
}

/// 获取图片字节
pub async fn get_image<'c, E>(executor: E, id: i64) -> Result<Option<Vec<u8>>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query("SELECT image FROM slab WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|row| row.get(0)))
}

/// 获取描述性字段
pub async fn get_slab(executor: &SqlitePool, id: i64) -> Result<Option<SlabRecord>> {
    sqlx::query_as(
        r#"
        SELECT id, name, origin, file_name, color, description
        FROM slab WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// 更新颜色标签
pub async fn update_color<'c, E>(executor: E, id: i64, color: &str) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("UPDATE slab SET color = ? WHERE id = ?")
        .bind(color)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}

/// 更新图片字节，水印写回时使用
pub async fn update_image<'c, E>(executor: E, id: i64, image: &[u8]) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("UPDATE slab SET image = ? WHERE id = ?")
        .bind(image)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}

/// 更新存储的特征向量，f32 小端字节
pub async fn update_vector<'c, E>(executor: E, id: i64, vector: &[u8]) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("UPDATE slab SET vector = ? WHERE id = ?")
        .bind(vector)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}
