use serde::Serialize;

/// 石材记录的描述性字段，不含图片本体
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SlabRecord {
    /// 记录 ID
    pub id: i64,
    /// 石材名称
    pub name: String,
    /// 产地
    pub origin: Option<String>,
    /// 原始文件名
    pub file_name: String,
    /// 颜色标签，十六进制 #rrggbb
    pub color: Option<String>,
    /// 文字描述
    pub description: Option<String>,
}
