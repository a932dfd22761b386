use thiserror::Error as ThisError;

/// 领域错误
#[derive(Debug, ThisError)]
pub enum Error {
    /// 图片字节无法解码
    #[error("无法解码图片: {0}")]
    InvalidImage(String),

    /// 向量维数与索引维数不一致
    #[error("向量维数不匹配: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 水印内容超出图片容量
    #[error("水印内容超出容量: 需要 {needed} bit，容量 {capacity} bit")]
    PayloadTooLarge { needed: usize, capacity: usize },

    /// 记录不存在
    #[error("记录不存在: id = {0}")]
    NotFound(i64),

    /// 索引位置越界
    #[error("索引位置越界: {position} >= {len}")]
    OutOfRange { position: usize, len: usize },

    /// 数据库持续忙，重试次数用尽
    #[error("数据库忙，重试 {0} 次后放弃")]
    StoreBusy(u32),
}

/// 判断 sqlx 错误是否为「数据库忙」一类的瞬态错误
///
/// SQLITE_BUSY(5) 和 SQLITE_LOCKED(6) 重试即可恢复，其余错误不应重试
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(e) => {
            if let Some(code) = e.code() {
                if code == "5" || code == "6" {
                    return true;
                }
            }
            let message = e.message().to_ascii_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_busy() {
        assert!(is_busy(&sqlx::Error::PoolTimedOut));
        assert!(!is_busy(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_store_busy_message() {
        let err = Error::StoreBusy(5);
        assert!(err.to_string().contains("重试"));
    }
}
