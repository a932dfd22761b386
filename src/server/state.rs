use std::sync::Arc;

use crate::Searcher;
use crate::config::SearchOptions;

/// 应用状态
pub struct AppState {
    /// 相似搜索服务
    pub searcher: Arc<Searcher>,
    /// 搜索配置选项
    pub search: SearchOptions,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(searcher: Arc<Searcher>, search: SearchOptions) -> Arc<Self> {
        Arc::new(AppState { searcher, search })
    }
}
