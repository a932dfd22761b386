use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::body::Bytes;
use axum_typed_multipart::{TryFromMultipart, TypedMultipart};
use log::info;
use serde::Deserialize;

use super::error::Result;
use super::state::AppState;
use crate::pipeline::PipelineReport;
use crate::searcher::{QueryResponse, StatusReport};

/// 上传搜索默认返回的结果数量
const UPLOAD_COUNT: usize = 6;

#[derive(Deserialize)]
pub struct SimilarParams {
    /// 返回的结果数量
    pub k: Option<usize>,
}

/// 按记录 ID 搜索相似石材
pub async fn similar_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<QueryResponse>> {
    let k = params.k.unwrap_or(state.search.count);
    let response = state.searcher.similar_to(id, k).await?;
    Ok(Json(response))
}

#[derive(TryFromMultipart)]
pub struct SearchRequest {
    /// 上传的图片
    pub image: Bytes,
    /// 返回的结果数量
    pub k: Option<usize>,
}

/// 按上传图片搜索相似石材
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<SearchRequest>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();
    info!("正在搜索上传图片: {} 字节", data.image.len());

    let k = data.k.unwrap_or(UPLOAD_COUNT);
    let response =
        state.searcher.similar_to_upload(&data.image, k, state.search.candidates).await?;

    info!("搜索完成: {} 条结果，{}ms", response.result.len(), start.elapsed().as_millis());
    Ok(Json(response))
}

/// 查询数据库与索引的对齐状态
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Result<Json<StatusReport>> {
    Ok(Json(state.searcher.status().await?))
}

#[derive(Deserialize, Default)]
pub struct RebuildRequest {
    /// 工作线程数量
    pub workers: Option<usize>,
}

/// 重建索引，期间查询继续使用旧快照
pub async fn rebuild_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RebuildRequest>>,
) -> Result<Json<PipelineReport>> {
    let workers = body.and_then(|b| b.workers).unwrap_or_else(num_cpus::get);
    let report = state.searcher.rebuild(workers).await?;
    Ok(Json(report))
}
