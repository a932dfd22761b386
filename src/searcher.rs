use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::ConfDir;
use crate::db::{Database, SlabRecord, crud};
use crate::error::Error;
use crate::features::FeatureExtractor;
use crate::index::{FlatIndex, Metric, dot};
use crate::pipeline::{Pipeline, PipelineReport};

/// 索引快照
///
/// 位置映射在构建/加载时从数据库按 ID 升序导出，
/// 不冗余存储，也不信任任何其他遍历顺序
struct Snapshot {
    index: FlatIndex,
    /// 位置 p 对应的记录 ID，升序
    ids: Vec<i64>,
}

impl Snapshot {
    fn position_of(&self, id: i64) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }
}

/// 索引可用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// 索引可用
    Ready,
    /// 索引文件不存在，尚未构建
    Missing,
    /// 索引与数据库行数不一致，相似搜索已禁用，需要重建
    Misaligned,
}

enum State {
    Ready(Arc<Snapshot>),
    Missing,
    Misaligned { index: usize, store: usize },
}

/// 相似搜索结果
#[derive(Debug, Serialize)]
pub struct SimilarSlab {
    #[serde(flatten)]
    pub slab: SlabRecord,
    /// 余弦相似度
    pub score: f32,
}

/// 查询响应
///
/// 索引不可用时返回空结果加状态标记，而不是错误，浏览不受影响
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub status: IndexStatus,
    pub result: Vec<SimilarSlab>,
}

impl QueryResponse {
    fn unavailable(status: IndexStatus) -> Self {
        Self { status, result: vec![] }
    }
}

/// 数据库与索引的对齐状态
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// 数据库行数
    pub rows: u64,
    /// 索引向量数
    pub indexed: usize,
    /// 索引度量
    pub metric: Option<String>,
    pub status: IndexStatus,
}

/// 相似搜索服务
///
/// 查询只读，重建期间继续响应旧快照，新索引构建完成后整体替换
pub struct Searcher {
    db: Database,
    extractor: Arc<FeatureExtractor>,
    index_path: PathBuf,
    state: RwLock<State>,
    /// 重建是排他操作，并发调用在此串行化
    rebuild_lock: AsyncMutex<()>,
}

impl Searcher {
    /// 打开搜索服务并执行启动对齐检查
    pub async fn open(
        conf_dir: &ConfDir,
        db: Database,
        extractor: Arc<FeatureExtractor>,
    ) -> Result<Self> {
        let searcher = Self {
            db,
            extractor,
            index_path: conf_dir.index(),
            state: RwLock::new(State::Missing),
            rebuild_lock: AsyncMutex::new(()),
        };

        if searcher.index_path.exists() {
            let index = FlatIndex::load(&searcher.index_path, searcher.extractor.dim())?;
            let ids = crud::list_ids(&searcher.db).await?;
            searcher.install(index, ids);
        } else if let Some((index, ids)) = searcher.index_from_store().await? {
            info!("索引文件不存在，使用数据库中已存储的向量组装快照");
            searcher.install(index, ids);
        } else {
            info!("索引文件不存在，相似搜索不可用，请先运行 build");
        }

        Ok(searcher)
    }

    /// 尝试用数据库中已存储的向量组装索引
    ///
    /// 任何一行缺失向量或维数不符都说明存储的向量不可信，返回 None
    async fn index_from_store(&self) -> Result<Option<(FlatIndex, Vec<i64>)>> {
        let rows = crud::list_vectors(&self.db).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let dim = self.extractor.dim();
        let mut index = FlatIndex::new(dim, Metric::InnerProduct);
        let mut ids = Vec::with_capacity(rows.len());
        for (id, vector) in rows {
            let Some(bytes) = vector else {
                return Ok(None);
            };
            if bytes.len() != dim * 4 {
                return Ok(None);
            }
            let vector: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            index.add(&vector)?;
            ids.push(id);
        }
        Ok(Some((index, ids)))
    }

    /// 安装新快照，并重新检查对齐不变量
    ///
    /// 行数不一致视为可检测的损坏：告警并禁用相似搜索，绝不靠截断或补齐「修复」
    fn install(&self, index: FlatIndex, ids: Vec<i64>) {
        let state = if index.ntotal() == ids.len() {
            info!("索引就绪: {} 条向量，度量 {}", index.ntotal(), index.metric());
            State::Ready(Arc::new(Snapshot { index, ids }))
        } else {
            warn!("索引未对齐: 索引 {} 条，数据库 {} 条，相似搜索已禁用", index.ntotal(), ids.len());
            State::Misaligned { index: index.ntotal(), store: ids.len() }
        };
        *self.state.write().unwrap() = state;
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, IndexStatus> {
        match &*self.state.read().unwrap() {
            State::Ready(s) => Ok(s.clone()),
            State::Missing => Err(IndexStatus::Missing),
            State::Misaligned { .. } => Err(IndexStatus::Misaligned),
        }
    }

    /// 按已有记录 ID 搜索相似石材
    ///
    /// 查询 k+1 个近邻后按位置剔除自身
    pub async fn similar_to(&self, id: i64, k: usize) -> Result<QueryResponse> {
        let snapshot = match self.snapshot() {
            Ok(s) => s,
            Err(status) => return Ok(QueryResponse::unavailable(status)),
        };

        let position = snapshot.position_of(id).ok_or(Error::NotFound(id))?;
        let query = snapshot.index.reconstruct(position)?.to_vec();
        let hits = snapshot.index.search(&query, k + 1)?;

        let mut result = vec![];
        for (p, score) in hits {
            if p == position || result.len() == k {
                continue;
            }
            if let Some(slab) = crud::get_slab(&self.db, snapshot.ids[p]).await? {
                result.push(SimilarSlab { slab, score: as_cosine(snapshot.index.metric(), score) });
            }
        }

        Ok(QueryResponse { status: IndexStatus::Ready, result })
    }

    /// 按上传图片搜索相似石材
    ///
    /// 先取 candidates 个候选，再按精确余弦相似度重排，
    /// 保证返回顺序与汇报分数一致
    pub async fn similar_to_upload(
        &self,
        bytes: &[u8],
        k: usize,
        candidates: usize,
    ) -> Result<QueryResponse> {
        let snapshot = match self.snapshot() {
            Ok(s) => s,
            Err(status) => return Ok(QueryResponse::unavailable(status)),
        };

        let query = self.extractor.extract(bytes)?;
        if query.len() != snapshot.index.dim() {
            return Err(Error::DimensionMismatch {
                expected: snapshot.index.dim(),
                actual: query.len(),
            }
            .into());
        }

        let candidates = snapshot.index.search(&query, candidates.max(k))?;
        let mut reranked = Vec::with_capacity(candidates.len());
        for (p, _) in candidates {
            reranked.push((p, dot(&query, snapshot.index.reconstruct(p)?)));
        }
        reranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));
        reranked.truncate(k);

        let mut result = vec![];
        for (p, similarity) in reranked {
            if let Some(slab) = crud::get_slab(&self.db, snapshot.ids[p]).await? {
                result.push(SimilarSlab { slab, score: similarity });
            }
        }

        Ok(QueryResponse { status: IndexStatus::Ready, result })
    }

    /// 重建索引
    ///
    /// 通过批处理管道重新提取全部特征，向量按 ID 升序写入新索引，
    /// 持久化后原子替换快照。重建期间查询继续使用旧快照。
    pub async fn rebuild(&self, workers: usize) -> Result<PipelineReport> {
        // 同一时刻只允许一个重建，后来者排队等待而不是并发写同一个索引文件
        let _guard = self.rebuild_lock.lock().await;

        let ids = crud::list_ids(&self.db).await?;
        info!("开始重建索引: {} 条记录", ids.len());

        let extractor = self.extractor.clone();
        let collected: Arc<Mutex<Vec<(i64, Vec<f32>)>>> = Arc::new(Mutex::new(vec![]));

        let report = Pipeline::new(workers)
            .run(
                &self.db,
                ids,
                move |_id, bytes| Ok(extractor.extract(&bytes)?),
                |db, id, vector: Vec<f32>| {
                    let collected = collected.clone();
                    async move {
                        let bytes: Vec<u8> =
                            vector.iter().flat_map(|v| v.to_le_bytes()).collect();
                        crud::update_vector(&db, id, &bytes).await?;
                        collected.lock().unwrap().push((id, vector));
                        Ok(())
                    }
                },
            )
            .await?;

        let mut rows = collected.lock().unwrap().drain(..).collect::<Vec<_>>();
        rows.sort_unstable_by_key(|(id, _)| *id);

        let mut index = FlatIndex::new(self.extractor.dim(), Metric::InnerProduct);
        let mut index_ids = Vec::with_capacity(rows.len());
        for (id, vector) in &rows {
            index.add(vector)?;
            index_ids.push(*id);
        }
        index.save(&self.index_path)?;

        // 对齐检查以数据库当前行数为准，提取失败的行会让索引进入未对齐状态
        let store_ids = crud::list_ids(&self.db).await?;
        if index_ids == store_ids {
            self.install(index, index_ids);
        } else {
            warn!("索引未对齐: 索引 {} 条，数据库 {} 条，相似搜索已禁用", index_ids.len(), store_ids.len());
            *self.state.write().unwrap() =
                State::Misaligned { index: index_ids.len(), store: store_ids.len() };
        }

        Ok(report)
    }

    /// 当前对齐状态
    pub async fn status(&self) -> Result<StatusReport> {
        let rows = crud::count_slabs(&self.db).await?;
        let report = match &*self.state.read().unwrap() {
            State::Ready(s) => StatusReport {
                rows,
                indexed: s.index.ntotal(),
                metric: Some(s.index.metric().to_string()),
                status: IndexStatus::Ready,
            },
            State::Missing => {
                StatusReport { rows, indexed: 0, metric: None, status: IndexStatus::Missing }
            }
            State::Misaligned { index, .. } => StatusReport {
                rows,
                indexed: *index,
                metric: None,
                status: IndexStatus::Misaligned,
            },
        };
        Ok(report)
    }
}

/// 把索引度量下的分数统一换算为余弦相似度
///
/// 向量均为单位向量，欧氏距离平方 d 与余弦 c 满足 d = 2 - 2c
fn as_cosine(metric: Metric, score: f32) -> f32 {
    match metric {
        Metric::InnerProduct => score,
        Metric::L2 => 1.0 - score / 2.0,
    }
}
