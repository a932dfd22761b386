use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::StreamExt;
use indicatif::ProgressBar;
use log::{debug, warn};
use rand::Rng;
use tokio::sync::mpsc::channel;
use tokio::task::{JoinHandle, spawn_blocking};

use crate::db::{Database, crud};
use crate::error::{self, Error};
use crate::utils::pb_style;

/// 写入失败的最大重试次数
const WRITE_ATTEMPTS: u32 = 5;
/// 首次重试的退避时长，之后指数增长并叠加随机抖动
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// 批处理任务报告
///
/// 单行失败不会中断任务，对外结果是成功/失败计数而不是单个布尔值
#[derive(Debug, Default, serde::Serialize)]
pub struct PipelineReport {
    /// 成功行数
    pub succeeded: usize,
    /// 失败行数
    pub failed: usize,
    /// 失败的行及原因
    pub failures: Vec<(i64, String)>,
}

impl PipelineReport {
    pub fn is_ok(&self) -> bool {
        self.failed == 0
    }

    fn fail(&mut self, id: i64, err: anyhow::Error) {
        warn!("处理失败: id = {}: {}", id, err);
        self.failed += 1;
        self.failures.push((id, err.to_string()));
    }
}

/// 并发批处理管道
///
/// 读取阶段只枚举目标 ID；每次取行都从连接池签出独立连接；
/// 变换在固定大小的 rayon 线程池上并行执行；所有写入语句
/// 由唯一的写入者串行执行，遇到数据库忙时退避重试。
/// 索引重建、颜色回填、水印批处理共用同一个形状。
pub struct Pipeline {
    workers: usize,
}

impl Pipeline {
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }

    /// 对 ids 中的每一行执行 transform 并写回
    ///
    /// # Arguments
    ///
    /// * `transform` - 行变换，输入图片字节，在工作线程上执行
    /// * `write` - 写回操作，由单一写入者执行
    pub async fn run<T, R, W, Fut>(
        &self,
        db: &Database,
        ids: Vec<i64>,
        transform: T,
        write: W,
    ) -> Result<PipelineReport>
    where
        T: Fn(i64, Vec<u8>) -> Result<R> + Send + Sync + 'static,
        R: Clone + Send + 'static,
        W: Fn(Database, i64, R) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let total = ids.len();
        let pb = ProgressBar::new(total as u64).with_style(pb_style());

        let (job_tx, mut job_rx) = channel::<(i64, Vec<u8>)>(self.workers * 2);
        let (out_tx, mut out_rx) = channel::<(i64, Result<R>)>(self.workers * 2);

        // 读取阶段：枚举 ID，为每行签出独立连接取出图片
        let task_fetch: JoinHandle<Result<()>> = tokio::spawn({
            let db = db.clone();
            let out_tx = out_tx.clone();
            let workers = self.workers;
            async move {
                let mut rows = futures::stream::iter(ids.into_iter().map(|id| {
                    let db = db.clone();
                    async move {
                        let row = async {
                            let mut conn = db.acquire().await?;
                            crud::get_image(&mut *conn, id).await
                        }
                        .await;
                        (id, row)
                    }
                }))
                .buffer_unordered(workers);

                while let Some((id, row)) = rows.next().await {
                    match row {
                        Ok(Some(bytes)) => {
                            if job_tx.send((id, bytes)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            let _ = out_tx.send((id, Err(Error::NotFound(id).into()))).await;
                        }
                        Err(e) => {
                            let _ = out_tx.send((id, Err(e.into()))).await;
                        }
                    }
                }
                Ok(())
            }
        });

        // 变换阶段：固定大小的线程池并行执行 CPU 变换
        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.workers).build()?;
        let task_cpu = spawn_blocking({
            let out_tx = out_tx.clone();
            move || {
                let out_tx = &out_tx;
                let transform = &transform;
                pool.scope(|s| {
                    while let Some((id, bytes)) = job_rx.blocking_recv() {
                        s.spawn(move |_| {
                            let result = transform(id, bytes);
                            let _ = out_tx.blocking_send((id, result));
                        });
                    }
                });
            }
        });

        // 其余发送端都在上面两个任务里，通道关闭即全部完成
        drop(out_tx);

        // 写入阶段：单消费者串行执行全部写入
        let mut report = PipelineReport::default();
        while let Some((id, result)) = out_rx.recv().await {
            match result {
                Ok(r) => match write_with_retry(db, id, r, &write).await {
                    Ok(()) => report.succeeded += 1,
                    Err(e) => report.fail(id, e),
                },
                Err(e) => report.fail(id, e),
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        task_fetch.await??;
        task_cpu.await?;

        debug!("批处理完成: 成功 {}，失败 {}", report.succeeded, report.failed);
        debug_assert_eq!(report.succeeded + report.failed, total);
        Ok(report)
    }
}

/// 执行一次写入，数据库忙时指数退避加抖动重试
async fn write_with_retry<R, W, Fut>(db: &Database, id: i64, value: R, write: &W) -> Result<()>
where
    R: Clone,
    W: Fn(Database, i64, R) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut delay = BACKOFF_BASE;
    for attempt in 1..=WRITE_ATTEMPTS {
        match write(db.clone(), id, value.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let busy = e.downcast_ref::<sqlx::Error>().is_some_and(error::is_busy);
                if !busy {
                    return Err(e);
                }
                if attempt == WRITE_ATTEMPTS {
                    return Err(Error::StoreBusy(WRITE_ATTEMPTS).into());
                }
                let jitter = rand::rng().random_range(0..100);
                let sleep = delay + Duration::from_millis(jitter);
                warn!("数据库忙: id = {}，{}ms 后重试", id, sleep.as_millis());
                tokio::time::sleep(sleep).await;
                delay *= 2;
            }
        }
    }
    Err(anyhow!("unreachable"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::db::init_db;

    async fn test_db(rows: usize) -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = init_db(dir.path().join("test.db")).await.unwrap();
        for i in 0..rows {
            let hash = blake3::hash(format!("row-{i}").as_bytes());
            crud::add_slab(
                &db,
                &format!("slab-{i}"),
                None,
                &format!("slab-{i}.png"),
                hash.as_bytes(),
                &[0xAB; 16],
            )
            .await
            .unwrap();
        }
        (dir, db)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_all_rows_processed_with_transient_failures() {
        let (_dir, db) = test_db(100).await;
        let ids = crud::list_ids(&db).await.unwrap();
        assert_eq!(ids.len(), 100);

        // 每 10 行注入一次瞬态「数据库忙」，前两次写入失败
        let attempts: Arc<Mutex<HashMap<i64, u32>>> = Arc::new(Mutex::new(HashMap::new()));
        let written: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(vec![]));

        let report = Pipeline::new(8)
            .run(
                &db,
                ids.clone(),
                |_id, bytes| Ok(bytes.len()),
                |db, id, _len| {
                    let attempts = attempts.clone();
                    let written = written.clone();
                    async move {
                        if id % 10 == 0 {
                            let mut attempts = attempts.lock().unwrap();
                            let n = attempts.entry(id).or_insert(0);
                            *n += 1;
                            if *n <= 2 {
                                return Err(sqlx::Error::PoolTimedOut.into());
                            }
                        }
                        crud::update_color(&db, id, "#123456").await?;
                        written.lock().unwrap().push(id);
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded, 100);
        assert_eq!(report.failed, 0);

        // 每行恰好写入一次，没有重复也没有遗漏
        let mut written = written.lock().unwrap().clone();
        written.sort_unstable();
        assert_eq!(written, ids);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_per_row_failures_are_isolated() {
        let (_dir, db) = test_db(20).await;
        let ids = crud::list_ids(&db).await.unwrap();

        let report = Pipeline::new(4)
            .run(
                &db,
                ids,
                |id, _bytes| {
                    if id % 2 == 1 { Err(anyhow!("坏行")) } else { Ok(()) }
                },
                |db, id, _: ()| async move {
                    crud::update_color(&db, id, "#000001").await?;
                    Ok(())
                },
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded + report.failed, 20);
        assert_eq!(report.failed, 10);
        assert_eq!(report.failures.len(), 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_ceiling_surfaces_store_busy() {
        let (_dir, db) = test_db(1).await;
        let ids = crud::list_ids(&db).await.unwrap();

        let report = Pipeline::new(2)
            .run(
                &db,
                ids,
                |_id, _bytes| Ok(()),
                |_db, _id, _: ()| async move { Err(sqlx::Error::PoolTimedOut.into()) },
            )
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(report.failures[0].1.contains("重试"));
    }
}
