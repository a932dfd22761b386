use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use log::info;

use crate::Searcher;
use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, Opts};
use crate::features::FeatureExtractor;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    /// 工作线程数量，默认为 CPU 核心数
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = super::open_db(opts).await?;
        let extractor = Arc::new(FeatureExtractor::new(&self.feature));
        let searcher = Searcher::open(&opts.conf_dir, db, extractor).await?;

        let workers = self.workers.unwrap_or_else(num_cpus::get);
        let report = searcher.rebuild(workers).await?;

        info!("构建索引完成: 成功 {}，失败 {}", report.succeeded, report.failed);
        println!("succeeded: {}, failed: {}", report.succeeded, report.failed);
        for (id, reason) in &report.failures {
            eprintln!("id = {id}: {reason}");
        }
        if !report.is_ok() {
            bail!("{} 行构建失败，索引未对齐", report.failed);
        }
        Ok(())
    }
}
