use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use log::warn;

use crate::Searcher;
use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, Opts, SearchOptions};
use crate::features::FeatureExtractor;
use crate::searcher::{IndexStatus, QueryResponse};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 按已有记录 ID 搜索
    #[arg(long, conflicts_with = "image")]
    pub id: Option<i64>,
    /// 按图片文件搜索
    pub image: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = super::open_db(opts).await?;
        let extractor = Arc::new(FeatureExtractor::new(&self.feature));
        let searcher = Searcher::open(&opts.conf_dir, db, extractor).await?;

        let response = match (self.id, &self.image) {
            (Some(id), _) => searcher.similar_to(id, self.search.count).await?,
            (None, Some(image)) => {
                let bytes = std::fs::read(image)?;
                searcher.similar_to_upload(&bytes, self.search.count, self.search.candidates).await?
            }
            (None, None) => bail!("必须指定 --id 或图片路径"),
        };

        if response.status != IndexStatus::Ready {
            warn!("索引不可用: {:?}", response.status);
        }
        print_result(&response, self)
    }
}

fn print_result(response: &QueryResponse, opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?)
        }
        OutputFormat::Table => {
            for hit in &response.result {
                println!("{:.4}\t{}\t{}", hit.score, hit.slab.id, hit.slab.name);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
