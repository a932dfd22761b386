use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use walkdir::WalkDir;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::db::crud;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// 图片所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png")]
    pub suffix: String,
    /// 为本批图片统一记录的产地
    #[arg(long)]
    pub origin: Option<String>,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = super::open_db(opts).await?;
        let suffixes: Vec<String> =
            self.suffix.split(',').map(|s| s.trim().to_ascii_lowercase()).collect();

        let mut added = 0;
        let mut skipped = 0;

        for entry in WalkDir::new(&self.path).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension().map(|s| s.to_string_lossy().to_ascii_lowercase())
            else {
                continue;
            };
            if !suffixes.contains(&ext) {
                continue;
            }

            let bytes = std::fs::read(path)?;
            // 提前拒绝无法解码的文件，避免把坏图入库
            if image::load_from_memory(&bytes).is_err() {
                warn!("无法解码图片，已跳过: {}", path.display());
                continue;
            }

            let hash = blake3::hash(&bytes);
            if crud::check_hash(&db, hash.as_bytes()).await? {
                skipped += 1;
                continue;
            }

            let file_name = path.file_name().unwrap_or_default().to_string_lossy();
            let name = path.file_stem().unwrap_or_default().to_string_lossy();
            let id = crud::add_slab(
                &db,
                &name,
                self.origin.as_deref(),
                &file_name,
                hash.as_bytes(),
                &bytes,
            )
            .await?;
            info!("已添加: id = {}，{}", id, path.display());
            added += 1;
        }

        info!("添加完成: 新增 {}，跳过 {}", added, skipped);
        println!("added: {added}, skipped: {skipped}");
        Ok(())
    }
}
