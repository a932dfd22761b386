use std::io::Cursor;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use image::ImageFormat;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::db::crud;
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::stego;

#[derive(Parser, Debug, Clone)]
pub struct WatermarkCommand {
    /// 操作类型
    #[arg(value_enum)]
    pub action: WatermarkAction,
    /// 水印文本，encode 时必填
    pub text: Option<String>,
    /// 只处理指定 ID，默认处理全部记录
    #[arg(long)]
    pub id: Option<i64>,
    /// 工作线程数量，默认为 CPU 核心数
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum WatermarkAction {
    /// 将水印嵌入图片并写回数据库
    Encode,
    /// 从图片中提取水印并打印
    Decode,
}

impl SubCommandExtend for WatermarkCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = super::open_db(opts).await?;
        let ids = match self.id {
            Some(id) => vec![id],
            None => crud::list_ids(&db).await?,
        };
        let workers = self.workers.unwrap_or_else(num_cpus::get);
        let pipeline = Pipeline::new(workers);

        let report = match self.action {
            WatermarkAction::Encode => {
                let Some(text) = self.text.clone() else {
                    bail!("encode 操作必须提供水印文本");
                };
                info!("开始嵌入水印: {} 条记录", ids.len());
                pipeline
                    .run(
                        &db,
                        ids,
                        move |_id, bytes| {
                            let mut image = image::load_from_memory(&bytes)
                                .map_err(|e| Error::InvalidImage(e.to_string()))?
                                .to_rgb8();
                            stego::encode(&mut image, &text)?;
                            // 写回必须使用无损格式，有损压缩会破坏最低位
                            let mut buf = Cursor::new(vec![]);
                            image::DynamicImage::ImageRgb8(image)
                                .write_to(&mut buf, ImageFormat::Png)?;
                            Ok(buf.into_inner())
                        },
                        |db, id, bytes: Vec<u8>| async move {
                            crud::update_image(&db, id, &bytes).await?;
                            Ok(())
                        },
                    )
                    .await?
            }
            WatermarkAction::Decode => {
                info!("开始提取水印: {} 条记录", ids.len());
                pipeline
                    .run(
                        &db,
                        ids,
                        |_id, bytes| {
                            let image = image::load_from_memory(&bytes)
                                .map_err(|e| Error::InvalidImage(e.to_string()))?
                                .to_rgb8();
                            Ok(stego::decode(&image))
                        },
                        |_db, id, text: String| async move {
                            // 空字符串表示没有水印，不算错误
                            match text.is_empty() {
                                true => println!("{id}\t<no watermark>"),
                                false => println!("{id}\t{text}"),
                            }
                            Ok(())
                        },
                    )
                    .await?
            }
        };

        info!("水印处理完成: 成功 {}，失败 {}", report.succeeded, report.failed);
        for (id, reason) in &report.failures {
            eprintln!("id = {id}: {reason}");
        }
        if !report.is_ok() {
            bail!("{} 行处理失败", report.failed);
        }
        Ok(())
    }
}
