use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use image::RgbImage;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::db::crud;
use crate::error::Error;
use crate::pipeline::Pipeline;

#[derive(Parser, Debug, Clone)]
pub struct TagCommand {
    /// 颜色提取算法
    #[arg(long, value_enum, default_value_t = ColorAlgorithm::Dominant)]
    pub algorithm: ColorAlgorithm,
    /// 工作线程数量，默认为 CPU 核心数
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,
    /// 重新计算所有记录，包括已有颜色标签的
    #[arg(long)]
    pub force: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ColorAlgorithm {
    /// 出现次数最多的有效颜色
    Dominant,
    /// 亮度最高的有效颜色
    Brightest,
}

impl SubCommandExtend for TagCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = super::open_db(opts).await?;
        let ids = if self.force {
            crud::list_ids(&db).await?
        } else {
            crud::list_ids_untagged(&db).await?
        };
        info!("需要计算颜色标签的记录: {} 条", ids.len());

        let algorithm = self.algorithm;
        let report = Pipeline::new(self.workers.unwrap_or_else(num_cpus::get))
            .run(
                &db,
                ids,
                move |_id, bytes| {
                    let image = image::load_from_memory(&bytes)
                        .map_err(|e| Error::InvalidImage(e.to_string()))?
                        .to_rgb8();
                    let color = match algorithm {
                        ColorAlgorithm::Dominant => dominant_color(&image),
                        ColorAlgorithm::Brightest => brightest_color(&image),
                    };
                    color.map(hex).ok_or_else(|| anyhow!("没有有效颜色"))
                },
                |db, id, color: String| async move {
                    crud::update_color(&db, id, &color).await?;
                    Ok(())
                },
            )
            .await?;

        info!("颜色标签完成: 成功 {}，失败 {}", report.succeeded, report.failed);
        println!("succeeded: {}, failed: {}", report.succeeded, report.failed);
        if !report.is_ok() {
            bail!("{} 行处理失败", report.failed);
        }
        Ok(())
    }
}

/// 纯白和纯黑视为背景，不参与颜色判定
fn is_valid(color: [u8; 3]) -> bool {
    color != [255, 255, 255] && color != [0, 0, 0]
}

/// 出现次数最多的有效颜色
fn dominant_color(image: &RgbImage) -> Option<[u8; 3]> {
    let mut counts: HashMap<[u8; 3], u32> = HashMap::new();
    for pixel in image.pixels() {
        if is_valid(pixel.0) {
            *counts.entry(pixel.0).or_insert(0) += 1;
        }
    }
    counts.into_iter().max_by_key(|&(_, count)| count).map(|(color, _)| color)
}

/// 亮度最高的有效颜色，亮度按 BT.601 加权
fn brightest_color(image: &RgbImage) -> Option<[u8; 3]> {
    image
        .pixels()
        .filter(|p| is_valid(p.0))
        .max_by(|a, b| luma(a.0).total_cmp(&luma(b.0)))
        .map(|p| p.0)
}

fn luma([r, g, b]: [u8; 3]) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn hex([r, g, b]: [u8; 3]) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn test_dominant_ignores_background() {
        let mut image = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        image.put_pixel(0, 0, Rgb([10, 20, 30]));
        image.put_pixel(1, 0, Rgb([10, 20, 30]));
        image.put_pixel(2, 0, Rgb([200, 0, 0]));
        assert_eq!(dominant_color(&image), Some([10, 20, 30]));
    }

    #[test]
    fn test_brightest() {
        let mut image = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        image.put_pixel(0, 0, Rgb([50, 50, 50]));
        image.put_pixel(1, 0, Rgb([10, 240, 10]));
        assert_eq!(brightest_color(&image), Some([10, 240, 10]));
    }

    #[test]
    fn test_all_background_yields_none() {
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        assert_eq!(dominant_color(&image), None);
        assert_eq!(brightest_color(&image), None);
    }

    #[test]
    fn test_hex_format() {
        assert_eq!(hex([171, 205, 239]), "#abcdef");
    }
}
