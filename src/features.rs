use std::sync::{Arc, OnceLock};

use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::prelude::*;

use crate::config::FeatureOptions;
use crate::error::Error;

/// 嵌入向量维数，与索引维数一致
pub const EMBED_DIM: usize = 2048;
/// 每通道直方图桶数
pub const HIST_BINS: usize = 32;
/// 三通道直方图拼接后的维数
pub const HIST_DIM: usize = HIST_BINS * 3;

/// 直方图计算前图片缩放到的边长
const HIST_TILE: u32 = 64;
/// 内置骨干网络的输入边长
const EMBED_TILE: u32 = 64;

/// 冻结的嵌入骨干网络
///
/// 只约定输出维数，不约定模型结构，索引和查询逻辑不感知具体实现
pub trait Embedder: Send + Sync {
    /// 输出向量维数
    fn dim(&self) -> usize;
    /// 计算图片的嵌入向量，返回单位向量
    fn embed(&self, image: &RgbImage) -> Vec<f32>;
}

static EMBEDDER: OnceLock<Arc<dyn Embedder>> = OnceLock::new();

/// 注入进程级骨干网络，只允许初始化一次，测试中可替换为桩实现
pub fn init_embedder(embedder: Arc<dyn Embedder>) {
    let _ = EMBEDDER.set(embedder);
}

/// 获取进程级骨干网络，未注入时回落到内置实现
pub fn default_embedder() -> Arc<dyn Embedder> {
    EMBEDDER.get_or_init(|| Arc::new(ProjectionEmbedder::new(EMBED_DIM))).clone()
}

/// 内置骨干网络：固定种子的稀疏随机投影
///
/// 将缩放后的像素向量投影到 EMBED_DIM 维。权重在构造时一次生成，
/// 推理过程没有隐藏状态，同一张图片的输出永远一致。
pub struct ProjectionEmbedder {
    dim: usize,
    /// 每个输出维的稀疏权重: (输入下标, 符号)
    weights: Vec<Vec<(u32, f32)>>,
}

impl ProjectionEmbedder {
    const SEED: u64 = 0x51ab_5ea6;
    /// 每个输出维采样的输入项数量
    const TERMS: usize = 192;

    pub fn new(dim: usize) -> Self {
        let input_dim = (EMBED_TILE * EMBED_TILE * 3) as u32;
        let mut rng = StdRng::seed_from_u64(Self::SEED);
        let weights = (0..dim)
            .map(|_| {
                (0..Self::TERMS)
                    .map(|_| {
                        let idx = rng.random_range(0..input_dim);
                        let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
                        (idx, sign)
                    })
                    .collect()
            })
            .collect();
        Self { dim, weights }
    }
}

impl Embedder for ProjectionEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, image: &RgbImage) -> Vec<f32> {
        let tile = imageops::resize(image, EMBED_TILE, EMBED_TILE, FilterType::Triangle);
        let pixels: Vec<f32> = tile.as_raw().iter().map(|&v| v as f32 / 255.0).collect();

        let mut out = Vec::with_capacity(self.dim);
        for terms in &self.weights {
            let mut acc = 0.0;
            for &(idx, sign) in terms {
                acc += sign * pixels[idx as usize];
            }
            out.push(acc);
        }
        l2_normalize(&mut out);
        out
    }
}

/// 特征融合提取器
///
/// 图片字节 -> 定长融合向量，纯函数，失败时不会产生部分结果
pub struct FeatureExtractor {
    embedder: Arc<dyn Embedder>,
    color_weight: f32,
}

impl FeatureExtractor {
    pub fn new(opts: &FeatureOptions) -> Self {
        Self::with_embedder(default_embedder(), opts.color_weight)
    }

    pub fn with_embedder(embedder: Arc<dyn Embedder>, color_weight: f32) -> Self {
        Self { embedder, color_weight }
    }

    /// 融合向量的维数
    pub fn dim(&self) -> usize {
        self.embedder.dim()
    }

    /// 提取融合特征向量
    ///
    /// 直方图权重为 color_weight，嵌入权重为 1 - color_weight，
    /// 融合后重新归一化为单位向量
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<f32>, Error> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::InvalidImage(e.to_string()))?
            .to_rgb8();
        let image = preprocess(&image);

        let hist = color_histogram(&image);
        let embedding = self.embedder.embed(&image);

        let mut fused = vec![0.0f32; embedding.len()];
        for (i, v) in embedding.iter().enumerate() {
            let h = if i < HIST_DIM { hist[i] } else { 0.0 };
            fused[i] = self.color_weight * h + (1.0 - self.color_weight) * v;
        }
        l2_normalize(&mut fused);
        Ok(fused)
    }
}

/// 归一化预处理，降低不同拍摄来源的光照差异
///
/// 对比度增强 -> 锐化 -> 轻微高斯模糊去噪
fn preprocess(image: &RgbImage) -> RgbImage {
    let image = imageops::contrast(image, 8.0);
    let image = imageops::filter3x3(&image, &[0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0]);
    imageops::blur(&image, 0.5)
}

/// 计算归一化颜色直方图，三通道各 HIST_BINS 桶，拼接后总和为 1
fn color_histogram(image: &RgbImage) -> [f32; HIST_DIM] {
    let tile = imageops::resize(image, HIST_TILE, HIST_TILE, FilterType::Triangle);
    let mut hist = [0.0f32; HIST_DIM];
    for pixel in tile.pixels() {
        for (c, &v) in pixel.0.iter().enumerate() {
            hist[c * HIST_BINS + v as usize * HIST_BINS / 256] += 1.0;
        }
    }
    let sum: f32 = hist.iter().sum();
    if sum > 0.0 {
        for v in hist.iter_mut() {
            *v /= sum;
        }
    }
    hist
}

/// 原地 L2 归一化，全零向量保持原样
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::ImageFormat;

    use super::*;

    fn encode_png(image: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(vec![]);
        image::DynamicImage::ImageRgb8(image.clone()).write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn sample_image() -> Vec<u8> {
        let image = RgbImage::from_fn(48, 48, |x, y| {
            image::Rgb([(x * 5) as u8, (y * 5) as u8, ((x + y) * 2) as u8])
        });
        encode_png(&image)
    }

    #[test]
    fn test_extract_unit_norm() {
        let extractor = FeatureExtractor::new(&FeatureOptions { color_weight: 0.7 });
        let v = extractor.extract(&sample_image()).unwrap();
        assert_eq!(v.len(), EMBED_DIM);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_extract_deterministic() {
        let extractor = FeatureExtractor::new(&FeatureOptions { color_weight: 0.7 });
        let a = extractor.extract(&sample_image()).unwrap();
        let b = extractor.extract(&sample_image()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_image() {
        let extractor = FeatureExtractor::new(&FeatureOptions { color_weight: 0.7 });
        let result = extractor.extract(b"not an image");
        assert!(matches!(result, Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_histogram_sums_to_one() {
        let image = RgbImage::from_pixel(32, 32, image::Rgb([100, 150, 200]));
        let hist = color_histogram(&image);
        let sum: f32 = hist.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        // 退化情况：全零向量不做归一化
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }
}
