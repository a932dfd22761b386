use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::Parser;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = directories::ProjectDirs::from("", "slabsearch", "slabsearch")
        .expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct FeatureOptions {
    /// 颜色直方图在融合向量中的权重，范围 (0, 1)
    ///
    /// 修改该值会使已存储的全部向量失效，必须重建索引
    #[arg(long, value_name = "WEIGHT", default_value_t = 0.7, value_parser = parse_color_weight)]
    pub color_weight: f32,
}

/// 校验 color_weight 落在开区间 (0, 1) 内
fn parse_color_weight(s: &str) -> Result<f32, String> {
    let weight: f32 = s.parse().map_err(|e| format!("{e}"))?;
    if weight > 0.0 && weight < 1.0 {
        Ok(weight)
    } else {
        Err(format!("权重必须位于 (0, 1) 区间: {weight}"))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的相似结果数量
    #[arg(short, long, value_name = "K", default_value_t = 5)]
    pub count: usize,
    /// 上传搜索时第一阶段的候选数量，之后按余弦相似度重排
    #[arg(long, value_name = "N", default_value_t = 20)]
    pub candidates: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "slabsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// slabsearch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 添加图片到数据库
    Add(AddCommand),
    /// 重新提取全部特征并构建索引
    Build(BuildCommand),
    /// 按图片 ID 或上传图片搜索相似石材
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 为缺少颜色标签的图片计算主色调
    Tag(TagCommand),
    /// 批量嵌入或提取图片水印
    Watermark(WatermarkCommand),
    /// 显示数据库与索引的对齐状态
    Status(StatusCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("slabsearch.db")
    }

    /// 返回索引文件的路径
    pub fn index(&self) -> PathBuf {
        self.path.join("index.flat")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_weight_open_interval() {
        assert_eq!(parse_color_weight("0.7"), Ok(0.7));
        assert!(parse_color_weight("0").is_err());
        assert!(parse_color_weight("1").is_err());
        assert!(parse_color_weight("1.5").is_err());
        assert!(parse_color_weight("abc").is_err());
    }
}
