use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use rayon::prelude::*;

use crate::error::Error;

/// 索引文件魔数
const MAGIC: &[u8; 8] = b"SLABIDX1";

/// 距离度量
///
/// 度量写入索引文件头，加载后不允许与汇报分数的度量静默错配。
/// 向量均为单位向量时，内积等价于余弦相似度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// 内积，分数越大越相似
    InnerProduct,
    /// 欧氏距离平方，分数越小越相似
    L2,
}

impl Metric {
    fn to_u8(self) -> u8 {
        match self {
            Metric::InnerProduct => 0,
            Metric::L2 => 1,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Metric::InnerProduct),
            1 => Ok(Metric::L2),
            _ => bail!("未知的距离度量: {}", v),
        }
    }

    /// 按该度量比较两个分数，返回 a 是否严格优于 b
    pub fn better(&self, a: f32, b: f32) -> bool {
        match self {
            Metric::InnerProduct => a > b,
            Metric::L2 => a < b,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::InnerProduct => write!(f, "ip"),
            Metric::L2 => write!(f, "l2"),
        }
    }
}

/// 平坦精确索引
///
/// 向量按加入顺序平铺存储，位置 p 对应数据库按 ID 升序的第 p+1 行。
/// 查询期间索引只读，重建时整体替换。
#[derive(Debug)]
pub struct FlatIndex {
    metric: Metric,
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self { metric, dim, data: vec![] }
    }

    /// 索引中的向量数量
    pub fn ntotal(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// 追加一个向量，维数不符时整体拒绝
    pub fn add(&mut self, vector: &[f32]) -> Result<(), Error> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: vector.len() });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// 返回位置 p 处存储的向量
    pub fn reconstruct(&self, position: usize) -> Result<&[f32], Error> {
        if position >= self.ntotal() {
            return Err(Error::OutOfRange { position, len: self.ntotal() });
        }
        Ok(&self.data[position * self.dim..(position + 1) * self.dim])
    }

    /// 精确搜索 k 个最近邻，结果按度量从优到劣排序
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, Error> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len() });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.ntotal())
            .into_par_iter()
            .map(|p| {
                let v = &self.data[p * self.dim..(p + 1) * self.dim];
                (p, score(self.metric, query, v))
            })
            .collect();

        scored.sort_unstable_by(|a, b| {
            if self.metric.better(a.1, b.1) {
                std::cmp::Ordering::Less
            } else if self.metric.better(b.1, a.1) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// 将索引写入文件，先写临时文件再原子重命名
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut w = BufWriter::new(File::create(&tmp)?);
        w.write_all(MAGIC)?;
        w.write_u8(self.metric.to_u8())?;
        w.write_u32::<LittleEndian>(self.dim as u32)?;
        w.write_u64::<LittleEndian>(self.ntotal() as u64)?;
        for &v in &self.data {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.flush()?;
        drop(w);

        std::fs::rename(&tmp, path)?;
        debug!("索引已写入: {}", path.display());
        Ok(())
    }

    /// 从文件加载索引，接受前先校验魔数和维数
    pub fn load(path: impl AsRef<Path>, expected_dim: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut r = BufReader::new(
            File::open(path).with_context(|| format!("无法打开索引文件: {}", path.display()))?,
        );

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!("索引文件损坏: {}", path.display());
        }

        let metric = Metric::from_u8(r.read_u8()?)?;
        let dim = r.read_u32::<LittleEndian>()? as usize;
        if dim != expected_dim {
            return Err(Error::DimensionMismatch { expected: expected_dim, actual: dim }.into());
        }

        let count = r.read_u64::<LittleEndian>()? as usize;
        let mut data = vec![0.0f32; count * dim];
        r.read_f32_into::<LittleEndian>(&mut data)?;

        debug!("索引已加载: {} 条向量，度量 {}", count, metric);
        Ok(Self { metric, dim, data })
    }
}

fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::InnerProduct => dot(a, b),
        Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
    }
}

/// 内积
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
