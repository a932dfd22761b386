use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use image::{Rgb, RgbImage};
use predicates::prelude::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

fn write_png(path: &Path, width: u32, height: u32, color: [u8; 3]) {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    image.save(path).unwrap();
}

/// 造一批颜色差异明显的测试图片
fn write_dataset(dir: &Path) {
    write_png(&dir.join("rosso.png"), 32, 32, [200, 40, 40]);
    write_png(&dir.join("verde.png"), 32, 32, [40, 180, 60]);
    write_png(&dir.join("blu.png"), 32, 32, [40, 60, 200]);
}

#[test]
fn add_build_search() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let data_dir = conf_dir.path().join("dataset");
    std::fs::create_dir_all(&data_dir)?;
    write_dataset(&data_dir);

    cargo_run!("slabsearch", "-c", conf_dir.path(), "add", &data_dir)
        .success()
        .stdout(predicate::str::contains("added: 3"));
    cargo_run!("slabsearch", "-c", conf_dir.path(), "build")
        .success()
        .stdout(predicate::str::contains("succeeded: 3"));

    // 上传搜索不排除自身，入库图片的最佳匹配就是它自己
    cargo_run!("slabsearch", "-c", conf_dir.path(), "search", data_dir.join("rosso.png"))
        .success()
        .stdout(predicate::str::contains("rosso"));

    cargo_run!(
        "slabsearch",
        "-c",
        conf_dir.path(),
        "search",
        "--id",
        "1",
        "--output-format",
        "json"
    )
    .success()
    .stdout(predicate::str::contains("\"status\": \"ready\""));

    Ok(())
}

#[test]
fn status_before_and_after_build() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let data_dir = conf_dir.path().join("dataset");
    std::fs::create_dir_all(&data_dir)?;
    write_dataset(&data_dir);

    cargo_run!("slabsearch", "-c", conf_dir.path(), "add", &data_dir).success();
    cargo_run!("slabsearch", "-c", conf_dir.path(), "status")
        .success()
        .stdout(predicate::str::contains("missing"));

    cargo_run!("slabsearch", "-c", conf_dir.path(), "build").success();
    cargo_run!("slabsearch", "-c", conf_dir.path(), "status")
        .success()
        .stdout(predicate::str::contains("ready"));

    Ok(())
}

#[test]
fn watermark_roundtrip() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let data_dir = conf_dir.path().join("dataset");
    std::fs::create_dir_all(&data_dir)?;
    write_png(&data_dir.join("bianco.png"), 64, 64, [230, 228, 225]);

    cargo_run!("slabsearch", "-c", conf_dir.path(), "add", &data_dir).success();

    cargo_run!("slabsearch", "-c", conf_dir.path(), "watermark", "encode", "Slab.Boston")
        .success();
    cargo_run!("slabsearch", "-c", conf_dir.path(), "watermark", "decode")
        .success()
        .stdout(predicate::str::contains("Slab.Boston"));

    Ok(())
}

#[test]
fn watermark_too_large_fails() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let data_dir = conf_dir.path().join("dataset");
    std::fs::create_dir_all(&data_dir)?;
    // 2x2 图片只有 12 bit 容量，放不下 40 bit 的结束标记
    write_png(&data_dir.join("tiny.png"), 2, 2, [100, 100, 100]);

    cargo_run!("slabsearch", "-c", conf_dir.path(), "add", &data_dir).success();
    cargo_run!("slabsearch", "-c", conf_dir.path(), "watermark", "encode", "x").failure();

    Ok(())
}

#[test]
fn tag_untagged_rows() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let data_dir = conf_dir.path().join("dataset");
    std::fs::create_dir_all(&data_dir)?;
    write_dataset(&data_dir);

    cargo_run!("slabsearch", "-c", conf_dir.path(), "add", &data_dir).success();
    cargo_run!("slabsearch", "-c", conf_dir.path(), "tag")
        .success()
        .stdout(predicate::str::contains("succeeded: 3"));

    // 再跑一次，所有行都已有颜色标签
    cargo_run!("slabsearch", "-c", conf_dir.path(), "tag")
        .success()
        .stdout(predicate::str::contains("succeeded: 0"));

    Ok(())
}
