use indicatif::ProgressStyle;

/// 进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .expect("failed to build progress style")
    .progress_chars("#>-")
}
