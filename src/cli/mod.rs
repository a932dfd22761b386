mod add;
mod build;
mod search;
mod server;
mod status;
mod tag;
mod watermark;

pub use add::*;
pub use build::*;
pub use search::*;
pub use server::*;
pub use status::*;
pub use tag::*;
pub use watermark::*;

use crate::config::Opts;
use crate::db::Database;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 创建配置目录并打开数据库
pub(crate) async fn open_db(opts: &Opts) -> anyhow::Result<Database> {
    std::fs::create_dir_all(opts.conf_dir.path())?;
    Ok(crate::db::init_db(opts.conf_dir.database()).await?)
}
