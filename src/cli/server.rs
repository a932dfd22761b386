use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use crate::Searcher;
use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, Opts, SearchOptions};
use crate::features::FeatureExtractor;
use crate::server;

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = super::open_db(opts).await?;
        let extractor = Arc::new(FeatureExtractor::new(&self.feature));
        let searcher = Arc::new(Searcher::open(&opts.conf_dir, db, extractor).await?);

        let state = server::AppState::new(searcher, self.search.clone());
        let app = server::create_app(state);

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
