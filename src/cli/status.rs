use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use crate::Searcher;
use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, Opts};
use crate::features::FeatureExtractor;

#[derive(Parser, Debug, Clone)]
pub struct StatusCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
}

impl SubCommandExtend for StatusCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = super::open_db(opts).await?;
        let extractor = Arc::new(FeatureExtractor::new(&self.feature));
        let searcher = Searcher::open(&opts.conf_dir, db, extractor).await?;

        let status = searcher.status().await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        Ok(())
    }
}
