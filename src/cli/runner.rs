//! Runs one parsed command against the local store and IPFS

use crate::cas::{ContentStore, IpfsClient};
use crate::cli::args::{Args, Command};
use crate::config::AppConfig;
use crate::context::Context;
use crate::copy::CopyOptions;
use crate::error::Result;
use crate::image::{ImageManager, PullSource};
use crate::logging::Logger;
use crate::store::LocalStore;
use std::sync::Arc;
use tracing::debug;

pub struct Runner {
    args: Args,
    config: AppConfig,
    logger: Logger,
}

impl Runner {
    /// Validate arguments and load configuration; touches neither the network nor the store
    pub fn new(args: Args) -> Result<Self> {
        args.validate()?;
        let config = AppConfig::from_env()?.with_overrides(
            args.api.clone(),
            args.store.clone(),
            args.timeout,
        );
        config.validate()?;
        debug!(?config, "Loaded configuration");

        let logger = Logger::new(args.debug);
        Ok(Self { args, config, logger })
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn manager(&self, cas: Arc<dyn ContentStore>) -> Result<ImageManager> {
        let store = LocalStore::from_config(&self.config.store)?;
        let options = CopyOptions {
            max_parallel_fetches: self.args.parallel,
            ..CopyOptions::default()
        };
        Ok(ImageManager::new(store, cas, self.logger.clone()).with_options(options))
    }

    fn client(&self) -> Result<IpfsClient> {
        IpfsClient::from_config(&self.config.ipfs)
    }

    /// Manager backed by a node that answered a version query
    async fn connect(&self, ctx: &Context) -> Result<ImageManager> {
        let client = self.client()?;
        let version = ctx.run(client.version()).await?;
        self.logger
            .detail(&format!("IPFS node {} at {}", version, client.api_url()));
        self.manager(Arc::new(client))
    }

    pub async fn run(&self, ctx: &Context) -> Result<()> {
        match &self.args.command {
            Command::Push { image } => {
                let manager = self.connect(ctx).await?;
                let root = manager.push(ctx, image).await?;
                println!("{}", root);
            }
            Command::Pull { image, cid, name } => {
                let source = PullSource::from_flags(cid.as_deref(), name.as_deref())?;
                let manager = self.connect(ctx).await?;
                let stored = manager.pull(ctx, source, image).await?;
                println!("{}", stored.id);
            }
            Command::Import { file, image } => {
                let manager = self.manager(Arc::new(self.client()?))?;
                let images = manager.import(file.clone(), image.clone()).await?;
                for stored in images {
                    println!("{}", stored.id);
                }
            }
            Command::Images => {
                let manager = self.manager(Arc::new(self.client()?))?;
                let images = manager.images()?;
                println!("{:<14}{}", "IMAGE ID", "NAMES");
                for stored in images {
                    let names = if stored.names.is_empty() {
                        "<none>".to_string()
                    } else {
                        stored.names.join(", ")
                    };
                    println!("{:<14}{}", stored.short_id(), names);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GantryError;
    use clap::Parser;

    #[tokio::test]
    async fn test_pull_without_source_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().to_str().unwrap();
        // Port 9 (discard) would refuse the connection if it were ever tried
        let args = Args::try_parse_from([
            "gantry", "--api", "http://127.0.0.1:9", "--store", store, "pull", "-i", "busybox",
        ])
        .unwrap();
        let runner = Runner::new(args).unwrap();

        let err = runner.run(&Context::background()).await.unwrap_err();
        assert!(matches!(err, GantryError::MissingPullSource));
        assert_eq!(err.to_string(), "require cid or name to resolve");
    }

    #[tokio::test]
    async fn test_images_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store");
        let args = Args::try_parse_from([
            "gantry",
            "--store",
            store.to_str().unwrap(),
            "images",
        ])
        .unwrap();
        let runner = Runner::new(args).unwrap();
        assert_eq!(runner.config().store.root, store);
        runner.run(&Context::background()).await.unwrap();
        assert!(store.join("blobs").exists());
    }

    #[test]
    fn test_invalid_api_url_is_rejected() {
        let args = Args::try_parse_from(["gantry", "--api", "ftp://node", "images"]).unwrap();
        assert!(Runner::new(args).is_err());
    }
}
