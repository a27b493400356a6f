//! Push and pull between the local store and content-addressed storage
//!
//! [`ImageManager`] ties the pieces together: it looks images up in the
//! [`LocalStore`], builds the IPFS and local references, and hands both to
//! the copy engine. Progress goes to the [`Logger`]; results are returned.
//!
//! ```no_run
//! use gantry::cas::{ContentStore, IpfsClient};
//! use gantry::context::Context;
//! use gantry::image::{ImageManager, PullSource};
//! use gantry::logging::Logger;
//! use gantry::store::LocalStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> gantry::error::Result<()> {
//! let cas: Arc<dyn ContentStore> = Arc::new(IpfsClient::builder("http://127.0.0.1:5001").build()?);
//! let manager = ImageManager::new(LocalStore::open("/tmp/gantry")?, cas, Logger::new(false));
//! let ctx = Context::background();
//!
//! let root = manager.push(&ctx, "busybox:latest").await?;
//! let image = manager
//!     .pull(&ctx, PullSource::from_flags(Some(root.as_str()), None)?, "busybox:copy")
//!     .await?;
//! println!("{}", image.id);
//! # Ok(())
//! # }
//! ```

use crate::cas::{ContentId, ContentStore};
use crate::context::Context;
use crate::copy::{CopyOptions, Policy, copy_image};
use crate::error::{GantryError, Result};
use crate::logging::Logger;
use crate::store::{LocalStore, StoredImage, import_archive};
use crate::transport::IpfsReference;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Where a pull reads the image from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullSource {
    Cid(ContentId),
    /// Mutable name resolved to an identifier at pull time
    Name(String),
}

impl PullSource {
    /// Choose a source from command-line flags. A name takes precedence over
    /// an identifier; empty values count as absent.
    pub fn from_flags(cid: Option<&str>, name: Option<&str>) -> Result<Self> {
        fn present(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|v| !v.is_empty())
        }
        match (present(cid), present(name)) {
            (_, Some(name)) => Ok(PullSource::Name(name.to_string())),
            (Some(cid), None) => Ok(PullSource::Cid(ContentId::parse(cid)?)),
            (None, None) => Err(GantryError::MissingPullSource),
        }
    }
}

pub struct ImageManager {
    store: LocalStore,
    cas: Arc<dyn ContentStore>,
    logger: Logger,
    options: CopyOptions,
}

impl ImageManager {
    pub fn new(store: LocalStore, cas: Arc<dyn ContentStore>, logger: Logger) -> Self {
        Self {
            store,
            cas,
            logger,
            options: CopyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Copy a local image into content-addressed storage; returns its root identifier
    pub async fn push(&self, ctx: &Context, name: &str) -> Result<ContentId> {
        let started = Instant::now();
        self.logger.section(&format!("Push {}", name));

        let src_ref = self.store.find_image(name)?;
        let dest_ref = IpfsReference::new_image(self.cas.clone());
        let report = copy_image(ctx, Policy::default(), &dest_ref, &src_ref, &self.options).await?;

        let root = report.published_reference.ok_or_else(|| {
            GantryError::Storage("push finished without a root identifier".to_string())
        })?;
        let root = ContentId::parse(&root)?;

        self.logger.detail(&format!(
            "{} blobs uploaded ({}), {} reused",
            report.blobs_copied,
            self.logger.format_size(report.bytes_copied),
            report.blobs_reused
        ));
        self.logger.success(&format!(
            "Pushed {} as {} in {}",
            name,
            root,
            self.logger.format_duration(started.elapsed())
        ));
        Ok(root)
    }

    /// Copy an image out of content-addressed storage and commit it as `target`
    pub async fn pull(&self, ctx: &Context, source: PullSource, target: &str) -> Result<StoredImage> {
        let started = Instant::now();
        let dest_ref = self.store.parse_store_reference(target)?;

        let root = match source {
            PullSource::Cid(cid) => cid,
            PullSource::Name(name) => {
                self.logger.step(&format!("Resolving {}", name));
                let resolved = ctx.run(self.cas.resolve_name(&name)).await?;
                self.logger.detail(&format!("{} -> {}", name, resolved));
                resolved
            }
        };
        self.logger.section(&format!("Pull {}", root));

        let src_ref = IpfsReference::existing(self.cas.clone(), root);
        let report = copy_image(ctx, Policy::default(), &dest_ref, &src_ref, &self.options).await?;

        let id = report.published_reference.ok_or_else(|| {
            GantryError::store("pull finished without committing an image", None)
        })?;
        let image = self.store.get_store_image(&self.store.find_image(&id)?)?;

        self.logger.success(&format!(
            "Pulled {} ({}, {}) in {}",
            target,
            image.short_id(),
            self.logger.format_size(report.bytes_copied),
            self.logger.format_duration(started.elapsed())
        ));
        Ok(image)
    }

    /// Load a `docker save` archive into the local store
    pub async fn import(&self, path: PathBuf, name: Option<String>) -> Result<Vec<StoredImage>> {
        self.logger.section(&format!("Import {}", path.display()));
        let store = self.store.clone();
        let images = tokio::task::spawn_blocking(move || import_archive(&store, &path, name.as_deref()))
            .await
            .map_err(|e| GantryError::store(format!("import task failed: {}", e), None))??;

        for image in &images {
            self.logger.success(&format!(
                "Loaded {} {}",
                image.short_id(),
                image.names.join(", ")
            ));
        }
        Ok(images)
    }

    pub fn images(&self) -> Result<Vec<StoredImage>> {
        self.store.list_images()
    }
}
