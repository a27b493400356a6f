//! Command-line argument parsing

use crate::error::{GantryError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gantry")]
#[command(about = "Push and pull container images through IPFS")]
#[command(version)]
pub struct Args {
    /// Debug output
    #[arg(long = "debug", short = 'D', global = true, help = "Enable debug logging")]
    pub debug: bool,

    #[arg(
        long = "api",
        global = true,
        env = "GANTRY_IPFS_API",
        help = "IPFS HTTP RPC API address, e.g. http://127.0.0.1:5001"
    )]
    pub api: Option<String>,

    #[arg(
        long = "store",
        global = true,
        env = "GANTRY_STORE",
        help = "Local image store directory"
    )]
    pub store: Option<PathBuf>,

    #[arg(
        long = "timeout",
        short = 't',
        global = true,
        help = "Timeout for IPFS requests in seconds"
    )]
    pub timeout: Option<u64>,

    #[arg(
        long = "parallel",
        short = 'j',
        global = true,
        default_value = "4",
        help = "Maximum number of blobs fetched at once"
    )]
    pub parallel: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Push a local image to IPFS and print its root content identifier
    Push {
        #[arg(long = "image", short = 'i', help = "Local image name or id")]
        image: String,
    },

    /// Pull an image from IPFS into the local store and print its id
    Pull {
        #[arg(long = "image", short = 'i', help = "Name to store the pulled image under")]
        image: String,

        #[arg(long = "cid", short = 'c', help = "Root content identifier of the image")]
        cid: Option<String>,

        #[arg(long = "name", short = 'n', help = "IPNS name resolving to the image (wins over --cid)")]
        name: Option<String>,
    },

    /// Load a `docker save` archive into the local store
    Import {
        #[arg(long = "file", short = 'f', help = "Path to the archive, plain or gzip-compressed")]
        file: PathBuf,

        #[arg(long = "image", short = 'i', help = "Name for the imported image")]
        image: Option<String>,
    },

    /// List images in the local store
    Images,
}

impl Args {
    /// Checks that need no network or store access
    pub fn validate(&self) -> Result<()> {
        if self.parallel == 0 {
            return Err(GantryError::Validation(
                "Parallel fetches must be greater than 0".to_string(),
            ));
        }
        if self.timeout == Some(0) {
            return Err(GantryError::Validation("Timeout must be greater than 0".to_string()));
        }

        match &self.command {
            Command::Push { image } if image.trim().is_empty() => {
                Err(GantryError::Validation("Image name cannot be empty".to_string()))
            }
            Command::Pull { image, .. } if image.trim().is_empty() => {
                Err(GantryError::Validation("Image name cannot be empty".to_string()))
            }
            Command::Import { file, .. } if !file.exists() => Err(GantryError::Validation(format!(
                "File does not exist: {}",
                file.display()
            ))),
            _ => Ok(()),
        }
    }
}
