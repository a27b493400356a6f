//! Image names and references into the local store

use super::LocalStore;
use super::transport::{StoreImageDestination, StoreImageSource};
use crate::error::{GantryError, Result};
use crate::transport::{ImageDestination, ImageReference, ImageSource};
use async_trait::async_trait;

pub const STORE_TRANSPORT_NAME: &str = "containers-storage";
pub const DEFAULT_TAG: &str = "latest";

/// Normalize an image name to `repository:tag`.
///
/// A missing tag becomes `latest`. Digest references and repositories with
/// upper-case or otherwise invalid characters are rejected.
pub fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GantryError::Validation("image name is empty".to_string()));
    }
    if name.contains('@') {
        return Err(GantryError::Validation(format!(
            "digest references are not supported: {}",
            name
        )));
    }

    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (repository, tag) = match name[last_slash..].rfind(':') {
        Some(i) => (&name[..last_slash + i], &name[last_slash + i + 1..]),
        None => (name, DEFAULT_TAG),
    };

    validate_repository(repository, name)?;
    validate_tag(tag, name)?;
    Ok(format!("{}:{}", repository, tag))
}

fn validate_repository(repository: &str, name: &str) -> Result<()> {
    if repository.is_empty() || repository.starts_with('/') || repository.ends_with('/') {
        return Err(GantryError::Validation(format!("invalid repository in {}", name)));
    }
    if repository.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(GantryError::Validation(format!(
            "repository name must be lowercase: {}",
            name
        )));
    }
    let valid = repository
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/' | ':'));
    if !valid {
        return Err(GantryError::Validation(format!("invalid repository in {}", name)));
    }
    Ok(())
}

fn validate_tag(tag: &str, name: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with(['.', '-'])
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(GantryError::Validation(format!("invalid tag in {}", name)));
    }
    Ok(())
}

/// Reference to an image in the local store, by name, by id, or both
#[derive(Debug, Clone)]
pub struct StoreReference {
    store: LocalStore,
    name: Option<String>,
    image_id: Option<String>,
}

impl StoreReference {
    pub(crate) fn new(store: LocalStore, name: Option<String>, image_id: Option<String>) -> Self {
        Self { store, name, image_id }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn image_id(&self) -> Option<&str> {
        self.image_id.as_deref()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    fn repository(&self) -> Option<&str> {
        let name = self.name.as_deref()?;
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        name[last_slash..]
            .rfind(':')
            .map(|i| &name[..last_slash + i])
    }
}

#[async_trait]
impl ImageReference for StoreReference {
    fn transport_name(&self) -> &'static str {
        STORE_TRANSPORT_NAME
    }

    fn string_within_transport(&self) -> String {
        match (&self.name, &self.image_id) {
            (Some(name), Some(id)) => format!("{}@{}", name, id),
            (Some(name), None) => name.clone(),
            (None, Some(id)) => format!("@{}", id),
            (None, None) => String::new(),
        }
    }

    fn policy_configuration_identity(&self) -> String {
        self.name.clone().unwrap_or_default()
    }

    fn policy_configuration_namespaces(&self) -> Vec<String> {
        let Some(repository) = self.repository() else {
            return Vec::new();
        };
        let mut namespaces = vec![repository.to_string()];
        let mut rest = repository;
        while let Some(i) = rest.rfind('/') {
            rest = &rest[..i];
            namespaces.push(rest.to_string());
        }
        namespaces
    }

    async fn new_image_source(&self) -> Result<Box<dyn ImageSource>> {
        let image = self.store.get_store_image(self)?;
        Ok(Box::new(StoreImageSource::open(self.store.clone(), image)?))
    }

    async fn new_image_destination(&self) -> Result<Box<dyn ImageDestination>> {
        Ok(Box::new(StoreImageDestination::new(
            self.store.clone(),
            self.name.clone(),
        )))
    }

    async fn delete_image(&self) -> Result<()> {
        let image = self.store.get_store_image(self)?;
        self.store.delete_image(&image.id)
    }
}
