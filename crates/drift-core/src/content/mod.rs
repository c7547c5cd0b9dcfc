//! Catalog content providers
//!
//! The pipeline loads its read-only [`Catalog`] once before initializing the
//! stages. Where the catalog comes from is up to the provider; the bundled
//! [`YamlContentProvider`] reads a single YAML document from disk.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::Catalog;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Failed to read catalog {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse catalog {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Template '{0}' not found in catalog")]
    TemplateNotFound(String),

    #[error("Catalog has no {0} programs")]
    NoPrograms(&'static str),
}

pub type ContentResult<T> = Result<T, ContentError>;

/// Source of the catalog for one fabrication run
pub trait ContentProvider: Send + Sync {
    /// Load the catalog that fabricates the given template
    fn load_content(&self, template_key: &str) -> ContentResult<Catalog>;
}

/// Catalog read from a YAML file
pub struct YamlContentProvider {
    path: PathBuf,
}

impl YamlContentProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ContentProvider for YamlContentProvider {
    fn load_content(&self, template_key: &str) -> ContentResult<Catalog> {
        log::info!("[CONTENT] Loading catalog from {:?}", self.path);
        let contents = std::fs::read_to_string(&self.path).map_err(|source| ContentError::Read {
            path: self.path.clone(),
            source,
        })?;
        let catalog: Catalog =
            serde_yaml::from_str(&contents).map_err(|source| ContentError::Parse {
                path: self.path.clone(),
                source,
            })?;
        check_catalog(&catalog, template_key)?;
        log::info!(
            "[CONTENT] Loaded template '{}' with {} instrument audios",
            template_key,
            catalog.audio_count()
        );
        Ok(catalog)
    }
}

/// An already-loaded catalog
impl ContentProvider for Catalog {
    fn load_content(&self, template_key: &str) -> ContentResult<Catalog> {
        check_catalog(self, template_key)?;
        Ok(self.clone())
    }
}

/// Reject a catalog the default craft phases cannot fabricate from
fn check_catalog(catalog: &Catalog, template_key: &str) -> ContentResult<()> {
    if catalog.template(template_key).is_none() {
        return Err(ContentError::TemplateNotFound(template_key.to_string()));
    }
    if catalog.programs_of_type(crate::model::ProgramType::Macro).is_empty() {
        return Err(ContentError::NoPrograms("macro"));
    }
    if catalog.programs_of_type(crate::model::ProgramType::Main).is_empty() {
        return Err(ContentError::NoPrograms("main"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_yaml_provider_loads_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, serde_yaml::to_string(&fixtures::catalog()).unwrap()).unwrap();

        let catalog = YamlContentProvider::new(&path)
            .load_content(fixtures::TEMPLATE_KEY)
            .unwrap();
        assert_eq!(catalog.audio_count(), fixtures::catalog().audio_count());
    }

    #[test]
    fn test_unknown_template_is_rejected() {
        let result = fixtures::catalog().load_content("missing");
        assert!(matches!(result, Err(ContentError::TemplateNotFound(key)) if key == "missing"));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let result = YamlContentProvider::new("/nonexistent/catalog.yaml").load_content("x");
        assert!(matches!(result, Err(ContentError::Read { .. })));
    }
}
