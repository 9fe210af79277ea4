//! The closed set of model names a service knows about.
use std::collections::HashSet;
use std::sync::Arc;

use ahash::RandomState;

/// Every rembg model the background removal service can serve, in preload order.
pub const REMBG_MODELS: &[&str] = &[
    "u2net",
    "u2netp",
    "u2net_human_seg",
    "u2net_cloth_seg",
    "silueta",
    "isnet-general-use",
    "isnet-anime",
    "sam",
    "birefnet-general",
    "birefnet-general-lite",
    "birefnet-portrait",
    "birefnet-dis",
    "birefnet-hrsod",
    "birefnet-cod",
    "birefnet-massive",
    "bria-rmbg",
];

/// Model used when a request doesn't name one.
pub const DEFAULT_REMBG_MODEL: &str = "birefnet-general-lite";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("A catalog must contain at least one name")]
    Empty,
    #[error("Model '{0}' appears more than once in the catalog")]
    Duplicate(String),
    #[error("Default model '{default}' is not in the catalog. Must be one of: {known}")]
    UnknownDefault { default: String, known: String },
}

/// An ordered, immutable list of names with one distinguished default.
#[derive(Debug, Clone)]
pub struct Catalog {
    names: Vec<Arc<str>>,
    lookup: HashSet<Arc<str>, RandomState>,
    default_index: usize,
}

impl Catalog {
    pub fn new<I, S>(names: I, default: &str) -> Result<Catalog, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ordered: Vec<Arc<str>> = vec![];
        let mut lookup: HashSet<Arc<str>, RandomState> = Default::default();
        for n in names {
            let name: Arc<str> = Arc::from(n.as_ref());
            if !lookup.insert(name.clone()) {
                return Err(CatalogError::Duplicate(name.to_string()));
            }
            ordered.push(name);
        }

        if ordered.is_empty() {
            return Err(CatalogError::Empty);
        }

        let default_index = ordered
            .iter()
            .position(|n| &**n == default)
            .ok_or_else(|| CatalogError::UnknownDefault {
                default: default.to_string(),
                known: ordered.join(", "),
            })?;

        Ok(Catalog {
            names: ordered,
            lookup,
            default_index,
        })
    }

    /// The rembg catalog with the given default.
    pub fn rembg(default: &str) -> Result<Catalog, CatalogError> {
        Catalog::new(REMBG_MODELS.iter(), default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains(name)
    }

    /// Get the shared copy of a name, if it is in the catalog.
    pub(crate) fn resolve(&self, name: &str) -> Option<&Arc<str>> {
        self.lookup.get(name)
    }

    pub fn default_name(&self) -> &str {
        &self.names[self.default_index]
    }

    /// Names in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| &**n)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Comma separated names, for error messages.
    pub fn describe(&self) -> String {
        self.names.join(", ")
    }
}
