//! Extension and content based category resolution.
//!
//! Two entry points share one lookup order (learned rule, then table, then catch-all):
//! [`CategoryResolver::resolve`] honors the per-category active flags, while
//! [`CategoryResolver::resolve_unfiltered`] ignores them and may sniff file content,
//! so the scanner can tell a disabled category apart from an unknown file.

use crate::file_category::{CategoryStore, category_for_tag, normalize_extension};
use tracing::debug;

/// Read-only view over a [`CategoryStore`] that answers "where does this go?".
#[derive(Debug, Clone, Copy)]
pub struct CategoryResolver<'a> {
    store: &'a CategoryStore,
}

impl<'a> CategoryResolver<'a> {
    pub fn new(store: &'a CategoryStore) -> Self {
        Self { store }
    }

    /// Resolves `ext` against active categories only.
    ///
    /// `None` means the file should not be organized.
    ///
    /// # Examples
    ///
    /// ```
    /// use dlsort::file_category::CategoryStore;
    /// use dlsort::resolver::CategoryResolver;
    ///
    /// let mut store = CategoryStore::default();
    /// assert_eq!(CategoryResolver::new(&store).resolve(".pdf"), Some("Documentos"));
    ///
    /// store.set_active("Documentos", false);
    /// assert_eq!(CategoryResolver::new(&store).resolve(".pdf"), Some("Otros"));
    ///
    /// store.set_active("Otros", false);
    /// assert_eq!(CategoryResolver::new(&store).resolve(".pdf"), None);
    /// ```
    pub fn resolve(&self, ext: &str) -> Option<&'a str> {
        let ext = normalize_extension(ext);

        if let Some(category) = self.store.learned_rule(&ext)
            && self.store.is_active(category)
        {
            return Some(category);
        }

        if let Some(category) = self
            .store
            .table()
            .categories_of(&ext)
            .find(|category| self.store.is_active(category))
        {
            return Some(category);
        }

        self.store
            .catch_all()
            .filter(|catch_all| self.store.is_active(catch_all))
    }

    /// Resolves `ext` ignoring active flags, sniffing content when the extension is unknown.
    ///
    /// `sniff` is only called for a non-empty extension that no rule or table claims.
    /// A sniffed tag without a known category, like a failed sniff, lands in the catch-all.
    pub fn resolve_unfiltered<F>(&self, ext: &str, sniff: F) -> Option<&'a str>
    where
        F: FnOnce() -> Option<&'static str>,
    {
        let ext = normalize_extension(ext);

        if let Some(category) = self.store.learned_rule(&ext) {
            return Some(category);
        }

        if let Some(category) = self.store.table().categories_of(&ext).next() {
            return Some(category);
        }

        if !ext.is_empty()
            && let Some(tag) = sniff()
            && let Some(category) = category_for_tag(tag)
        {
            debug!("content of a {} file looks like {}", ext, tag);
            return Some(category);
        }

        self.store.catch_all()
    }

    /// Whether a file whose unfiltered category is `category` counts as unrecognized.
    ///
    /// True only for a non-empty extension that ended up in the catch-all while no
    /// learned rule or table entry knows it.
    pub fn is_unrecognized(&self, ext: &str, category: &str) -> bool {
        let ext = normalize_extension(ext);
        self.store.catch_all() == Some(category)
            && !ext.is_empty()
            && self.store.learned_rule(&ext).is_none()
            && !self.store.table().contains_extension(&ext)
    }
}
