/// Category tables, learned rules and the store that owns them.
///
/// A [`CategoryTable`] maps category names (e.g. "Documentos", "Imágenes") to the
/// extensions they claim. A [`CategoryStore`] bundles the table with per-category
/// active flags, the catch-all category name and the user-taught learned rules.
/// Callers own the store and lend it to the scanner and executor.
///
/// # Examples
///
/// ```
/// use dlsort::file_category::{CategoryStore, CategoryTable};
///
/// let store = CategoryStore::new(CategoryTable::builtin());
/// assert_eq!(store.table().category_of(".pdf"), Some("Documentos"));
/// assert_eq!(store.table().category_of(".PNG"), Some("Imágenes"));
/// assert_eq!(store.catch_all(), Some("Otros"));
/// ```
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the category used when nothing else claims a file.
pub const DEFAULT_CATCH_ALL: &str = "Otros";

/// File name of the learned-rule store inside the state directory.
pub const LEARNED_RULES_FILE: &str = "learned_rules.json";

const BUILTIN_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Documentos",
        &[
            ".pdf", ".doc", ".docx", ".txt", ".rtf", ".xlsx", ".xls", ".ppt", ".pptx", ".odt",
            ".ods", ".odp",
        ],
    ),
    (
        "Imágenes",
        &[
            ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".tiff", ".ico", ".raw",
        ],
    ),
    (
        "Audio",
        &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".wma", ".m4a"],
    ),
    (
        "Videos",
        &[
            ".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".3gp",
        ],
    ),
    (
        "Programas",
        &[".exe", ".msi", ".dmg", ".deb", ".rpm", ".app", ".pkg"],
    ),
    (
        "Comprimidos",
        &[".zip", ".rar", ".7z", ".tar", ".gz", ".bz2", ".xz"],
    ),
];

/// Content tags (as produced by the sniffer) and the category they belong to.
///
/// Tags missing here, such as "elf", fall back to the catch-all category.
const TAG_CATEGORIES: &[(&str, &str)] = &[
    ("png", "Imágenes"),
    ("jpg", "Imágenes"),
    ("gif", "Imágenes"),
    ("webp", "Imágenes"),
    ("bmp", "Imágenes"),
    ("tif", "Imágenes"),
    ("pdf", "Documentos"),
    ("zip", "Comprimidos"),
    ("rar", "Comprimidos"),
    ("7z", "Comprimidos"),
    ("gz", "Comprimidos"),
    ("bz2", "Comprimidos"),
    ("xz", "Comprimidos"),
    ("tar", "Comprimidos"),
    ("exe", "Programas"),
    ("deb", "Programas"),
    ("rpm", "Programas"),
    ("msi", "Programas"),
    ("dmg", "Programas"),
    ("mp3", "Audio"),
    ("flac", "Audio"),
    ("wav", "Audio"),
    ("ogg", "Audio"),
    ("m4a", "Audio"),
    ("mp4", "Videos"),
    ("mkv", "Videos"),
    ("avi", "Videos"),
    ("mov", "Videos"),
    ("webm", "Videos"),
];

/// Maps a sniffed content tag to a category name.
///
/// # Examples
///
/// ```
/// use dlsort::file_category::category_for_tag;
///
/// assert_eq!(category_for_tag("png"), Some("Imágenes"));
/// assert_eq!(category_for_tag("elf"), None);
/// ```
pub fn category_for_tag(tag: &str) -> Option<&'static str> {
    TAG_CATEGORIES
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, category)| *category)
}

/// Normalizes an extension to lowercase with a leading dot. Empty stays empty.
///
/// # Examples
///
/// ```
/// use dlsort::file_category::normalize_extension;
///
/// assert_eq!(normalize_extension("PDF"), ".pdf");
/// assert_eq!(normalize_extension(".Tar"), ".tar");
/// assert_eq!(normalize_extension(""), "");
/// ```
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.is_empty() || ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Returns the normalized extension of `path`, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| normalize_extension(&ext.to_string_lossy()))
        .unwrap_or_default()
}

/// One named category and the extensions it claims, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Ordered mapping from category name to extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTable {
    entries: Vec<CategoryEntry>,
}

impl CategoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default categories: Documentos, Imágenes, Audio, Videos, Programas and Comprimidos.
    pub fn builtin() -> Self {
        let entries = BUILTIN_CATEGORIES
            .iter()
            .map(|(name, extensions)| CategoryEntry {
                name: (*name).to_string(),
                extensions: extensions.iter().map(|ext| (*ext).to_string()).collect(),
            })
            .collect();
        Self { entries }
    }

    /// Builds a table from configured entries, normalizing every extension.
    pub fn from_entries(entries: impl IntoIterator<Item = CategoryEntry>) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table.add_category(&entry.name);
            for ext in &entry.extensions {
                table.add_extension(&entry.name, ext);
            }
        }
        table
    }

    pub fn entries(&self) -> &[CategoryEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn contains_category(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Extensions of `name`, if the category exists.
    pub fn extensions(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.extensions.as_slice())
    }

    /// First category (in table order) that claims `ext`.
    pub fn category_of(&self, ext: &str) -> Option<&str> {
        let ext = normalize_extension(ext);
        self.categories_of(&ext).next()
    }

    /// All categories claiming an already-normalized extension, in table order.
    pub(crate) fn categories_of<'a>(&'a self, ext: &str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |entry| entry.extensions.iter().any(|known| known == ext))
            .map(|entry| entry.name.as_str())
    }

    pub fn contains_extension(&self, ext: &str) -> bool {
        self.category_of(ext).is_some()
    }

    /// Adds an empty category. Returns `false` if it already exists.
    pub fn add_category(&mut self, name: &str) -> bool {
        if name.trim().is_empty() || self.contains_category(name) {
            return false;
        }
        self.entries.push(CategoryEntry {
            name: name.to_string(),
            extensions: Vec::new(),
        });
        true
    }

    pub fn remove_category(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.name != name);
        self.entries.len() != before
    }

    /// Appends `ext` to `category`. Returns `false` if the category is missing,
    /// the extension is empty, or the category already has it.
    pub fn add_extension(&mut self, category: &str, ext: &str) -> bool {
        let ext = normalize_extension(ext);
        if ext.is_empty() {
            return false;
        }
        match self.entries.iter_mut().find(|entry| entry.name == category) {
            Some(entry) if !entry.extensions.contains(&ext) => {
                entry.extensions.push(ext);
                true
            }
            _ => false,
        }
    }

    pub fn remove_extension(&mut self, category: &str, ext: &str) -> bool {
        let ext = normalize_extension(ext);
        match self.entries.iter_mut().find(|entry| entry.name == category) {
            Some(entry) => {
                let before = entry.extensions.len();
                entry.extensions.retain(|known| *known != ext);
                entry.extensions.len() != before
            }
            None => false,
        }
    }
}

/// Errors raised while loading or saving learned rules.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid learned rules in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Caller-owned category state: table, active flags, catch-all and learned rules.
///
/// When opened with a rules path, every change to the learned rules is written
/// through to that JSON file.
#[derive(Debug, Clone)]
pub struct CategoryStore {
    table: CategoryTable,
    active: HashMap<String, bool>,
    catch_all: Option<String>,
    learned: BTreeMap<String, String>,
    rules_path: Option<PathBuf>,
}

impl CategoryStore {
    /// An in-memory store with the default catch-all and no learned rules.
    pub fn new(table: CategoryTable) -> Self {
        Self {
            table,
            active: HashMap::new(),
            catch_all: Some(DEFAULT_CATCH_ALL.to_string()),
            learned: BTreeMap::new(),
            rules_path: None,
        }
    }

    /// A file-backed store; learned rules are loaded from `rules_path` if it exists.
    pub fn open(table: CategoryTable, rules_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let rules_path = rules_path.into();
        let learned = load_rules(&rules_path)?;
        debug!(
            "loaded {} learned rules from {}",
            learned.len(),
            rules_path.display()
        );

        let mut store = Self::new(table);
        store.learned = learned;
        store.rules_path = Some(rules_path);
        Ok(store)
    }

    pub fn with_catch_all(mut self, catch_all: Option<String>) -> Self {
        self.catch_all = catch_all;
        self
    }

    pub fn with_active_flags(mut self, flags: impl IntoIterator<Item = (String, bool)>) -> Self {
        self.active.extend(flags);
        self
    }

    pub fn table(&self) -> &CategoryTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut CategoryTable {
        &mut self.table
    }

    pub fn catch_all(&self) -> Option<&str> {
        self.catch_all.as_deref()
    }

    pub fn rules_path(&self) -> Option<&Path> {
        self.rules_path.as_deref()
    }

    pub fn add_category(&mut self, name: &str) -> bool {
        self.table.add_category(name)
    }

    pub fn remove_category(&mut self, name: &str) -> bool {
        self.active.remove(name);
        self.table.remove_category(name)
    }

    pub fn add_extension(&mut self, category: &str, ext: &str) -> bool {
        self.table.add_extension(category, ext)
    }

    pub fn remove_extension(&mut self, category: &str, ext: &str) -> bool {
        self.table.remove_extension(category, ext)
    }

    pub fn set_active(&mut self, category: &str, active: bool) {
        self.active.insert(category.to_string(), active);
    }

    /// Categories without an explicit flag are active.
    pub fn is_active(&self, category: &str) -> bool {
        self.active.get(category).copied().unwrap_or(true)
    }

    /// Active table categories in table order, followed by the catch-all if active.
    pub fn active_categories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.table.names().filter(|name| self.is_active(name)).collect();
        if let Some(catch_all) = self.catch_all()
            && self.is_active(catch_all)
            && !names.contains(&catch_all)
        {
            names.push(catch_all);
        }
        names
    }

    pub fn learned_rule(&self, ext: &str) -> Option<&str> {
        self.learned
            .get(&normalize_extension(ext))
            .map(String::as_str)
    }

    pub fn learned_rules(&self) -> &BTreeMap<String, String> {
        &self.learned
    }

    /// Records that files with `ext` belong to `category`.
    ///
    /// The extension is also appended to the category's table entry when the
    /// category exists there. The rule is kept in memory even if saving fails.
    pub fn learn(&mut self, ext: &str, category: &str) -> Result<(), StoreError> {
        let ext = normalize_extension(ext);
        if ext.is_empty() {
            return Ok(());
        }

        self.learned.insert(ext.clone(), category.to_string());
        self.table.add_extension(category, &ext);
        info!("learned rule {} -> {}", ext, category);
        self.save()
    }

    /// Removes the learned rule for `ext`. Returns whether one existed.
    pub fn forget(&mut self, ext: &str) -> Result<bool, StoreError> {
        let removed = self.learned.remove(&normalize_extension(ext)).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Writes learned rules to the rules path. In-memory stores do nothing.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.rules_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&self.learned).map_err(|source| {
            StoreError::Json {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }
}

impl Default for CategoryStore {
    fn default() -> Self {
        Self::new(CategoryTable::builtin())
    }
}

fn load_rules(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: BTreeMap<String, String> =
        serde_json::from_str(&content).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(raw
        .into_iter()
        .map(|(ext, category)| (normalize_extension(&ext), category))
        .filter(|(ext, _)| !ext.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_table() {
        let table = CategoryTable::builtin();
        let names: Vec<&str> = table.names().collect();
        assert_eq!(
            names,
            vec!["Documentos", "Imágenes", "Audio", "Videos", "Programas", "Comprimidos"]
        );
        assert_eq!(table.category_of(".mp3"), Some("Audio"));
        assert_eq!(table.category_of("mkv"), Some("Videos"));
        assert_eq!(table.category_of(".xyz"), None);
        assert_eq!(table.category_of(""), None);
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("JPG"), ".jpg");
        assert_eq!(normalize_extension(" .Md "), ".md");
        assert_eq!(normalize_extension("   "), "");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("/tmp/Report.PDF")), ".pdf");
        assert_eq!(extension_of(Path::new("/tmp/archive.tar.gz")), ".gz");
        assert_eq!(extension_of(Path::new("/tmp/README")), "");
        assert_eq!(extension_of(Path::new("/tmp/.bashrc")), "");
    }

    #[test]
    fn test_table_mutation() {
        let mut table = CategoryTable::builtin();

        assert!(table.add_category("Libros"));
        assert!(!table.add_category("Libros"));
        assert!(table.add_extension("Libros", "EPUB"));
        assert!(!table.add_extension("Libros", ".epub"));
        assert_eq!(table.category_of(".epub"), Some("Libros"));

        assert!(table.remove_extension("Libros", "epub"));
        assert_eq!(table.category_of(".epub"), None);

        assert!(table.remove_category("Libros"));
        assert!(!table.contains_category("Libros"));
        assert!(!table.add_extension("Libros", ".epub"));
    }

    #[test]
    fn test_from_entries_normalizes() {
        let table = CategoryTable::from_entries(vec![CategoryEntry {
            name: "Code".to_string(),
            extensions: vec!["RS".to_string(), ".toml".to_string()],
        }]);
        assert_eq!(
            table.extensions("Code"),
            Some(&[".rs".to_string(), ".toml".to_string()][..])
        );
    }

    #[test]
    fn test_tag_categories() {
        assert_eq!(category_for_tag("pdf"), Some("Documentos"));
        assert_eq!(category_for_tag("zip"), Some("Comprimidos"));
        assert_eq!(category_for_tag("exe"), Some("Programas"));
        assert_eq!(category_for_tag("nope"), None);
    }

    #[test]
    fn test_active_flags_default_to_active() {
        let mut store = CategoryStore::default();
        assert!(store.is_active("Documentos"));
        assert!(store.is_active("Anything"));

        store.set_active("Audio", false);
        assert!(!store.is_active("Audio"));

        let active = store.active_categories();
        assert!(!active.contains(&"Audio"));
        assert_eq!(active.last(), Some(&"Otros"));
    }

    #[test]
    fn test_learn_updates_table() {
        let mut store = CategoryStore::default();
        store.learn("XYZ", "Imágenes").expect("in-memory learn");

        assert_eq!(store.learned_rule(".xyz"), Some("Imágenes"));
        assert_eq!(store.table().category_of(".xyz"), Some("Imágenes"));
    }

    #[test]
    fn test_learn_ignores_empty_extension() {
        let mut store = CategoryStore::default();
        store.learn("", "Imágenes").expect("in-memory learn");
        assert!(store.learned_rules().is_empty());
    }

    #[test]
    fn test_learned_rules_persist() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let rules_path = temp_dir.path().join("state").join(LEARNED_RULES_FILE);

        let mut store =
            CategoryStore::open(CategoryTable::builtin(), &rules_path).expect("open store");
        store.learn(".xyz", "Documentos").expect("learn");
        store.learn(".foo", "Audio").expect("learn");
        assert!(store.forget(".foo").expect("forget"));
        assert!(!store.forget(".foo").expect("forget again"));

        let reopened =
            CategoryStore::open(CategoryTable::builtin(), &rules_path).expect("reopen store");
        assert_eq!(reopened.learned_rule(".xyz"), Some("Documentos"));
        assert_eq!(reopened.learned_rule(".foo"), None);
    }

    #[test]
    fn test_open_rejects_corrupt_rules() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let rules_path = temp_dir.path().join(LEARNED_RULES_FILE);
        fs::write(&rules_path, "{ not json").expect("write rules");

        let result = CategoryStore::open(CategoryTable::builtin(), &rules_path);
        assert!(matches!(result, Err(StoreError::Json { .. })));
    }
}
