/// Collision-safe file moves.
///
/// [`SafeMover`] takes a source file and the destination it should end up at, and
/// makes that destination usable before moving: the name is sanitized, missing
/// folders are created, over-long paths are shortened and existing files are never
/// overwritten (a " (N)" counter is appended instead). It reports the path the file
/// actually landed at, or a [`MoveError`] describing why it could not be moved.
use crate::sanitize::{ELLIPSIS, generated_name, sanitize_file_name_at, take_chars};
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Longest destination path, in characters, the mover will produce.
pub const MAX_PATH_CHARS: usize = 250;

/// Characters kept free when shortening a stem to fit the path limit.
const PATH_MARGIN: usize = 10;

/// Below this many stem characters a generated name is used instead.
const MIN_STEM_CHARS: usize = 20;

/// Stem length used for counter candidates that would be too long.
const COUNTER_STEM_CHARS: usize = 50;

const MAX_COUNTER: u32 = 999;

#[cfg(windows)]
const PATH_TOO_LONG_CODES: &[i32] = &[3, 206];
#[cfg(target_os = "linux")]
const PATH_TOO_LONG_CODES: &[i32] = &[36];
#[cfg(all(unix, not(target_os = "linux")))]
const PATH_TOO_LONG_CODES: &[i32] = &[63];
#[cfg(not(any(unix, windows)))]
const PATH_TOO_LONG_CODES: &[i32] = &[];

#[cfg(windows)]
const INVALID_NAME_CODES: &[i32] = &[123];
#[cfg(not(windows))]
const INVALID_NAME_CODES: &[i32] = &[];

#[cfg(windows)]
const EXISTS_CODES: &[i32] = &[80, 183];
#[cfg(not(windows))]
const EXISTS_CODES: &[i32] = &[];

/// Why a file could not be moved. The display text is shown to users as-is.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("source file not found: {name}")]
    SourceMissing { name: String },

    #[error("could not create folder {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path too long or invalid: {name}")]
    PathTooLong { name: String },

    #[error("file name contains invalid characters: {name}")]
    InvalidName { name: String },

    #[error("a file with that name already exists at the destination: {name}")]
    DestinationExists { name: String },

    #[error("could not move {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Moves files without ever overwriting or exceeding the path limit.
#[derive(Debug, Clone, Copy)]
pub struct SafeMover {
    max_path_chars: usize,
}

impl SafeMover {
    pub fn new() -> Self {
        Self {
            max_path_chars: MAX_PATH_CHARS,
        }
    }

    pub fn with_max_path_chars(max_path_chars: usize) -> Self {
        Self { max_path_chars }
    }

    pub fn max_path_chars(&self) -> usize {
        self.max_path_chars
    }

    /// Moves `source` to `destination` and returns the final path.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dlsort::file_mover::SafeMover;
    /// use std::path::Path;
    ///
    /// let mover = SafeMover::new();
    /// match mover.move_file(
    ///     Path::new("/home/me/Downloads/report.pdf"),
    ///     Path::new("/home/me/Downloads/Documentos/report.pdf"),
    /// ) {
    ///     Ok(path) => println!("moved to {}", path.display()),
    ///     Err(e) => eprintln!("{}", e),
    /// }
    /// ```
    pub fn move_file(&self, source: &Path, destination: &Path) -> Result<PathBuf, MoveError> {
        self.move_file_at(source, destination, Local::now())
    }

    /// Same as [`SafeMover::move_file`], with a fixed clock for generated names.
    pub fn move_file_at(
        &self,
        source: &Path,
        destination: &Path,
        now: DateTime<Local>,
    ) -> Result<PathBuf, MoveError> {
        if !source.is_file() {
            return Err(MoveError::SourceMissing {
                name: short_name(source),
            });
        }

        let target = self.prepare_destination(destination, now)?;

        relocate(source, &target).map_err(|e| classify_io_error(e, source, &target))?;
        debug!("moved {} -> {}", source.display(), target.display());
        Ok(target)
    }

    /// Resolves the collision-free path a file sent to `destination` would get.
    ///
    /// Creates the destination folder but moves nothing.
    pub fn prepare_destination(
        &self,
        destination: &Path,
        now: DateTime<Local>,
    ) -> Result<PathBuf, MoveError> {
        let raw_name = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| MoveError::InvalidName {
                name: short_name(destination),
            })?;
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .ok_or_else(|| MoveError::PathTooLong {
                name: short_name(destination),
            })?;

        let name = sanitize_file_name_at(&raw_name, now);

        fs::create_dir_all(parent).map_err(|source| MoveError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;

        let name = self.fit_to_path_limit(parent, &name, now);
        let name = self.free_name(parent, &name, now)?;
        let target = parent.join(&name);

        if path_chars(&target) > self.max_path_chars {
            return Err(MoveError::PathTooLong {
                name: short_name(&target),
            });
        }

        Ok(target)
    }

    /// Shortens `name` so that `parent/name` stays within the path limit.
    fn fit_to_path_limit(&self, parent: &Path, name: &str, now: DateTime<Local>) -> String {
        if path_chars(&parent.join(name)) <= self.max_path_chars {
            return name.to_string();
        }

        let (stem, ext) = split_name(name);
        let reserved = path_chars(parent) + ext.chars().count() + PATH_MARGIN;

        match self.max_path_chars.checked_sub(reserved) {
            Some(budget) if budget >= MIN_STEM_CHARS => {
                format!("{}{}{}", take_chars(stem, budget), ELLIPSIS, ext)
            }
            _ => format!("{}{}", generated_name("archivo_largo", now), ext),
        }
    }

    /// Finds a name in `parent` that no existing entry occupies.
    fn free_name(
        &self,
        parent: &Path,
        name: &str,
        now: DateTime<Local>,
    ) -> Result<String, MoveError> {
        if !occupied(&parent.join(name)) {
            return Ok(name.to_string());
        }

        let (stem, ext) = split_name(name);
        for counter in 1..=MAX_COUNTER {
            let suffix = format!(" ({}){}", counter, ext);
            let mut candidate = format!("{}{}", stem, suffix);
            if path_chars(&parent.join(&candidate)) > self.max_path_chars {
                // Stem characters left once the folder, separator and suffix are counted.
                let budget = self
                    .max_path_chars
                    .saturating_sub(path_chars(&parent.join(&suffix)));
                if budget == 0 {
                    break;
                }
                candidate = format!(
                    "{}{}",
                    take_chars(stem, budget.min(COUNTER_STEM_CHARS)),
                    suffix
                );
            }
            if !occupied(&parent.join(&candidate)) {
                return Ok(candidate);
            }
        }

        let fallback = format!("{}{}", generated_name("archivo", now), ext);
        if occupied(&parent.join(&fallback)) {
            return Err(MoveError::DestinationExists {
                name: take_chars(name, COUNTER_STEM_CHARS).to_string(),
            });
        }
        Ok(fallback)
    }
}

impl Default for SafeMover {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a name into stem and extension, the extension keeping its dot.
///
/// Names like `.bashrc` have no extension.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

fn path_chars(path: &Path) -> usize {
    path.to_string_lossy().chars().count()
}

/// An entry counts as present even if it is a dangling symlink.
fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn short_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    if name.chars().count() > COUNTER_STEM_CHARS {
        format!("{}{}", take_chars(&name, COUNTER_STEM_CHARS), ELLIPSIS)
    } else {
        name
    }
}

fn relocate(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!("{} is on another volume, copying", target.display());
            copy_then_delete(source, target)
        }
        Err(e) => Err(e),
    }
}

/// Copies into a freshly created `target`, then removes `source`.
///
/// On any failure the partial copy is removed and `source` is left untouched.
fn copy_then_delete(source: &Path, target: &Path) -> io::Result<()> {
    if let Err(e) = copy_contents(source, target) {
        // An existing target was not created by us and must survive.
        if e.kind() != io::ErrorKind::AlreadyExists {
            let _ = fs::remove_file(target);
        }
        return Err(e);
    }

    if let Err(e) = fs::remove_file(source) {
        warn!("could not remove {} after copying: {}", source.display(), e);
        let _ = fs::remove_file(target);
        return Err(e);
    }
    Ok(())
}

fn copy_contents(source: &Path, target: &Path) -> io::Result<()> {
    let mut reader = fs::File::open(source)?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(target)?;
    io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    if let Ok(metadata) = reader.metadata() {
        let _ = fs::set_permissions(target, metadata.permissions());
    }
    Ok(())
}

fn classify_io_error(error: io::Error, source: &Path, target: &Path) -> MoveError {
    let code = error.raw_os_error();
    let has_code = |codes: &[i32]| code.is_some_and(|code| codes.contains(&code));

    if error.kind() == io::ErrorKind::AlreadyExists || has_code(EXISTS_CODES) {
        MoveError::DestinationExists {
            name: short_name(target),
        }
    } else if error.kind() == io::ErrorKind::NotFound && source.exists() {
        MoveError::PathTooLong {
            name: short_name(target),
        }
    } else if has_code(PATH_TOO_LONG_CODES) {
        MoveError::PathTooLong {
            name: short_name(target),
        }
    } else if error.kind() == io::ErrorKind::InvalidInput || has_code(INVALID_NAME_CODES) {
        MoveError::InvalidName {
            name: short_name(target),
        }
    } else if error.kind() == io::ErrorKind::NotFound {
        MoveError::SourceMissing {
            name: short_name(source),
        }
    } else {
        MoveError::Io {
            name: short_name(source),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Local> {
        Local
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid timestamp")
    }

    fn write_file(path: &Path, content: &str) {
        fs::write(path, content).expect("Failed to write test file");
    }

    #[test]
    fn test_move_creates_directories() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("test.txt");
        write_file(&source, "test content");

        let destination = temp_dir.path().join("Documentos").join("2024-05").join("test.txt");
        let final_path = SafeMover::new()
            .move_file(&source, &destination)
            .expect("Failed to move file");

        assert_eq!(final_path, destination);
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&final_path).expect("read"), "test content");
    }

    #[test]
    fn test_move_sanitizes_destination_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("raw.txt");
        write_file(&source, "x");

        let destination = temp_dir.path().join("out").join("what?  is *this*.txt");
        let final_path = SafeMover::new()
            .move_file(&source, &destination)
            .expect("Failed to move file");

        assert_eq!(
            final_path.file_name().and_then(|n| n.to_str()),
            Some("what_ is _this_.txt")
        );
    }

    #[test]
    fn test_collision_appends_counter() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest_dir = temp_dir.path().join("Documentos");
        fs::create_dir(&dest_dir).expect("create dest");
        write_file(&dest_dir.join("report.pdf"), "old");

        let source = temp_dir.path().join("report.pdf");
        write_file(&source, "new");

        let final_path = SafeMover::new()
            .move_file(&source, &dest_dir.join("report.pdf"))
            .expect("Failed to move file");

        assert_eq!(final_path, dest_dir.join("report (1).pdf"));
        assert_eq!(fs::read_to_string(dest_dir.join("report.pdf")).expect("read"), "old");
        assert_eq!(fs::read_to_string(&final_path).expect("read"), "new");
    }

    #[test]
    fn test_identical_names_get_distinct_counters() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest_dir = temp_dir.path().join("dest");
        let mover = SafeMover::new();

        let mut finals = Vec::new();
        for i in 0..5 {
            let src_dir = temp_dir.path().join(format!("src{}", i));
            fs::create_dir(&src_dir).expect("create src");
            let source = src_dir.join("photo.jpg");
            write_file(&source, &i.to_string());
            finals.push(
                mover
                    .move_file(&source, &dest_dir.join("photo.jpg"))
                    .expect("move"),
            );
        }

        let names: Vec<String> = finals
            .iter()
            .map(|p| p.file_name().expect("name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "photo.jpg",
                "photo (1).jpg",
                "photo (2).jpg",
                "photo (3).jpg",
                "photo (4).jpg"
            ]
        );
        for (i, path) in finals.iter().enumerate() {
            assert_eq!(fs::read_to_string(path).expect("read"), i.to_string());
        }
    }

    #[test]
    fn test_counter_exhaustion_uses_generated_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let parent = temp_dir.path();
        write_file(&parent.join("a.txt"), "");
        for counter in 1..=MAX_COUNTER {
            write_file(&parent.join(format!("a ({}).txt", counter)), "");
        }

        let mover = SafeMover::new();
        let now = fixed_now();
        let name = mover.free_name(parent, "a.txt", now).expect("free name");
        assert_eq!(name, "archivo_1700000000.txt");

        write_file(&parent.join(&name), "");
        assert!(matches!(
            mover.free_name(parent, "a.txt", now),
            Err(MoveError::DestinationExists { .. })
        ));
    }

    #[test]
    fn test_long_name_is_shortened_to_fit() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("src.pdf");
        write_file(&source, "pdf");

        let parent_len = path_chars(temp_dir.path());
        let dest_dir = temp_dir.path().join("d".repeat(200 - parent_len - 1));
        let destination = dest_dir.join(format!("{}.pdf", "n".repeat(150)));

        let final_path = SafeMover::new()
            .move_file(&source, &destination)
            .expect("move");

        assert!(path_chars(&final_path) <= MAX_PATH_CHARS);
        let name = final_path.file_name().expect("name").to_string_lossy().into_owned();
        assert!(name.starts_with("nnnn"));
        assert!(name.ends_with("....pdf"));
    }

    #[test]
    fn test_deep_parent_falls_back_to_generated_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let parent_len = path_chars(temp_dir.path());
        let parent = temp_dir.path().join("d".repeat(220 - parent_len - 1));
        assert_eq!(path_chars(&parent), 220);

        let name = SafeMover::new().fit_to_path_limit(
            &parent,
            &format!("{}.pdf", "n".repeat(60)),
            fixed_now(),
        );
        assert_eq!(name, "archivo_largo_1700000000.pdf");
        assert!(path_chars(&parent.join(&name)) <= MAX_PATH_CHARS);
    }

    #[test]
    fn test_counter_candidate_truncates_long_stem() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let parent_len = path_chars(temp_dir.path());
        let parent = temp_dir.path().join("p".repeat(150 - parent_len - 1));
        fs::create_dir(&parent).expect("create parent");

        let stem = "s".repeat(95);
        let name = format!("{}.txt", stem);
        write_file(&parent.join(&name), "");

        let free = SafeMover::new()
            .free_name(&parent, &name, fixed_now())
            .expect("free name");
        assert_eq!(free, format!("{} (1).txt", "s".repeat(COUNTER_STEM_CHARS)));
    }

    #[test]
    fn test_collision_at_path_limit_still_moves() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let parent_len = path_chars(temp_dir.path());
        let parent = temp_dir.path().join("p".repeat(200 - parent_len - 1));
        fs::create_dir(&parent).expect("create parent");
        assert_eq!(path_chars(&parent), 200);

        let name = format!("{}.pdf", "n".repeat(45));
        write_file(&parent.join(&name), "old");
        assert_eq!(path_chars(&parent.join(&name)), MAX_PATH_CHARS);

        let source = temp_dir.path().join("new.pdf");
        write_file(&source, "new");
        let final_path = SafeMover::new()
            .move_file(&source, &parent.join(&name))
            .expect("collision near the limit should still move");

        assert_eq!(final_path, parent.join(format!("{} (1).pdf", "n".repeat(41))));
        assert!(path_chars(&final_path) <= MAX_PATH_CHARS);
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(parent.join(&name)).expect("read"), "old");
    }

    #[test]
    fn test_path_never_exceeds_limit() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mover = SafeMover::new();

        for len in [10usize, 120, 199, 240, 400] {
            let source = temp_dir.path().join(format!("src{}.bin", len));
            write_file(&source, "data");
            let destination = temp_dir.path().join("out").join(format!("{}.bin", "q".repeat(len)));

            match mover.move_file(&source, &destination) {
                Ok(path) => assert!(path_chars(&path) <= MAX_PATH_CHARS, "len {}", len),
                Err(e) => panic!("move of {} chars failed: {}", len, e),
            }
        }
    }

    #[test]
    fn test_missing_source() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = SafeMover::new().move_file(
            &temp_dir.path().join("ghost.txt"),
            &temp_dir.path().join("out").join("ghost.txt"),
        );

        assert!(matches!(result, Err(MoveError::SourceMissing { .. })));
        assert!(!temp_dir.path().join("out").exists());
    }

    #[test]
    fn test_directory_creation_failure() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.txt");
        write_file(&source, "a");
        let blocker = temp_dir.path().join("blocker");
        write_file(&blocker, "not a directory");

        let result = SafeMover::new().move_file(&source, &blocker.join("sub").join("a.txt"));
        assert!(matches!(result, Err(MoveError::CreateDirectory { .. })));
        assert!(source.exists());
    }

    #[test]
    fn test_copy_then_delete_keeps_source_on_conflict() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.txt");
        let target = temp_dir.path().join("b.txt");
        write_file(&source, "source");
        write_file(&target, "existing");

        let err = copy_then_delete(&source, &target).expect_err("target exists");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&source).expect("read"), "source");
        assert_eq!(fs::read_to_string(&target).expect("read"), "existing");
    }

    #[test]
    fn test_copy_then_delete_moves_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.txt");
        let target = temp_dir.path().join("b.txt");
        write_file(&source, "payload");

        copy_then_delete(&source, &target).expect("copy");
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&target).expect("read"), "payload");
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name(".bashrc"), (".bashrc", ""));
        assert_eq!(split_name("README"), ("README", ""));
    }

    #[test]
    fn test_classify_io_error() {
        let source = Path::new("/nowhere/a.txt");
        let target = Path::new("/nowhere/out/a.txt");

        let exists = io::Error::from(io::ErrorKind::AlreadyExists);
        assert!(matches!(
            classify_io_error(exists, source, target),
            MoveError::DestinationExists { .. }
        ));

        let invalid = io::Error::from(io::ErrorKind::InvalidInput);
        assert!(matches!(
            classify_io_error(invalid, source, target),
            MoveError::InvalidName { .. }
        ));

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            classify_io_error(denied, source, target),
            MoveError::Io { .. }
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_classify_name_too_long() {
        let error = io::Error::from_raw_os_error(36);
        assert!(matches!(
            classify_io_error(error, Path::new("a"), Path::new("b")),
            MoveError::PathTooLong { .. }
        ));
    }
}
