/// Filesystem helpers shared by actions and undo.
///
/// Everything destructive in the crate goes through these functions so that
/// collision naming, cross-device moves and atomic writes behave the same
/// whether a rule is running or an undo is being applied.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Returns `candidate` if it is free, otherwise the first free sibling named
/// `stem (N).ext` with N counting up from 1.
///
/// The boolean is `true` when an alternate name had to be generated.
///
/// # Examples
///
/// ```no_run
/// use ruletidy::fsops::unique_path;
/// use std::path::Path;
///
/// // With "document.txt" already present:
/// let (path, renamed) = unique_path(Path::new("/tmp/docs/document.txt"));
/// assert!(renamed);
/// assert_eq!(path, Path::new("/tmp/docs/document (1).txt"));
/// ```
pub fn unique_path(candidate: &Path) -> (PathBuf, bool) {
    let free = collision_names(candidate)
        .find(|path| !exists_no_follow(path))
        .unwrap_or_else(|| candidate.to_path_buf());
    let renamed = free != candidate;
    (free, renamed)
}

/// `candidate` followed by its `stem (N).ext` alternates, N = 1, 2, ...
fn collision_names(candidate: &Path) -> impl Iterator<Item = PathBuf> {
    let parent = candidate
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let file_name = candidate
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (stem, ext) = split_name(&file_name);

    std::iter::once(candidate.to_path_buf()).chain(
        (1u32..).map(move |counter| parent.join(format!("{} ({}){}", stem, counter, ext))),
    )
}

/// Finds a file byte-identical to `src` at `candidate` or at one of the
/// alternates `unique_path` would have produced for it.
///
/// The search stops at the first free name, since later alternates cannot
/// have been produced by collision naming.
pub fn find_identical(src: &Path, candidate: &Path) -> Option<PathBuf> {
    collision_names(candidate)
        .take_while(|path| exists_no_follow(path))
        .find(|path| files_identical(src, path))
}

/// Splits a file name into stem and extension (extension keeps its dot).
///
/// Dot-files such as `.bashrc` have no extension.
pub fn split_name(file_name: &str) -> (String, String) {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// True if anything (including a dangling symlink) occupies `path`.
pub fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Moves a file or directory, falling back to copy + delete when a plain
/// rename is not possible (e.g. across filesystems).
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            let meta = fs::symlink_metadata(src).map_err(|_| rename_err)?;
            if meta.is_dir() {
                copy_dir_recursive(src, dst)?;
                fs::remove_dir_all(src)
            } else {
                fs::copy(src, dst)?;
                fs::remove_file(src)
            }
        }
    }
}

/// Copies a file, or a directory tree, to `dst`.
pub fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        copy_dir_recursive(src, dst).map(|_| ())
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

/// Recursively copies a directory, returning the number of files copied.
///
/// Symlinks inside the tree are skipped.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            tracing::warn!(path = %src_path.display(), "Skipping symlink during copy");
            continue;
        }

        if file_type.is_dir() {
            copied += copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Removes a file, symlink or directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Writes `data` to `path` through a temp file, fsync and rename.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
    }

    let temp_name = format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string()),
        std::process::id()
    );
    let temp_path = parent.join(temp_name);

    let written = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    })();

    if let Err(e) = written.and_then(|()| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}

/// Makes a path absolute and resolves `.` and `..` lexically, without
/// following symlinks.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();

    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}

/// Replaces a leading `~` with the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~')
        && (rest.is_empty() || rest.starts_with(['/', '\\']))
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest.trim_start_matches(['/', '\\']));
    }
    PathBuf::from(raw)
}

/// True if both paths refer to the same location.
///
/// Existing paths are compared after canonicalization; otherwise the lexical
/// forms are compared.
pub fn same_location(a: &Path, b: &Path) -> bool {
    if let (Ok(ca), Ok(cb)) = (fs::canonicalize(a), fs::canonicalize(b)) {
        return ca == cb;
    }
    normalize_lexical(a) == normalize_lexical(b)
}

/// True if both paths are regular files with byte-identical content.
pub fn files_identical(a: &Path, b: &Path) -> bool {
    let (Ok(ma), Ok(mb)) = (fs::metadata(a), fs::metadata(b)) else {
        return false;
    };
    if !ma.is_file() || !mb.is_file() || ma.len() != mb.len() {
        return false;
    }

    let (Ok(mut fa), Ok(mut fb)) = (File::open(a), File::open(b)) else {
        return false;
    };
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];

    loop {
        let (Ok(read_a), Ok(read_b)) = (fill(&mut fa, &mut buf_a), fill(&mut fb, &mut buf_b))
        else {
            return false;
        };
        if read_a != read_b || buf_a[..read_a] != buf_b[..read_b] {
            return false;
        }
        if read_a == 0 {
            return true;
        }
    }
}

/// Reads until `buf` is full or the reader is exhausted.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unique_path_free_name_is_kept() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let candidate = temp_dir.path().join("document.txt");

        let (path, renamed) = unique_path(&candidate);
        assert_eq!(path, candidate);
        assert!(!renamed);
    }

    #[test]
    fn test_unique_path_counts_up() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let candidate = temp_dir.path().join("document.txt");
        fs::write(&candidate, "first").expect("Failed to write file");

        let (second, renamed) = unique_path(&candidate);
        assert!(renamed);
        assert_eq!(second, temp_dir.path().join("document (1).txt"));
        fs::write(&second, "second").expect("Failed to write file");

        let (third, _) = unique_path(&candidate);
        assert_eq!(third, temp_dir.path().join("document (2).txt"));
    }

    #[test]
    fn test_unique_path_without_extension() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let candidate = temp_dir.path().join("Makefile");
        fs::write(&candidate, "all:").expect("Failed to write file");

        let (path, _) = unique_path(&candidate);
        assert_eq!(path, temp_dir.path().join("Makefile (1)"));
    }

    #[test]
    fn test_find_identical_checks_alternates() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("a.txt");
        fs::write(&src, "mine").expect("Failed to write file");
        fs::write(&dest, "other").expect("Failed to write file");
        assert_eq!(find_identical(&src, &dest), None);

        let alternate = temp_dir.path().join("a (1).txt");
        fs::write(&alternate, "mine").expect("Failed to write file");
        assert_eq!(find_identical(&src, &dest), Some(alternate));

        // Past a free slot the chain is broken.
        fs::remove_file(temp_dir.path().join("a (1).txt")).expect("Failed to remove file");
        fs::write(temp_dir.path().join("a (2).txt"), "mine").expect("Failed to write file");
        assert_eq!(find_identical(&src, &dest), None);
    }

    #[test]
    fn test_split_name_dotfile() {
        assert_eq!(split_name(".bashrc"), (".bashrc".to_string(), String::new()));
        assert_eq!(
            split_name("archive.tar.gz"),
            ("archive.tar".to_string(), ".gz".to_string())
        );
    }

    #[test]
    fn test_move_path_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("album");
        fs::create_dir_all(src.join("disc1")).expect("Failed to create dirs");
        fs::write(src.join("disc1").join("track.mp3"), "audio").expect("Failed to write file");

        let dst = temp_dir.path().join("moved");
        move_path(&src, &dst).expect("Failed to move directory");

        assert!(!src.exists());
        assert!(dst.join("disc1").join("track.mp3").exists());
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let target = temp_dir.path().join("nested").join("store.json");

        atomic_write(&target, b"one").expect("First write failed");
        atomic_write(&target, b"two").expect("Second write failed");

        assert_eq!(fs::read_to_string(&target).expect("Failed to read"), "two");
    }

    #[test]
    fn test_files_identical() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let a = temp_dir.path().join("a.bin");
        let b = temp_dir.path().join("b.bin");
        let c = temp_dir.path().join("c.bin");
        fs::write(&a, "same bytes").expect("Failed to write a");
        fs::write(&b, "same bytes").expect("Failed to write b");
        fs::write(&c, "diff bytes").expect("Failed to write c");

        assert!(files_identical(&a, &b));
        assert!(!files_identical(&a, &c));
        assert!(!files_identical(&a, &temp_dir.path().join("missing")));
    }

    #[test]
    fn test_normalize_lexical() {
        assert_eq!(
            normalize_lexical(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
