use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::app::{DigestError, Result};
use crate::outline::Outline;

/// An [`Outline`] mirrored to a file on disk.
///
/// Mutations go through [`OutlineFile::modify`], which applies the change to a
/// copy, writes it to a temporary file in the same directory and renames it
/// over the target. The in-memory outline only changes once the file is in
/// place.
#[derive(Debug)]
pub struct OutlineFile {
    path: PathBuf,
    outline: Outline,
}

impl OutlineFile {
    /// Load from `path`; a missing file yields an empty outline.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let outline = match fs::read(&path) {
            Ok(bytes) => Outline::parse(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Outline::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, outline })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn outline(&self) -> &Outline {
        &self.outline
    }

    /// Re-read the file, discarding the in-memory copy.
    pub fn reload(&mut self) -> Result<()> {
        *self = Self::load(&self.path)?;
        Ok(())
    }

    pub fn modify<T>(&mut self, change: impl FnOnce(&mut Outline) -> Result<T>) -> Result<T> {
        let mut next = self.outline.clone();
        let value = change(&mut next)?;
        if next != self.outline {
            write_atomic(&self.path, &next)?;
            self.outline = next;
        }
        Ok(value)
    }

    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, &self.outline)
    }
}

fn write_atomic(path: &Path, outline: &Outline) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    outline.write(&mut tmp)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| DigestError::Io(e.error))?;

    tracing::debug!("Wrote outline to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = OutlineFile::load(dir.path().join("feeds.opml")).unwrap();
        assert!(file.outline().is_empty());
    }

    #[test]
    fn test_modify_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.opml");

        let mut file = OutlineFile::load(&path).unwrap();
        file.modify(|o| o.add_feed("https://a.example/feed", "A", "Tech"))
            .unwrap();

        let reloaded = OutlineFile::load(&path).unwrap();
        assert!(reloaded.outline().contains("https://a.example/feed"));
        assert_eq!(reloaded.outline().folders(), vec!["Tech".to_string()]);
    }

    #[test]
    fn test_failed_change_leaves_file_and_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.opml");

        let mut file = OutlineFile::load(&path).unwrap();
        file.modify(|o| o.add_feed("https://a.example/feed", "A", ""))
            .unwrap();
        let before = fs::read(&path).unwrap();

        let err = file
            .modify(|o| {
                o.add_feed("https://b.example/feed", "B", "")?;
                o.add_feed("https://a.example/feed", "A", "")
            })
            .unwrap_err();
        assert!(matches!(err, DigestError::Duplicate(_)));
        assert!(!file.outline().contains("https://b.example/feed"));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.opml");
        let mut file = OutlineFile::load(&path).unwrap();
        file.modify(|o| o.add_feed("https://a.example/feed", "A", ""))
            .unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("feeds.opml")]);
    }
}
