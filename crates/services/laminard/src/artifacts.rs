//! Read-only access to archived artifacts and optional custom styling.

use std::fs::File;

use laminar_config::Settings;
use memmap2::Mmap;

use crate::prelude::*;

/// Memory-map an archived file for serving. Returns `None` when the path
/// does not name a regular file under the archive tree.
pub fn artefact(settings: &Settings, path: &str) -> Result<Option<Mmap>> {
    let full = settings.archive_root().join(path);
    if !full.is_file() {
        return Ok(None);
    }
    let file = File::open(&full)?;
    // Safety: archive files are written once by the owning run and never
    // modified afterwards.
    let map = unsafe { Mmap::map(&file)? };
    Ok(Some(map))
}

/// Contents of `custom/style.css`, or an empty string.
pub fn custom_css(settings: &Settings) -> String {
    std::fs::read_to_string(settings.custom_css_path()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_archived_files() {
        let home = tempfile::tempdir().unwrap();
        let settings = Settings::for_home(home.path());
        let dir = settings.archive_dir("job", 1);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("out.txt"), b"artifact body").unwrap();

        let map = artefact(&settings, "job/1/out.txt").unwrap().unwrap();
        assert_eq!(&map[..], b"artifact body");
        assert!(artefact(&settings, "job/1/missing").unwrap().is_none());
    }

    #[test]
    fn custom_css_defaults_to_empty() {
        let home = tempfile::tempdir().unwrap();
        let settings = Settings::for_home(home.path());
        assert_eq!(custom_css(&settings), "");

        std::fs::create_dir_all(settings.home.join("custom")).unwrap();
        std::fs::write(settings.custom_css_path(), "body { color: red }").unwrap();
        assert_eq!(custom_css(&settings), "body { color: red }");
    }
}
