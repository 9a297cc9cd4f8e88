use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::error::ArchiveError;

/// One entry of the archive: a directory or a file with its size
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveEntry {
    Directory(String),
    File(PathBuf, String, u64),
}

/// Packs a session directory into `<directory>.zip`.
///
/// Entry names are prefixed with the directory name, so the archive unpacks into a
/// directory of the same name.
#[derive(Debug)]
pub struct Archiver {
    directory: PathBuf,
    entries: Vec<ArchiveEntry>,
    total_data_size_bytes: u64,
}

impl Archiver {
    /// Walk the directory tree and build the entry list
    pub fn new(directory: &Path) -> Result<Self, ArchiveError> {
        if !directory.is_dir() {
            return Err(ArchiveError::BadDirectory(directory.to_path_buf()));
        }
        let root_name = directory
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| ArchiveError::BadDirectory(directory.to_path_buf()))?;
        let mut entries = Vec::new();
        let mut total_size = 0;
        Self::walk(directory, &root_name, &mut entries, &mut total_size)?;
        Ok(Self {
            directory: directory.to_path_buf(),
            entries,
            total_data_size_bytes: total_size,
        })
    }

    fn walk(
        dir: &Path,
        entry_name: &str,
        entries: &mut Vec<ArchiveEntry>,
        total_size: &mut u64,
    ) -> Result<(), ArchiveError> {
        entries.push(ArchiveEntry::Directory(format!("{entry_name}/")));
        let mut items: Vec<PathBuf> = dir
            .read_dir()?
            .map(|item| item.map(|i| i.path()))
            .collect::<Result<_, _>>()?;
        items.sort();
        for item_path in items {
            let name = match item_path.file_name() {
                Some(name) => format!("{entry_name}/{}", name.to_string_lossy()),
                None => continue,
            };
            if item_path.is_dir() {
                Self::walk(&item_path, &name, entries, total_size)?;
            } else {
                let bytes = item_path.metadata()?.len();
                *total_size += bytes;
                entries.push(ArchiveEntry::File(item_path, name, bytes));
            }
        }
        Ok(())
    }

    /// Path of the archive, next to the directory
    pub fn archive_path(&self) -> PathBuf {
        let mut name = OsString::from(self.directory.as_os_str());
        name.push(".zip");
        PathBuf::from(name)
    }

    pub fn get_total_data_size(&self) -> u64 {
        self.total_data_size_bytes
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Write the archive, replacing an existing one
    pub fn write(&self) -> Result<PathBuf, ArchiveError> {
        let zip_path = self.archive_path();
        spdlog::info!(
            "Compressing {} ({}) to {}",
            self.directory.display(),
            human_bytes::human_bytes(self.total_data_size_bytes as f64),
            zip_path.display()
        );
        let mut zip = ZipWriter::new(BufWriter::new(File::create(&zip_path)?));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(self.total_data_size_bytes > u32::MAX as u64);
        for entry in self.entries.iter() {
            match entry {
                ArchiveEntry::Directory(name) => zip.add_directory(name.as_str(), options)?,
                ArchiveEntry::File(path, name, _) => {
                    spdlog::debug!("Adding {}", name);
                    zip.start_file(name.as_str(), options)?;
                    let mut source = File::open(path)?;
                    std::io::copy(&mut source, &mut zip)?;
                }
            }
        }
        zip.finish()?;
        Ok(zip_path)
    }
}

/// Pack `directory` into `<directory>.zip`
pub fn compress_directory(directory: &Path) -> Result<PathBuf, ArchiveError> {
    Archiver::new(directory)?.write()
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_holds_tree_under_directory_name() {
        let parent = tempfile::tempdir().unwrap();
        let dir = parent.path().join("EIGERDebug_240101_120000");
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("detectorStatus_initial.json"), "{}").unwrap();
        std::fs::write(dir.join("sub").join("rest_api.log"), "log line\n").unwrap();

        let archiver = Archiver::new(&dir).unwrap();
        assert_eq!(archiver.get_total_data_size(), 11);
        let zip_path = archiver.write().unwrap();
        assert_eq!(zip_path, parent.path().join("EIGERDebug_240101_120000.zip"));

        let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "EIGERDebug_240101_120000/",
                "EIGERDebug_240101_120000/detectorStatus_initial.json",
                "EIGERDebug_240101_120000/sub/",
                "EIGERDebug_240101_120000/sub/rest_api.log",
            ]
        );
        let mut log = String::new();
        std::io::Read::read_to_string(
            &mut archive
                .by_name("EIGERDebug_240101_120000/sub/rest_api.log")
                .unwrap(),
            &mut log,
        )
        .unwrap();
        assert_eq!(log, "log line\n");
    }

    #[test]
    fn test_missing_directory() {
        assert!(matches!(
            compress_directory(Path::new("/does/not/exist")),
            Err(ArchiveError::BadDirectory(_))
        ));
    }
}
