//! Template archive provisioning
//!
//! The generator needs its template files unpacked under the request's search
//! path before it runs: create the directory, download the archive into it,
//! unpack it in place.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tracing::info;

use crate::{Downloader, FileProvisioner, Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from the archive's file name
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }
}

pub struct TemplateArchiveProvisioner {
    downloader: Arc<dyn Downloader>,
}

impl TemplateArchiveProvisioner {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        Self { downloader }
    }

    async fn create_template_directory(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Creating directory for template files");
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn download_template_archive(&self, path: &Path, filename: &str) -> Result<PathBuf> {
        info!(
            archive = %filename,
            path = %path.display(),
            downloader = %self.downloader.name(),
            "Downloading template archive"
        );
        self.downloader.download(path, filename).await
    }

    async fn unpack_template_archive(&self, archive: PathBuf, path: &Path) -> Result<()> {
        info!(archive = %archive.display(), "Unpacking template archive");
        let dest = path.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_archive(&archive, &dest))
            .await
            .map_err(|e| StorageError::Configuration(format!("unpack task failed: {}", e)))?
    }
}

#[async_trait]
impl FileProvisioner for TemplateArchiveProvisioner {
    async fn create_structure_for(&self, path: &Path, filename: &str) -> Result<()> {
        self.create_template_directory(path).await?;
        let archive = self.download_template_archive(path, filename).await?;
        self.unpack_template_archive(archive, path).await
    }
}

/// Unpack a tar or gzip-compressed tar archive into `dest`
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let format = ArchiveFormat::from_filename(name)
        .ok_or_else(|| StorageError::UnsupportedArchive(name.to_string()))?;

    let file = File::open(archive).map_err(|e| StorageError::io(archive, e))?;
    let unpacked = match format {
        ArchiveFormat::Tar => tar::Archive::new(file).unpack(dest),
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(file)).unpack(dest),
    };

    unpacked.map_err(|e| StorageError::Unpack {
        archive: archive.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use parking_lot::Mutex;

    /// Serves a prebuilt archive from memory, recording requested keys
    struct MemoryDownloader {
        archive: Vec<u8>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Downloader for MemoryDownloader {
        async fn download(&self, dir: &Path, filename: &str) -> Result<PathBuf> {
            self.requested.lock().push(filename.to_string());
            let target = dir.join(filename);
            std::fs::write(&target, &self.archive).map_err(|e| StorageError::io(&target, e))?;
            Ok(target)
        }

        fn name(&self) -> &str {
            "memory"
        }
    }

    fn template_tar_gz() -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let contents = br#"{"platform": "apollo"}"#;
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "templates/apollo.json", &contents[..])
            .unwrap();

        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_archive_format_detection() {
        assert_eq!(ArchiveFormat::from_filename("t.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_filename("T.TGZ"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_filename("t.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_filename("t.zip"), None);
    }

    #[tokio::test]
    async fn test_create_structure_downloads_and_unpacks() {
        let root = tempfile::tempdir().unwrap();
        let search_path = root.path().join("bundles").join("u1");

        let downloader = Arc::new(MemoryDownloader {
            archive: template_tar_gz(),
            requested: Mutex::new(Vec::new()),
        });
        let provisioner = TemplateArchiveProvisioner::new(downloader.clone());

        provisioner
            .create_structure_for(&search_path, "apollo_templates.tar.gz")
            .await
            .unwrap();

        assert_eq!(*downloader.requested.lock(), vec!["apollo_templates.tar.gz".to_string()]);
        let unpacked = std::fs::read_to_string(search_path.join("templates/apollo.json")).unwrap();
        assert!(unpacked.contains("apollo"));
    }

    #[tokio::test]
    async fn test_unsupported_archive_fails() {
        let root = tempfile::tempdir().unwrap();
        let downloader = Arc::new(MemoryDownloader {
            archive: b"PK\x03\x04".to_vec(),
            requested: Mutex::new(Vec::new()),
        });
        let provisioner = TemplateArchiveProvisioner::new(downloader);

        let err = provisioner
            .create_structure_for(root.path(), "templates.zip")
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::UnsupportedArchive(name) if name == "templates.zip"));
    }

    #[test]
    fn test_corrupt_archive_is_unpack_error() {
        let root = tempfile::tempdir().unwrap();
        let archive = root.path().join("broken.tar.gz");
        std::fs::write(&archive, b"not gzip at all").unwrap();

        let err = unpack_archive(&archive, root.path()).unwrap_err();
        assert!(matches!(err, StorageError::Unpack { .. }));
    }
}
