use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::ReleaseError;

/// Remove `dir` with everything in it and create it again, empty.
pub async fn recreate_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Unpack a gzip-compressed tarball into `dest`, creating it if missing.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ReleaseError> {
    let archive_path = archive.to_path_buf();
    let dest_path = dest.to_path_buf();
    let unpacked = tokio::task::spawn_blocking(move || {
        fs::create_dir_all(&dest_path)?;
        let file = fs::File::open(&archive_path)?;
        let mut tar = Archive::new(GzDecoder::new(file));
        tar.unpack(&dest_path)?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|e| anyhow!("extract_archive task join error: {}", e))
    .and_then(|r| r);

    unpacked.map_err(|e| ReleaseError::Extraction {
        archive: archive.to_path_buf(),
        dest: dest.to_path_buf(),
        reason: format!("{:#}", e),
    })?;
    tracing::info!("archive: extracted {} into {}", archive.display(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn write_tar_gz(path: &Path, files: &[(&str, &str)]) {
        let enc = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
        let mut tar = tar::Builder::new(enc);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_bytes()).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn extracts_into_missing_directory() {
        let td = tempfile::tempdir().unwrap();
        let archive = td.path().join("bundle.tar.gz");
        write_tar_gz(
            &archive,
            &[("package.json", r#"{"version":"1.0.0"}"#), ("lib/index.js", "x")],
        );
        let dest = td.path().join("out").join("extracted");

        extract_archive(&archive, &dest).await.unwrap();

        assert!(dest.join("package.json").is_file());
        assert_eq!(fs::read_to_string(dest.join("lib/index.js")).unwrap(), "x");
    }

    #[tokio::test]
    async fn corrupt_archive_is_an_extraction_error() {
        let td = tempfile::tempdir().unwrap();
        let archive = td.path().join("bundle.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let err = extract_archive(&archive, &td.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Extraction { .. }));
    }

    #[tokio::test]
    async fn missing_archive_is_an_extraction_error() {
        let td = tempfile::tempdir().unwrap();
        let err = extract_archive(&td.path().join("nope.tar.gz"), &td.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Extraction { .. }));
    }

    #[tokio::test]
    async fn recreate_dir_drops_stale_content() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("tmp");
        fs::create_dir_all(dir.join("extracted")).unwrap();
        fs::write(dir.join("extracted/stale.txt"), "old").unwrap();

        recreate_dir(&dir).await.unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }
}
