/*
 * Content digests for files found in backup generations. Verbose search prints
 * one per hit so the same path can be compared across generations without
 * diffing the trees.
 */
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

/*
 * Hex-encoded SHA256 of a regular file's contents. Anything that is not a
 * regular file (directories, sockets, dangling links) yields `InvalidInput`.
 */
pub fn file_sha256(path: &Path) -> io::Result<String> {
    if !path.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let digest = format!("{:x}", hasher.finalize());
    log::trace!("ChecksumUtils: {digest} {path:?}");
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hardlinked_generations_share_digest() {
        // Arrange
        let temp = TempDir::new().unwrap();
        let older = temp.path().join("rubac.2024-01-01");
        let newer = temp.path().join("rubac.2024-01-02");
        fs::create_dir_all(&older).unwrap();
        fs::create_dir_all(&newer).unwrap();
        fs::write(older.join(".bashrc"), b"").unwrap();
        fs::hard_link(older.join(".bashrc"), newer.join(".bashrc")).unwrap();

        // Act
        let a = file_sha256(&older.join(".bashrc")).unwrap();
        let b = file_sha256(&newer.join(".bashrc")).unwrap();

        // Assert
        assert_eq!(a, b);
        assert_eq!(
            a,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_changed_content_changes_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.txt");
        fs::write(&path, b"first").unwrap();
        let before = file_sha256(&path).unwrap();
        fs::write(&path, b"second").unwrap();

        assert_ne!(before, file_sha256(&path).unwrap());
    }

    #[test]
    fn test_directory_and_missing_file_are_rejected() {
        let temp = TempDir::new().unwrap();

        let dir_err = file_sha256(temp.path()).unwrap_err();
        let missing_err = file_sha256(&temp.path().join("gone")).unwrap_err();

        assert_eq!(dir_err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(missing_err.kind(), io::ErrorKind::InvalidInput);
    }
}
