//! SHA-256 helpers for file, directory, and config hashing.

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Hex-encode a finished digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex(&hasher.finalize())
}

/// Hash a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    sha256_hex(data)
}

/// Hash a file's contents without loading it whole.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex(&hasher.finalize()))
}

/// Hash a directory tree deterministically.
///
/// Files are keyed by their `/`-joined relative path and hashed in parallel;
/// the composite digest covers the sorted `path:hash` lines, so file order on
/// disk never affects the result. `.git` directories are skipped.
pub fn sha256_dir(root: &Path) -> std::io::Result<String> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    collect_files(root, "", &mut files)?;

    let file_hashes: std::io::Result<BTreeMap<String, String>> = files
        .par_iter()
        .map(|(key, path)| Ok((key.clone(), sha256_file(path)?)))
        .collect();
    let file_hashes = file_hashes?;

    let combined: String = file_hashes
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(sha256_hex(combined.as_bytes()))
}

fn collect_files(
    dir: &Path,
    prefix: &str,
    files: &mut Vec<(String, PathBuf)>,
) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if name == ".git" {
            continue;
        }

        let key = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        if path.is_dir() {
            collect_files(&path, &key, files)?;
        } else {
            files.push((key, path));
        }
    }
    Ok(())
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_and_bytes_agree() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, b"hello world").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_bytes(b"hello world"));
    }

    #[test]
    fn dir_hash_ignores_file_order_and_git() {
        let a = tempfile::tempdir().unwrap();
        fs::write(a.path().join("b.cj"), "package x").unwrap();
        fs::write(a.path().join("a.cj"), "package x").unwrap();
        fs::create_dir(a.path().join(".git")).unwrap();
        fs::write(a.path().join(".git").join("HEAD"), "ref").unwrap();

        let b = tempfile::tempdir().unwrap();
        fs::write(b.path().join("a.cj"), "package x").unwrap();
        fs::write(b.path().join("b.cj"), "package x").unwrap();

        assert_eq!(
            sha256_dir(a.path()).unwrap(),
            sha256_dir(b.path()).unwrap()
        );
    }

    #[test]
    fn dir_hash_changes_with_content() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.cj"), "one").unwrap();
        let before = sha256_dir(tmp.path()).unwrap();
        fs::write(tmp.path().join("a.cj"), "two").unwrap();
        assert_ne!(before, sha256_dir(tmp.path()).unwrap());
    }
}
