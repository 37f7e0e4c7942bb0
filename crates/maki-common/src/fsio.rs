use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path, source: io::Error) -> FsError {
    FsError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `bytes` to `path` with mode 0600, replacing atomically.
///
/// The payload lands in a sibling `.tmp` file first and is renamed into
/// place, so concurrent readers never observe a partial file.
pub fn atomic_write_secret(path: &Path, bytes: &[u8]) -> Result<(), FsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| io_err(&tmp, e))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::atomic_write_secret;

    #[test]
    fn write_replaces_and_restricts_mode() {
        let dir = std::env::temp_dir().join(format!("maki-fsio-{}", std::process::id()));
        let path = dir.join("cred.json");
        atomic_write_secret(&path, b"{\"a\":1}").unwrap();
        atomic_write_secret(&path, b"{\"a\":2}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":2}");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
