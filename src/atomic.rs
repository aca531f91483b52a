use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::PersistenceError;

/// Serialize `value` as JSON and replace `path` with it in one rename, so
/// readers see either the old file or the new one.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec(value).map_err(|source| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let mut file = fs::File::create(tmp_path).map_err(|e| PersistenceError::io(tmp_path, e))?;
    file.write_all(&json)
        .and_then(|_| file.sync_all())
        .map_err(|e| PersistenceError::io(tmp_path, e))?;
    drop(file);

    #[cfg(target_os = "windows")]
    if path.exists() {
        fs::remove_file(path).map_err(|e| PersistenceError::io(path, e))?;
    }
    fs::rename(tmp_path, path).map_err(|e| PersistenceError::io(path, e))?;
    Ok(())
}

/// Read a JSON file, or `None` if it does not exist. Anything else that goes
/// wrong is an error: a damaged state file must not look like an empty one.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}
