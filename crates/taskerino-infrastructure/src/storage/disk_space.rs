use std::path::Path;
use taskerino_core::{Result, TaskerinoError};

const MB: u64 = 1024 * 1024;

/// Fails with `InsufficientSpace` unless `path`'s filesystem can take
/// `write_size` bytes and still keep `min_free` bytes free.
///
/// `path` may not exist yet; the nearest existing ancestor is checked.
pub fn ensure_free_space(path: &Path, write_size: u64, min_free: u64) -> Result<()> {
    if min_free == 0 {
        return Ok(());
    }

    let existing_dir = path
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("."));

    let available = fs2::available_space(existing_dir)?;
    let required = min_free.saturating_add(write_size);
    if available < required {
        tracing::warn!(
            "[DiskSpace] Refusing write at {}: {} MB free, {} MB required",
            existing_dir.display(),
            available / MB,
            required / MB
        );
        return Err(TaskerinoError::InsufficientSpace {
            available_mb: available / MB,
            required_mb: required.div_ceil(MB),
            path: existing_dir.display().to_string(),
        });
    }
    Ok(())
}
