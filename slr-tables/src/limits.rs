//! Size guards applied before a table is parsed.

use std::path::Path;

use crate::error::{Error, Result};

/// Largest accepted CSV input, in bytes (10 MB).
pub const MAX_TABLE_BYTES: u64 = 10 * 1024 * 1024;

/// Largest accepted number of data rows (header excluded).
pub const MAX_TABLE_ROWS: usize = 10_000;

/// Reject inputs larger than [`MAX_TABLE_BYTES`].
pub fn check_table_bytes(name: &str, len: u64) -> Result<()> {
    if len > MAX_TABLE_BYTES {
        return Err(Error::ResourceLimit(format!(
            "{} is {:.1} MB; maximum is {} MB",
            name,
            len as f64 / 1024.0 / 1024.0,
            MAX_TABLE_BYTES / 1024 / 1024
        )));
    }
    Ok(())
}

/// Reject a table once its data-row count passes [`MAX_TABLE_ROWS`].
pub fn check_table_rows(name: &str, rows: usize) -> Result<()> {
    if rows > MAX_TABLE_ROWS {
        return Err(Error::ResourceLimit(format!(
            "{} has more than {} data rows; file may be corrupted",
            name, MAX_TABLE_ROWS
        )));
    }
    Ok(())
}

/// Read a table file after checking its size on disk.
pub fn read_table_file(path: &Path) -> Result<String> {
    let name = path.display().to_string();
    let meta = std::fs::metadata(path)
        .map_err(|e| Error::NotFound(format!("table file {}: {}", name, e)))?;
    check_table_bytes(&name, meta.len())?;
    let bytes = std::fs::read(path)?;
    String::from_utf8(bytes)
        .map_err(|e| Error::MalformedInput(format!("{} is not valid UTF-8: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_bytes_limit() {
        assert!(check_table_bytes("t.csv", MAX_TABLE_BYTES).is_ok());
        let err = check_table_bytes("t.csv", MAX_TABLE_BYTES + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceLimit);
        assert!(err.to_string().contains("t.csv"));
    }

    #[test]
    fn test_rows_limit() {
        assert!(check_table_rows("t.csv", MAX_TABLE_ROWS).is_ok());
        assert_eq!(
            check_table_rows("t.csv", MAX_TABLE_ROWS + 1).unwrap_err().kind(),
            ErrorKind::ResourceLimit
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = read_table_file(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
