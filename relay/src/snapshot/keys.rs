use std::path::{Path, PathBuf};

/// File name for snapshot number `n`, e.g. `snapshot_3.jpg`.
pub fn snapshot_file_name(n: u64, extension: &str) -> String {
    format!("snapshot_{n}.{}", extension.trim_start_matches('.'))
}

pub fn snapshot_path(dir: &Path, n: u64, extension: &str) -> PathBuf {
    dir.join(snapshot_file_name(n, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_format() {
        assert_eq!(snapshot_file_name(0, "jpg"), "snapshot_0.jpg");
        assert_eq!(snapshot_file_name(12, ".png"), "snapshot_12.png");
    }

    #[test]
    fn test_path_joins_dir() {
        let p = snapshot_path(Path::new("/tmp/shots"), 4, "jpg");
        assert_eq!(p, PathBuf::from("/tmp/shots/snapshot_4.jpg"));
    }
}
