//! `--arm` / `--disarm` file swaps.
//!
//! `.instrumented` files are written first; only after every write succeeds
//! are originals renamed to `.original` and the instrumented copies moved
//! into their place. Disarm reverses the swap byte-for-byte.

use std::fs;
use std::io;
use std::path::Path;

/// Write instrumented texts beside their originals, then swap the originals
/// out. Paths without an on-disk original (stdin, virtual units) only get
/// their `.instrumented` file.
pub(crate) fn arm_files(outputs: &[(String, String)]) -> io::Result<()> {
    for (path, text) in outputs {
        fs::write(format!("{path}.instrumented"), text)?;
    }
    for (path, _) in outputs {
        if Path::new(path).exists() {
            fs::rename(path, format!("{path}.original"))?;
            fs::copy(format!("{path}.instrumented"), path)?;
        }
    }
    Ok(())
}

/// Restore `.original` files over the armed copies.
pub(crate) fn disarm_files(paths: &[String], keep_instrumented: bool) -> io::Result<()> {
    for path in paths {
        let original = format!("{path}.original");
        if Path::new(&original).exists() {
            fs::rename(&original, path)?;
        }
        if !keep_instrumented {
            let instrumented = format!("{path}.instrumented");
            if Path::new(&instrumented).exists() {
                fs::remove_file(&instrumented)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_then_disarm_restores_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.sol");
        let path_str = path.to_string_lossy().into_owned();
        fs::write(&path, "original bytes").unwrap();

        arm_files(&[(path_str.clone(), "instrumented bytes".to_string())]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "instrumented bytes");
        assert_eq!(
            fs::read_to_string(format!("{path_str}.original")).unwrap(),
            "original bytes"
        );

        disarm_files(&[path_str.clone()], false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "original bytes");
        assert!(!Path::new(&format!("{path_str}.original")).exists());
        assert!(!Path::new(&format!("{path_str}.instrumented")).exists());
    }

    #[test]
    fn keep_instrumented_retains_the_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.sol");
        let path_str = path.to_string_lossy().into_owned();
        fs::write(&path, "b0").unwrap();
        arm_files(&[(path_str.clone(), "b1".to_string())]).unwrap();
        disarm_files(&[path_str.clone()], true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "b0");
        assert_eq!(
            fs::read_to_string(format!("{path_str}.instrumented")).unwrap(),
            "b1"
        );
    }

    #[test]
    fn disarm_without_armed_files_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.sol");
        let path_str = path.to_string_lossy().into_owned();
        fs::write(&path, "c0").unwrap();
        disarm_files(&[path_str.clone()], false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "c0");
    }
}
