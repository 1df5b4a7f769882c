use std::path::Path;

use tempfile::TempDir;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::TerraformError;
use crate::options::{OPTIONS_FILE, VARS_FILE};

fn skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name == ".terraform.lock.hcl" {
        return false;
    }
    name.starts_with('.') || name.contains(".tfstate") || name == OPTIONS_FILE || name == VARS_FILE
}

/// Copy a Terraform module into a fresh temporary directory so concurrent
/// runs never share `.terraform`, local state or generated variable files.
/// The directory is removed when the returned [`TempDir`] is dropped.
pub fn copy_module_to_temp(src: &Path) -> Result<TempDir, TerraformError> {
    let tmp = tempfile::Builder::new()
        .prefix("azbackup-tf-")
        .tempdir()
        .map_err(|e| TerraformError::io(src, e))?;

    let walker = WalkDir::new(src).min_depth(1).into_iter().filter_entry(|e| !skipped(e));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            TerraformError::io(&path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| TerraformError::io(entry.path(), std::io::Error::other(e)))?;
        let target = tmp.path().join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| TerraformError::io(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| TerraformError::io(&target, e))?;
        }
    }

    debug!(src = %src.display(), dst = %tmp.path().display(), "copied terraform module");
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_module_without_local_state() {
        let src = tempfile::tempdir().unwrap();
        let root = src.path();
        std::fs::write(root.join("main.tf"), "resource {}").unwrap();
        std::fs::write(root.join(".terraform.lock.hcl"), "lock").unwrap();
        std::fs::write(root.join("terraform.tfstate"), "{}").unwrap();
        std::fs::write(root.join("terraform.tfstate.backup"), "{}").unwrap();
        std::fs::write(root.join(OPTIONS_FILE), "{}").unwrap();
        std::fs::write(root.join(VARS_FILE), "{}").unwrap();
        std::fs::create_dir_all(root.join(".terraform/providers")).unwrap();
        std::fs::write(root.join(".terraform/providers/p"), "bin").unwrap();
        std::fs::create_dir_all(root.join("modules/backup_policy")).unwrap();
        std::fs::write(root.join("modules/backup_policy/main.tf"), "policy").unwrap();

        let copy = copy_module_to_temp(root).unwrap();
        let dst = copy.path();
        assert_eq!(std::fs::read_to_string(dst.join("main.tf")).unwrap(), "resource {}");
        assert_eq!(std::fs::read_to_string(dst.join("modules/backup_policy/main.tf")).unwrap(), "policy");
        assert!(dst.join(".terraform.lock.hcl").exists());
        assert!(!dst.join(".terraform").exists());
        assert!(!dst.join("terraform.tfstate").exists());
        assert!(!dst.join("terraform.tfstate.backup").exists());
        assert!(!dst.join(OPTIONS_FILE).exists());
        assert!(!dst.join(VARS_FILE).exists());
    }

    #[test]
    fn copies_are_private_and_removed_on_drop() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("main.tf"), "x").unwrap();

        let a = copy_module_to_temp(src.path()).unwrap();
        let b = copy_module_to_temp(src.path()).unwrap();
        assert_ne!(a.path(), b.path());

        let a_path = a.path().to_path_buf();
        drop(a);
        assert!(!a_path.exists());
        assert!(b.path().join("main.tf").exists());
    }

    #[test]
    fn missing_source_is_io_error() {
        let err = copy_module_to_temp(Path::new("/nonexistent/module")).unwrap_err();
        assert!(matches!(err, TerraformError::Io { .. }));
    }
}
