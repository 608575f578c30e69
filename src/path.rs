// src/path.rs

//! Path handling for option-supplied locations
//!
//! Path mappings and tree paths come from stage options. They are always
//! interpreted relative to a root (the extracted source or the target tree)
//! and must not climb out of it.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize an option path to a root-relative path
///
/// Leading slashes and `.` components are dropped, `..` is rejected. Unlike
/// a filename check, an empty result is allowed and means the root itself,
/// so `/` maps to `""`.
///
/// # Examples
///
/// ```
/// use treeforge::path::relative_to_root;
/// use std::path::PathBuf;
///
/// assert_eq!(relative_to_root("/usr/share").unwrap(), PathBuf::from("usr/share"));
/// assert_eq!(relative_to_root("/").unwrap(), PathBuf::new());
/// assert!(relative_to_root("/usr/../../etc").is_err());
/// ```
pub fn relative_to_root(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path.to_string_lossy().into_owned()));
            }
            Component::Prefix(_) => {
                return Err(Error::PathTraversal(path.to_string_lossy().into_owned()));
            }
        }
    }

    Ok(normalized)
}

/// Join an option path onto `root`
///
/// ```
/// use treeforge::path::join_under;
/// use std::path::{Path, PathBuf};
///
/// let tree = Path::new("/run/tree");
/// assert_eq!(join_under(tree, "/etc").unwrap(), PathBuf::from("/run/tree/etc"));
/// assert_eq!(join_under(tree, "/").unwrap(), PathBuf::from("/run/tree"));
/// ```
pub fn join_under(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let relative = relative_to_root(path)?;
    let root = root.as_ref();
    if relative.as_os_str().is_empty() {
        Ok(root.to_path_buf())
    } else {
        Ok(root.join(relative))
    }
}
