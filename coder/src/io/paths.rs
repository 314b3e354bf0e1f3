//! Symlink resolution for write targets.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::forbidden::normalize_lexically;

const MAX_LINK_HOPS: usize = 40;

/// Map an absolute, lexically normalized path to where a write would land.
///
/// The longest existing ancestor is canonicalized and the missing tail is
/// re-appended. A dangling link on the way is followed by hand, so a link to
/// a file that does not exist yet still resolves to its target.
pub fn follow_links(path: &Path) -> PathBuf {
    follow_with_hops(path, MAX_LINK_HOPS)
}

fn follow_with_hops(path: &Path, hops: usize) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(&existing) {
            return rejoin(canonical, &missing);
        }
        if hops > 0
            && let Ok(target) = fs::read_link(&existing)
        {
            let base = existing.parent().map(Path::to_path_buf).unwrap_or_default();
            let next = normalize_lexically(&base.join(target));
            return follow_with_hops(&rejoin(next, &missing), hops - 1);
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return rejoin(existing, &missing),
        }
    }
}

fn rejoin(mut base: PathBuf, missing: &[OsString]) -> PathBuf {
    for name in missing.iter().rev() {
        base.push(name);
    }
    base
}
