//! Permission-hardened socket directory provisioning.
//!
//! The single-user layout is one directory with mode 0700 holding `sock-<name>` files. The
//! multi-user layout is a 0755 base directory holding one 0700 subdirectory per owner, each
//! holding that owner's socket files under their bare names. Every check here compares exact
//! permission bits and the owning uid; a mismatch is reported as [`Error::Insecure`] rather than
//! silently repaired, since repairing would mask an active tampering attempt.

use {
    super::unixprelude::*,
    crate::error::{Error, Result},
    std::{
        fs,
        os::unix::fs::DirBuilderExt,
        path::{Path, PathBuf},
    },
    tracing::debug,
};

pub(super) const OWNER_DIR_MODE: u32 = 0o700;
pub(super) const SHARED_BASE_MODE: u32 = 0o755;
pub(crate) const SOCKET_FILE_PREFIX: &str = "sock-";

/// Creates `dir` if missing, then verifies it. The mode is set at creation time via
/// `mkdir(2)`, not with a separate `chmod` step; if the process umask strips bits the
/// verification fails and so does transport startup.
pub(super) fn prepare_dir(dir: &Path, mode: u32, owner: uid_t) -> Result<()> {
    match fs::symlink_metadata(dir) {
        Ok(meta) => verify_dir_meta(dir, &meta, mode, owner),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = dir.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::DirBuilder::new().mode(mode).create(dir)?;
            debug!(dir = %dir.display(), mode = format_args!("{mode:o}"), "created socket directory");
            verify_dir_meta(dir, &fs::symlink_metadata(dir)?, mode, owner)
        }
        Err(e) => Err(e.into()),
    }
}

/// Verifies an existing directory without creating anything.
pub(super) fn verify_dir(dir: &Path, mode: u32, owner: uid_t) -> Result<()> {
    verify_dir_meta(dir, &fs::symlink_metadata(dir)?, mode, owner)
}

fn verify_dir_meta(dir: &Path, meta: &fs::Metadata, mode: u32, owner: uid_t) -> Result<()> {
    let insecure = |reason: String| Error::Insecure { path: dir.to_owned(), reason };
    if !meta.is_dir() {
        return Err(insecure("exists but is not a directory".into()));
    }
    let actual = meta.mode() & 0o7777;
    if actual != mode {
        return Err(insecure(format!("permission bits are {actual:o}, expected {mode:o}")));
    }
    if meta.uid() != owner {
        return Err(insecure(format!("owned by uid {}, expected uid {owner}", meta.uid())));
    }
    Ok(())
}

/// Creates or verifies the per-owner subdirectory under a multi-user base directory. A freshly
/// created subdirectory is chowned to its owner, which requires privilege when the owner is not
/// the process user.
pub(super) fn prepare_owner_dir(base: &Path, owner: &str, owner_uid: uid_t) -> Result<PathBuf> {
    let dir = base.join(owner);
    match fs::symlink_metadata(&dir) {
        Ok(meta) => verify_dir_meta(&dir, &meta, OWNER_DIR_MODE, owner_uid)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::DirBuilder::new().mode(OWNER_DIR_MODE).create(&dir)?;
            if super::c_wrappers::geteuid() != owner_uid {
                super::c_wrappers::chown(&dir, owner_uid)?;
            }
            debug!(dir = %dir.display(), owner, "created per-owner socket directory");
            verify_dir_meta(&dir, &fs::symlink_metadata(&dir)?, OWNER_DIR_MODE, owner_uid)?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(dir)
}

/// Confirms that a freshly bound socket file belongs to the expected uid. Catches the window
/// between deleting a stale file and binding, during which another user could have squatted
/// the path.
pub(super) fn verify_socket_file(path: &Path, owner: uid_t) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.uid() != owner {
        return Err(Error::Insecure {
            path: path.to_owned(),
            reason: format!("socket file owned by uid {}, expected uid {owner}", meta.uid()),
        });
    }
    Ok(())
}

/// Removes a leftover socket file from an earlier unclean shutdown.
pub(super) fn delete_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Deletes the socket directory tree at shutdown. The layout is at most two levels deep (base,
/// owner subdirectories, socket files), so no general recursion is needed.
pub(super) fn remove_tree(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            for sub in fs::read_dir(entry.path())? {
                fs::remove_file(sub?.path())?;
            }
            fs::remove_dir(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    fs::remove_dir(dir)?;
    debug!(dir = %dir.display(), "removed socket directory");
    Ok(())
}
