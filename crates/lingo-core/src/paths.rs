//! Typed path helpers for translation artifacts in the object store.
//!
//! Layout per interface:
//!
//! ```text
//! migrations/{interface}/{filename}        bundle files
//! migrations/{interface}/current.json      live translation content
//! migrations/{interface}/manifest.json     approved bundle allow-list
//! backups/{interface}/{interface}_{marker}_{tag}.{ext}
//! ```

use crate::error::{Error, Result};
use crate::interface::InterfaceOrigin;

/// Name of the live content object inside an interface directory.
pub const CURRENT_OBJECT: &str = "current.json";

/// Name of the manifest object inside an interface directory.
pub const MANIFEST_OBJECT: &str = "manifest.json";

/// Extension a bundle object must carry to be discovered.
pub const BUNDLE_EXTENSION: &str = ".json";

/// Typed paths for a single interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundlePaths {
    interface: InterfaceOrigin,
}

impl BundlePaths {
    /// Creates typed paths for `interface`.
    #[must_use]
    pub const fn new(interface: InterfaceOrigin) -> Self {
        Self { interface }
    }

    /// Returns the interface these paths belong to.
    #[must_use]
    pub const fn interface(&self) -> InterfaceOrigin {
        self.interface
    }

    /// Directory holding bundles, current content and the manifest.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("migrations/{}/", self.interface)
    }

    /// Path of a bundle file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `filename` is empty or contains a
    /// path separator.
    pub fn bundle(&self, filename: &str) -> Result<String> {
        validate_filename(filename)?;
        Ok(format!("{}{filename}", self.prefix()))
    }

    /// Path of the live content object.
    #[must_use]
    pub fn current(&self) -> String {
        format!("{}{CURRENT_OBJECT}", self.prefix())
    }

    /// Path of the manifest object.
    #[must_use]
    pub fn manifest(&self) -> String {
        format!("{}{MANIFEST_OBJECT}", self.prefix())
    }

    /// Directory holding backups for this interface.
    #[must_use]
    pub fn backup_prefix(&self) -> String {
        format!("backups/{}/", self.interface)
    }

    /// Deterministic backup path.
    ///
    /// `tag` identifies the attempt that produced the backup. Two different
    /// tags never collide; the same tag always maps to the same object.
    #[must_use]
    pub fn backup(&self, marker: &str, tag: &str, extension: &str) -> String {
        let extension = extension.trim_start_matches('.');
        format!(
            "{}{iface}_{marker}_{tag}.{extension}",
            self.backup_prefix(),
            iface = self.interface,
        )
    }

    /// Returns the bundle filename for `path` if it is a discoverable bundle.
    ///
    /// Skips the live content object, the manifest, nested paths and anything
    /// that is not a `.json` file.
    #[must_use]
    pub fn bundle_filename<'a>(&self, path: &'a str) -> Option<&'a str> {
        let prefix = self.prefix();
        let name = path.strip_prefix(prefix.as_str())?;
        let is_bundle = !name.is_empty()
            && !name.contains('/')
            && name.ends_with(BUNDLE_EXTENSION)
            && name != CURRENT_OBJECT
            && name != MANIFEST_OBJECT;
        is_bundle.then_some(name)
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() || filename.contains('/') || filename == ".." {
        return Err(Error::InvalidInput(format!(
            "invalid bundle filename '{filename}'"
        )));
    }
    Ok(())
}
