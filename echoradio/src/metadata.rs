//! Removal of embedded artwork before playback
//!
//! Large cover images inside ID3 tags end up at the beginning of the
//! stream on some players. They are stripped in place; the encoder drops the
//! remaining tags itself (`-map_metadata -1`).

use crate::error::{Error, Result};
use lofty::config::{ParseOptions, WriteOptions};
use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;
use tracing::debug;

/// Pre-processing applied to a track file before it is played
pub trait MetadataStripper: Send + Sync {
    /// Returns the number of items removed
    fn strip(&self, path: &Path) -> Result<usize>;
}

/// [`MetadataStripper`] removing every embedded picture with lofty
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyStripper;

impl MetadataStripper for LoftyStripper {
    fn strip(&self, path: &Path) -> Result<usize> {
        let mut tagged_file = Probe::open(path)
            .map_err(|e| Error::Metadata(format!("{}: {}", path.display(), e)))?
            .options(ParseOptions::new())
            .read()
            .map_err(|e| Error::Metadata(format!("{}: {}", path.display(), e)))?;

        let tag_types: Vec<_> = tagged_file.tags().iter().map(|t| t.tag_type()).collect();

        let mut removed = 0;
        for tag_type in tag_types {
            if let Some(tag) = tagged_file.tag_mut(tag_type) {
                while !tag.pictures().is_empty() {
                    tag.remove_picture(0);
                    removed += 1;
                }
            }
        }

        if removed == 0 {
            return Ok(0);
        }

        tagged_file
            .save_to_path(path, WriteOptions::default())
            .map_err(|e| Error::Metadata(format!("{}: {}", path.display(), e)))?;

        debug!("Removed {} picture(s) from {}", removed, path.display());
        Ok(removed)
    }
}
