use crate::LoadError;
use std::io::Write;
use stevedore_schema::{ImageId, Reference};
use stevedore_store::ReferenceStore;
use tracing::{debug, warn};

/// Binds references to loaded images and reports each binding on the status stream.
pub struct Tagger<'a> {
    references: &'a ReferenceStore,
    out: &'a mut dyn Write,
}

impl<'a> Tagger<'a> {
    pub fn new(references: &'a ReferenceStore, out: &'a mut dyn Write) -> Self {
        Self { references, out }
    }

    /// Point `reference` at `id`, replacing any earlier binding.
    ///
    /// Replacing a binding to a different image is reported on the status
    /// stream before the new binding is written.
    pub fn bind(&mut self, reference: &Reference, id: &ImageId) -> Result<(), LoadError> {
        if let Some(previous) = self.references.get(reference)? {
            if previous != *id {
                self.status(format_args!(
                    "The image {reference} already exists, renaming the old one with ID {previous} to empty string"
                ));
            }
        }
        self.references.add_tag(reference, id, true)?;

        debug!("{reference}({id}) has been loaded");
        self.status(format_args!("{reference}({id}) has been loaded."));
        Ok(())
    }

    fn status(&mut self, line: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{line}") {
            warn!("failed to write status line: {e}");
        }
    }
}
