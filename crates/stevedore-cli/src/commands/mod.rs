pub mod completions;
pub mod images;
pub mod inspect;
pub mod load;
pub mod tag;
pub mod verify_store;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use stevedore_core::{Loader, ProgressSink};
use stevedore_schema::{ImageId, Reference};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_ARCHIVE_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

#[allow(clippy::needless_pass_by_value)]
pub fn store_error(e: stevedore_store::StoreError) -> String {
    format!("store error: {e}")
}

/// Resolve an image by reference, full ID, or unique hex prefix.
pub fn resolve_image(loader: &Loader, input: &str) -> Result<ImageId, String> {
    if let Ok(id) = ImageId::parse(input) {
        if loader.images().exists(&id) {
            return Ok(id);
        }
        return Err(format!("no image with ID {id}"));
    }

    let as_reference = if input.contains(':') {
        Reference::parse(input)
    } else {
        Reference::new(input, "latest")
    };
    if let Ok(reference) = as_reference {
        if let Some(id) = loader
            .references()
            .get(&reference)
            .map_err(store_error)?
        {
            return Ok(id);
        }
    }

    let prefix = input.strip_prefix("sha256:").unwrap_or(input);
    let images = loader.images().list().map_err(store_error)?;
    let matches: Vec<_> = images
        .iter()
        .filter(|id| !prefix.is_empty() && id.encoded().starts_with(prefix))
        .collect();

    match matches.len() {
        0 => Err(format!("no image matching '{input}'")),
        1 => Ok(matches[0].clone()),
        n => Err(format!(
            "ambiguous image ID prefix '{input}': matches {n} images"
        )),
    }
}

/// Byte progress of an import, one bar per layer.
pub struct BarProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn style(total: Option<u64>) -> ProgressStyle {
        let template = if total.is_some() {
            "{prefix:.bold} {msg:<14} [{bar:30.cyan/blue}] {bytes}/{total_bytes}"
        } else {
            "{spinner:.cyan} {prefix:.bold} {msg:<14} {bytes}"
        };
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, id: &str, phase: &str, total: Option<u64>) {
        let bar = self.multi.add(match total {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        });
        bar.set_style(Self::style(total));
        bar.set_prefix(id.to_owned());
        bar.set_message(phase.to_owned());
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_owned(), bar);
    }

    fn update(&self, id: &str, _phase: &str, current: u64) {
        if let Some(bar) = self
            .bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            bar.set_position(current);
        }
    }

    fn finish(&self, id: &str, _phase: &str) {
        if let Some(bar) = self
            .bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
        {
            bar.finish_and_clear();
        }
    }
}
