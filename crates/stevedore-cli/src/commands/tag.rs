use super::{resolve_image, store_error, EXIT_SUCCESS};
use stevedore_core::{Loader, StoreLock};
use stevedore_schema::Reference;

/// Point `target` at the image `source` resolves to, replacing any earlier binding.
pub fn run(loader: &Loader, source: &str, target: &str) -> Result<u8, String> {
    let id = resolve_image(loader, source)?;
    let reference = Reference::parse(target).map_err(|e| e.to_string())?;
    loader
        .store_layout()
        .initialize()
        .map_err(store_error)?;
    let _lock = StoreLock::acquire(&loader.store_layout().lock_file())
        .map_err(|e| format!("store lock: {e}"))?;
    let previous = loader
        .references()
        .add_tag(&reference, &id, true)
        .map_err(store_error)?;
    if let Some(previous) = previous {
        tracing::info!("{reference} moved from {previous} to {id}");
    }
    println!("tagged {id} as {reference}");
    Ok(EXIT_SUCCESS)
}
