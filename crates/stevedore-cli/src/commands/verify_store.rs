use super::{json_pretty, store_error, EXIT_STORE_ERROR, EXIT_SUCCESS};
use stevedore_core::Loader;
use stevedore_store::verify_store_integrity;

pub fn run(loader: &Loader, json: bool) -> Result<u8, String> {
    let report = verify_store_integrity(loader.store_layout()).map_err(store_error)?;

    if json {
        let payload = serde_json::json!({
            "images_checked": report.images_checked,
            "images_passed": report.images_passed,
            "layers_checked": report.layers_checked,
            "layers_passed": report.layers_passed,
            "references_checked": report.references_checked,
            "failed": report.failed.len(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "store integrity: {}/{} images, {}/{} layers passed, {} references checked",
            report.images_passed,
            report.images_checked,
            report.layers_passed,
            report.layers_checked,
            report.references_checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.hash, f.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
