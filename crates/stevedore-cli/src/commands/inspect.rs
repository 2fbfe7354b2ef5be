use super::{json_pretty, resolve_image, store_error, EXIT_SUCCESS};
use stevedore_core::Loader;
use stevedore_schema::{ChainId, ImageId};

pub fn run(loader: &Loader, target: &str, json: bool) -> Result<u8, String> {
    let id = resolve_image(loader, target)?;
    let image = loader.images().get(&id).map_err(store_error)?;
    let config_bytes = loader.images().config_bytes(&id).map_err(store_error)?;
    let config: serde_json::Value = serde_json::from_slice(&config_bytes)
        .map_err(|e| format!("stored config of {id} is not JSON: {e}"))?;
    let tags: Vec<String> = loader
        .references()
        .references_for(&id)
        .map_err(store_error)?
        .iter()
        .map(ToString::to_string)
        .collect();
    let chain_id = image.config.rootfs.chain_id();

    if json {
        let payload = serde_json::json!({
            "id": id,
            "parent": image.parent,
            "tags": tags,
            "loaded_at": image.loaded_at,
            "chain_id": chain_id,
            "config": config,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("id:         {id}");
        println!(
            "parent:     {}",
            image.parent.as_ref().map_or("(none)", ImageId::as_str)
        );
        println!(
            "tags:       {}",
            if tags.is_empty() { "(none)".to_owned() } else { tags.join(", ") }
        );
        println!("layers:     {}", image.config.rootfs.len());
        println!(
            "chain_id:   {}",
            chain_id.as_ref().map_or("(none)", ChainId::as_str)
        );
        println!("loaded_at:  {}", image.loaded_at.as_deref().unwrap_or("-"));
        println!("{}", json_pretty(&config)?);
    }
    Ok(EXIT_SUCCESS)
}
