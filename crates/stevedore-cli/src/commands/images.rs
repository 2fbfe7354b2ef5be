use super::{json_pretty, store_error, EXIT_SUCCESS};
use serde::Serialize;
use std::collections::BTreeMap;
use stevedore_core::Loader;
use stevedore_schema::{short_id, ImageId};

#[derive(Debug, Serialize)]
struct ImageSummary {
    id: ImageId,
    tags: Vec<String>,
    layers: usize,
    created: Option<String>,
}

pub fn run(loader: &Loader, json: bool) -> Result<u8, String> {
    let mut tags: BTreeMap<ImageId, Vec<String>> = BTreeMap::new();
    for (reference, id) in loader.references().list().map_err(store_error)? {
        tags.entry(id).or_default().push(reference.to_string());
    }

    let mut summaries = Vec::new();
    for id in loader.images().list().map_err(store_error)? {
        let image = loader.images().get(&id).map_err(store_error)?;
        summaries.push(ImageSummary {
            tags: tags.remove(&id).unwrap_or_default(),
            layers: image.config.rootfs.len(),
            created: image.config.created().map(str::to_owned),
            id,
        });
    }

    if json {
        println!("{}", json_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("no images found");
    } else {
        println!("{:<14} {:<7} {:<30} TAGS", "IMAGE_ID", "LAYERS", "CREATED");
        for s in &summaries {
            let tags = if s.tags.is_empty() {
                "<none>".to_owned()
            } else {
                s.tags.join(", ")
            };
            println!(
                "{:<14} {:<7} {:<30} {}",
                short_id(s.id.encoded()),
                s.layers,
                s.created.as_deref().unwrap_or("-"),
                tags
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
