//! Named tile services that need a metadata handshake before they behave like a
//! plain HTTP loader.

use crate::errors::Error;
use crate::layout::Layout;
use crate::loader::HttpLoader;

/// Whether a registry entry name refers to a preset service.
pub(crate) fn is_preset(name: &str) -> bool {
    matches!(name, "bingmaps")
}

/// Resolves a preset by its registry name.
pub(crate) fn resolve(
    name: &str,
    key: &str,
    imagery_set: Option<&str>,
) -> Result<HttpLoader, Error> {
    match name {
        "bingmaps" => bingmaps(key, imagery_set.unwrap_or("Aerial")),
        other => Err(Error::InvalidArgument(format!(
            "unknown tileloader preset {:?}",
            other
        ))),
    }
}

/// Bing Maps aerial imagery. Resolves the imagery metadata endpoint once to obtain
/// the tile URL template, then behaves as an HTTP loader over quadkeys.
///
/// See https://learn.microsoft.com/en-us/bingmaps/rest-services/directly-accessing-the-bing-maps-tiles
pub fn bingmaps(key: &str, imagery_set: &str) -> Result<HttpLoader, Error> {
    let metadata_url = format!(
        "http://dev.virtualearth.net/REST/V1/Imagery/Metadata/{}?output=json&include=ImageryProviders&key={}",
        imagery_set, key
    );
    let response = reqwest::blocking::get(&metadata_url)
        .map_err(|e| Error::Transient(format!("imagery metadata: {}", e)))?;
    if !response.status().is_success() {
        return Err(Error::Transient(format!(
            "imagery metadata: status {}",
            response.status()
        )));
    }
    let metadata: serde_json::Value = response
        .json()
        .map_err(|e| Error::Corruption(format!("imagery metadata: {}", e)))?;
    let template = tile_url_template(&metadata)?;
    HttpLoader::new(&template, Layout::xyz((256, 256))?)
}

fn tile_url_template(metadata: &serde_json::Value) -> Result<String, Error> {
    let resource = &metadata["resourceSets"][0]["resources"][0];
    let image_url = resource["imageUrl"].as_str().ok_or_else(|| {
        Error::Corruption("imagery metadata carries no imageUrl".to_string())
    })?;
    let subdomain = resource["imageUrlSubdomains"][0].as_str().ok_or_else(|| {
        Error::Corruption("imagery metadata carries no imageUrlSubdomains".to_string())
    })?;
    Ok(image_url
        .replace("{subdomain}", subdomain)
        .replace("{quadkey}", "{quad}"))
}
