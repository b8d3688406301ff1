//! YAML interfaces: the `layout.yaml` describing one tile tree and the registry
//! config composing several loader stacks by name.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::crs::Crs;
use crate::errors::Error;
use crate::geo::{CompassAxes, CompassAxis};
use crate::layout::{Layout, DEFAULT_MAX_ZOOM};
use crate::loader::{BinLoader, DiskCached, DiskLoader, HttpLoader, TileLoader, WithDefault};
use crate::presets;

/// How long loaders built from YAML wait after a tile file's mtime before reading
/// it, unless the caller overrides it.
const DEFAULT_WAIT_AFTER_LAST_MODIFIED: Duration = Duration::from_secs(1);

/// The schema of a `layout.yaml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct LayoutFile {
    pub preset: Option<String>,
    pub crs: Option<String>,
    pub tile_axes: Option<(CompassAxis, CompassAxis)>,
    pub tile_shape_px: Option<(i64, i64)>,
    pub tile_shape_crs: Option<(f64, f64)>,
    pub origin_crs: Option<(f64, f64)>,
    pub size_crs: Option<(f64, f64)>,
    pub path: Option<String>,
    pub min_zoom: Option<u32>,
    pub max_zoom: Option<u32>,
    pub url: Option<String>,
}

impl LayoutFile {
    pub(crate) fn to_layout(&self) -> Result<Layout, Error> {
        if let Some(preset) = &self.preset {
            if self.crs.is_some()
                || self.tile_axes.is_some()
                || self.tile_shape_px.is_some()
                || self.tile_shape_crs.is_some()
                || self.origin_crs.is_some()
                || self.size_crs.is_some()
            {
                return Err(Error::InvalidArgument(
                    "a layout preset cannot be combined with explicit layout fields"
                        .to_string(),
                ));
            }
            if preset != "XYZ" {
                return Err(Error::InvalidArgument(format!(
                    "unknown layout preset {:?}",
                    preset
                )));
            }
            return Layout::xyz((256, 256))?.with_zoom_range(
                self.min_zoom.unwrap_or(0),
                self.max_zoom.unwrap_or(DEFAULT_MAX_ZOOM),
            );
        }

        let missing = |field: &str| Error::InvalidArgument(format!("layout needs {}", field));
        let crs = Crs::new(self.crs.as_deref().ok_or_else(|| missing("a crs"))?)?;
        let (ax, ay) = self.tile_axes.ok_or_else(|| missing("tile_axes"))?;
        let mut layout = Layout::new(
            crs,
            CompassAxes::new(ax, ay)?,
            self.tile_shape_px.ok_or_else(|| missing("tile_shape_px"))?,
            self.tile_shape_crs.ok_or_else(|| missing("tile_shape_crs"))?,
        )?
        .with_origin_crs(self.origin_crs.unwrap_or((0.0, 0.0)));
        if let Some(size) = self.size_crs {
            layout = layout.with_size_crs(size);
        }
        layout.with_zoom_range(
            self.min_zoom.unwrap_or(0),
            self.max_zoom.unwrap_or(DEFAULT_MAX_ZOOM),
        )
    }
}

pub(crate) fn read_layout_file(path: &Path) -> Result<LayoutFile, Error> {
    let text = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&text)
        .map_err(|e| Error::InvalidArgument(format!("{}: {}", path.display(), e)))
}

/// Builds a `Layout` from a `layout.yaml` file.
pub fn layout_from_yaml(path: impl AsRef<Path>) -> Result<Layout, Error> {
    read_layout_file(path.as_ref())?.to_layout()
}

/// Builds a `Layout` from YAML text.
pub fn layout_from_yaml_str(yaml: &str) -> Result<Layout, Error> {
    let file: LayoutFile = serde_yaml::from_str(yaml)
        .map_err(|e| Error::InvalidArgument(format!("layout yaml: {}", e)))?;
    file.to_layout()
}

/// Opens the tile tree at `path` (a directory or its `layout.yaml`) as the loader
/// stack its layout file implies: a binary pack when `images.dat` is present, an
/// HTTP loader cached to disk when `url:` is set, a plain disk tree otherwise.
pub fn from_yaml(path: impl AsRef<Path>) -> Result<TileLoader, Error> {
    from_yaml_with_wait(path, DEFAULT_WAIT_AFTER_LAST_MODIFIED)
}

pub fn from_yaml_with_wait(
    path: impl AsRef<Path>,
    wait_after_last_modified: Duration,
) -> Result<TileLoader, Error> {
    let path = path.as_ref();
    let yaml_path = if path.extension().is_some_and(|e| e == "yaml") {
        path.to_path_buf()
    } else {
        path.join("layout.yaml")
    };
    let dir: PathBuf = yaml_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if dir.join("images.dat").is_file() {
        return Ok(BinLoader::open(dir)?.into());
    }

    let file = read_layout_file(&yaml_path)?;
    let layout = file.to_layout()?;
    let template = file
        .path
        .clone()
        .unwrap_or_else(|| crate::loader::DEFAULT_PATH_TEMPLATE.to_string());

    if let Some(url) = &file.url {
        let http = HttpLoader::new(url, layout)?;
        Ok(DiskCached::new(http.into(), dir, 0)?
            .with_path_template(&template)
            .into())
    } else {
        Ok(DiskLoader::new(dir, layout)
            .with_path_template(&template)
            .with_wait_after_last_modified(wait_after_last_modified)
            .into())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "http-header", default)]
    http_header: HashMap<String, String>,
    #[serde(default)]
    tileloaders: BTreeMap<String, LoaderSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoaderSpec {
    uri: Option<String>,
    path: Option<String>,
    zoom: Option<u32>,
    load_zoom_up: Option<u32>,
    default: Option<[u8; 3]>,
    key: Option<String>,
    imagery_set: Option<String>,
}

/// A named loader stack from a registry config, with its default query zoom.
#[derive(Debug)]
pub struct RegistryEntry {
    pub loader: TileLoader,
    pub zoom: u32,
}

/// Builds every loader stack of a registry config file.
pub fn from_config(
    path: impl AsRef<Path>,
    wait_after_error: Duration,
    retries: usize,
) -> Result<HashMap<String, RegistryEntry>, Error> {
    let text = std::fs::read_to_string(path.as_ref())?;
    from_config_str(&text, wait_after_error, retries)
}

pub fn from_config_str(
    yaml: &str,
    wait_after_error: Duration,
    retries: usize,
) -> Result<HashMap<String, RegistryEntry>, Error> {
    let config: ConfigFile = serde_yaml::from_str(yaml)
        .map_err(|e| Error::InvalidArgument(format!("registry config: {}", e)))?;

    let mut registry = HashMap::new();
    for (name, spec) in &config.tileloaders {
        let load_zoom_up = spec.load_zoom_up.unwrap_or(0);

        let mut loader: Option<TileLoader> = if presets::is_preset(name) && spec.key.is_some() {
            let key = spec.key.as_deref().unwrap_or_default();
            if spec.load_zoom_up.is_some() {
                return Err(Error::InvalidArgument(format!(
                    "{}: load_zoom_up is not supported for presets",
                    name
                )));
            }
            let http = presets::resolve(name, key, spec.imagery_set.as_deref())?
                .with_retries(retries)
                .with_wait_after_error(wait_after_error)
                .with_headers(&config.http_header)?;
            Some(http.into())
        } else if let Some(uri) = &spec.uri {
            // With load_zoom_up the upstream serves the whole parent raster as one
            // tile, so its layout carries the scaled-up tile shape
            let size = (1i64 << load_zoom_up) * 256;
            let http = HttpLoader::new(uri, Layout::xyz((size, size))?)?
                .with_retries(retries)
                .with_wait_after_error(wait_after_error)
                .with_headers(&config.http_header)?;
            Some(http.into())
        } else {
            None
        };

        if let Some(path) = &spec.path {
            loader = Some(match loader {
                Some(upstream) => DiskCached::new(upstream, path, load_zoom_up)?.into(),
                None => {
                    let as_path = Path::new(path);
                    if as_path.extension().is_some_and(|e| e == "yaml")
                        || as_path.join("layout.yaml").is_file()
                    {
                        from_yaml(path)?
                    } else {
                        DiskLoader::new(path, Layout::xyz((256, 256))?).into()
                    }
                }
            });
        }

        if let Some(color) = spec.default {
            loader = Some(match loader {
                Some(inner) => WithDefault::new(inner, color).into(),
                None => WithDefault::empty(Layout::xyz((256, 256))?, color).into(),
            });
        }

        let loader = loader.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "{}: a tileloader needs at least one of uri, path or default",
                name
            ))
        })?;
        registry.insert(
            name.clone(),
            RegistryEntry {
                loader,
                zoom: spec.zoom.unwrap_or(0),
            },
        );
    }
    Ok(registry)
}
