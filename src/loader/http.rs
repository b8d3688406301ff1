//! Tile fetching over HTTP from a URL template, with retries, backoff and an
//! optional shared rate limit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::errors::Error;
use crate::image::ImageBuffer;
use crate::layout::Layout;
use crate::loader::check_tile_shape;
use crate::math::vec2f;
use crate::ratelimit::Ratelimit;

const DEFAULT_RETRIES: usize = 100;
const DEFAULT_WAIT_AFTER_ERROR: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const PLACEHOLDERS: &[&str] = &[
    "zoom",
    "x",
    "y",
    "tile_x",
    "tile_y",
    "quad",
    "crs_lower_x",
    "crs_lower_y",
    "crs_upper_x",
    "crs_upper_y",
    "tile_size_x",
    "tile_size_y",
];

pub struct HttpLoader {
    url_template: String,
    layout: Layout,
    headers: HeaderMap,
    timeout: Duration,
    retries: usize,
    wait_after_error: Duration,
    ratelimit: Option<Arc<Ratelimit>>,
    client: reqwest::blocking::Client,
}

impl HttpLoader {
    pub fn new(url_template: &str, layout: Layout) -> Result<HttpLoader, Error> {
        check_placeholders(url_template)?;
        let headers = HeaderMap::new();
        let client = build_client(&headers, DEFAULT_TIMEOUT)?;
        Ok(HttpLoader {
            url_template: url_template.to_string(),
            layout,
            headers,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            wait_after_error: DEFAULT_WAIT_AFTER_ERROR,
            ratelimit: None,
            client,
        })
    }

    pub fn with_retries(mut self, retries: usize) -> HttpLoader {
        self.retries = retries.max(1);
        self
    }

    pub fn with_wait_after_error(mut self, wait: Duration) -> HttpLoader {
        self.wait_after_error = wait;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<HttpLoader, Error> {
        self.timeout = timeout;
        self.client = build_client(&self.headers, self.timeout)?;
        Ok(self)
    }

    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Result<HttpLoader, Error> {
        for (name, value) in headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| Error::InvalidArgument(format!("header {:?}: {}", name, e)))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| Error::InvalidArgument(format!("header value {:?}: {}", value, e)))?;
            self.headers.insert(name, value);
        }
        self.client = build_client(&self.headers, self.timeout)?;
        Ok(self)
    }

    pub fn with_ratelimit(mut self, ratelimit: Arc<Ratelimit>) -> HttpLoader {
        self.ratelimit = Some(ratelimit);
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u32, max_zoom: u32) -> Result<HttpLoader, Error> {
        self.layout = self.layout.with_zoom_range(min_zoom, max_zoom)?;
        Ok(self)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// The concrete URL for one tile.
    pub fn resolve_url(&self, x: i64, y: i64, zoom: u32) -> Result<String, Error> {
        let mut url = self.url_template.clone();
        url = url.replace("{zoom}", &zoom.to_string());
        url = url.replace("{x}", &x.to_string());
        url = url.replace("{y}", &y.to_string());
        url = url.replace("{tile_x}", &x.to_string());
        url = url.replace("{tile_y}", &y.to_string());
        url = url.replace("{tile_size_x}", &self.layout.tile_shape_px.x.to_string());
        url = url.replace("{tile_size_y}", &self.layout.tile_shape_px.y.to_string());
        if url.contains("{quad}") {
            url = url.replace("{quad}", &quadkey(x, y, zoom)?);
        }
        if url.contains("{crs_") {
            let c0 = self.layout.tile_to_crs(vec2f(x as f64, y as f64), zoom)?;
            let c1 = self
                .layout
                .tile_to_crs(vec2f(x as f64 + 1.0, y as f64 + 1.0), zoom)?;
            url = url.replace("{crs_lower_x}", &c0.x.min(c1.x).to_string());
            url = url.replace("{crs_lower_y}", &c0.y.min(c1.y).to_string());
            url = url.replace("{crs_upper_x}", &c0.x.max(c1.x).to_string());
            url = url.replace("{crs_upper_y}", &c0.y.max(c1.y).to_string());
        }
        Ok(url)
    }

    pub fn load(&self, x: i64, y: i64, zoom: u32) -> Result<ImageBuffer, Error> {
        self.layout.check_zoom(zoom)?;
        self.layout.check_tile(x, y, zoom)?;
        let url = self.resolve_url(x, y, zoom)?;
        for attempt in 0..self.retries {
            if attempt > 0 {
                std::thread::sleep(self.wait_after_error);
            }
            if let Some(limit) = &self.ratelimit {
                limit.acquire();
            }
            match self.fetch(&url) {
                Ok(img) => return Ok(img),
                Err(e) => {
                    log::warn!(
                        "GET {} failed (attempt {}/{}): {}",
                        url,
                        attempt + 1,
                        self.retries,
                        e
                    );
                }
            }
        }
        Err(Error::not_found(x, y, zoom))
    }

    fn fetch(&self, url: &str) -> Result<ImageBuffer, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transient(format!("status {}", status)));
        }
        let declared = response.content_length();
        let body: bytes::Bytes = response
            .bytes()
            .map_err(|e| Error::Transient(e.to_string()))?;
        if let Some(expected) = declared {
            if body.len() as u64 != expected {
                return Err(Error::Transient(format!(
                    "truncated body: {} of {} bytes",
                    body.len(),
                    expected
                )));
            }
        }
        let img = ImageBuffer::decode(&body)
            .map_err(|e| Error::Transient(format!("decode: {}", e)))?;
        check_tile_shape(&self.layout, &img).map_err(|e| Error::Transient(e.to_string()))?;
        Ok(img)
    }
}

impl std::fmt::Debug for HttpLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLoader")
            .field("url_template", &self.url_template)
            .field("retries", &self.retries)
            .finish()
    }
}

fn build_client(headers: &HeaderMap, timeout: Duration) -> Result<reqwest::blocking::Client, Error> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .default_headers(headers.clone())
        .build()
        .map_err(|e| Error::InvalidArgument(format!("http client: {}", e)))
}

fn check_placeholders(url_template: &str) -> Result<(), Error> {
    let mut rest = url_template;
    let mut any = false;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            return Err(Error::InvalidArgument(format!(
                "unbalanced braces in URL template {:?}",
                url_template
            )));
        };
        let name = &rest[open + 1..open + close];
        if !PLACEHOLDERS.contains(&name) {
            return Err(Error::InvalidArgument(format!(
                "unknown placeholder {{{}}} in URL template {:?}",
                name, url_template
            )));
        }
        any = true;
        rest = &rest[open + close + 1..];
    }
    if !any {
        return Err(Error::InvalidArgument(format!(
            "URL template {:?} contains no tile placeholder",
            url_template
        )));
    }
    Ok(())
}

/// The Bing Maps quadkey for a tile: one base-4 digit per zoom level, highest level
/// first, x contributing bit 0 and y bit 1.
pub fn quadkey(x: i64, y: i64, zoom: u32) -> Result<String, Error> {
    let extent = 1i64 << zoom;
    if x < 0 || y < 0 || x >= extent || y >= extent {
        return Err(Error::InvalidArgument(format!(
            "tile ({}, {}) has no quadkey at zoom {}",
            x, y, zoom
        )));
    }
    let mut key = String::with_capacity(zoom as usize);
    for level in (1..=zoom).rev() {
        let mask = 1i64 << (level - 1);
        let mut digit = 0u8;
        if x & mask != 0 {
            digit += 1;
        }
        if y & mask != 0 {
            digit += 2;
        }
        key.push((b'0' + digit) as char);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadkey() {
        // The worked example from the Bing Maps tile system documentation
        assert_eq!(quadkey(3, 5, 3).unwrap(), "213");
        assert_eq!(quadkey(0, 0, 1).unwrap(), "0");
        assert_eq!(quadkey(1, 1, 1).unwrap(), "3");
        assert_eq!(quadkey(0, 0, 0).unwrap(), "");
        assert!(quadkey(4, 0, 2).is_err());
    }

    #[test]
    fn test_resolve_url() {
        let layout = Layout::xyz((256, 256)).unwrap();
        let loader = HttpLoader::new("https://tiles.test/{zoom}/{tile_x}/{tile_y}.jpg", layout)
            .unwrap();
        assert_eq!(
            loader.resolve_url(519997, 383334, 20).unwrap(),
            "https://tiles.test/20/519997/383334.jpg"
        );
    }

    #[test]
    fn test_resolve_url_quad() {
        let layout = Layout::xyz((256, 256)).unwrap();
        let loader = HttpLoader::new("https://t.test/img?q={quad}", layout).unwrap();
        assert_eq!(loader.resolve_url(3, 5, 3).unwrap(), "https://t.test/img?q=213");
    }

    #[test]
    fn test_resolve_url_crs_bbox() {
        let layout = Layout::xyz((256, 256)).unwrap();
        let loader = HttpLoader::new(
            "https://t.test/export?bbox={crs_lower_x},{crs_lower_y},{crs_upper_x},{crs_upper_y}&size={tile_size_x},{tile_size_y}",
            layout,
        )
        .unwrap();
        let url = loader.resolve_url(0, 0, 1).unwrap();
        // The north-west world quadrant of epsg:3857
        assert_eq!(
            url,
            "https://t.test/export?bbox=-20037508.342789244,0,0,20037508.342789244&size=256,256"
        );
    }

    #[test]
    fn test_template_validation() {
        let layout = Layout::xyz((256, 256)).unwrap();
        assert!(HttpLoader::new("https://t.test/{zoom}/{x}/{unknown}", layout.clone()).is_err());
        assert!(HttpLoader::new("https://t.test/static.jpg", layout.clone()).is_err());
        assert!(HttpLoader::new("https://t.test/{zoom", layout).is_err());
    }
}
