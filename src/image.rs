//! The raster type flowing through loaders and the stitcher: a tightly packed,
//! row-major RGB8 grid. Decoding, encoding and resizing delegate to the `image`
//! crate; any alpha channel is dropped on decode.
//!
//! Rasters are indexed here as (x, y) pixel coordinates; the row-major `(row, col)`
//! memory order is an implementation detail of this module.

use std::io::Cursor;

use image::{imageops, ImageFormat, RgbImage};

use crate::errors::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub width: usize,
    pub height: usize,
    // The image data stored in row-major order
    pub data: Vec<u8>,
}

impl ImageBuffer {
    pub fn new(width: usize, height: usize) -> ImageBuffer {
        ImageBuffer {
            width,
            height,
            data: vec![0u8; width * height * 3],
        }
    }

    pub fn filled(width: usize, height: usize, color: [u8; 3]) -> ImageBuffer {
        let mut data = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            data.extend_from_slice(&color);
        }
        ImageBuffer {
            width,
            height,
            data,
        }
    }

    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<ImageBuffer, Error> {
        if data.len() != width * height * 3 {
            return Err(Error::InvalidArgument(format!(
                "raster data of {} bytes does not match shape ({}, {}, 3)",
                data.len(),
                height,
                width
            )));
        }
        Ok(ImageBuffer {
            width,
            height,
            data,
        })
    }

    /// Decodes an encoded image (format sniffed from the bytes), dropping alpha.
    pub fn decode(bytes: &[u8]) -> Result<ImageBuffer, Error> {
        let decoded = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);
        Ok(ImageBuffer {
            width,
            height,
            data: decoded.into_raw(),
        })
    }

    /// Encodes to the format conventionally named by `extension` ("jpg", "png", ...).
    pub fn encode(&self, extension: &str) -> Result<Vec<u8>, Error> {
        let format = ImageFormat::from_extension(extension).ok_or_else(|| {
            Error::InvalidArgument(format!("no image format for extension {:?}", extension))
        })?;
        let img = self.to_rgb_image()?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format)?;
        Ok(out.into_inner())
    }

    pub fn num_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn put(&mut self, x: usize, y: usize, color: [u8; 3]) {
        let i = (y * self.width + x) * 3;
        self.data[i..i + 3].copy_from_slice(&color);
    }

    /// Copies `src` into this raster with its pixel (0, 0) at (dst_x, dst_y).
    /// The source must fit entirely.
    pub fn blit(&mut self, dst_x: usize, dst_y: usize, src: &ImageBuffer) -> Result<(), Error> {
        if dst_x + src.width > self.width || dst_y + src.height > self.height {
            return Err(Error::InvalidArgument(format!(
                "blit of ({}, {}) raster at ({}, {}) exceeds ({}, {})",
                src.width, src.height, dst_x, dst_y, self.width, self.height
            )));
        }
        for row in 0..src.height {
            let src_start = row * src.width * 3;
            let dst_start = ((dst_y + row) * self.width + dst_x) * 3;
            self.data[dst_start..dst_start + src.width * 3]
                .copy_from_slice(&src.data[src_start..src_start + src.width * 3]);
        }
        Ok(())
    }

    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Result<ImageBuffer, Error> {
        if x + width > self.width || y + height > self.height {
            return Err(Error::InvalidArgument(format!(
                "crop ({}, {}, {}, {}) exceeds ({}, {})",
                x, y, width, height, self.width, self.height
            )));
        }
        let mut data = Vec::with_capacity(width * height * 3);
        for row in 0..height {
            let start = ((y + row) * self.width + x) * 3;
            data.extend_from_slice(&self.data[start..start + width * 3]);
        }
        Ok(ImageBuffer {
            width,
            height,
            data,
        })
    }

    /// Area-style resampling to a new shape.
    pub fn resize(&self, width: usize, height: usize) -> Result<ImageBuffer, Error> {
        let img = self.to_rgb_image()?;
        let resized = imageops::resize(
            &img,
            width as u32,
            height as u32,
            imageops::FilterType::Triangle,
        );
        Ok(ImageBuffer {
            width,
            height,
            data: resized.into_raw(),
        })
    }

    /// Bilinear sample at a continuous pixel coordinate, where the center of pixel
    /// (i, j) lies at (i + 0.5, j + 0.5). Returns `None` outside [0, w] x [0, h].
    pub fn sample_bilinear(&self, x: f64, y: f64) -> Option<[u8; 3]> {
        if x < 0.0 || y < 0.0 || x > self.width as f64 || y > self.height as f64 {
            return None;
        }
        let u = x - 0.5;
        let v = y - 0.5;
        let x0 = u.floor();
        let y0 = v.floor();
        let fx = u - x0;
        let fy = v - y0;

        let clamp_x = |i: f64| (i.max(0.0) as usize).min(self.width - 1);
        let clamp_y = |i: f64| (i.max(0.0) as usize).min(self.height - 1);
        let (x0i, x1i) = (clamp_x(x0), clamp_x(x0 + 1.0));
        let (y0i, y1i) = (clamp_y(y0), clamp_y(y0 + 1.0));

        let p00 = self.get(x0i, y0i);
        let p10 = self.get(x1i, y0i);
        let p01 = self.get(x0i, y1i);
        let p11 = self.get(x1i, y1i);

        let mut out = [0u8; 3];
        for c in 0..3 {
            let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
            let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
            out[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
        }
        Some(out)
    }

    fn to_rgb_image(&self) -> Result<RgbImage, Error> {
        RgbImage::from_raw(self.width as u32, self.height as u32, self.data.clone()).ok_or_else(
            || {
                Error::Corruption(format!(
                    "raster data does not match shape ({}, {}, 3)",
                    self.height, self.width
                ))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled() {
        let img = ImageBuffer::filled(4, 2, [7, 8, 9]);
        assert_eq!(img.get(0, 0), [7, 8, 9]);
        assert_eq!(img.get(3, 1), [7, 8, 9]);
        assert_eq!(img.num_bytes(), 4 * 2 * 3);
    }

    #[test]
    fn test_blit_and_crop() {
        let mut dst = ImageBuffer::new(4, 4);
        let mut src = ImageBuffer::new(2, 2);
        src.put(0, 0, [1, 1, 1]);
        src.put(1, 0, [2, 2, 2]);
        src.put(0, 1, [3, 3, 3]);
        src.put(1, 1, [4, 4, 4]);
        dst.blit(2, 1, &src).unwrap();
        assert_eq!(dst.get(2, 1), [1, 1, 1]);
        assert_eq!(dst.get(3, 2), [4, 4, 4]);
        assert_eq!(dst.get(0, 0), [0, 0, 0]);

        let back = dst.crop(2, 1, 2, 2).unwrap();
        assert_eq!(back, src);

        assert!(dst.blit(3, 3, &src).is_err());
        assert!(dst.crop(3, 3, 2, 2).is_err());
    }

    #[test]
    fn test_sample_bilinear_centers_and_bounds() {
        let mut img = ImageBuffer::new(2, 1);
        img.put(0, 0, [0, 0, 0]);
        img.put(1, 0, [100, 100, 100]);
        // Pixel centers sample exactly
        assert_eq!(img.sample_bilinear(0.5, 0.5), Some([0, 0, 0]));
        assert_eq!(img.sample_bilinear(1.5, 0.5), Some([100, 100, 100]));
        // Halfway between the two centers
        assert_eq!(img.sample_bilinear(1.0, 0.5), Some([50, 50, 50]));
        // Outside the raster
        assert_eq!(img.sample_bilinear(-0.01, 0.5), None);
        assert_eq!(img.sample_bilinear(2.01, 0.5), None);
    }

    #[test]
    fn test_encode_decode() {
        let mut img = ImageBuffer::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                img.put(x, y, [(x * 30) as u8, (y * 30) as u8, 128]);
            }
        }
        let png = img.encode("png").unwrap();
        let back = ImageBuffer::decode(&png).unwrap();
        assert_eq!(back, img);
        assert!(img.encode("nope").is_err());
    }

    #[test]
    fn test_resize() {
        let img = ImageBuffer::filled(8, 4, [10, 20, 30]);
        let resized = img.resize(4, 2).unwrap();
        assert_eq!(resized.width, 4);
        assert_eq!(resized.height, 2);
        assert_eq!(resized.get(1, 1), [10, 20, 30]);
    }
}
