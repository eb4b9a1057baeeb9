//! Turns raw image bytes fetched from the BQS into the tensor shape the
//! Predictor expects: single-channel, 224x224, scaled to `[0, 1]`.
//!
//! This is the only module that touches the `image` crate directly. Errors
//! here are always attributed to the job that produced them so the worker
//! loop can route them into the retry/DLQ path (§4.4) without re-deriving
//! which job failed.

use errors::*;

use image::{imageops::FilterType, DynamicImage, GenericImageView};

pub const TENSOR_DIM: u32 = 224;

/// A batch of preprocessed images, stacked in submission order. Shape is
/// conceptually `(batch_size, 1, TENSOR_DIM, TENSOR_DIM)`; `data` holds it
/// flattened in row-major order so it can be written straight to a
/// predictor process's stdin.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub batch_size: usize,
    pub data:       Vec<f32>,
}

impl Tensor {
    fn single(values: Vec<f32>) -> Tensor {
        Tensor {
            batch_size: 1,
            data:       values,
        }
    }

    /// Stacks single-image tensors into one batch, preserving order.
    pub fn stack(items: Vec<Tensor>) -> Tensor {
        let batch_size = items.len();
        let mut data = Vec::with_capacity(batch_size * (TENSOR_DIM * TENSOR_DIM) as usize);
        for item in items {
            data.extend(item.data);
        }
        Tensor { batch_size, data }
    }

    /// Little-endian `f32` bytes, the wire format `PredictorLive` feeds to
    /// the external forward-pass process.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * 4);
        for v in &self.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }
}

/// Decodes, grayscales, resizes, and normalizes one image. `job_id` is only
/// used to attribute the right error kind back to the caller.
pub fn preprocess_one(job_id: i64, image_bytes: &[u8]) -> Result<Tensor> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|_| Error::from(ErrorKind::PreprocessFailed(job_id)))?;

    let resized = resize_and_normalize(&img);
    Ok(Tensor::single(resized))
}

fn resize_and_normalize(img: &DynamicImage) -> Vec<f32> {
    let gray = img.grayscale();
    let resized = gray.resize_exact(TENSOR_DIM, TENSOR_DIM, FilterType::Triangle);
    let luma = resized.to_luma8();

    let mut values = Vec::with_capacity((TENSOR_DIM * TENSOR_DIM) as usize);
    for (_, _, pixel) in luma.enumerate_pixels() {
        values.push(pixel.0[0] as f32 / 255.0);
    }
    values
}

#[cfg(test)]
mod tests {
    use preprocess::*;

    use image::{DynamicImage, RgbImage};

    fn encode_test_png() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(32, 16));
        let mut bytes: Vec<u8> = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_preprocess_one_shape() {
        let bytes = encode_test_png();
        let tensor = preprocess_one(1, &bytes).unwrap();
        assert_eq!(tensor.batch_size, 1);
        assert_eq!(tensor.data.len(), (TENSOR_DIM * TENSOR_DIM) as usize);
        assert!(tensor.data.iter().all(|v| *v >= 0.0 && *v <= 1.0));
    }

    #[test]
    fn test_preprocess_one_rejects_garbage() {
        let err = preprocess_one(1, b"not an image").unwrap_err();
        assert!(format!("{}", err).contains("preprocess"));
    }

    #[test]
    fn test_stack_preserves_order_and_size() {
        let bytes = encode_test_png();
        let a = preprocess_one(1, &bytes).unwrap();
        let b = preprocess_one(2, &bytes).unwrap();
        let stacked = Tensor::stack(vec![a.clone(), b.clone()]);
        assert_eq!(stacked.batch_size, 2);
        assert_eq!(stacked.data.len(), a.data.len() + b.data.len());
        assert_eq!(&stacked.data[..a.data.len()], &a.data[..]);
    }
}
