use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::ImageFormat;

use crate::error::{Result, StreamError};
use crate::pose::{draw_pose, PoseEstimator, INPUT_SIZE};

/// Validate a JPEG pulled from a camera and, when an estimator is given,
/// return it re-encoded with the pose overlay drawn in.
pub fn process_frame(
    jpeg: Bytes,
    estimator: Option<&mut dyn PoseEstimator>,
    threshold: f32,
    quality: u8,
) -> Result<Bytes> {
    let image = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).map_err(StreamError::Decode)?;
    let Some(estimator) = estimator else {
        return Ok(jpeg);
    };

    let mut rgb = image.into_rgb8();
    let input = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let keypoints = estimator.estimate(&input)?;
    draw_pose(&mut rgb, &keypoints, threshold);
    encode_jpeg(&rgb, quality)
}

pub fn encode_jpeg(rgb: &image::RgbImage, quality: u8) -> Result<Bytes> {
    let mut out = Vec::with_capacity(rgb.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(rgb)
        .map_err(StreamError::Encode)?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pose::Keypoint;
    use image::{Rgb, RgbImage};

    pub(crate) fn test_jpeg(shade: u8) -> Bytes {
        let img = RgbImage::from_pixel(64, 48, Rgb([shade, shade, shade]));
        encode_jpeg(&img, 90).unwrap()
    }

    struct CentrePoint {
        calls: usize,
    }

    impl PoseEstimator for CentrePoint {
        fn estimate(&mut self, frame: &RgbImage) -> Result<Vec<Keypoint>> {
            assert_eq!(frame.dimensions(), (INPUT_SIZE, INPUT_SIZE));
            self.calls += 1;
            Ok(vec![Keypoint { x: 0.5, y: 0.5, score: 0.9 }])
        }
    }

    #[test]
    fn passes_valid_jpeg_through_untouched_without_estimator() {
        let jpeg = test_jpeg(10);
        let out = process_frame(jpeg.clone(), None, 0.3, 80).unwrap();
        assert_eq!(out, jpeg);
    }

    #[test]
    fn rejects_garbage() {
        let err = process_frame(Bytes::from_static(b"\xFF\xD8nope\xFF\xD9"), None, 0.3, 80).unwrap_err();
        assert!(matches!(err, StreamError::Decode(_)));
    }

    #[test]
    fn overlay_runs_model_on_resized_copy_and_reencodes() {
        let mut est = CentrePoint { calls: 0 };
        let jpeg = test_jpeg(10);
        let out = process_frame(jpeg.clone(), Some(&mut est), 0.3, 80).unwrap();
        assert_eq!(est.calls, 1);
        assert_ne!(out, jpeg);

        let decoded = image::load_from_memory(&out).unwrap().into_rgb8();
        assert_eq!(decoded.dimensions(), (64, 48));
        let centre = decoded.get_pixel(32, 24);
        // the keypoint disc is green on a dark grey frame
        assert!(centre[1] as i32 > centre[0] as i32 + 50, "centre pixel was {:?}", centre);
    }
}
