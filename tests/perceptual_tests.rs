use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Cursor;
use uniqpost::imaging::{ImageBuffer, PerceptualAlgorithm, PerceptualHash, PerceptualHasher};

fn blocks(width: u32, height: u32, block: u32, seed: u64) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = width.div_ceil(block);
    let colors: Vec<[u8; 3]> = (0..cols * height.div_ceil(block))
        .map(|_| [rng.random(), rng.random(), rng.random()])
        .collect();
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb(colors[((y / block) * cols + x / block) as usize])
    }))
}

#[test]
fn test_identical_images_have_distance_zero() {
    let hasher = PerceptualHasher::new();
    let img = blocks(64, 64, 8, 1);
    let a = hasher.fingerprint(&img);
    let b = hasher.fingerprint(&img.clone());

    let d = a.distance(&b);
    assert_eq!((d.ahash, d.dhash, d.phash), (0, 0, 0));
}

#[test]
fn test_hash_lengths() {
    let hasher = PerceptualHasher::new();
    let img = blocks(40, 30, 5, 2);
    assert_eq!(hasher.hash(PerceptualAlgorithm::Ahash, &img).len(), 64);
    assert_eq!(hasher.hash(PerceptualAlgorithm::Dhash, &img).len(), 64);
    assert_eq!(hasher.hash(PerceptualAlgorithm::Phash, &img).len(), 63);
}

#[test]
fn test_resized_images_are_similar() {
    let hasher = PerceptualHasher::new();
    let mut img = RgbImage::new(128, 128);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let v = ((x + y) / 2) as u8;
        *px = Rgb([v, v, v]);
    }
    let original = DynamicImage::ImageRgb8(img);
    let resized = original.resize_exact(64, 64, FilterType::Lanczos3);

    let d = hasher.fingerprint(&original).distance(&hasher.fingerprint(&resized));
    assert!(d.ahash <= 6, "aHash moved too far: {d}");
    assert!(d.dhash <= 4, "dHash moved too far: {d}");
    assert!(d.phash <= 10, "pHash moved too far: {d}");
}

#[test]
fn test_mirror_moves_every_hash() {
    let hasher = PerceptualHasher::new();
    let img = blocks(64, 64, 8, 7);
    let mirrored = DynamicImage::ImageRgba8(imageops::flip_horizontal(&img));

    let d = hasher.fingerprint(&img).distance(&hasher.fingerprint(&mirrored));
    for algorithm in PerceptualAlgorithm::ALL {
        assert!(d.get(algorithm) > 0, "{algorithm} unchanged by mirroring");
    }
}

#[test]
fn test_uniform_image_ahash_is_all_ones() {
    // Every pixel equals the mean, and equal-to-mean counts as set.
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([90, 90, 90])));
    let hash = PerceptualHasher::new().hash(PerceptualAlgorithm::Ahash, &img);
    assert_eq!(hash.bits(), u64::MAX);
}

#[test]
fn test_encoded_and_decoded_hashes_agree() {
    let hasher = PerceptualHasher::new();
    let img = blocks(48, 32, 4, 11);
    let buffer = ImageBuffer::from_image(&img).unwrap();

    assert_eq!(
        hasher.fingerprint_buffer(&buffer).unwrap(),
        hasher.fingerprint(&img)
    );
}

#[test]
fn test_hash_bytes_rejects_garbage() {
    let hasher = PerceptualHasher::new();
    assert!(hasher
        .hash_bytes(PerceptualAlgorithm::Phash, b"not an image")
        .is_err());
}

#[test]
fn test_distance_between_algorithms_is_maximal() {
    let a = PerceptualHash::from_bits(PerceptualAlgorithm::Ahash, 0);
    let p = PerceptualHash::from_bits(PerceptualAlgorithm::Phash, 0);
    assert_eq!(a.distance(&p), 64);
    assert_eq!(
        PerceptualHash::from_bits(PerceptualAlgorithm::Phash, u64::MAX).bits(),
        (1u64 << 63) - 1
    );
}

#[test]
fn test_rotation_moves_dhash_past_threshold() {
    let hasher = PerceptualHasher::new();
    for seed in 0..5 {
        let img = blocks(64, 64, 8, seed);
        let rotated = img.rotate180();
        let d = hasher.fingerprint(&img).distance(&hasher.fingerprint(&rotated));
        assert!(d.dhash >= 12, "seed {seed}: {d}");
    }
}

/// Insert an EXIF APP1 segment carrying `orientation` right after the SOI marker.
fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
    let mut exif = b"Exif\0\0II*\0".to_vec();
    exif.extend_from_slice(&8u32.to_le_bytes());
    exif.extend_from_slice(&1u16.to_le_bytes());
    exif.extend_from_slice(&0x0112u16.to_le_bytes());
    exif.extend_from_slice(&3u16.to_le_bytes());
    exif.extend_from_slice(&1u32.to_le_bytes());
    exif.extend_from_slice(&orientation.to_le_bytes());
    exif.extend_from_slice(&[0, 0]);
    exif.extend_from_slice(&0u32.to_le_bytes());

    let segment_len = u16::try_from(exif.len() + 2).unwrap();
    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(&exif);
    out.extend_from_slice(&jpeg[2..]);
    out
}

#[test]
fn test_hashes_follow_exif_orientation() {
    let mut jpeg = Vec::new();
    blocks(80, 40, 10, 11)
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .unwrap();
    let tagged = ImageBuffer::from_bytes(with_exif_orientation(&jpeg, 6)).unwrap();
    assert_eq!((tagged.width(), tagged.height()), (40, 80));

    let upright = image::load_from_memory(&jpeg).unwrap().rotate90();
    let hasher = PerceptualHasher::new();
    let d = hasher
        .fingerprint_buffer(&tagged)
        .unwrap()
        .distance(&hasher.fingerprint(&upright));
    assert_eq!((d.ahash, d.dhash, d.phash), (0, 0, 0));
}
