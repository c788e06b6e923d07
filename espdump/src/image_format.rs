//! ESP-IDF application binary image format
//!
//! ## Format documentation:
//! * [Header](https://docs.espressif.com/projects/esptool/en/latest/esp32/advanced-topics/firmware-image-format.html#file-header)
//! * [Extended header](https://docs.espressif.com/projects/esptool/en/latest/esp32/advanced-topics/firmware-image-format.html#extended-file-header)
//!
//! Images read back from flash are frequently damaged or cut short, so
//! decoding keeps every segment that was read completely and reports the
//! rest instead of failing.

use std::mem::size_of;

use bytemuck::{pod_read_unaligned, Pod, Zeroable};
use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::{
    error::{ImageWarning, NotAnAppImage},
    targets::Chip,
};

pub(crate) const ESP_MAGIC: u8 = 0xE9;
const ESP_CHECKSUM_MAGIC: u8 = 0xEF;
const SHA256_LEN: usize = 32;

/// Firmware header used by the ESP-IDF bootloader.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
#[doc(alias = "esp_image_header_t")]
struct ImageHeader {
    magic: u8,
    segment_count: u8,
    /// Flash read mode (esp_image_spi_mode_t)
    flash_mode: u8,
    /// ..4 bits are flash frequency (esp_image_spi_freq_t)
    /// 4.. bits are flash chip size (esp_image_flash_size_t)
    flash_config: u8,
    entry: u32,

    // extended header part
    wp_pin: u8,
    clk_q_drv: u8,
    d_cs_drv: u8,
    gd_wp_drv: u8,
    chip_id: u16,
    min_rev: u8,
    /// Minimum chip revision supported by image, in format: major * 100 + minor
    min_chip_rev_full: u16,
    /// Maximal chip revision supported by image, in format: major * 100 + minor
    max_chip_rev_full: u16,
    reserved: [u8; 4],
    append_digest: u8,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
struct SegmentHeader {
    addr: u32,
    length: u32,
}

/// Header fields which do not affect how the image is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub flash_mode: u8,
    /// Encoded flash size (`esp_image_flash_size_t`)
    pub flash_size: u8,
    /// Encoded flash frequency (`esp_image_spi_freq_t`)
    pub flash_freq: u8,
    pub chip_id: u16,
    pub min_chip_rev_full: u16,
    pub max_chip_rev_full: u16,
    /// Whether a SHA-256 digest follows the checksum
    pub append_digest: bool,
}

impl ImageMetadata {
    fn from_header(header: &ImageHeader) -> Self {
        ImageMetadata {
            flash_mode: header.flash_mode,
            flash_size: header.flash_config >> 4,
            flash_freq: header.flash_config & 0x0F,
            chip_id: u16::from_le(header.chip_id),
            min_chip_rev_full: u16::from_le(header.min_chip_rev_full),
            max_chip_rev_full: u16::from_le(header.max_chip_rev_full),
            append_digest: header.append_digest == 1,
        }
    }
}

/// One contiguous region of the image, loaded at `load_address`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppImageSegment<'a> {
    pub load_address: u32,
    pub data: &'a [u8],
}

impl AppImageSegment<'_> {
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }
}

/// A decoded application image, borrowing its segment data from the dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppImage<'a> {
    pub entry_point: u32,
    pub segments: Vec<AppImageSegment<'a>>,
    pub metadata: ImageMetadata,
    /// Segments announced by the header but lost to truncation
    pub abandoned_segments: usize,
}

impl<'a> AppImage<'a> {
    /// Decode an application image.
    ///
    /// `data` is the content of the application partition; the image does
    /// not need to fill it. Only a missing or invalid header is an error:
    /// truncated segments and bad checksums are returned as warnings
    /// alongside everything that could be recovered.
    pub fn parse(data: &'a [u8]) -> Result<ParsedImage<'a>, NotAnAppImage> {
        let header_len = size_of::<ImageHeader>();

        match data.first() {
            Some(&ESP_MAGIC) => {}
            Some(&magic) => return Err(NotAnAppImage::InvalidMagic(magic)),
            None => return Err(NotAnAppImage::TooShort(0)),
        }
        if data.len() < header_len {
            return Err(NotAnAppImage::TooShort(data.len()));
        }

        let header: ImageHeader = pod_read_unaligned(&data[..header_len]);
        let declared = header.segment_count as usize;
        let metadata = ImageMetadata::from_header(&header);
        debug!(
            "Image header: {} segments, entry {:#010x}, chip id {}",
            declared,
            u32::from_le(header.entry),
            metadata.chip_id
        );

        let mut warnings = Vec::new();
        let mut segments = Vec::with_capacity(declared);
        let mut checksum = ESP_CHECKSUM_MAGIC;
        let mut offset = header_len;
        let mut decoded = 0;

        while decoded < declared {
            let Some(segment) = read_segment(data, offset) else {
                break;
            };

            checksum = update_checksum(segment.data, checksum);
            offset += size_of::<SegmentHeader>() + segment.data.len();
            decoded += 1;

            if segment.data.is_empty() {
                debug!("Skipping empty segment at {:#010x}", segment.load_address);
                continue;
            }

            debug!(
                "Segment {} at {:#010x}, {:#x} bytes",
                decoded - 1,
                segment.load_address,
                segment.data.len()
            );
            segments.push(segment);
        }

        if decoded < declared {
            let warning = ImageWarning::TruncatedImage {
                offset,
                recovered: segments.len(),
                declared,
            };
            warn!("{warning}");
            warnings.push(warning);
        } else {
            warnings.extend(verify_trailer(data, offset, checksum, metadata.append_digest));
        }

        Ok(ParsedImage {
            image: AppImage {
                entry_point: u32::from_le(header.entry),
                segments,
                metadata,
                abandoned_segments: declared - decoded,
            },
            warnings,
        })
    }

    /// The chip named by the image header, if it is a known one
    pub fn chip(&self) -> Option<Chip> {
        Chip::from_id(self.metadata.chip_id).ok()
    }
}

/// An [AppImage] with the problems found while decoding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedImage<'a> {
    pub image: AppImage<'a>,
    pub warnings: Vec<ImageWarning>,
}

impl ParsedImage<'_> {
    /// Whether the image lost segments to truncation
    pub fn is_truncated(&self) -> bool {
        self.warnings.iter().any(ImageWarning::is_truncation)
    }
}

/// Read the segment whose header starts at `offset`, if header and payload
/// are both within `data`
fn read_segment(data: &[u8], offset: usize) -> Option<AppImageSegment<'_>> {
    let payload_start = offset + size_of::<SegmentHeader>();
    let header: SegmentHeader = pod_read_unaligned(data.get(offset..payload_start)?);

    let length = u32::from_le(header.length) as usize;
    let payload_end = payload_start.checked_add(length)?;

    Some(AppImageSegment {
        load_address: u32::from_le(header.addr),
        data: data.get(payload_start..payload_end)?,
    })
}

/// Check the checksum, and the SHA-256 digest if the header announces one.
///
/// The checksum occupies the last byte of the 16-byte block the segments end
/// in; the digest covers everything up to and including the checksum.
fn verify_trailer(
    data: &[u8],
    segments_end: usize,
    checksum: u8,
    append_digest: bool,
) -> Vec<ImageWarning> {
    let mut warnings = Vec::new();
    let checksum_pos = segments_end + 15 - (segments_end % 16);

    match data.get(checksum_pos) {
        Some(&stored) if stored == checksum => {}
        Some(&stored) => warnings.push(ImageWarning::ChecksumMismatch {
            stored,
            computed: checksum,
        }),
        None => warnings.push(ImageWarning::ChecksumMissing),
    }

    if append_digest {
        let digest_start = checksum_pos + 1;
        match data.get(digest_start..digest_start + SHA256_LEN) {
            Some(stored) => {
                let computed = Sha256::digest(&data[..digest_start]);
                if computed.as_slice() != stored {
                    warnings.push(ImageWarning::DigestMismatch);
                }
            }
            None => warnings.push(ImageWarning::DigestMissing),
        }
    }

    for warning in &warnings {
        warn!("{warning}");
    }

    warnings
}

/// Update the checksum with the given data
fn update_checksum(data: &[u8], mut checksum: u8) -> u8 {
    for byte in data {
        checksum ^= *byte;
    }

    checksum
}

#[cfg(test)]
pub(crate) mod tests {
    use bytemuck::bytes_of;
    use pretty_assertions::assert_eq;

    use super::*;

    /// Build an image the way esptool's `elf2image` lays it out
    pub(crate) fn build_image(
        entry: u32,
        chip_id: u16,
        segments: &[(u32, &[u8])],
        append_digest: bool,
    ) -> Vec<u8> {
        let header = ImageHeader {
            magic: ESP_MAGIC,
            segment_count: segments.len() as u8,
            flash_mode: 2,
            flash_config: 0x20,
            entry,
            wp_pin: 0xEE,
            clk_q_drv: 0,
            d_cs_drv: 0,
            gd_wp_drv: 0,
            chip_id,
            min_rev: 0,
            min_chip_rev_full: 0,
            max_chip_rev_full: u16::MAX,
            reserved: [0; 4],
            append_digest: append_digest as u8,
        };

        let mut data = bytes_of(&header).to_vec();
        let mut checksum = ESP_CHECKSUM_MAGIC;
        for (addr, payload) in segments {
            let segment = SegmentHeader {
                addr: *addr,
                length: payload.len() as u32,
            };
            data.extend_from_slice(bytes_of(&segment));
            data.extend_from_slice(payload);
            checksum = update_checksum(payload, checksum);
        }

        let padding = 15 - (data.len() % 16);
        data.extend(std::iter::repeat(0).take(padding));
        data.push(checksum);

        if append_digest {
            let digest = Sha256::digest(&data);
            data.extend_from_slice(&digest);
        }

        data
    }

    const IRAM: &[u8] = &[0x36, 0x41, 0x00, 0x1d, 0xf0, 0x00, 0x00, 0x00];
    const DROM: &[u8] = &[0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x00, 0x00, 0x00, 0xaa, 0xbb, 0xcc, 0xdd];

    #[test]
    fn parses_complete_image() {
        let data = build_image(0x4008_0400, 0, &[(0x3f40_0020, DROM), (0x4008_0000, IRAM)], true);
        let parsed = AppImage::parse(&data).unwrap();

        assert!(parsed.warnings.is_empty());
        assert!(!parsed.is_truncated());

        let image = parsed.image;
        assert_eq!(image.entry_point, 0x4008_0400);
        assert_eq!(image.abandoned_segments, 0);
        assert_eq!(
            image.segments,
            vec![
                AppImageSegment {
                    load_address: 0x3f40_0020,
                    data: DROM
                },
                AppImageSegment {
                    load_address: 0x4008_0000,
                    data: IRAM
                },
            ]
        );
        assert_eq!(image.chip(), Some(Chip::Esp32));
        assert_eq!(image.metadata.flash_size, 2);
        assert!(image.metadata.append_digest);
    }

    #[test]
    fn image_inside_larger_partition() {
        let mut data = build_image(0x4200_0000, 5, &[(0x4200_0000, IRAM)], true);
        data.resize(0x1000, 0xFF);

        let parsed = AppImage::parse(&data).unwrap();
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.image.chip(), Some(Chip::Esp32c3));
    }

    #[test]
    fn rejects_erased_partition() {
        let result = AppImage::parse(&[0xFF; 64]);

        assert!(matches!(result, Err(NotAnAppImage::InvalidMagic(0xFF))));
    }

    #[test]
    fn rejects_short_header() {
        assert!(matches!(
            AppImage::parse(&[ESP_MAGIC, 1, 2, 0x20]),
            Err(NotAnAppImage::TooShort(4))
        ));
        assert!(matches!(AppImage::parse(&[]), Err(NotAnAppImage::TooShort(0))));
    }

    #[test]
    fn truncated_mid_segment() {
        let data = build_image(0x4008_0400, 0, &[(0x3f40_0020, DROM), (0x4008_0000, IRAM)], true);
        // Header (24) + first segment (8 + 12) + second header (8) + 3 bytes
        let truncated = &data[..24 + 20 + 8 + 3];

        let parsed = AppImage::parse(truncated).unwrap();
        assert!(parsed.is_truncated());
        assert_eq!(
            parsed.warnings,
            vec![ImageWarning::TruncatedImage {
                offset: 44,
                recovered: 1,
                declared: 2
            }]
        );
        assert_eq!(parsed.image.abandoned_segments, 1);
        assert_eq!(parsed.image.segments.len(), 1);
        assert_eq!(parsed.image.segments[0].data, DROM);
    }

    #[test]
    fn truncated_segment_header() {
        let data = build_image(0x4008_0400, 0, &[(0x4008_0000, IRAM)], false);
        let parsed = AppImage::parse(&data[..28]).unwrap();

        assert!(parsed.is_truncated());
        assert!(parsed.image.segments.is_empty());
        assert_eq!(parsed.image.abandoned_segments, 1);
    }

    #[test]
    fn huge_segment_length_is_truncation() {
        let mut data = build_image(0x4008_0400, 0, &[(0x4008_0000, IRAM)], false);
        data[28..32].copy_from_slice(&u32::MAX.to_le_bytes());

        let parsed = AppImage::parse(&data).unwrap();
        assert!(parsed.is_truncated());
    }

    #[test]
    fn checksum_mismatch_is_a_warning() {
        let mut data = build_image(0x4008_0400, 0, &[(0x4008_0000, IRAM)], false);
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let parsed = AppImage::parse(&data).unwrap();
        assert_eq!(parsed.image.segments.len(), 1);
        assert!(matches!(
            parsed.warnings.as_slice(),
            [ImageWarning::ChecksumMismatch { .. }]
        ));
    }

    #[test]
    fn missing_trailer() {
        let data = build_image(0x4008_0400, 0, &[(0x4008_0000, IRAM)], true);
        // Cut right after the segment data: no checksum, no digest
        let parsed = AppImage::parse(&data[..24 + 8 + IRAM.len()]).unwrap();

        assert_eq!(
            parsed.warnings,
            vec![ImageWarning::ChecksumMissing, ImageWarning::DigestMissing]
        );
    }

    #[test]
    fn digest_mismatch_is_a_warning() {
        let mut data = build_image(0x4008_0400, 0, &[(0x4008_0000, IRAM)], true);
        let last = data.len() - 1;
        data[last] ^= 0x01;

        let parsed = AppImage::parse(&data).unwrap();
        assert_eq!(parsed.warnings, vec![ImageWarning::DigestMismatch]);
    }

    #[test]
    fn truncation_counts_kept_segments_only() {
        let segments: [(u32, &[u8]); 3] =
            [(0x3ffb_0000, &[]), (0x4008_0000, IRAM), (0x3f40_0020, DROM)];
        let data = build_image(0x4008_0400, 0, &segments, false);
        // Header (24) + empty segment (8) + second segment (8 + 8) + 4 bytes
        let parsed = AppImage::parse(&data[..24 + 8 + 16 + 4]).unwrap();

        assert_eq!(parsed.image.segments.len(), 1);
        assert_eq!(parsed.image.abandoned_segments, 1);
        assert_eq!(
            parsed.warnings,
            vec![ImageWarning::TruncatedImage {
                offset: 48,
                recovered: 1,
                declared: 3
            }]
        );
    }

    #[test]
    fn empty_segments_are_skipped() {
        let segments: [(u32, &[u8]); 2] = [(0x3ffb_0000, &[]), (0x4008_0000, IRAM)];
        let data = build_image(0x4008_0400, 0, &segments, false);
        let parsed = AppImage::parse(&data).unwrap();

        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.image.segments.len(), 1);
        assert_eq!(parsed.image.segments[0].load_address, 0x4008_0000);
    }
}
