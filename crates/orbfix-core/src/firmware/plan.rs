//! Transfer planning: chunk size, packet count and checksum

use std::ops::Range;

use super::{
    TransferError, FALLBACK_CHUNK_SIZE, FRAME_OVERHEAD, PACKET_META_LEN, STATUS_DATA,
    STATUS_METADATA,
};
use crate::protocol::{PayloadBuilder, MAX_PAYLOAD_LEN};

/// Chunking and checksum for one image, fixed before anything is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    /// Image size in bytes
    pub total_size: u64,
    /// CRC32 (IEEE) of the whole image
    pub checksum: u32,
    /// Data bytes per packet
    pub chunk_size: usize,
    /// Number of data packets
    pub total_packets: u16,
}

impl TransferPlan {
    /// Plan the transfer of `image` with frames no larger than `max_frame_size`
    pub fn new(image: &[u8], max_frame_size: usize) -> Result<Self, TransferError> {
        if image.is_empty() {
            return Err(TransferError::EmptyImage);
        }

        let chunk_size = Self::chunk_size_for(max_frame_size);
        let packets = image.len().div_ceil(chunk_size);
        let total_packets = u16::try_from(packets)
            .map_err(|_| TransferError::TooManyPackets { packets })?;

        Ok(Self {
            total_size: image.len() as u64,
            checksum: crc32fast::hash(image),
            chunk_size,
            total_packets,
        })
    }

    /// Data bytes that fit in one frame of `max_frame_size`
    pub fn chunk_size_for(max_frame_size: usize) -> usize {
        match max_frame_size.checked_sub(FRAME_OVERHEAD + PACKET_META_LEN) {
            Some(0) | None => FALLBACK_CHUNK_SIZE,
            Some(n) => n.min(MAX_PAYLOAD_LEN - PACKET_META_LEN),
        }
    }

    /// Byte range of packet `index` within the image
    pub fn chunk_range(&self, index: u16) -> Range<usize> {
        let start = usize::from(index) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size as usize);
        start..end
    }

    /// `[0, total_packets, checksum, total_size]`
    pub fn metadata_payload(&self) -> Vec<u8> {
        PayloadBuilder::new()
            .byte(STATUS_METADATA)
            .u16_be(self.total_packets)
            .u64_be(u64::from(self.checksum))
            .u64_be(self.total_size)
            .build()
    }

    /// `[1, index, chunk...]` for packet `index`
    pub fn data_payload(&self, image: &[u8], index: u16) -> Vec<u8> {
        PayloadBuilder::new()
            .byte(STATUS_DATA)
            .u16_be(index)
            .bytes(&image[self.chunk_range(index)])
            .build()
    }
}
