//! Upload loop
//!
//! Sends the metadata frame, then every chunk in order, waiting for an
//! acknowledgement after each one.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::{
    parse_ack, AckVerdict, TransferConfig, TransferError, TransferPlan, FILE_TRANSFER_CMD,
    IMAGE_FILE_NAME, PROGRESS_INTERVAL,
};
use crate::protocol::{
    encode,
    exchange::DEFAULT_DRAIN_WINDOW,
    payload::hexdump,
    stream::{drain, is_idle_read, DrainMode},
    Channel, FrameParser,
};

const ACK_READ_CHUNK: usize = 256;
const ACK_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Summary of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Image source, when uploaded from a file
    pub path: Option<PathBuf>,
    /// Data packets sent
    pub total_packets: u16,
    /// Image size in bytes
    pub total_size: u64,
    /// CRC32 announced in the metadata frame
    pub checksum: u32,
    /// Chunks that needed their retry
    pub retried_packets: u32,
    /// Wall time for the whole transfer
    pub elapsed: Duration,
}

/// Use `OrbFixApp.zip` inside `path` when `path` is a directory
pub fn resolve_image_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(IMAGE_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}

/// Sends firmware images over an open channel
#[derive(Debug, Clone, Default)]
pub struct FirmwareUploader {
    config: TransferConfig,
}

struct AckWait {
    verdict: Option<AckVerdict>,
    bytes_seen: usize,
    frames_seen: usize,
}

impl FirmwareUploader {
    /// Create an uploader
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// Active settings
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Read an image from disk and upload it
    pub fn upload_file(
        &self,
        channel: &mut dyn Channel,
        path: &Path,
    ) -> Result<TransferReport, TransferError> {
        let path = resolve_image_path(path);
        if !path.is_file() {
            return Err(TransferError::ImageNotFound(path));
        }
        let image = std::fs::read(&path)?;
        tracing::info!("uploading {} ({} bytes)", path.display(), image.len());

        let mut report = self.upload(channel, &image)?;
        report.path = Some(path);
        Ok(report)
    }

    /// Upload an image held in memory.
    ///
    /// The metadata frame gets no retry. Each data chunk is resent once on
    /// timeout, NAK or malformed reply when `retry_once` is set; a second
    /// failure aborts the transfer.
    pub fn upload(
        &self,
        channel: &mut dyn Channel,
        image: &[u8],
    ) -> Result<TransferReport, TransferError> {
        let started = Instant::now();
        let plan = TransferPlan::new(image, self.config.max_frame_size)?;
        tracing::info!(
            "transfer: {} packets of up to {} bytes, size {}, crc32 {:08X}",
            plan.total_packets,
            plan.chunk_size,
            plan.total_size,
            plan.checksum
        );

        let stage = format!(
            "meta packets={} size={}",
            plan.total_packets, plan.total_size
        );
        self.send_and_confirm(channel, &stage, &plan.metadata_payload())?;

        let mut sent: u64 = 0;
        let mut retried_packets = 0;
        for index in 0..plan.total_packets {
            let payload = plan.data_payload(image, index);
            let chunk_len = payload.len() - super::PACKET_META_LEN;
            let stage = format!(
                "chunk {}/{} sz={}",
                u32::from(index) + 1,
                plan.total_packets,
                chunk_len
            );

            if let Err(e) = self.send_and_confirm(channel, &stage, &payload) {
                if !(self.config.retry_once && e.is_ack_failure()) {
                    tracing::error!("packet idx={} failed; aborting", index);
                    return Err(e);
                }
                tracing::warn!("retrying packet idx={} after: {}", index, e);
                retried_packets += 1;
                if let Err(e) = self.send_and_confirm(channel, &format!("{} RETRY", stage), &payload)
                {
                    tracing::error!("packet idx={} failed after retry; aborting", index);
                    return Err(e);
                }
            }

            sent += chunk_len as u64;
            if index % PROGRESS_INTERVAL == 0 || sent == plan.total_size {
                tracing::info!(
                    "progress {}/{} bytes ({:.1}%)",
                    sent,
                    plan.total_size,
                    100.0 * sent as f64 / plan.total_size as f64
                );
            }
        }

        let elapsed = started.elapsed();
        tracing::info!(
            "transfer complete: {} packets, {} bytes in {:.1?}",
            plan.total_packets,
            plan.total_size,
            elapsed
        );

        Ok(TransferReport {
            path: None,
            total_packets: plan.total_packets,
            total_size: plan.total_size,
            checksum: plan.checksum,
            retried_packets,
            elapsed,
        })
    }

    fn send_and_confirm(
        &self,
        channel: &mut dyn Channel,
        stage: &str,
        payload: &[u8],
    ) -> Result<(), TransferError> {
        let frame = encode(FILE_TRANSFER_CMD, self.config.subsystem_id, payload)?;

        channel.clear_input_buffer()?;
        drain(channel, DEFAULT_DRAIN_WINDOW, DrainMode::UntilIdle)?;

        channel.write_all(&frame)?;
        channel.flush()?;
        tracing::debug!("sent 0x{:04X} {}: {}", FILE_TRANSFER_CMD, stage, hexdump(&frame));

        let wait = self.wait_for_ack(channel)?;
        match wait.verdict {
            Some(AckVerdict::Ack { code, message }) => {
                tracing::debug!(
                    "ACK {}: code={} msg='{}' bytes_seen={} frames_seen={}",
                    stage,
                    code,
                    message,
                    wait.bytes_seen,
                    wait.frames_seen
                );
                Ok(())
            }
            Some(AckVerdict::Nak {
                status,
                code,
                message,
            }) => {
                tracing::warn!("NAK {}: status={} code={} msg='{}'", stage, status, code, message);
                Err(TransferError::AckNak {
                    stage: stage.to_string(),
                    status,
                    code,
                    message,
                })
            }
            Some(AckVerdict::Malformed(reason)) => {
                tracing::warn!("malformed ACK {}: {}", stage, reason);
                Err(TransferError::AckMalformed {
                    stage: stage.to_string(),
                    reason,
                })
            }
            None => {
                if wait.bytes_seen == 0 {
                    tracing::warn!(
                        "TIMEOUT {}: no bytes received in {:.2?}",
                        stage,
                        self.config.ack_timeout
                    );
                } else {
                    tracing::warn!(
                        "TIMEOUT {}: bytes_seen={} frames_seen={} (no valid ACK)",
                        stage,
                        wait.bytes_seen,
                        wait.frames_seen
                    );
                }
                Err(TransferError::AckTimeout {
                    stage: stage.to_string(),
                    bytes_seen: wait.bytes_seen,
                })
            }
        }
    }

    /// Read until the first complete frame or the ack timeout
    fn wait_for_ack(&self, channel: &mut dyn Channel) -> Result<AckWait, TransferError> {
        let deadline = Instant::now() + self.config.ack_timeout;
        let mut parser = FrameParser::new();
        let mut chunk = [0u8; ACK_READ_CHUNK];
        let mut wait = AckWait {
            verdict: None,
            bytes_seen: 0,
            frames_seen: 0,
        };

        while Instant::now() < deadline {
            let n = match channel.read(&mut chunk) {
                Ok(0) => {
                    thread::sleep(ACK_IDLE_SLEEP);
                    continue;
                }
                Ok(n) => n,
                Err(e) if is_idle_read(&e) => {
                    thread::sleep(ACK_IDLE_SLEEP);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            wait.bytes_seen += n;
            for &byte in &chunk[..n] {
                if let Some(raw) = parser.take_frame(byte) {
                    wait.frames_seen += 1;
                    wait.verdict = Some(parse_ack(&raw));
                    return Ok(wait);
                }
            }
        }

        Ok(wait)
    }
}
