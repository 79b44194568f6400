use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::RecorderError;
use crate::models::media_format::{BufferFlags, BufferInfo, MediaFormat, TrackKind};
use crate::models::recording_result::TrackSummary;
use crate::traits::container::{ContainerFormat, ContainerWriter};

pub const MREC_EXTENSION: &str = "mrec";

const MAGIC: &[u8; 4] = b"MREC";
const VERSION: u16 = 1;
/// magic(4) + version(2) + track_count(2) + trailer_offset(8)
pub const HEADER_SIZE: u64 = 16;
const TRACK_COUNT_OFFSET: u64 = 6;
const TRAILER_OFFSET_OFFSET: u64 = 8;

const TAG_TRACK: u8 = b'T';
const TAG_SAMPLE: u8 = b'S';
const TAG_TRAILER: u8 = b'E';

/// Factory for the interleaved `.mrec` container.
#[derive(Debug, Clone, Copy, Default)]
pub struct MrecFormat;

impl ContainerFormat for MrecFormat {
    fn extension(&self) -> &str {
        MREC_EXTENSION
    }

    fn create(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, RecorderError> {
        Ok(Box::new(MrecWriter::create(path)?))
    }
}

/// Streaming writer for the `.mrec` container.
///
/// ## File Format
///
/// ```text
/// [16-byte header: "MREC" | version u16 | track count u16 | trailer offset u64]
/// [track record per track, written on start]
/// [sample records, interleaved in write order]
/// [trailer: per-track sample count and timestamp range]
/// ```
///
/// All integers are little-endian. Track count and trailer offset are
/// patched into the header when the file is finalized; a file whose
/// trailer offset is zero was never finalized.
pub struct MrecWriter {
    file_path: PathBuf,
    file: Option<BufWriter<File>>,
    formats: Vec<MediaFormat>,
    summaries: Vec<TrackSummary>,
    started: bool,
    total_bytes_written: u64,
}

impl MrecWriter {
    /// Create the file and write the provisional header.
    pub fn create(path: &Path) -> Result<Self, RecorderError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RecorderError::StorageError(format!("failed to create directory: {}", e)))?;
        }
        let file =
            File::create(path).map_err(|e| RecorderError::StorageError(format!("failed to create file: {}", e)))?;

        let mut writer = Self {
            file_path: path.to_path_buf(),
            file: Some(BufWriter::new(file)),
            formats: Vec::new(),
            summaries: Vec::new(),
            started: false,
            total_bytes_written: 0,
        };

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        writer.write_raw(&header)?;
        Ok(writer)
    }

    /// Total bytes written so far (including header).
    pub fn bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), RecorderError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| RecorderError::StorageError("file is not open".into()))?;
        file.write_all(data)
            .map_err(|e| RecorderError::StorageError(format!("write failed: {}", e)))?;
        self.total_bytes_written += data.len() as u64;
        Ok(())
    }

    fn patch_header(&mut self, trailer_offset: u64) -> Result<(), RecorderError> {
        let track_count = self.formats.len() as u16;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| RecorderError::StorageError("file is not open".into()))?;
        file.seek(SeekFrom::Start(TRACK_COUNT_OFFSET))
            .map_err(|e| RecorderError::StorageError(e.to_string()))?;
        file.write_all(&track_count.to_le_bytes())
            .map_err(|e| RecorderError::StorageError(e.to_string()))?;
        file.seek(SeekFrom::Start(TRAILER_OFFSET_OFFSET))
            .map_err(|e| RecorderError::StorageError(e.to_string()))?;
        file.write_all(&trailer_offset.to_le_bytes())
            .map_err(|e| RecorderError::StorageError(e.to_string()))?;
        file.flush().map_err(|e| RecorderError::StorageError(e.to_string()))
    }
}

fn encode_track(index: usize, format: &MediaFormat) -> Vec<u8> {
    let mime = format.mime.as_bytes();
    let mut record = Vec::with_capacity(40 + mime.len() + format.csd.len());
    record.push(TAG_TRACK);
    record.push(index as u8);
    record.push(format.kind.as_u8());
    record.extend_from_slice(&(mime.len() as u16).to_le_bytes());
    record.extend_from_slice(mime);
    record.extend_from_slice(&format.width.to_le_bytes());
    record.extend_from_slice(&format.height.to_le_bytes());
    record.extend_from_slice(&format.frame_rate.to_le_bytes());
    record.extend_from_slice(&format.sample_rate.to_le_bytes());
    record.extend_from_slice(&format.channel_count.to_le_bytes());
    record.extend_from_slice(&format.bit_rate.to_le_bytes());
    record.extend_from_slice(&(format.csd.len() as u32).to_le_bytes());
    record.extend_from_slice(&format.csd);
    record
}

impl ContainerWriter for MrecWriter {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, RecorderError> {
        if self.started {
            return Err(RecorderError::InvalidState("tracks must be added before start".into()));
        }
        if self.formats.len() >= u8::MAX as usize {
            return Err(RecorderError::StorageError("too many tracks".into()));
        }
        let index = self.formats.len();
        self.formats.push(format.clone());
        self.summaries.push(TrackSummary {
            index,
            kind: format.kind,
            mime: format.mime.clone(),
            sample_count: 0,
            first_pts_us: 0,
            last_pts_us: 0,
        });
        Ok(index)
    }

    fn start(&mut self) -> Result<(), RecorderError> {
        if self.started {
            return Err(RecorderError::InvalidState("writer already started".into()));
        }
        if self.formats.is_empty() {
            return Err(RecorderError::InvalidState("no tracks added".into()));
        }
        let records: Vec<Vec<u8>> = self
            .formats
            .iter()
            .enumerate()
            .map(|(index, format)| encode_track(index, format))
            .collect();
        for record in records {
            self.write_raw(&record)?;
        }
        self.started = true;
        Ok(())
    }

    fn write_sample_data(&mut self, track_index: usize, data: &[u8], info: &BufferInfo) -> Result<(), RecorderError> {
        if !self.started {
            return Err(RecorderError::InvalidState("writer not started".into()));
        }
        if track_index >= self.summaries.len() {
            return Err(RecorderError::InvalidState(format!("unknown track {}", track_index)));
        }

        let mut record = Vec::with_capacity(18 + data.len());
        record.push(TAG_SAMPLE);
        record.push(track_index as u8);
        record.extend_from_slice(&info.flags.bits().to_le_bytes());
        record.extend_from_slice(&info.presentation_time_us.to_le_bytes());
        record.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.write_raw(&record)?;
        self.write_raw(data)?;

        let summary = &mut self.summaries[track_index];
        if summary.sample_count == 0 {
            summary.first_pts_us = info.presentation_time_us;
        }
        summary.sample_count += 1;
        summary.last_pts_us = info.presentation_time_us;
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<TrackSummary>, RecorderError> {
        if self.file.is_none() {
            return Err(RecorderError::StorageError("file is not open".into()));
        }

        let trailer_offset = self.total_bytes_written;
        let mut trailer = vec![TAG_TRAILER];
        trailer.extend_from_slice(&(self.summaries.len() as u16).to_le_bytes());
        for summary in &self.summaries {
            trailer.push(summary.index as u8);
            trailer.extend_from_slice(&summary.sample_count.to_le_bytes());
            trailer.extend_from_slice(&summary.first_pts_us.to_le_bytes());
            trailer.extend_from_slice(&summary.last_pts_us.to_le_bytes());
        }
        self.write_raw(&trailer)?;
        self.patch_header(trailer_offset)?;

        self.file = None;
        self.started = false;
        log::info!(
            "container finalized: {} ({} bytes, {} tracks)",
            self.file_path.display(),
            self.total_bytes_written,
            self.summaries.len()
        );
        Ok(self.summaries.clone())
    }

    fn path(&self) -> &Path {
        &self.file_path
    }
}

/// One sample record read back from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub track_index: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
    pub size: usize,
}

/// Track description read back from a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerTrack {
    pub index: usize,
    pub format: MediaFormat,
    pub summary: TrackSummary,
}

/// Parsed contents of a finalized `.mrec` file.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerContents {
    pub tracks: Vec<ContainerTrack>,
    pub samples: Vec<SampleRecord>,
}

impl ContainerContents {
    pub fn track(&self, kind: TrackKind) -> Option<&ContainerTrack> {
        self.tracks.iter().find(|t| t.format.kind == kind)
    }

    pub fn samples_of(&self, track_index: usize) -> impl Iterator<Item = &SampleRecord> {
        self.samples.iter().filter(move |s| s.track_index == track_index)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RecorderError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let end = end.ok_or_else(|| RecorderError::StorageError(format!("truncated container at {}", self.pos)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, RecorderError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], RecorderError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, RecorderError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, RecorderError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, RecorderError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, RecorderError> {
        Ok(i64::from_le_bytes(self.array()?))
    }
}

fn decode_track(cursor: &mut Cursor<'_>) -> Result<(usize, MediaFormat), RecorderError> {
    let index = cursor.u8()? as usize;
    let kind = TrackKind::from_u8(cursor.u8()?)
        .ok_or_else(|| RecorderError::StorageError("unknown track kind".into()))?;
    let mime_len = cursor.u16()? as usize;
    let mime = String::from_utf8(cursor.take(mime_len)?.to_vec())
        .map_err(|_| RecorderError::StorageError("track mime is not utf-8".into()))?;
    let mut format = match kind {
        TrackKind::Video => MediaFormat::video(&mime, 0, 0),
        TrackKind::Audio => MediaFormat::audio(&mime, 0, 0),
    };
    format.width = cursor.u32()?;
    format.height = cursor.u32()?;
    format.frame_rate = cursor.u32()?;
    format.sample_rate = cursor.u32()?;
    format.channel_count = cursor.u16()?;
    format.bit_rate = cursor.u32()?;
    let csd_len = cursor.u32()? as usize;
    format.csd = cursor.take(csd_len)?.to_vec();
    Ok((index, format))
}

/// Parse a finalized `.mrec` file and cross-check its trailer.
pub fn read_container(path: &Path) -> Result<ContainerContents, RecorderError> {
    let data =
        fs::read(path).map_err(|e| RecorderError::StorageError(format!("failed to read container: {}", e)))?;
    let mut cursor = Cursor { data: &data, pos: 0 };

    if cursor.take(4)? != MAGIC {
        return Err(RecorderError::StorageError("not an mrec container".into()));
    }
    let version = cursor.u16()?;
    if version != VERSION {
        return Err(RecorderError::StorageError(format!("unsupported version {}", version)));
    }
    let track_count = cursor.u16()? as usize;
    let trailer_offset = cursor.u64()? as usize;
    if trailer_offset == 0 {
        return Err(RecorderError::StorageError("container was not finalized".into()));
    }

    let mut formats = Vec::with_capacity(track_count);
    let mut samples = Vec::new();
    while cursor.pos < trailer_offset {
        match cursor.u8()? {
            TAG_TRACK => formats.push(decode_track(&mut cursor)?),
            TAG_SAMPLE => {
                let track_index = cursor.u8()? as usize;
                let flags = BufferFlags(cursor.u32()?);
                let presentation_time_us = cursor.i64()?;
                let size = cursor.u32()? as usize;
                cursor.take(size)?;
                samples.push(SampleRecord {
                    track_index,
                    presentation_time_us,
                    flags,
                    size,
                });
            }
            tag => return Err(RecorderError::StorageError(format!("unexpected record tag {:#x}", tag))),
        }
    }

    if cursor.u8()? != TAG_TRAILER {
        return Err(RecorderError::StorageError("missing trailer".into()));
    }
    let summary_count = cursor.u16()? as usize;
    if summary_count != track_count || formats.len() != track_count {
        return Err(RecorderError::StorageError("track count mismatch".into()));
    }

    let mut tracks = Vec::with_capacity(track_count);
    for (index, format) in formats {
        let summary_index = cursor.u8()? as usize;
        let summary = TrackSummary {
            index: summary_index,
            kind: format.kind,
            mime: format.mime.clone(),
            sample_count: cursor.u64()?,
            first_pts_us: cursor.i64()?,
            last_pts_us: cursor.i64()?,
        };
        let actual = samples.iter().filter(|s| s.track_index == index).count() as u64;
        if summary_index != index || summary.sample_count != actual {
            return Err(RecorderError::StorageError(format!("trailer disagrees with track {}", index)));
        }
        tracks.push(ContainerTrack { index, format, summary });
    }

    Ok(ContainerContents { tracks, samples })
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, RecorderError> {
    let data = fs::read(path)
        .map_err(|e| RecorderError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media_format::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("media_recorder_test_{}_{}", std::process::id(), name))
    }

    fn info(pts: i64, flags: BufferFlags) -> BufferInfo {
        BufferInfo {
            offset: 0,
            size: 0,
            presentation_time_us: pts,
            flags,
        }
    }

    #[test]
    fn write_and_read_two_tracks() {
        let path = temp_file_path("two_tracks.mrec");
        let mut writer = MrecFormat.create(&path).unwrap();

        let mut video = MediaFormat::video(MIME_VIDEO_AVC, 640, 480);
        video.csd = vec![0, 0, 0, 1, 0x67];
        let v = writer.add_track(&video).unwrap();
        let a = writer.add_track(&MediaFormat::audio(MIME_AUDIO_AAC, 44100, 1)).unwrap();
        assert_eq!((v, a), (0, 1));

        writer.start().unwrap();
        writer.write_sample_data(v, &[1, 2, 3], &info(0, BufferFlags::KEY_FRAME)).unwrap();
        writer.write_sample_data(a, &[9; 10], &info(0, BufferFlags::KEY_FRAME)).unwrap();
        writer.write_sample_data(v, &[4, 5], &info(40_000, BufferFlags::NONE)).unwrap();

        let summaries = writer.stop().unwrap();
        assert_eq!(summaries[0].sample_count, 2);
        assert_eq!(summaries[0].last_pts_us, 40_000);
        assert_eq!(summaries[1].sample_count, 1);

        let contents = read_container(&path).unwrap();
        assert_eq!(contents.tracks.len(), 2);
        let video_track = contents.track(TrackKind::Video).unwrap();
        assert_eq!(video_track.format.width, 640);
        assert_eq!(video_track.format.csd, vec![0, 0, 0, 1, 0x67]);
        assert_eq!(video_track.summary, summaries[0]);
        assert_eq!(contents.samples.len(), 3);
        assert_eq!(contents.samples[2].size, 2);
        assert!(contents.samples[0].flags.contains(BufferFlags::KEY_FRAME));
        assert_eq!(contents.samples_of(1).count(), 1);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn header_is_patched_on_stop() {
        let path = temp_file_path("header.mrec");
        let mut writer = MrecWriter::create(&path).unwrap();
        writer.add_track(&MediaFormat::audio(MIME_AUDIO_AAC, 44100, 2)).unwrap();
        writer.start().unwrap();
        writer.write_sample_data(0, &[0; 4], &info(0, BufferFlags::NONE)).unwrap();
        let trailer_at = writer.bytes_written();
        writer.stop().unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(&data[0..4], b"MREC");
        assert_eq!(u16::from_le_bytes([data[6], data[7]]), 1);
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&data[8..16]);
        assert_eq!(u64::from_le_bytes(offset), trailer_at);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn lifecycle_misuse_is_rejected() {
        let path = temp_file_path("misuse.mrec");
        let mut writer = MrecWriter::create(&path).unwrap();
        assert!(writer.start().is_err());
        assert!(writer.write_sample_data(0, &[1], &info(0, BufferFlags::NONE)).is_err());

        writer.add_track(&MediaFormat::audio(MIME_AUDIO_AAC, 44100, 1)).unwrap();
        writer.start().unwrap();
        assert!(writer.add_track(&MediaFormat::audio(MIME_AUDIO_AAC, 44100, 1)).is_err());
        assert!(writer.write_sample_data(3, &[1], &info(0, BufferFlags::NONE)).is_err());
        writer.stop().unwrap();
        assert!(writer.stop().is_err());

        fs::remove_file(&path).ok();
    }

    #[test]
    fn unfinished_file_is_not_readable() {
        let path = temp_file_path("unfinished.mrec");
        {
            let mut writer = MrecWriter::create(&path).unwrap();
            writer.add_track(&MediaFormat::audio(MIME_AUDIO_AAC, 44100, 1)).unwrap();
            writer.start().unwrap();
        }
        assert!(read_container(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn checksum_is_stable() {
        let path = temp_file_path("checksum.bin");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        fs::remove_file(&path).ok();
    }
}
