//! LD19 / LD06 LiDAR decoding.
//!
//! The sensor streams 47-byte frames over a UART at 230 400 baud.  Each frame
//! carries 12 range samples spread linearly between a start and an end angle
//! (hundredths of a degree, little-endian).  [`FrameAssembler`] resynchronises
//! on the `0x54 0x2C` header, [`parse_frame`] turns a frame into
//! `(angle°, range m)` points, and [`SectorBucketer`] keeps the latest range
//! per target sector.
//!
//! Target sectors are specified clockwise from the platform's front in
//! degrees; the emitted [`RangeScan`] uses counter-clockwise radians.

use std::io::{ErrorKind, Read};

use autonav_types::{NavError, RangeScan};
use tracing::trace;

use crate::driver::SampleSource;

pub const LD19_HEADER: [u8; 2] = [0x54, 0x2C];
pub const LD19_FRAME_LEN: usize = 47;
const POINTS_PER_FRAME: usize = 12;
/// Returns at or below this distance are treated as "no echo".
const MIN_VALID_RANGE_M: f32 = 0.01;

/// Default sector centres: 135° down to -135° in 10° steps.
pub fn ld19_default_targets_deg() -> Vec<f32> {
    (0..28).map(|i| 135.0 - 10.0 * i as f32).collect()
}

/// [`ld19_default_targets_deg`] converted to the scan convention.
pub fn ld19_default_sector_angles_rad() -> Vec<f32> {
    ld19_default_targets_deg()
        .into_iter()
        .map(|deg| -deg.to_radians())
        .collect()
}

fn read_u16(frame: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([frame[offset], frame[offset + 1]])
}

/// Decode one complete frame into `(physical angle°, range m)` points.
///
/// Returns `None` when `frame` is not a well-formed LD19 frame.  Ranges are
/// capped at `max_range_m`.
pub fn parse_frame(frame: &[u8], max_range_m: f32) -> Option<Vec<(f32, f32)>> {
    if frame.len() != LD19_FRAME_LEN || frame[..2] != LD19_HEADER {
        return None;
    }
    let start = f32::from(read_u16(frame, 4));
    let end = f32::from(read_u16(frame, 42));
    let span = (end - start + 36_000.0) % 36_000.0;
    let step = span / (POINTS_PER_FRAME - 1) as f32;

    let points = (0..POINTS_PER_FRAME)
        .map(|i| {
            let range_m = (f32::from(read_u16(frame, 6 + i * 3)) / 1000.0).min(max_range_m);
            let angle_deg = ((start + i as f32 * step) / 100.0) % 360.0;
            (angle_deg, range_m)
        })
        .collect();
    Some(points)
}

/// Byte-stream resynchroniser producing whole frames.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and return every complete frame now available.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut cursor = 0;
        while self.buf.len() - cursor >= LD19_FRAME_LEN {
            if self.buf[cursor..cursor + 2] == LD19_HEADER {
                frames.push(self.buf[cursor..cursor + LD19_FRAME_LEN].to_vec());
                cursor += LD19_FRAME_LEN;
            } else {
                cursor += 1;
            }
        }
        self.buf.drain(..cursor);
        frames
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Keeps the most recent range per target sector.
#[derive(Debug, Clone)]
pub struct SectorBucketer {
    /// Sector centres normalised to `[0, 360)`.
    targets_deg: Vec<f32>,
    angles_rad: Vec<f32>,
    resolution_deg: f32,
    offset_deg: f32,
    max_range_m: f32,
    latest: Vec<Option<f32>>,
}

impl SectorBucketer {
    /// `targets_deg` are sector centres clockwise from the front;
    /// `resolution_deg` is the ± acceptance window around each centre and
    /// `offset_deg` compensates the mounting orientation.
    pub fn new(targets_deg: &[f32], resolution_deg: f32, offset_deg: f32, max_range_m: f32) -> Self {
        Self {
            targets_deg: targets_deg.iter().map(|t| (t + 360.0) % 360.0).collect(),
            angles_rad: targets_deg.iter().map(|t| -t.to_radians()).collect(),
            resolution_deg,
            offset_deg,
            max_range_m,
            latest: vec![None; targets_deg.len()],
        }
    }

    /// 28 sectors, ±2.5°, -90° mount offset, 12 m max range.
    pub fn ld19_default() -> Self {
        Self::new(&ld19_default_targets_deg(), 2.5, -90.0, 12.0)
    }

    /// Nearest sector within the resolution window, if any.
    pub fn bucket_index(&self, physical_deg: f32) -> Option<usize> {
        let logical = (physical_deg + self.offset_deg).rem_euclid(360.0);
        let mut best: Option<(usize, f32)> = None;
        for (i, target) in self.targets_deg.iter().enumerate() {
            let mut diff = (logical - target).abs();
            if diff > 180.0 {
                diff = 360.0 - diff;
            }
            if diff <= self.resolution_deg && best.is_none_or(|(_, d)| diff < d) {
                best = Some((i, diff));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Fold decoded points into the sector table.  Returns how many sectors
    /// were updated.
    pub fn ingest(&mut self, points: &[(f32, f32)]) -> usize {
        let mut updated = 0;
        for &(angle_deg, range_m) in points {
            if range_m <= MIN_VALID_RANGE_M {
                continue;
            }
            if let Some(idx) = self.bucket_index(angle_deg) {
                self.latest[idx] = Some(range_m);
                updated += 1;
            }
        }
        updated
    }

    pub fn scan(&self) -> RangeScan {
        RangeScan::from_ranges(&self.angles_rad, &self.latest, self.max_range_m)
    }

    pub fn max_range_m(&self) -> f32 {
        self.max_range_m
    }
}

/// [`SampleSource`] decoding an LD19 byte stream (typically a UART device
/// node opened as a file).
pub struct Ld19Source<R> {
    id: String,
    reader: R,
    assembler: FrameAssembler,
    bucketer: SectorBucketer,
    chunk: Vec<u8>,
}

impl<R: Read + Send + 'static> Ld19Source<R> {
    pub fn new(id: impl Into<String>, reader: R, bucketer: SectorBucketer) -> Self {
        Self {
            id: id.into(),
            reader,
            assembler: FrameAssembler::new(),
            bucketer,
            chunk: vec![0u8; 512],
        }
    }
}

impl<R: Read + Send + 'static> SampleSource<RangeScan> for Ld19Source<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn poll(&mut self) -> Result<Option<RangeScan>, NavError> {
        let n = match self.reader.read(&mut self.chunk) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                return Ok(None);
            }
            Err(e) => {
                return Err(NavError::SensorUnavailable {
                    sensor: self.id.clone(),
                    details: e.to_string(),
                });
            }
        };
        if n == 0 {
            return Ok(None);
        }

        let mut updated = 0;
        for frame in self.assembler.push(&self.chunk[..n]) {
            if let Some(points) = parse_frame(&frame, self.bucketer.max_range_m()) {
                updated += self.bucketer.ingest(&points);
            }
        }
        trace!(sensor = %self.id, updated, "lidar chunk decoded");
        Ok((updated > 0).then(|| self.bucketer.scan()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Build a frame whose 12 points all read `range_mm`, sweeping from
    /// `start_cdeg` to `end_cdeg`.
    fn frame(start_cdeg: u16, end_cdeg: u16, range_mm: u16) -> Vec<u8> {
        let mut f = vec![0u8; LD19_FRAME_LEN];
        f[..2].copy_from_slice(&LD19_HEADER);
        f[4..6].copy_from_slice(&start_cdeg.to_le_bytes());
        for i in 0..POINTS_PER_FRAME {
            f[6 + i * 3..8 + i * 3].copy_from_slice(&range_mm.to_le_bytes());
        }
        f[42..44].copy_from_slice(&end_cdeg.to_le_bytes());
        f
    }

    #[test]
    fn default_targets_cover_front_arc() {
        let targets = ld19_default_targets_deg();
        assert_eq!(targets.len(), 28);
        assert_eq!(targets[0], 135.0);
        assert_eq!(targets[27], -135.0);
    }

    #[test]
    fn parse_frame_spreads_angles_and_caps_range() {
        let points = parse_frame(&frame(9000, 10100, 15_000), 12.0).unwrap();
        assert_eq!(points.len(), 12);
        assert!((points[0].0 - 90.0).abs() < 1e-3);
        assert!((points[11].0 - 101.0).abs() < 1e-3);
        assert!(points.iter().all(|&(_, r)| r == 12.0));
    }

    #[test]
    fn parse_frame_handles_wraparound_span() {
        let points = parse_frame(&frame(35_500, 600, 1000), 12.0).unwrap();
        assert!((points[0].0 - 355.0).abs() < 1e-3);
        assert!((points[11].0 - 6.0).abs() < 1e-3);
    }

    #[test]
    fn assembler_resyncs_after_garbage() {
        let mut asm = FrameAssembler::new();
        let mut bytes = vec![0xFF, 0x00, 0x54];
        bytes.extend(frame(0, 1100, 500));
        let frames = asm.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][..2], LD19_HEADER);
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn assembler_waits_for_partial_frame() {
        let mut asm = FrameAssembler::new();
        let f = frame(0, 1100, 500);
        assert!(asm.push(&f[..20]).is_empty());
        assert_eq!(asm.push(&f[20..]).len(), 1);
    }

    #[test]
    fn bucketer_applies_mount_offset() {
        let b = SectorBucketer::ld19_default();
        // physical 95° + (-90°) offset = logical 5°, the 14th target.
        assert_eq!(b.bucket_index(95.0), Some(13));
        // logical 10° lies between two sectors, outside both windows.
        assert_eq!(b.bucket_index(100.0), None);
    }

    #[test]
    fn bucketer_ignores_zero_returns() {
        let mut b = SectorBucketer::ld19_default();
        assert_eq!(b.ingest(&[(95.0, 0.0), (95.0, 0.005)]), 0);
        assert_eq!(b.ingest(&[(95.0, 1.5)]), 1);
        let scan = b.scan();
        assert_eq!(scan.readings[13].range_m, Some(1.5));
        assert!((scan.readings[13].angle_rad + 5f32.to_radians()).abs() < 1e-6);
        assert_eq!(scan.readings[0].range_m, None);
    }

    #[test]
    fn source_decodes_stream_into_scan() {
        // Sweep physical 93°..97°: all land in the logical 5° sector.
        let bytes = frame(9300, 9700, 2000);
        let mut src = Ld19Source::new("lidar", Cursor::new(bytes), SectorBucketer::ld19_default());
        let scan = src.poll().unwrap().expect("one frame decoded");
        assert_eq!(scan.readings[13].range_m, Some(2.0));
        assert!(src.poll().unwrap().is_none());
    }
}
