//! FFmpeg-backed file decoding.
//!
//! Decodes the best video stream of a local file or URI to RGB24 and adds
//! the two things the synthetic backend gets for free: an exact frame-count
//! probe and frame-indexed seeking. Seeks land on the nearest preceding
//! keyframe and decode forward, discarding frames until the requested index,
//! so the next `read_raw` after `seek(n)` yields frame n.

use anyhow::Context as _;
use ffmpeg_next as ffmpeg;

use crate::error::EngineError;
use crate::frame::RawFrame;

pub(crate) struct FfmpegClip {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    time_base: ffmpeg::Rational,
    fps: f64,
    frames: u64,
    /// Index of the next frame `read_raw` will yield.
    next_index: u64,
    /// Frame decoded during a seek roll-forward, owed to the next read.
    pending: Option<(RawFrame, Option<i64>)>,
}

impl FfmpegClip {
    pub(crate) fn open(location: &str, fallback_fps: f64) -> Result<Self, EngineError> {
        Self::open_inner(location, fallback_fps)
            .map_err(|err| EngineError::DeviceOpen(format!("{location}: {err:#}")))
    }

    fn open_inner(location: &str, fallback_fps: f64) -> anyhow::Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&location)
            .with_context(|| format!("open input '{location}'"))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("input has no video track")?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() > 0 && rate.numerator() > 0 {
            f64::from(rate)
        } else {
            fallback_fps
        };

        let frames = if stream.frames() > 0 {
            stream.frames() as u64
        } else {
            // Container does not carry a frame count; estimate from the
            // duration.
            let duration_s = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
            (duration_s * fps).round().max(0.0) as u64
        };

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context.decoder().video().context("open video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            time_base,
            fps,
            frames,
            next_index: 0,
            pending: None,
        })
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frames
    }

    pub(crate) fn native_fps(&self) -> f64 {
        self.fps
    }

    pub(crate) fn position(&self) -> u64 {
        self.next_index
    }

    pub(crate) fn read_raw(&mut self) -> Result<Option<RawFrame>, EngineError> {
        if let Some((frame, pts)) = self.pending.take() {
            self.advance_position(pts);
            return Ok(Some(frame));
        }
        match self.next_decoded() {
            Ok(Some((frame, pts))) => {
                self.advance_position(pts);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(EngineError::StreamRead(format!("{err:#}"))),
        }
    }

    fn advance_position(&mut self, pts: Option<i64>) {
        match self.index_from_pts(pts) {
            Some(index) => self.next_index = index + 1,
            None => self.next_index += 1,
        }
    }

    pub(crate) fn seek(&mut self, frame_index: u64) -> bool {
        let target = frame_index.min(self.frames);
        let ts = (target as f64 / self.fps.max(1.0) * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        if let Err(err) = self.input.seek(ts, ..ts) {
            log::error!("FileSource: seek to frame {target} failed: {err}");
            return false;
        }
        self.decoder.flush();
        self.pending = None;
        self.next_index = target;

        // Landed on the preceding keyframe: roll forward to the exact index,
        // keeping the first frame at or past it for the next read.
        loop {
            match self.next_decoded() {
                Ok(Some((frame, pts))) => {
                    let index = self.index_from_pts(pts).unwrap_or(target);
                    if index >= target {
                        self.pending = Some((frame, pts));
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::error!("FileSource: decode while seeking failed: {err:#}");
                    return false;
                }
            }
        }
        true
    }

    fn index_from_pts(&self, pts: Option<i64>) -> Option<u64> {
        let pts = pts?;
        if pts < 0 {
            return None;
        }
        let seconds = pts as f64 * f64::from(self.time_base.numerator())
            / f64::from(self.time_base.denominator().max(1));
        Some((seconds * self.fps).round() as u64)
    }

    /// Decode the next frame of the video stream, returning it with its pts.
    fn next_decoded(&mut self) -> anyhow::Result<Option<(RawFrame, Option<i64>)>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb = ffmpeg::frame::Video::empty();

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.scaler
                    .run(&decoded, &mut rgb)
                    .context("scale frame to RGB")?;
                let pts = decoded.pts();
                let frame = frame_to_pixels(&rgb)?;
                return Ok(Some((frame, pts)));
            }
        }
        Ok(None)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> anyhow::Result<RawFrame> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok(RawFrame::new(data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok(RawFrame::new(pixels, width, height))
}
