//! FFmpeg-backed clip writer.
//!
//! Encodes RGB24 frames into the container named by the clip path, with the
//! codec picked from the recorder's FourCC table (`mjpg` -> MJPEG, `divx`
//! and `mp4v` -> MPEG-4 part 2). One `FfmpegClipWriter` is reused across
//! clip rotations: `open` starts a fresh encode session, `close` flushes
//! and finalizes the container.

use std::path::Path;

use anyhow::Context as _;
use ffmpeg_next as ffmpeg;

use crate::error::EngineError;
use crate::frame::RawFrame;
use crate::record::{ClipWriter, FourCc};

pub struct FfmpegClipWriter {
    session: Option<EncodeSession>,
}

struct EncodeSession {
    octx: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    stream_time_base: ffmpeg::Rational,
    encoder_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    frame_index: i64,
}

impl FfmpegClipWriter {
    pub fn new() -> Self {
        Self { session: None }
    }
}

impl Default for FfmpegClipWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipWriter for FfmpegClipWriter {
    fn open(
        &mut self,
        path: &Path,
        fourcc: FourCc,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Result<(), EngineError> {
        if self.session.is_some() {
            return Err(EngineError::RecordingWrite(
                "a clip is already open".to_string(),
            ));
        }
        let session = EncodeSession::open(path, fourcc, fps, width, height)
            .map_err(|err| EngineError::RecordingWrite(format!("{}: {err:#}", path.display())))?;
        self.session = Some(session);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn write(&mut self, frame: &RawFrame) -> Result<(), EngineError> {
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::RecordingWrite("no clip is open".to_string()));
        };
        session
            .write(frame)
            .map_err(|err| EngineError::RecordingWrite(format!("{err:#}")))
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session
            .finish()
            .map_err(|err| EngineError::RecordingWrite(format!("{err:#}")))
    }
}

impl EncodeSession {
    fn open(
        path: &Path,
        fourcc: FourCc,
        fps: u32,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let fps = fps.max(1);

        let codec_id = codec_for_fourcc(fourcc);
        let codec =
            ffmpeg::encoder::find(codec_id).context("encoder for clip codec is unavailable")?;
        let pixel_format = if codec_id == ffmpeg::codec::Id::MJPEG {
            ffmpeg::util::format::pixel::Pixel::YUVJ420P
        } else {
            ffmpeg::util::format::pixel::Pixel::YUV420P
        };

        let mut octx =
            ffmpeg::format::output(&path).context("create output container")?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        let mut ost = octx.add_stream(codec).context("add video stream")?;
        let stream_index = ost.index();

        let encoder_time_base = ffmpeg::Rational(1, fps as i32);
        let mut video = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("configure video encoder")?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(pixel_format);
        video.set_time_base(encoder_time_base);
        video.set_frame_rate(Some(ffmpeg::Rational(fps as i32, 1)));
        if global_header {
            video.set_flags(ffmpeg::codec::flag::Flags::GLOBAL_HEADER);
        }

        let encoder = video.open_as(codec).context("open video encoder")?;
        ost.set_parameters(&encoder);

        octx.write_header().context("write container header")?;
        let stream_time_base = octx
            .stream(stream_index)
            .context("query stream time base")?
            .time_base();

        let scaler = ffmpeg::software::scaling::context::Context::get(
            ffmpeg::util::format::pixel::Pixel::RGB24,
            width,
            height,
            pixel_format,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create encode scaler")?;

        Ok(Self {
            octx,
            encoder,
            scaler,
            stream_index,
            stream_time_base,
            encoder_time_base,
            width,
            height,
            frame_index: 0,
        })
    }

    fn write(&mut self, frame: &RawFrame) -> anyhow::Result<()> {
        anyhow::ensure!(
            frame.width == self.width && frame.height == self.height,
            "frame is {}x{}, clip is {}x{}",
            frame.width,
            frame.height,
            self.width,
            self.height
        );

        let mut rgb =
            ffmpeg::frame::Video::new(ffmpeg::util::format::pixel::Pixel::RGB24, self.width, self.height);
        copy_rgb_rows(frame, &mut rgb)?;

        let mut encoded = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut encoded)
            .context("scale frame for encoding")?;
        encoded.set_pts(Some(self.frame_index));
        self.frame_index += 1;

        self.encoder
            .send_frame(&encoded)
            .context("send frame to encoder")?;
        self.drain_packets()
    }

    fn finish(mut self) -> anyhow::Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain_packets()?;
        self.octx.write_trailer().context("write container trailer")?;
        Ok(())
    }

    fn drain_packets(&mut self) -> anyhow::Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .context("write packet")?;
        }
        Ok(())
    }
}

fn codec_for_fourcc(fourcc: FourCc) -> ffmpeg::codec::Id {
    match &fourcc {
        b"mjpg" => ffmpeg::codec::Id::MJPEG,
        b"divx" | b"mp4v" => ffmpeg::codec::Id::MPEG4,
        _ => ffmpeg::codec::Id::MPEG4,
    }
}

fn copy_rgb_rows(frame: &RawFrame, dst: &mut ffmpeg::frame::Video) -> anyhow::Result<()> {
    let row_bytes = (frame.width as usize) * 3;
    let stride = dst.stride(0);
    let data = dst.data_mut(0);
    for row in 0..frame.height as usize {
        let src = frame
            .data
            .get(row * row_bytes..(row + 1) * row_bytes)
            .context("source frame row is out of bounds")?;
        let dst_start = row * stride;
        data.get_mut(dst_start..dst_start + row_bytes)
            .context("encode frame row is out of bounds")?
            .copy_from_slice(src);
    }
    Ok(())
}
