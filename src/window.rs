//! Extraction of the most recent frames of each channel from a raw sample buffer.
//!
//! Two index computations are supported, selected by the scan mode:
//!
//! * For finite scans, the buffer is written once from its start and never wraps. The first frame
//!   of the window is found by subtracting from the cursor and clamping at the buffer start.
//! * For continuous scans, the buffer is reused indefinitely. The most recent frame starts at
//!   `(total_transferred - channel_count) mod buffer_length`, and the window extends backwards from
//!   it modulo the buffer length.
//!
//! In both cases every position is reduced modulo the buffer length before it is read, and
//! nothing is returned until more than one sample has been transferred.

use crate::{Error, Result};
use crate::capture::{RawSampleBuffer, RingCursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Finite scans: the window start is clamped at the start of the buffer.
    StartRelative,
    /// Continuous scans: the window start wraps around the end of the buffer.
    Wrapping,
}

impl WindowMode {
    pub fn for_scan(continuous: bool) -> Self {
        if continuous { Self::Wrapping } else { Self::StartRelative }
    }
}

/// Progress of a scan as needed to locate its latest frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRequest {
    /// Buffer offset of the start of the most recently completed frame.
    pub cursor: usize,
    /// Total number of elements transferred since the scan started.
    pub total_transferred: u64,
    pub channel_count: usize,
    /// Frames per channel to return at most.
    pub depth: usize,
    pub mode: WindowMode,
}

/// Raw codes of the latest frames, one oldest-first sequence per channel slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawWindow {
    pub frames: usize,
    pub channels: Vec<Vec<u32>>,
}

impl RawWindow {
    fn empty(channel_count: usize) -> RawWindow {
        RawWindow { frames: 0, channels: vec![Vec::new(); channel_count] }
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Codes of every channel slot at frame `index`, in scan order.
    ///
    /// # Panics
    ///
    /// The iterator panics when it reaches a slot with no code at `index`, which happens for
    /// `index >= frames` or for hand-built windows whose slots differ in length.
    pub fn frame(&self, index: usize) -> impl Iterator<Item = u32> + '_ {
        self.channels.iter().map(move |codes| codes[index])
    }
}

/// Number of whole frames a window over `buffer_length` elements contains.
pub fn frame_count(request: &WindowRequest, buffer_length: usize) -> Result<usize> {
    if request.channel_count == 0 {
        return Err(Error::InvalidConfiguration("window requested for zero channels".to_owned()))
    }
    if request.total_transferred <= 1 {
        return Ok(0)
    }
    let available = request.total_transferred.min(buffer_length as u64) as usize;
    Ok(request.depth.min(available / request.channel_count))
}

/// Buffer positions of the window, per channel slot, oldest first. Every position is less than
/// `buffer_length`.
pub fn frame_positions(request: &WindowRequest, buffer_length: usize) -> Result<Vec<Vec<usize>>> {
    let frames = frame_count(request, buffer_length)?;
    if frames == 0 {
        return Ok(vec![Vec::new(); request.channel_count])
    }
    let span = (frames - 1) * request.channel_count;
    let first = match request.mode {
        WindowMode::StartRelative =>
            RingCursor::at(request.cursor.saturating_sub(span), buffer_length),
        WindowMode::Wrapping =>
            RingCursor::at(request.cursor, buffer_length) - span,
    };
    log::trace!("window of {} frames starting at {} ({:?})", frames, first.into_inner(), request.mode);
    Ok((0..request.channel_count)
        .map(|channel| (0..frames)
            .map(|frame| (first + (frame * request.channel_count + channel)).into_inner())
            .collect())
        .collect())
}

/// Reads the latest frames of every channel slot from `buffer`. Never mutates the scan progress.
pub fn extract(buffer: &RawSampleBuffer, request: &WindowRequest) -> Result<RawWindow> {
    let buffer_length = buffer.write_capacity();
    let positions = frame_positions(request, buffer_length)?;
    let frames = positions.first().map(Vec::len).unwrap_or(0);
    if frames == 0 {
        return Ok(RawWindow::empty(request.channel_count))
    }
    let mut channels = Vec::with_capacity(request.channel_count);
    for channel_positions in positions {
        let mut codes = Vec::with_capacity(frames);
        for position in channel_positions {
            codes.extend(buffer.read(position, 1)?);
        }
        channels.push(codes);
    }
    Ok(RawWindow { frames, channels })
}
