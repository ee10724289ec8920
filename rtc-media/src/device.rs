//! Capture device plumbing.

use crate::frame::AudioFrame;
use crate::silence::SilenceTimeline;
use bytes::Bytes;
use log::{debug, warn};
use shared::error::Result;

/// Lifecycle shared by capture devices. `read` returns `Ok(None)` when no
/// frame is ready.
pub trait CaptureDevice {
    type Frame;

    fn connect(&mut self) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn read(&mut self) -> Result<Option<Self::Frame>>;

    fn stop(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;
}

/// An encoded video frame from a capture device.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub timestamp: u32,
    pub data: Bytes,
    pub keyframe: bool,
}

pub trait AudioDevice: CaptureDevice<Frame = AudioFrame> {}

impl<T: CaptureDevice<Frame = AudioFrame>> AudioDevice for T {}

pub trait VideoDevice: CaptureDevice<Frame = VideoFrame> {}

impl<T: CaptureDevice<Frame = VideoFrame>> VideoDevice for T {}

/// A connected and started device. Stops and disconnects it on close or
/// drop.
pub struct DeviceSession<D: CaptureDevice> {
    device: D,
    running: bool,
}

impl<D: CaptureDevice> DeviceSession<D> {
    pub fn open(mut device: D) -> Result<Self> {
        device.connect()?;
        if let Err(err) = device.start() {
            if let Err(e) = device.disconnect() {
                warn!("disconnecting device after failed start: {e}");
            }
            return Err(err);
        }
        Ok(Self {
            device,
            running: true,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn read(&mut self) -> Result<Option<D::Frame>> {
        if !self.running {
            return Ok(None);
        }
        self.device.read()
    }

    pub fn get_ref(&self) -> &D {
        &self.device
    }

    /// Stops and disconnects the device once. Disconnect is attempted even
    /// when stop fails; the first error is returned.
    pub fn close(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        let stopped = self.device.stop();
        let disconnected = self.device.disconnect();
        debug!("capture device closed");
        stopped.and(disconnected)
    }
}

impl<D: CaptureDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("closing capture device: {err}");
        }
    }
}

/// Reads an audio device and runs its frames through a [`SilenceTimeline`].
pub struct DevicePump<D: AudioDevice> {
    session: DeviceSession<D>,
    timeline: SilenceTimeline,
}

impl<D: AudioDevice> DevicePump<D> {
    /// Connects and starts `device`.
    pub fn new(device: D, timeline: SilenceTimeline) -> Result<Self> {
        Ok(Self {
            session: DeviceSession::open(device)?,
            timeline,
        })
    }

    /// Moves every frame the device has ready into the timeline. Returns the
    /// number of frames read.
    pub fn pump(&mut self) -> Result<usize> {
        let mut n = 0;
        while let Some(frame) = self.session.read()? {
            self.timeline.push(frame);
            n += 1;
        }
        Ok(n)
    }

    /// Next output frame, silence included.
    pub fn poll(&mut self) -> Option<AudioFrame> {
        self.timeline.poll()
    }

    pub fn device(&self) -> &D {
        self.session.get_ref()
    }

    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}
