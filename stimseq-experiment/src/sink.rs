//! Trigger outputs.
//!
//! A [`TriggerSink`] turns one trigger code into whatever the recording
//! system listens for. Level outputs (a parallel port wired to the amplifier)
//! are asserted, held, and released; stream outputs (a marker stream) get a
//! single push. Which one a session uses is fixed when the sink is built.

use std::net::{ToSocketAddrs, UdpSocket};
use std::time::Duration;

use stimseq_core::TriggerCode;
use stimseq_timing::Timer;
use tracing::{debug, trace};

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Level,
    Stream,
}

pub trait TriggerSink {
    fn mode(&self) -> SinkMode;

    /// Delivers one trigger. Level sinks return once the line is released.
    fn pulse<T: Timer>(&mut self, code: TriggerCode, hold: Duration, timer: &T)
        -> Result<(), SinkError>;
}

impl<S: TriggerSink + ?Sized> TriggerSink for &mut S {
    fn mode(&self) -> SinkMode {
        (**self).mode()
    }

    fn pulse<T: Timer>(
        &mut self,
        code: TriggerCode,
        hold: Duration,
        timer: &T,
    ) -> Result<(), SinkError> {
        (**self).pulse(code, hold, timer)
    }
}

/// An 8-bit digital output.
pub trait DigitalPort {
    fn write(&mut self, value: u8) -> Result<(), SinkError>;
}

/// Outbound-only marker stream. No acknowledgement, no backpressure.
pub trait MarkerOutlet {
    fn push(&mut self, code: TriggerCode) -> Result<(), SinkError>;
}

/// Assert, hold for the trigger duration, release to 0.
#[derive(Debug)]
pub struct LevelSink<P> {
    port: P,
}

impl<P: DigitalPort> LevelSink<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn into_inner(self) -> P {
        self.port
    }
}

impl<P: DigitalPort> TriggerSink for LevelSink<P> {
    fn mode(&self) -> SinkMode {
        SinkMode::Level
    }

    fn pulse<T: Timer>(
        &mut self,
        code: TriggerCode,
        hold: Duration,
        timer: &T,
    ) -> Result<(), SinkError> {
        let value = u8::try_from(code).map_err(|_| SinkError::CodeOutOfRange(code))?;
        self.port.write(value)?;
        timer.spin_for(hold);
        self.port.write(0)
    }
}

/// One push per trigger; the stream is event based so nothing is released.
#[derive(Debug)]
pub struct StreamSink<O> {
    outlet: O,
}

impl<O: MarkerOutlet> StreamSink<O> {
    pub fn new(outlet: O) -> Self {
        Self { outlet }
    }

    pub fn outlet(&self) -> &O {
        &self.outlet
    }

    pub fn into_inner(self) -> O {
        self.outlet
    }
}

impl<O: MarkerOutlet> TriggerSink for StreamSink<O> {
    fn mode(&self) -> SinkMode {
        SinkMode::Stream
    }

    fn pulse<T: Timer>(
        &mut self,
        code: TriggerCode,
        _hold: Duration,
        _timer: &T,
    ) -> Result<(), SinkError> {
        self.outlet.push(code)
    }
}

/// Port (or marker stream) that goes nowhere, for rehearsals without hardware.
#[derive(Debug, Default)]
pub struct NullPort {
    writes: u64,
}

impl NullPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl DigitalPort for NullPort {
    fn write(&mut self, value: u8) -> Result<(), SinkError> {
        self.writes += 1;
        trace!(value, "null port write");
        Ok(())
    }
}

impl MarkerOutlet for NullPort {
    fn push(&mut self, code: TriggerCode) -> Result<(), SinkError> {
        self.writes += 1;
        trace!(code, "null marker push");
        Ok(())
    }
}

/// Sends each marker as a little-endian `i32` datagram.
#[derive(Debug)]
pub struct UdpMarkerOutlet {
    socket: UdpSocket,
}

impl UdpMarkerOutlet {
    pub fn connect(target: impl ToSocketAddrs) -> Result<Self, SinkError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(target)?;
        debug!(peer = ?socket.peer_addr().ok(), "marker outlet connected");
        Ok(Self { socket })
    }
}

impl MarkerOutlet for UdpMarkerOutlet {
    fn push(&mut self, code: TriggerCode) -> Result<(), SinkError> {
        self.socket.send(&code.to_le_bytes())?;
        Ok(())
    }
}

pub use parport::ParallelPort;

#[cfg(target_os = "linux")]
mod parport {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::AsRawFd;
    use std::path::Path;

    use tracing::{info, warn};

    use super::DigitalPort;
    use crate::error::SinkError;

    // linux/ppdev.h
    const PPCLAIM: u64 = 0x708b;
    const PPRELEASE: u64 = 0x708c;
    const PPWDATA: u64 = 0x4001_7086;

    /// Parallel port data lines through the ppdev driver (`/dev/parportN`).
    #[derive(Debug)]
    pub struct ParallelPort {
        file: File,
    }

    impl ParallelPort {
        pub fn open(path: &Path) -> Result<Self, SinkError> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            ioctl(&file, PPCLAIM, std::ptr::null_mut())?;
            info!(path = %path.display(), "claimed parallel port");
            Ok(Self { file })
        }
    }

    fn ioctl(file: &File, request: u64, arg: *mut libc::c_void) -> io::Result<()> {
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), request as _, arg) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    impl DigitalPort for ParallelPort {
        fn write(&mut self, value: u8) -> Result<(), SinkError> {
            let mut data = value;
            ioctl(&self.file, PPWDATA, (&mut data as *mut u8).cast())?;
            Ok(())
        }
    }

    impl Drop for ParallelPort {
        fn drop(&mut self) {
            let mut zero = 0u8;
            let released = ioctl(&self.file, PPWDATA, (&mut zero as *mut u8).cast())
                .and_then(|_| ioctl(&self.file, PPRELEASE, std::ptr::null_mut()));
            if let Err(e) = released {
                warn!(error = %e, "failed to release parallel port");
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod parport {
    use std::path::Path;

    use super::DigitalPort;
    use crate::error::SinkError;

    #[derive(Debug)]
    pub struct ParallelPort {
        _private: (),
    }

    impl ParallelPort {
        pub fn open(_path: &Path) -> Result<Self, SinkError> {
            Err(SinkError::Unsupported("parallel port output"))
        }
    }

    impl DigitalPort for ParallelPort {
        fn write(&mut self, _value: u8) -> Result<(), SinkError> {
            Err(SinkError::Unsupported("parallel port output"))
        }
    }
}
