use std::io::Write;
use std::time::Duration;

use crate::encode::{delay_hundredths, StreamEncoder};
use crate::format::FormatError;
use crate::signal::Shutdown;
use crate::source::FrameSource;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("transport write failed: {0}")]
    Transport(#[from] std::io::Error),
    #[error("frame cannot be streamed: {0}")]
    Format(#[from] FormatError),
    #[error("session already closed")]
    Closed,
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Display duration of each frame, also the pause between frame blocks.
    pub delay: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Closed,
}

/// One viewer's stream: pulls the latest frame from the shared source, encodes
/// it and pushes it to the viewer's sink until the sink fails or the session
/// is asked to stop.
pub struct StreamSession {
    source: FrameSource,
    config: StreamConfig,
    shutdown: Shutdown,
    state: SessionState,
    frames_sent: u64,
}

impl StreamSession {
    pub fn new(source: FrameSource, config: StreamConfig) -> Self {
        Self::with_shutdown(source, config, Shutdown::new())
    }

    pub fn with_shutdown(source: FrameSource, config: StreamConfig, shutdown: Shutdown) -> Self {
        Self {
            source,
            config,
            shutdown,
            state: SessionState::Idle,
            frames_sent: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frame blocks fully delivered to the sink so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Handle that stops this session at its next fetch or sleep.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stream frames into `sink` until a write fails (returned as the error)
    /// or shutdown is triggered (`Ok`). Either way the session ends closed and
    /// performs no further I/O.
    pub fn run<W: Write>(&mut self, sink: W) -> Result<(), StreamError> {
        if self.state != SessionState::Idle {
            return Err(StreamError::Closed);
        }
        let result = self.stream(sink);
        self.state = SessionState::Closed;
        match &result {
            Ok(()) => log::info!("session stopped after {} frames", self.frames_sent),
            Err(e) => log::warn!("session ended after {} frames: {e}", self.frames_sent),
        }
        result
    }

    fn stream<W: Write>(&mut self, sink: W) -> Result<(), StreamError> {
        let Some(mut snapshot) = self.source.wait_snapshot(&self.shutdown) else {
            return Ok(());
        };
        let delay = delay_hundredths(self.config.delay);
        let mut encoder = StreamEncoder::new(sink);
        encoder.write_header(snapshot.frame.bounds());
        self.state = SessionState::Streaming;
        log::info!(
            "session streaming {}x{} at {}/100 s per frame",
            snapshot.frame.bounds().width,
            snapshot.frame.bounds().height,
            delay
        );

        loop {
            encoder.write_frame_block(&snapshot.frame, delay)?;
            encoder.flush()?;
            self.frames_sent += 1;

            if self.shutdown.sleep(self.config.delay) {
                return Ok(());
            }
            snapshot = match self.source.wait_snapshot(&self.shutdown) {
                Some(next) => next,
                None => return Ok(()),
            };
        }
    }
}

/// Run one session to completion against `sink` with the given frame delay.
pub fn run_session<W: Write>(source: &FrameSource, sink: W, delay: Duration) -> StreamError {
    let mut session = StreamSession::new(source.clone(), StreamConfig { delay });
    match session.run(sink) {
        Err(e) => e,
        // A session without a shutdown handle can only end through its sink.
        Ok(()) => StreamError::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Bounds, Color, Frame, Palette, SIGNATURE};
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Sink that only commits bytes once a flush succeeds, and fails the
    /// flush numbered `fail_on` (1-based).
    #[derive(Clone)]
    struct FlakySink {
        pending: Vec<u8>,
        committed: Arc<Mutex<Vec<u8>>>,
        flushes: usize,
        fail_on: usize,
    }

    impl FlakySink {
        fn new(fail_on: usize) -> Self {
            Self {
                pending: Vec::new(),
                committed: Arc::new(Mutex::new(Vec::new())),
                flushes: 0,
                fail_on,
            }
        }
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.pending.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            if self.flushes == self.fail_on {
                self.pending.clear();
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "viewer went away"));
            }
            self.committed.lock().unwrap().append(&mut self.pending);
            Ok(())
        }
    }

    fn example_source() -> FrameSource {
        let palette = Palette::new(vec![Color::BLACK, Color::WHITE, Color::rgb(255, 0, 0)]).unwrap();
        let frame = Frame::new(Bounds::sized(2, 2).unwrap(), palette, vec![0, 1, 1, 2]).unwrap();
        FrameSource::new(move || -> anyhow::Result<Frame> { Ok(frame.clone()) }, Duration::from_secs(60))
    }

    fn indexed_decoder(bytes: &[u8]) -> gif::Decoder<&[u8]> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        options.read_info(bytes).unwrap()
    }

    #[test]
    fn third_flush_failure_leaves_header_and_two_frames() {
        let source = example_source();
        let sink = FlakySink::new(3);
        let committed = Arc::clone(&sink.committed);

        let mut session = StreamSession::new(source.clone(), StreamConfig { delay: Duration::from_millis(10) });
        let err = session.run(sink).unwrap_err();
        assert!(matches!(err, StreamError::Transport(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.frames_sent(), 2);

        // Reference: header plus exactly two frame blocks.
        let mut reference = StreamEncoder::new(Vec::new());
        let frame = source.current_frame();
        reference.write_frame_block(&frame, 1).unwrap();
        reference.write_frame_block(&frame, 1).unwrap();
        reference.flush().unwrap();
        assert_eq!(*committed.lock().unwrap(), reference.into_inner());
        source.stop();
    }

    #[test]
    fn closed_session_refuses_to_run_again() {
        let source = example_source();
        let mut session = StreamSession::new(source.clone(), StreamConfig { delay: Duration::from_millis(1) });
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.run(FlakySink::new(1)).is_err());

        let sink = FlakySink::new(usize::MAX);
        let committed = Arc::clone(&sink.committed);
        assert!(matches!(session.run(sink), Err(StreamError::Closed)));
        assert!(committed.lock().unwrap().is_empty());
        source.stop();
    }

    #[test]
    fn growing_frames_end_the_session() {
        let mut size = 2u16;
        let source = FrameSource::new(
            move || -> anyhow::Result<Frame> {
                let palette = Palette::new(vec![Color::BLACK])?;
                let frame = Frame::filled(Bounds::sized(size, size)?, palette, 0)?;
                size += 1;
                Ok(frame)
            },
            Duration::from_millis(20),
        );
        let sink = FlakySink::new(usize::MAX);
        let committed = Arc::clone(&sink.committed);

        let mut session = StreamSession::new(source.clone(), StreamConfig { delay: Duration::from_millis(40) });
        let err = session.run(sink).unwrap_err();
        assert!(matches!(err, StreamError::Format(FormatError::OutsideScreen { .. })));
        assert_eq!(session.frames_sent(), 1);
        assert_eq!(&committed.lock().unwrap()[6..10], &[2, 0, 2, 0]);
        source.stop();
    }

    #[test]
    fn end_to_end_frame_decodes() {
        let source = example_source();
        let sink = FlakySink::new(2);
        let committed = Arc::clone(&sink.committed);
        let mut session = StreamSession::new(source.clone(), StreamConfig { delay: Duration::from_secs(1) });
        // First flush succeeds, second fails after the one-second sleep.
        assert!(session.run(sink).is_err());

        let bytes = committed.lock().unwrap().clone();
        assert!(bytes.starts_with(SIGNATURE));
        let mut decoder = indexed_decoder(&bytes);
        assert_eq!((decoder.width(), decoder.height()), (2, 2));
        let decoded = decoder.read_next_frame().unwrap().unwrap();
        assert_eq!(decoded.delay, 100);
        let palette = decoded.palette.clone().unwrap();
        let color_at = |x: usize, y: usize| {
            let i = decoded.buffer[y * 2 + x] as usize * 3;
            [palette[i], palette[i + 1], palette[i + 2]]
        };
        assert_eq!(color_at(0, 0), [0, 0, 0]);
        assert_eq!(color_at(1, 0), [255, 255, 255]);
        assert_eq!(color_at(0, 1), [255, 255, 255]);
        assert_eq!(color_at(1, 1), [255, 0, 0]);
        source.stop();
    }

    #[test]
    fn shutdown_stops_session_cleanly() {
        let source = example_source();
        let mut session = StreamSession::new(source.clone(), StreamConfig { delay: Duration::from_secs(30) });
        let stop = session.shutdown_handle();
        let sink = FlakySink::new(usize::MAX);
        let committed = Arc::clone(&sink.committed);

        let handle = thread::spawn(move || {
            let result = session.run(sink);
            (result.is_ok(), session.frames_sent(), session.state())
        });
        thread::sleep(Duration::from_millis(50));
        stop.trigger();
        let (ok, sent, state) = handle.join().unwrap();
        assert!(ok);
        assert_eq!(sent, 1);
        assert_eq!(state, SessionState::Closed);
        assert!(committed.lock().unwrap().starts_with(SIGNATURE));
        source.stop();
    }

    #[test]
    fn concurrent_sessions_each_get_one_header() {
        let mut n = 0u8;
        let source = FrameSource::new(
            move || -> anyhow::Result<Frame> {
                n = n.wrapping_add(1);
                let palette = Palette::new(vec![Color::BLACK, Color::WHITE])?;
                Ok(Frame::filled(Bounds::sized(8, 8)?, palette, n % 2)?)
            },
            Duration::from_millis(3),
        );

        let sessions: Vec<_> = (0..6)
            .map(|_| {
                let source = source.clone();
                thread::spawn(move || {
                    let sink = FlakySink::new(20);
                    let committed = Arc::clone(&sink.committed);
                    let err = run_session(&source, sink, Duration::from_millis(2));
                    assert!(matches!(err, StreamError::Transport(_)));
                    let bytes = committed.lock().unwrap().clone();
                    bytes
                })
            })
            .collect();

        for s in sessions {
            let bytes = s.join().unwrap();
            let headers = bytes.windows(SIGNATURE.len()).filter(|w| w == SIGNATURE).count();
            assert_eq!(headers, 1);
            let mut decoder = indexed_decoder(&bytes);
            for _ in 0..19 {
                let frame = decoder.read_next_frame().unwrap().unwrap();
                assert_eq!(frame.buffer.len(), 64);
            }
        }
        source.stop();
    }
}
