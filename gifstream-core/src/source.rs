use std::sync::{Arc, Condvar, Mutex, Once, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use crate::format::Frame;
use crate::signal::Shutdown;

/// How long a cancellable waiter sleeps between checks of its stop flag.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Generates frames for a [`FrameSource`]. Called once at start and then once
/// per refresh interval, always from one thread at a time.
pub trait FrameProducer: Send + 'static {
    fn produce(&mut self) -> anyhow::Result<Frame>;
}

impl<F> FrameProducer for F
where
    F: FnMut() -> anyhow::Result<Frame> + Send + 'static,
{
    fn produce(&mut self) -> anyhow::Result<Frame> {
        self()
    }
}

/// A published frame together with its publish sequence number.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Starts at 1 for the first frame and grows by one per publish.
    pub generation: u64,
    pub frame: Arc<Frame>,
}

struct Slot {
    generation: u64,
    frame: Option<Arc<Frame>>,
}

struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
    started: Once,
    producer: Mutex<Box<dyn FrameProducer>>,
    refresh_interval: Duration,
    shutdown: Shutdown,
}

impl Shared {
    fn refresh(&self) {
        let produced = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .produce();
        match produced {
            Ok(frame) => self.publish(frame),
            Err(e) => log::warn!("frame producer failed, keeping previous frame: {e:#}"),
        }
    }

    /// Swap the new frame into the slot and wake every waiter. Readers holding
    /// the previous frame keep it alive until they drop it.
    fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let generation = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.generation += 1;
            slot.frame = Some(frame);
            slot.generation
        };
        self.ready.notify_all();
        log::debug!("published frame generation {generation}");
    }

    /// Refresh until `shutdown` fires or every [`FrameSource`] handle is gone.
    /// The loop only holds the shared state for the length of one refresh.
    fn refresh_loop(weak: Weak<Shared>, interval: Duration, shutdown: Shutdown) {
        while !shutdown.sleep(interval) {
            let Some(shared) = weak.upgrade() else {
                log::debug!("frame source dropped, ending refresh loop");
                return;
            };
            shared.refresh();
        }
        log::debug!("frame refresh loop stopped");
    }

    fn snapshot(slot: &Slot) -> Option<Snapshot> {
        slot.frame.as_ref().map(|frame| Snapshot {
            generation: slot.generation,
            frame: Arc::clone(frame),
        })
    }
}

/// Shared, periodically refreshed holder of the latest frame. Cloning gives
/// another handle to the same source.
#[derive(Clone)]
pub struct FrameSource {
    shared: Arc<Shared>,
}

impl FrameSource {
    pub fn new(producer: impl FrameProducer, refresh_interval: Duration) -> Self {
        Self::with_shutdown(producer, refresh_interval, Shutdown::new())
    }

    /// Like [`new`](FrameSource::new), but the refresh loop ends when
    /// `shutdown` is triggered.
    pub fn with_shutdown(producer: impl FrameProducer, refresh_interval: Duration, shutdown: Shutdown) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    generation: 0,
                    frame: None,
                }),
                ready: Condvar::new(),
                started: Once::new(),
                producer: Mutex::new(Box::new(producer)),
                refresh_interval,
                shutdown,
            }),
        }
    }

    /// Produce and publish the first frame, then launch the refresh thread.
    /// Runs once per source; concurrent callers wait for the first caller.
    pub fn start(&self) {
        self.shared.started.call_once(|| {
            log::info!(
                "starting frame source, refresh every {:?}",
                self.shared.refresh_interval
            );
            self.shared.refresh();

            let weak = Arc::downgrade(&self.shared);
            let interval = self.shared.refresh_interval;
            let shutdown = self.shared.shutdown.clone();
            let spawned = thread::Builder::new()
                .name("frame-refresh".into())
                .spawn(move || Shared::refresh_loop(weak, interval, shutdown));
            if let Err(e) = spawned {
                log::error!("failed to spawn frame refresh thread: {e}");
            }
        });
    }

    /// Stop the refresh loop. Already published frames stay readable.
    pub fn stop(&self) {
        self.shared.shutdown.trigger();
    }

    /// The latest frame, blocking until the first one exists.
    pub fn current_frame(&self) -> Arc<Frame> {
        self.current_snapshot().frame
    }

    /// The latest frame and its generation, blocking until the first one
    /// exists.
    pub fn current_snapshot(&self) -> Snapshot {
        self.start();
        let mut slot = self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(snapshot) = Shared::snapshot(&slot) {
                return snapshot;
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Cancellable [`current_snapshot`](FrameSource::current_snapshot).
    /// Returns `None` if `shutdown` is triggered before a frame exists.
    pub fn wait_snapshot(&self, shutdown: &Shutdown) -> Option<Snapshot> {
        self.start();
        let mut slot = self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(snapshot) = Shared::snapshot(&slot) {
                return Some(snapshot);
            }
            if shutdown.is_triggered() {
                return None;
            }
            slot = self
                .shared
                .ready
                .wait_timeout(slot, WAIT_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// The latest frame if one has been published. Never starts the source.
    pub fn try_snapshot(&self) -> Option<Snapshot> {
        let slot = self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Shared::snapshot(&slot)
    }
}
