//! Process-wide camera handle shared by stream requests.
//!
//! The hub owns the single device handle. A stream must hold the hub's
//! exclusive [`CameraLease`] to read from it; a second stream is refused
//! while the lease is out.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};

use tracing::{info, warn};
use video_ingest::{CaptureError, Frame, FrameSource, SourceOpener};

pub(crate) struct CameraHub {
    opener: Box<dyn SourceOpener>,
    device_index: i32,
    handle: Mutex<Option<Box<dyn FrameSource>>>,
    leased: AtomicBool,
}

impl CameraHub {
    pub(crate) fn new(opener: Box<dyn SourceOpener>, device_index: i32) -> Self {
        Self {
            opener,
            device_index,
            handle: Mutex::new(None),
            leased: AtomicBool::new(false),
        }
    }

    /// Open the device unless a handle is already held.
    pub(crate) fn open(&self) -> Result<(), CaptureError> {
        let mut handle = self.lock_handle();
        if handle.is_none() {
            *handle = Some(self.opener.open(self.device_index)?);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.lock_handle().is_some()
    }

    /// Close the device handle, if open.
    pub(crate) fn release(&self) {
        if self.lock_handle().take().is_some() {
            info!("Camera #{} handle closed", self.device_index);
        }
    }

    /// Take the exclusive read lease, or `None` if another stream holds it.
    pub(crate) fn try_lease(self: &Arc<Self>) -> Option<CameraLease> {
        self.leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CameraLease { hub: self.clone() })
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<Box<dyn FrameSource>>> {
        match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Camera handle lock poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }
}

/// Exclusive right to read from the hub's camera; returned on drop.
pub(crate) struct CameraLease {
    hub: Arc<CameraHub>,
}

impl CameraLease {
    pub(crate) fn device_index(&self) -> i32 {
        self.hub.device_index
    }

    pub(crate) fn ensure_open(&self) -> Result<(), CaptureError> {
        self.hub.open()
    }

    pub(crate) fn read_frame(&self) -> Result<Frame, CaptureError> {
        let mut handle = self.hub.lock_handle();
        match handle.as_mut() {
            Some(source) => source.read_frame(),
            None => Err(CaptureError::Read {
                device: self.hub.device_index,
                reason: "camera is not open".into(),
            }),
        }
    }

    /// Close the current handle and open the same device index again.
    pub(crate) fn reopen(&self) -> Result<(), CaptureError> {
        let mut handle = self.hub.lock_handle();
        handle.take();
        *handle = Some(self.hub.opener.open(self.hub.device_index)?);
        Ok(())
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.hub.leased.store(false, Ordering::Release);
    }
}

/// Closes the hub's handle when dropped, on every exit path of its scope.
pub(crate) struct ReleaseOnDrop(pub(crate) Arc<CameraHub>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted camera doubles shared by pipeline and server tests.

    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use video_ingest::{CaptureError, Frame, FrameSource, SourceOpener};

    /// Outcome of one `read_frame` call.
    #[derive(Clone, Copy, Debug)]
    pub(crate) enum Read {
        Frame,
        Fail,
    }

    /// Outcome of one `open` call.
    #[derive(Clone, Copy, Debug)]
    pub(crate) enum Open {
        Ok,
        Fail,
    }

    /// Opener replaying scripted open results; each opened handle replays
    /// the shared read script. Exhausted scripts open fine and read frames.
    #[derive(Clone)]
    pub(crate) struct ScriptedOpener {
        pub(crate) opens: Arc<Mutex<VecDeque<Open>>>,
        pub(crate) reads: Arc<Mutex<VecDeque<Read>>>,
        pub(crate) open_calls: Arc<AtomicUsize>,
        pub(crate) live_handles: Arc<AtomicUsize>,
        pub(crate) size: (i32, i32),
    }

    impl ScriptedOpener {
        pub(crate) fn new(opens: &[Open], reads: &[Read]) -> Self {
            Self {
                opens: Arc::new(Mutex::new(opens.iter().copied().collect())),
                reads: Arc::new(Mutex::new(reads.iter().copied().collect())),
                open_calls: Arc::new(AtomicUsize::new(0)),
                live_handles: Arc::new(AtomicUsize::new(0)),
                size: (32, 24),
            }
        }

        pub(crate) fn open_calls(&self) -> usize {
            self.open_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn live_handles(&self) -> usize {
            self.live_handles.load(Ordering::SeqCst)
        }
    }

    impl SourceOpener for ScriptedOpener {
        fn open(&self, device_index: i32) -> Result<Box<dyn FrameSource>, CaptureError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.opens.lock().unwrap().pop_front().unwrap_or(Open::Ok);
            match outcome {
                Open::Fail => Err(CaptureError::Open {
                    device: device_index,
                }),
                Open::Ok => {
                    self.live_handles.fetch_add(1, Ordering::SeqCst);
                    Ok(Box::new(ScriptedCamera {
                        device_index,
                        script: self.clone(),
                    }))
                }
            }
        }
    }

    struct ScriptedCamera {
        device_index: i32,
        script: ScriptedOpener,
    }

    impl FrameSource for ScriptedCamera {
        fn device_index(&self) -> i32 {
            self.device_index
        }

        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            let outcome = self
                .script
                .reads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Read::Frame);
            match outcome {
                Read::Frame => Frame::black(self.script.size.0, self.script.size.1),
                Read::Fail => Err(CaptureError::Read {
                    device: self.device_index,
                    reason: "scripted failure".into(),
                }),
            }
        }
    }

    impl Drop for ScriptedCamera {
        fn drop(&mut self) {
            self.script.live_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Open, Read, ScriptedOpener};
    use super::*;

    #[test]
    fn only_one_lease_at_a_time() {
        let hub = Arc::new(CameraHub::new(Box::new(ScriptedOpener::new(&[], &[])), 0));
        let first = hub.try_lease().expect("first lease");
        assert!(hub.try_lease().is_none(), "concurrent streams must not share the handle");
        drop(first);
        assert!(hub.try_lease().is_some());
    }

    #[test]
    fn open_is_idempotent_and_release_closes_the_handle() {
        let opener = ScriptedOpener::new(&[], &[]);
        let hub = CameraHub::new(Box::new(opener.clone()), 2);
        hub.open().unwrap();
        hub.open().unwrap();
        assert_eq!(opener.open_calls(), 1);
        assert!(hub.is_open());
        hub.release();
        assert!(!hub.is_open());
        assert_eq!(opener.live_handles(), 0);
    }

    #[test]
    fn reopen_replaces_the_handle_and_failed_reopen_leaves_it_closed() {
        let opener = ScriptedOpener::new(&[Open::Ok, Open::Ok, Open::Fail], &[Read::Fail]);
        let hub = Arc::new(CameraHub::new(Box::new(opener.clone()), 0));
        let lease = hub.try_lease().unwrap();
        lease.ensure_open().unwrap();
        assert!(lease.read_frame().is_err());
        lease.reopen().unwrap();
        assert_eq!(opener.live_handles(), 1);
        assert!(lease.read_frame().is_ok());
        assert!(lease.reopen().is_err());
        assert!(!hub.is_open());
        assert_eq!(opener.live_handles(), 0);
    }

    #[test]
    fn release_guard_closes_on_scope_exit() {
        let opener = ScriptedOpener::new(&[], &[]);
        let hub = Arc::new(CameraHub::new(Box::new(opener.clone()), 0));
        hub.open().unwrap();
        {
            let _guard = ReleaseOnDrop(hub.clone());
        }
        assert!(!hub.is_open());
        assert_eq!(opener.live_handles(), 0);
    }

    #[test]
    fn reading_a_closed_camera_is_a_read_error() {
        let hub = Arc::new(CameraHub::new(Box::new(ScriptedOpener::new(&[], &[])), 4));
        let lease = hub.try_lease().unwrap();
        assert_eq!(lease.device_index(), 4);
        assert!(matches!(
            lease.read_frame(),
            Err(CaptureError::Read { device: 4, .. })
        ));
    }
}
