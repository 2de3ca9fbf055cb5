use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::device::MidiBackend;
use crate::directory::{ConnectionSnapshot, EndpointDirectory};
use crate::error::{describe, InstallError};

/// Owns the single topology notification of a bridge.
pub struct HotplugWatcher<B: MidiBackend> {
    backend: Arc<B>,
    directory: EndpointDirectory<B>,
    watch: Mutex<Option<B::Watch>>,
}

impl<B: MidiBackend> HotplugWatcher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            directory: EndpointDirectory::new(Arc::clone(&backend)),
            backend,
            watch: Mutex::new(None),
        }
    }

    /// Install the notification. Every topology change re-enumerates the devices
    /// and calls `on_change` once with the fresh snapshot.
    ///
    /// Calling this again while installed succeeds without registering `on_change`.
    pub fn install<F>(&self, on_change: F) -> Result<(), InstallError>
    where
        F: Fn(ConnectionSnapshot) + Send + Sync + 'static,
    {
        let mut watch = self.watch.lock();
        if watch.is_some() {
            debug!("MIDI hotplug notification already installed");
            return Ok(());
        }

        let directory = self.directory.clone();
        let installed = self
            .backend
            .watch_topology(Box::new(move || {
                let snapshot = directory.snapshot();
                debug!(devices = snapshot.names.len(), "MIDI topology changed");
                on_change(snapshot);
            }))
            .map_err(|err| InstallError {
                reason: describe(&err),
            })?;
        *watch = Some(installed);
        info!("installed MIDI hotplug notification");
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.watch.lock().is_some()
    }

    /// Remove the notification, if installed.
    pub fn uninstall(&self) {
        if self.watch.lock().take().is_some() {
            info!("removed MIDI hotplug notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_backend::VirtualBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn second_install_does_not_double_register() {
        let backend = Arc::new(VirtualBackend::new());
        let watcher = HotplugWatcher::new(Arc::clone(&backend));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            watcher
                .install(move |_snapshot| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert_eq!(backend.watcher_count(), 1);

        backend.notify_topology_change();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_reflects_new_topology() {
        let backend = Arc::new(VirtualBackend::new());
        backend.add_device("A");
        let watcher = HotplugWatcher::new(Arc::clone(&backend));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        watcher
            .install(move |snapshot| sink.lock().push(snapshot.names))
            .unwrap();

        backend.add_device("B");
        backend.unplug(0);
        assert_eq!(
            *seen.lock(),
            vec![
                vec!["A".to_string(), "B".to_string()],
                vec!["B".to_string()]
            ]
        );
    }

    #[test]
    fn install_failure_is_reported_and_not_retried() {
        let backend = Arc::new(VirtualBackend::new());
        backend.fail_watch(true);
        let watcher = HotplugWatcher::new(Arc::clone(&backend));
        let err = watcher.install(|_| {}).unwrap_err();
        assert!(err.reason.contains("unavailable"));
        assert!(!watcher.is_installed());
        assert_eq!(backend.watcher_count(), 0);
    }

    #[test]
    fn uninstall_allows_reinstall() {
        let backend = Arc::new(VirtualBackend::new());
        let watcher = HotplugWatcher::new(Arc::clone(&backend));
        watcher.install(|_| {}).unwrap();
        watcher.uninstall();
        assert_eq!(backend.watcher_count(), 0);
        watcher.install(|_| {}).unwrap();
        assert_eq!(backend.watcher_count(), 1);
    }
}
