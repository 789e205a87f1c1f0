//! Device departure notifications.
//!
//! libusb delivers hot-plug callbacks only while someone pumps its event
//! loop, so the watcher owns a dedicated thread doing exactly that. Each
//! departure is sent as `(bus, address)` on an unbounded channel; the
//! receiving side lives in the tokio runtime.

use biolink_hardware::{HardwareError, Result};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const EVENT_POLL: Duration = Duration::from_millis(100);

struct DetachCallback {
    tx: mpsc::UnboundedSender<(u8, u8)>,
}

impl<T: UsbContext> Hotplug<T> for DetachCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
    }

    fn device_left(&mut self, device: Device<T>) {
        let location = (device.bus_number(), device.address());
        debug!("Hot-plug: device left (bus={}, addr={})", location.0, location.1);
        if self.tx.send(location).is_err() {
            debug!("Detach receiver dropped");
        }
    }
}

/// Background libusb event loop reporting device departures.
///
/// Stops when dropped.
pub struct DetachWatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DetachWatcher {
    /// Start watching `context`.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::Unsupported` if this libusb build has no
    /// hot-plug support, or `HardwareError::Usb` if registration fails.
    pub fn start(context: &Context) -> Result<(Self, mpsc::UnboundedReceiver<(u8, u8)>)> {
        if !rusb::has_hotplug() {
            return Err(HardwareError::unsupported("usb hot-plug"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let registration: Registration<Context> = HotplugBuilder::new()
            .enumerate(false)
            .register(context, Box::new(DetachCallback { tx }))
            .map_err(|e| HardwareError::usb(format!("hot-plug registration: {e}")))?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let context = context.clone();
        let thread = std::thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || {
                // The registration lives exactly as long as the loop.
                let _registration = registration;
                while !flag.load(Ordering::Relaxed) {
                    match context.handle_events(Some(EVENT_POLL)) {
                        Ok(()) | Err(rusb::Error::Interrupted) => {}
                        Err(e) => {
                            warn!("Error handling USB events: {}", e);
                            std::thread::sleep(EVENT_POLL);
                        }
                    }
                }
                debug!("Hot-plug thread stopped");
            })?;

        info!("Watching for USB device departures");
        Ok((
            Self {
                stop,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

impl Drop for DetachWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Hot-plug thread panicked");
        }
    }
}

impl std::fmt::Debug for DetachWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetachWatcher")
            .field("running", &!self.stop.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_forwards_nothing_after_receiver_drop() {
        let (tx, rx) = mpsc::unbounded_channel::<(u8, u8)>();
        drop(rx);
        let callback = DetachCallback { tx };
        assert!(callback.tx.is_closed());
    }
}
