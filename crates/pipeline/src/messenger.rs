//! Single-slot rendezvous between adjacent pipeline stages.
//!
//! Each edge of the stage DAG holds one messenger with room for exactly
//! one in-flight frame. The 16-bit state counter advances on every send
//! *and* every receive, so the two sides hold crossing states and only
//! one of them ever blocks at a time: a sender whose cached state still
//! equals the counter waits for the consumer, a receiver whose cached
//! state equals the counter waits for fresh data.

use std::sync::{Condvar, Mutex};

use contracts::{Result, TrafficError};

/// A frame handed across one edge, stamped with the sender's cached state.
#[derive(Debug, Clone)]
pub struct DataPacket<T> {
    pub state: u16,
    pub data: T,
}

struct MessengerState<T> {
    counter: u16,
    payload: Option<T>,
    terminate: bool,
}

/// Single-cell mailbox with a monotonically advancing state counter.
pub struct Messenger<T> {
    state: Mutex<MessengerState<T>>,
    notifier: Condvar,
}

impl<T: Clone> Messenger<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MessengerState {
                counter: 0,
                payload: None,
                terminate: false,
            }),
            notifier: Condvar::new(),
        }
    }

    /// Publish a frame. Blocks while the counter still equals
    /// `packet.state`, i.e. until the previous frame was consumed.
    /// Returns the advanced counter for the next send.
    pub fn send(&self, packet: DataPacket<T>) -> Result<u16> {
        let mut guard = self.state.lock().map_err(|_| TrafficError::Shutdown)?;
        while guard.counter == packet.state && !guard.terminate {
            guard = self
                .notifier
                .wait(guard)
                .map_err(|_| TrafficError::Shutdown)?;
        }
        if guard.terminate {
            return Err(TrafficError::Shutdown);
        }

        guard.payload = Some(packet.data);
        guard.counter = guard.counter.wrapping_add(1);
        self.notifier.notify_all();
        Ok(guard.counter)
    }

    /// Take the latest frame. Blocks while the counter still equals
    /// `state`, i.e. until the producer published a new frame. Returns
    /// the payload stamped with the advanced counter for the next
    /// receive.
    pub fn receive(&self, state: u16) -> Result<DataPacket<T>> {
        let mut guard = self.state.lock().map_err(|_| TrafficError::Shutdown)?;
        while guard.counter == state && !guard.terminate {
            guard = self
                .notifier
                .wait(guard)
                .map_err(|_| TrafficError::Shutdown)?;
        }
        if guard.terminate {
            return Err(TrafficError::Shutdown);
        }

        let data = guard
            .payload
            .clone()
            .ok_or_else(|| TrafficError::Other("messenger woken without payload".to_string()))?;
        guard.counter = guard.counter.wrapping_add(1);
        self.notifier.notify_all();
        Ok(DataPacket {
            state: guard.counter,
            data,
        })
    }

    /// Current counter value. Senders initialise their cached state to
    /// `state() - 1`, receivers to `state()`.
    pub fn state(&self) -> u16 {
        self.state.lock().map(|g| g.counter).unwrap_or(0)
    }

    /// Shutdown path: wake every blocked side; subsequent calls return
    /// [`TrafficError::Shutdown`] promptly.
    pub fn terminate(&self) {
        if let Ok(mut guard) = self.state.lock() {
            guard.terminate = true;
        }
        self.notifier.notify_all();
    }
}

impl<T: Clone> Default for Messenger<T> {
    fn default() -> Self {
        Self::new()
    }
}
