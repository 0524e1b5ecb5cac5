//! Radio abstraction.
//!
//! The platform's BLE stack implements [`Radio`]. The engine only turns
//! advertising and scanning on and off; payloads flow through
//! [`super::EngineHandle`], which the platform calls from its own callbacks.

use parking_lot::Mutex;

use crate::error::Result;

/// What the radio is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioActivity {
    /// Advertising the cached hello payload
    pub advertising: bool,
    /// Scanning for peer hellos
    pub scanning: bool,
}

/// Short-range radio controlled by the proximity engine
pub trait Radio: Send + Sync {
    /// Begin advertising; the payload is pulled from `EngineHandle::hello_message`
    fn start_advertising(&self) -> Result<()>;

    /// Begin scanning; received payloads go to `EngineHandle::did_receive_hello`
    fn start_scanning(&self) -> Result<()>;

    /// Stop both
    fn stop(&self) -> Result<()>;
}

/// In-process radio that records its state
///
/// Tests deliver payloads by calling the engine handle directly.
#[derive(Debug, Default)]
pub struct LoopbackRadio {
    activity: Mutex<RadioActivity>,
    starts: Mutex<u32>,
}

impl LoopbackRadio {
    /// Create an idle radio
    pub fn new() -> Self {
        Self::default()
    }

    /// Current activity
    pub fn activity(&self) -> RadioActivity {
        *self.activity.lock()
    }

    /// How many times advertising was started
    pub fn advertising_starts(&self) -> u32 {
        *self.starts.lock()
    }
}

impl Radio for LoopbackRadio {
    fn start_advertising(&self) -> Result<()> {
        let mut activity = self.activity.lock();
        if !activity.advertising {
            *self.starts.lock() += 1;
        }
        activity.advertising = true;
        Ok(())
    }

    fn start_scanning(&self) -> Result<()> {
        self.activity.lock().scanning = true;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        *self.activity.lock() = RadioActivity::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_radio_state() {
        let radio = LoopbackRadio::new();
        assert_eq!(radio.activity(), RadioActivity::default());

        radio.start_advertising().unwrap();
        radio.start_advertising().unwrap();
        radio.start_scanning().unwrap();
        assert!(radio.activity().advertising);
        assert!(radio.activity().scanning);
        assert_eq!(radio.advertising_starts(), 1);

        radio.stop().unwrap();
        assert!(!radio.activity().advertising);
    }
}
