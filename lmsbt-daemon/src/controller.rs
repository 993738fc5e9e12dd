/*!
 * Playback Controller
 * Maps playback events onto LMS capture control calls
 */

use async_trait::async_trait;
use tracing::{debug, error};

use crate::bluetooth::PlaybackEvent;
use crate::lms::LmsError;

/// Control surface for the capture playback. Split out so the controller
/// can be exercised against a synthetic implementation.
#[async_trait]
pub trait CaptureControl {
    async fn start_capture(&self, input: &str) -> Result<(), LmsError>;
    async fn stop_capture(&self) -> Result<(), LmsError>;
}

pub struct PlaybackController<C> {
    control: C,
    input_device: String,
}

impl<C: CaptureControl> PlaybackController<C> {
    pub fn new(control: C, input_device: String) -> Self {
        Self {
            control,
            input_device,
        }
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    /// Issue the control call for one event. Redundant starts and stops
    /// are forwarded as-is; the server treats them as no-ops. A failed
    /// call is logged and does not stop event processing.
    pub async fn handle(&mut self, event: PlaybackEvent) {
        debug!("handling {:?}", event);
        let result = match event {
            PlaybackEvent::DeviceConnected | PlaybackEvent::StreamStarted => {
                self.control.start_capture(&self.input_device).await
            }
            PlaybackEvent::DeviceDisconnected | PlaybackEvent::StreamStopped => {
                self.control.stop_capture().await
            }
        };
        if let Err(e) = result {
            error!("control call for {:?} failed: {}", event, e);
        }
    }
}
