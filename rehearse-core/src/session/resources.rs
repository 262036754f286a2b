//! Device and channel handles owned by one session.

use tracing::debug;

use crate::{audio::playback::PlaybackPipeline, audio::InputStream, channel::ChannelSender};

/// Everything a session must give back on teardown.
///
/// Fields are filled in as `start()` acquires them, so a failure halfway
/// through connecting still releases whatever was acquired. Dropping
/// releases as well.
#[derive(Default)]
pub struct SessionResources {
    pub(crate) input: Option<Box<dyn InputStream>>,
    pub(crate) playback: Option<PlaybackPipeline>,
    pub(crate) channel: Option<ChannelSender>,
}

impl SessionResources {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.playback.is_none() && self.channel.is_none()
    }

    pub fn holds_input(&self) -> bool {
        self.input.is_some()
    }

    /// Release in order: microphone, channel, then playback (every live
    /// buffer stopped, output context closed). Returns `false` when there
    /// was nothing to release.
    pub fn release(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        if let Some(mut input) = self.input.take() {
            input.stop();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.shutdown();
        }
        debug!("session resources released");
        true
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.release();
    }
}
