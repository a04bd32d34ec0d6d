//! Summary channel event handling

use super::{ChannelState, ControllerState, Inner, NarrationEvent, SessionStatus};
use crate::channel::{ChannelEvent, SummaryEvent};
use tracing::{debug, info, trace, warn};

impl Inner {
    /// Whether updates for `session_id` may still change observable state
    pub(super) fn accepts_updates_for(&self, state: &ControllerState, session_id: &str) -> bool {
        self.accepts_results(state)
            && matches!(
                state.status,
                SessionStatus::ChannelAttaching | SessionStatus::Active
            )
            && state.session_id.as_deref() == Some(session_id)
    }

    /// Replace the narration text; the latest write wins
    pub(super) fn apply_narration(&self, state: &mut ControllerState, text: String) {
        debug!(chars = text.len(), "Narration updated");
        state.narration = Some(text.clone());
        let _ = self.event_tx.send(NarrationEvent::Narration { text });
    }

    /// Single dispatch point for everything the summary channel reports
    pub(super) fn handle_channel_event(&self, session_id: &str, event: ChannelEvent) {
        let mut state = self.lock();
        if !self.accepts_updates_for(&state, session_id) {
            trace!(session_id = %session_id, "Ignoring event for inactive session: {:?}", event);
            return;
        }

        match event {
            ChannelEvent::Opened => {
                info!(session_id = %session_id, "Summary channel connected");
                self.set_channel_state(&mut state, ChannelState::Open);
            }
            ChannelEvent::Message(raw) => match SummaryEvent::decode(&raw) {
                Some(SummaryEvent::Summary(summary)) => {
                    trace!(
                        version = ?summary.version,
                        ts = ?summary.ts,
                        audio_url = ?summary.audio_url,
                        "Summary received"
                    );
                    self.apply_narration(&mut state, summary.text);
                }
                Some(SummaryEvent::Error { detail }) => {
                    warn!(session_id = %session_id, "Summary stream reported an error: {}", detail);
                    state.diagnostics.last_error = Some(format!("Summary stream: {}", detail));
                }
                Some(SummaryEvent::Other { kind }) => {
                    trace!("Ignoring summary stream message of type {}", kind);
                }
                None => {
                    debug!("Discarding malformed summary stream message");
                }
            },
            ChannelEvent::Error(message) => {
                warn!(session_id = %session_id, "Summary channel error: {}", message);
                state.diagnostics.last_error = Some(format!("Summary channel: {}", message));
                self.set_channel_state(&mut state, ChannelState::Failed);
            }
            ChannelEvent::Closed { code, reason } => {
                info!(session_id = %session_id, code = ?code, reason = %reason, "Summary channel closed");
                state.diagnostics.close_code = code;
                self.set_channel_state(&mut state, ChannelState::Closed);
            }
        }
    }
}
