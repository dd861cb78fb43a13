//! Per-connection session state.
//!
//! A fresh [`SessionState`] is built for every connection attempt, so no
//! stale login, stream or backoff state can survive a reconnect. It lives
//! behind a `tokio::sync::watch` sender: the receive loop mutates it, the
//! transmit task samples it and awaits changes.

use std::time::{Duration, Instant};

use crate::constants::{
    CHANNEL_BACKOFF,
    EMPTY_MESSAGE_BACKOFF_START,
    POST_LOGIN_COOLDOWN,
    RATE_LIMIT_BACKOFF_CAP,
    WOODPECKER_BACKOFF_START,
};

pub(crate) struct SessionState {
    /// Id of the outbound stream, once `start_stream` is acknowledged.
    pub stream_id: Option<u32>,
    pub logged_in: bool,
    pub channel_ready: bool,
    pub txing: bool,

    pub auth_in_progress: bool,
    pub auth_seq: Option<u64>,
    pub auth_started: Option<Instant>,
    /// A success response for the auth seq has been seen.
    pub auth_succeeded: bool,
    /// `on_channel_status: online` has been seen at least once.
    pub channel_seen_online: bool,

    /// Who is talking on the Zello side, for the keyed/unkeyed log lines.
    pub talk_user: Option<String>,
    pub remote_keyed_at: Option<Instant>,

    pub connected_at: Instant,
    pub login_at: Option<Instant>,

    pub start_retry_after: Option<Instant>,
    pub channel_backoff_until: Option<Instant>,
    pub woodpecker_until: Option<Instant>,
    woodpecker_window: Duration,
    pub empty_message_until: Option<Instant>,
    empty_message_window: Duration,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            stream_id: None,
            logged_in: false,
            channel_ready: false,
            txing: false,
            auth_in_progress: false,
            auth_seq: None,
            auth_started: None,
            auth_succeeded: false,
            channel_seen_online: false,
            talk_user: None,
            remote_keyed_at: None,
            connected_at: Instant::now(),
            login_at: None,
            start_retry_after: None,
            channel_backoff_until: None,
            woodpecker_until: None,
            woodpecker_window: WOODPECKER_BACKOFF_START,
            empty_message_until: None,
            empty_message_window: EMPTY_MESSAGE_BACKOFF_START,
        }
    }

    /// Whether a `start_stream` may be sent right now. Every suppression
    /// window the server can impose is checked here.
    pub fn can_start_stream(&self, now: Instant) -> bool {
        self.logged_in
            && self.channel_ready
            && !self.txing
            && !self.auth_in_progress
            && self
                .login_at
                .is_some_and(|at| now.duration_since(at) >= POST_LOGIN_COOLDOWN)
            && !pending(self.start_retry_after, now)
            && !pending(self.channel_backoff_until, now)
            && !pending(self.woodpecker_until, now)
            && !pending(self.empty_message_until, now)
    }

    /// Opens the woodpecker suppression window and doubles it for next
    /// time, up to the cap.
    pub fn trip_woodpecker(&mut self, now: Instant) {
        self.woodpecker_until = Some(now + self.woodpecker_window);
        self.woodpecker_window = (self.woodpecker_window * 2).min(RATE_LIMIT_BACKOFF_CAP);
    }

    /// As [`Self::trip_woodpecker`], for the empty-message rejection.
    pub fn trip_empty_message(&mut self, now: Instant) {
        self.empty_message_until = Some(now + self.empty_message_window);
        self.empty_message_window = (self.empty_message_window * 2).min(RATE_LIMIT_BACKOFF_CAP);
    }

    /// The channel refused a stream; hold off for a fixed window.
    pub fn trip_channel_backoff(&mut self, now: Instant) {
        self.channel_ready = false;
        self.channel_backoff_until = Some(now + CHANNEL_BACKOFF);
    }
}

fn pending(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|deadline| now < deadline)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::SessionState;

    fn ready_state(now: Instant) -> SessionState {
        let mut state = SessionState::new();
        state.logged_in = true;
        state.channel_ready = true;
        state.login_at = Some(now - Duration::from_secs(5));

        state
    }

    #[test]
    fn ready_state_can_start() {
        let now = Instant::now();
        assert!(ready_state(now).can_start_stream(now));
    }

    #[test]
    fn gating_preconditions_block_start() {
        let now = Instant::now();

        let mut state = ready_state(now);
        state.logged_in = false;
        assert!(!state.can_start_stream(now));

        let mut state = ready_state(now);
        state.channel_ready = false;
        assert!(!state.can_start_stream(now));

        let mut state = ready_state(now);
        state.txing = true;
        assert!(!state.can_start_stream(now));

        let mut state = ready_state(now);
        state.auth_in_progress = true;
        assert!(!state.can_start_stream(now));
    }

    #[test]
    fn post_login_cooldown_blocks_start() {
        let now = Instant::now();
        let mut state = ready_state(now);

        state.login_at = Some(now);
        assert!(!state.can_start_stream(now));
        assert!(state.can_start_stream(now + Duration::from_millis(800)));
    }

    #[test]
    fn woodpecker_window_doubles_to_the_cap() {
        let now = Instant::now();
        let mut state = ready_state(now);

        state.trip_woodpecker(now);
        assert!(!state.can_start_stream(now + Duration::from_secs(2)));
        assert!(state.can_start_stream(now + Duration::from_secs(3)));

        state.trip_woodpecker(now);
        assert_eq!(state.woodpecker_until, Some(now + Duration::from_secs(6)));

        state.trip_woodpecker(now);
        state.trip_woodpecker(now);
        assert_eq!(state.woodpecker_until, Some(now + Duration::from_secs(8)));
    }

    #[test]
    fn empty_message_window_starts_lower() {
        let now = Instant::now();
        let mut state = ready_state(now);

        state.trip_empty_message(now);
        assert_eq!(state.empty_message_until, Some(now + Duration::from_secs(1)));

        state.trip_empty_message(now);
        assert_eq!(state.empty_message_until, Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn channel_backoff_is_fixed_and_clears_readiness() {
        let now = Instant::now();
        let mut state = ready_state(now);

        state.trip_channel_backoff(now);
        assert!(!state.channel_ready);

        // Readiness comes back with the next channel status message.
        state.channel_ready = true;
        assert!(!state.can_start_stream(now + Duration::from_millis(499)));
        assert!(state.can_start_stream(now + Duration::from_millis(500)));

        state.trip_channel_backoff(now);
        state.channel_ready = true;
        assert_eq!(state.channel_backoff_until, Some(now + Duration::from_millis(500)));
    }
}
