use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    app::state::PlaybackState,
    discord::{embeds, ChannelReconciler, TargetChannel},
    outcome::Outcome,
    spotify::SpotifyError,
};

/// Consecutive soft send failures tolerated for one display transition.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Where playback snapshots come from.
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    async fn is_authenticated(&self) -> bool;

    async fn current_playback(&self) -> Outcome<Option<PlaybackState>, SpotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum PollState {
    #[strum(to_string = "stopped")]
    Stopped,
    #[strum(to_string = "starting")]
    Starting,
    #[strum(to_string = "running")]
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum HaltReason {
    NotAuthenticated,
    NoChannel,
    AuthenticationLost,
    PermissionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// A precondition is missing; nothing was started.
    NotReady(HaltReason),
    /// `stop()` ran while the initial cycle was in flight.
    Cancelled,
    /// The initial cycle hit a fatal condition; the timer was never armed.
    Halted(HaltReason),
}

enum CycleEnd {
    Continue,
    Stale,
    Halted(HaltReason),
}

#[derive(Debug)]
struct LoopState {
    phase: PollState,
    generation: u64,
    /// What the channel currently shows: a track id, or `None` for nothing.
    current_track_id: Option<String>,
    failed: Option<(Option<String>, u32)>,
    ticker: Option<JoinHandle<()>>,
}

struct Inner {
    source: Arc<dyn PlaybackSource>,
    reconciler: ChannelReconciler,
    target: TargetChannel,
    interval: Duration,
    state: Mutex<LoopState>,
    cycle: tokio::sync::Mutex<()>,
}

/// Timer-driven loop that mirrors playback changes into the target channel.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<Inner>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn PlaybackSource>,
        reconciler: ChannelReconciler,
        target: TargetChannel,
        interval: Duration,
    ) -> Self {
        Poller {
            inner: Arc::new(Inner {
                source,
                reconciler,
                target,
                interval,
                state: Mutex::new(LoopState {
                    phase: PollState::Stopped,
                    generation: 0,
                    current_track_id: None,
                    failed: None,
                    ticker: None,
                }),
                cycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> PollState {
        self.inner.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.state() != PollState::Stopped
    }

    pub fn current_track_id(&self) -> Option<String> {
        self.inner.lock().current_track_id.clone()
    }

    /// Starts polling when authenticated with a channel set and not already
    /// running. One cycle runs to completion before the timer is armed.
    pub async fn start_if_needed(&self) -> StartOutcome {
        if self.is_running() {
            debug!("Polling already active");
            return StartOutcome::AlreadyRunning;
        }
        if !self.inner.source.is_authenticated().await {
            info!("Polling not started: Spotify is not authenticated");
            return StartOutcome::NotReady(HaltReason::NotAuthenticated);
        }
        if self.inner.target.get().is_none() {
            info!("Polling not started: no target channel set");
            return StartOutcome::NotReady(HaltReason::NoChannel);
        }

        let generation = {
            let mut state = self.inner.lock();
            if state.phase != PollState::Stopped {
                return StartOutcome::AlreadyRunning;
            }
            state.phase = PollState::Starting;
            state.generation += 1;
            state.generation
        };
        info!("Starting Spotify polling");

        let first = {
            let _cycle = self.inner.cycle.lock().await;
            self.inner.poll_once(generation).await
        };
        if let CycleEnd::Halted(reason) = first {
            return StartOutcome::Halted(reason);
        }

        let mut state = self.inner.lock();
        if state.generation != generation {
            debug!("Polling was stopped during the initial cycle");
            return StartOutcome::Cancelled;
        }
        state.phase = PollState::Running;
        state.ticker = Some(tokio::spawn(tick_loop(Arc::clone(&self.inner), generation)));
        info!(
            "Polling every {}ms",
            self.inner.interval.as_millis()
        );
        StartOutcome::Started
    }

    /// Cancels the timer and forgets the displayed track. Safe to call at any
    /// time, including when already stopped.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if state.phase == PollState::Stopped {
            debug!("Polling already stopped");
            return;
        }
        stop_locked(&mut state);
        info!("Spotify polling stopped");
    }
}

fn stop_locked(state: &mut LoopState) {
    if let Some(ticker) = state.ticker.take() {
        ticker.abort();
    }
    state.phase = PollState::Stopped;
    state.generation += 1;
    state.current_track_id = None;
    state.failed = None;
}

async fn tick_loop(inner: Arc<Inner>, generation: u64) {
    let mut ticker = time::interval(inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the initial cycle already covered it.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !inner.is_current(generation) {
            break;
        }
        let Ok(_cycle) = inner.cycle.try_lock() else {
            debug!("Previous poll cycle still running, skipping tick");
            continue;
        };
        match inner.poll_once(generation).await {
            CycleEnd::Continue => {}
            CycleEnd::Stale | CycleEnd::Halted(_) => break,
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn halt(&self, generation: u64, reason: HaltReason) -> CycleEnd {
        let mut state = self.lock();
        if state.generation != generation {
            return CycleEnd::Stale;
        }
        stop_locked(&mut state);
        warn!("Spotify polling stopped: {}", reason.as_ref());
        CycleEnd::Halted(reason)
    }

    async fn poll_once(&self, generation: u64) -> CycleEnd {
        if !self.source.is_authenticated().await {
            return self.halt(generation, HaltReason::NotAuthenticated);
        }
        if self.target.get().is_none() {
            return self.halt(generation, HaltReason::NoChannel);
        }

        let playback = match self.source.current_playback().await {
            Outcome::Done(playback) => playback,
            Outcome::Soft(e) => {
                debug!("No playback data this cycle: {e}");
                return CycleEnd::Continue;
            }
            Outcome::Fatal(e) => {
                warn!("Playback unavailable: {e}");
                return self.halt(generation, HaltReason::AuthenticationLost);
            }
        };

        let track = playback.as_ref().and_then(PlaybackState::now_playing);
        let desired = track.map(|t| t.id.clone());
        {
            let state = self.lock();
            if state.generation != generation {
                return CycleEnd::Stale;
            }
            if state.current_track_id == desired {
                return CycleEnd::Continue;
            }
        }
        // The channel may have been reassigned or cleared while fetching.
        let Some(channel) = self.target.get() else {
            return self.halt(generation, HaltReason::NoChannel);
        };

        let payload = match track {
            Some(track) => {
                info!("Track changed: {} by {}", track.name, track.artist_line());
                embeds::now_playing(track)
            }
            None => {
                info!("Playback stopped or paused");
                embeds::nothing_playing()
            }
        };

        match self.reconciler.reconcile(Some(channel), &payload).await {
            Outcome::Done(_) => {
                self.record_displayed(generation, desired);
                CycleEnd::Continue
            }
            Outcome::Soft(_) => {
                self.record_failed(generation, desired);
                CycleEnd::Continue
            }
            Outcome::Fatal(_) => self.halt(generation, HaltReason::PermissionLost),
        }
    }

    fn record_displayed(&self, generation: u64, displayed: Option<String>) {
        let mut state = self.lock();
        if state.generation == generation {
            state.current_track_id = displayed;
            state.failed = None;
        }
    }

    fn record_failed(&self, generation: u64, desired: Option<String>) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        let attempts = match &state.failed {
            Some((id, n)) if *id == desired => n + 1,
            _ => 1,
        };
        if attempts >= MAX_SEND_ATTEMPTS {
            warn!("Giving up on status update after {attempts} failed attempts");
            state.current_track_id = desired;
            state.failed = None;
        } else {
            debug!("Status update failed ({attempts}/{MAX_SEND_ATTEMPTS}), retrying next cycle");
            state.failed = Some((desired, attempts));
        }
    }
}
