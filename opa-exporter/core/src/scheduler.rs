use crate::{
    refresh::{Outcome, Refresher},
    ResourceClient,
};
use futures::future::{BoxFuture, FutureExt, OptionFuture};
use std::future::Future;
use tokio::time;
use tracing::{debug, info, warn};

/// Drives refresh cycles on a fixed interval, one at a time.
#[derive(Debug)]
pub struct Scheduler<C> {
    refresher: Refresher<C>,
    interval: time::Duration,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Stopped,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Tick,
    CycleDone,
    Cancel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    StartCycle,
    Coalesce,
    None,
}

// === impl State ===

impl State {
    /// Cancellation is terminal. A cycle that is already running when the scheduler stops is
    /// left to finish; the state machine only governs whether new cycles start.
    pub fn next(self, event: Event) -> (Self, Action) {
        match (self, event) {
            (Self::Stopped, _) => (Self::Stopped, Action::None),
            (_, Event::Cancel) => (Self::Stopped, Action::None),
            (Self::Idle, Event::Tick) => (Self::Running, Action::StartCycle),
            (Self::Idle, Event::CycleDone) => (Self::Idle, Action::None),
            (Self::Running, Event::Tick) => (Self::Running, Action::Coalesce),
            (Self::Running, Event::CycleDone) => (Self::Idle, Action::None),
        }
    }
}

// === impl Scheduler ===

impl<C> Scheduler<C>
where
    C: ResourceClient + 'static,
{
    pub fn new(refresher: Refresher<C>, interval: time::Duration) -> Self {
        Self {
            refresher,
            interval,
        }
    }

    /// Runs cycles until `shutdown` completes.
    ///
    /// The value produced by `shutdown` is held until any in-flight cycle has finished, so a
    /// drain handle passed here keeps the process alive until the last snapshot is published.
    pub async fn run<R>(self, shutdown: impl Future<Output = R>) {
        let Self {
            refresher,
            interval,
        } = self;
        let metrics = refresher.metrics().clone();

        // The refresher moves into the cycle future while it runs and is returned when the cycle
        // completes.
        let mut idle = Some(refresher);
        let mut cycle: Option<BoxFuture<'static, (Refresher<C>, Outcome)>> = None;
        let mut state = State::Idle;

        // The first tick completes immediately.
        let mut ticks = time::interval(interval);
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        let mut released = None;

        loop {
            let event = tokio::select! {
                biased;

                release = &mut shutdown, if released.is_none() => {
                    released = Some(release);
                    Event::Cancel
                }

                Some((refresher, outcome)) = OptionFuture::from(cycle.as_mut()) => {
                    cycle = None;
                    idle = Some(refresher);
                    log_outcome(&outcome);
                    Event::CycleDone
                }

                _ = ticks.tick(), if state != State::Stopped => Event::Tick,

                else => break,
            };

            let (next, action) = state.next(event);
            debug!(?event, from = ?state, to = ?next, "Scheduler transition");
            state = next;

            match action {
                Action::StartCycle => {
                    if let Some(mut refresher) = idle.take() {
                        cycle = Some(
                            async move {
                                let outcome = refresher.run_cycle().await;
                                (refresher, outcome)
                            }
                            .boxed(),
                        );
                    }
                }
                Action::Coalesce => {
                    debug!("Refresh still running; skipping tick");
                    metrics.coalesced();
                }
                Action::None => {}
            }

            if event == Event::Cancel {
                info!(in_flight = cycle.is_some(), "Stopping refresh");
            }
        }

        debug!("Refresh stopped");
        drop(released);
    }
}

fn log_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Complete(summary) => debug!(generation = summary.generation, "Refresh complete"),
        Outcome::Partial(summary) => warn!(
            generation = summary.generation,
            failed = ?summary.failed_kinds,
            "Refresh partially complete"
        ),
        Outcome::Failed(error) => warn!(%error, "Refresh failed; retrying on next tick"),
    }
}
