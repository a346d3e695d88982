//! The cooperative scheduling loop.

use super::connectivity::ConnectivityManager;
use super::state::ConnectionState;
use super::status::{PublishError, StatusEvent, StatusSink};
use super::timer::PublishTimer;
use crate::network::Link;
use crate::network::transport::SecureTransport;
use crate::telemetry::codec;
use crate::telemetry::{CommandDispatcher, Sampler};
use crate::time::{Clock, Delay, Shutdown};

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Connection state at the end of the tick.
    pub state: ConnectionState,
    /// Whether a telemetry sample went out.
    pub published: bool,
}

/// Runs connectivity, inbound commands and periodic telemetry from a single
/// thread.
///
/// Each [`tick`](Scheduler::tick):
///
/// 1. advances the connection state machine by one step unless the session is
///    active,
/// 2. pumps the session once,
/// 3. if the session is active and the publish interval has elapsed, samples,
///    encodes and publishes once.
///
/// [`run`](Scheduler::run) repeats that with a bounded delay in between until
/// shutdown is requested.
pub struct Scheduler<'a, L, T, P, D, S, K>
where
    L: Link,
    T: SecureTransport,
{
    connectivity: ConnectivityManager<'a, L, T>,
    sampler: P,
    dispatcher: D,
    status: S,
    clock: K,
    timer: PublishTimer,
}

impl<L, T, P, D, S, K> core::fmt::Debug for Scheduler<'_, L, T, P, D, S, K>
where
    L: Link,
    T: SecureTransport,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("connectivity", &self.connectivity)
            .field("timer", &self.timer)
            .finish()
    }
}

impl<'a, L, T, P, D, S, K> Scheduler<'a, L, T, P, D, S, K>
where
    L: Link,
    T: SecureTransport,
    P: Sampler,
    D: CommandDispatcher,
    S: StatusSink,
    K: Clock,
{
    /// Assemble the loop. The first publish is due one interval from now.
    pub fn new(
        connectivity: ConnectivityManager<'a, L, T>,
        sampler: P,
        dispatcher: D,
        status: S,
        clock: K,
    ) -> Self {
        let config = connectivity.config();
        // two ticks of lateness still count as on time
        let timer = PublishTimer::new(
            config.publish_interval_ms,
            config.tick_ms.saturating_mul(2),
            clock.now_ms(),
        );
        Self {
            connectivity,
            sampler,
            dispatcher,
            status,
            clock,
            timer,
        }
    }

    /// Run one iteration.
    pub fn tick(&mut self) -> TickReport {
        let now_ms = self.clock.now_ms();

        if !self.connectivity.is_active() {
            self.connectivity.attempt_connect(now_ms, &mut self.status);
        }
        self.connectivity
            .pump(now_ms, &mut self.dispatcher, &mut self.status);

        let published =
            self.connectivity.is_active() && self.timer.is_due(now_ms) && self.publish_cycle(now_ms);

        TickReport {
            state: self.connectivity.state(),
            published,
        }
    }

    /// Tick until `shutdown` is requested, then close the session cleanly.
    ///
    /// The request is only looked at between ticks.
    pub fn run<Y: Delay, X: Shutdown>(&mut self, delay: &mut Y, shutdown: &X) {
        let tick_ms = self.connectivity.config().tick_ms;
        info!("agent loop started, tick {=u32} ms", tick_ms);
        while !shutdown.is_requested() {
            self.tick();
            delay.delay_ms(tick_ms);
        }
        info!("shutdown requested");
        let now_ms = self.clock.now_ms();
        self.connectivity.shutdown(now_ms, &mut self.status);
    }

    /// The connection state machine.
    pub fn connectivity(&self) -> &ConnectivityManager<'a, L, T> {
        &self.connectivity
    }

    /// The status sink.
    pub fn status(&self) -> &S {
        &self.status
    }

    /// The command dispatcher.
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    fn publish_cycle(&mut self, now_ms: u64) -> bool {
        let sample = match self.sampler.sample(now_ms) {
            Ok(sample) => sample,
            Err(fault) => {
                warn!("sampler fault: {}", fault);
                self.status.report(StatusEvent::SampleFailed(fault));
                return false;
            }
        };

        let payload = match codec::encode_sample(&sample) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("sample not encodable: {}", e);
                self.status.report(StatusEvent::PublishSkipped(e));
                self.timer.mark(now_ms);
                return false;
            }
        };

        match self.connectivity.publish(&payload, now_ms, &mut self.status) {
            Ok(()) => {
                self.timer.mark(now_ms);
                debug!("published {=usize} bytes", payload.len());
                self.status.report(StatusEvent::Published {
                    bytes: payload.len(),
                });
                true
            }
            Err(e) => {
                if e == PublishError::TooLarge {
                    self.timer.mark(now_ms);
                }
                warn!("publish failed: {}", e);
                self.status.report(StatusEvent::PublishFailed(e));
                false
            }
        }
    }
}
