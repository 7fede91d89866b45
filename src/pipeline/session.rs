//! Per-tick driver: decimates mask requests, folds responses into the
//! smoothed/shaped masks, and recomposites the output every tick.

use super::output::{OutputBuffer, OutputWriter};
use super::stats::PipelineStats;
use super::stop::StopHandle;
use crate::capture::FrameProvider;
use crate::config::PipelineConfig;
use crate::error::{CutoutError, Result};
use crate::matte::{Compositor, MaskShaper, MaskSmoother};
use crate::segmentation::{empty_mask, Mask, MaskProvider};
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// Display refresh rate used when none is configured
pub const DEFAULT_REFRESH_RATE: u32 = 60;

/// Log stats every this many ticks
const STATS_INTERVAL: u64 = 30;

type MaskRequest = oneshot::Receiver<anyhow::Result<Mask>>;

/// Pause between readiness checks when `ready()` resolves early
const READY_RECHECK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Configuration only, no buffers
    Created,
    /// Buffers sized, ticking allowed
    Running,
    /// No further ticks or output writes
    Stopped,
}

/// What a single tick did about the mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Stop was observed; nothing was rendered
    Stopped,
    /// Not a request tick; recomposited with the current shaped mask
    Decimated,
    /// Request tick, but the previous request is still outstanding
    Busy,
    /// A new mask request was issued
    Requested,
}

/// Buffers sized at start, one set per session
struct Stages {
    width: u32,
    height: u32,
    raw: Mask,
    smoother: MaskSmoother,
    shaper: MaskShaper,
    compositor: Compositor,
}

impl Stages {
    fn new(config: &PipelineConfig, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            raw: empty_mask(width, height),
            smoother: MaskSmoother::new(width, height, config.ema_alpha()),
            shaper: MaskShaper::new(
                width,
                height,
                config.dilate_px(),
                config.feather_px(),
                config.edge_mode(),
            ),
            compositor: Compositor::new(width, height, config.rgb_scale(), config.feather_px()),
        }
    }

    /// Take a provider response: raw -> smoothed -> shaped
    fn accept(&mut self, mask: Mask) -> Result<()> {
        if mask.dimensions() != (self.width, self.height) {
            return Err(CutoutError::mismatch(
                "provider mask",
                (self.width, self.height),
                mask.dimensions(),
            ));
        }

        self.raw = mask;
        let smoothed = self.smoother.update(&self.raw)?;
        self.shaper.shape(smoothed)?;
        Ok(())
    }
}

/// Assembles a [`Session`]; the mask provider is mandatory
pub struct SessionBuilder {
    config: PipelineConfig,
    frames: Option<Box<dyn FrameProvider>>,
    masks: Option<Arc<dyn MaskProvider>>,
    refresh_rate: u32,
}

impl SessionBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            frames: None,
            masks: None,
            refresh_rate: DEFAULT_REFRESH_RATE,
        }
    }

    pub fn frame_provider(mut self, frames: Box<dyn FrameProvider>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn mask_provider(mut self, masks: Arc<dyn MaskProvider>) -> Self {
        self.masks = Some(masks);
        self
    }

    /// Ticks per second for [`Session::run`]
    pub fn refresh_rate(mut self, hz: u32) -> Self {
        self.refresh_rate = hz.max(1);
        self
    }

    pub fn build(self) -> Result<Session> {
        let masks = self.masks.ok_or(CutoutError::ProviderUnavailable)?;
        let frames = self.frames.ok_or(CutoutError::FrameSourceUnavailable)?;

        tracing::debug!("Session created with {:?}", self.config);

        Ok(Session {
            config: self.config,
            frames,
            masks,
            tick_interval: Duration::from_secs_f64(1.0 / self.refresh_rate as f64),
            state: SessionState::Created,
            stages: None,
            output: OutputWriter::new(),
            stop: StopHandle::new(),
            in_flight: None,
            frame_counter: 0,
            failure_streak: 0,
            stats: PipelineStats::default(),
        })
    }
}

/// One cut-out session: `Created -> Running -> Stopped`
///
/// Everything runs on the caller's task. The only concurrent work is the
/// outstanding mask request, which runs as its own tokio task so that
/// ticking never waits for the provider.
pub struct Session {
    config: PipelineConfig,
    frames: Box<dyn FrameProvider>,
    masks: Arc<dyn MaskProvider>,
    tick_interval: Duration,
    state: SessionState,
    stages: Option<Stages>,
    output: OutputWriter,
    stop: StopHandle,
    in_flight: Option<MaskRequest>,
    frame_counter: u64,
    failure_streak: u32,
    stats: PipelineStats,
}

impl Session {
    pub fn builder(config: PipelineConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle for the consumer; valid before start, sized by start
    pub fn output(&self) -> OutputBuffer {
        self.output.reader()
    }

    /// Handle that can stop the session from elsewhere
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request a stop; observed at the next tick boundary
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Ticks run so far, starting at 1 for the first tick
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Session dimensions, `None` before start
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.stages.as_ref().map(|s| (s.width, s.height))
    }

    pub fn raw_mask(&self) -> Option<&Mask> {
        self.stages.as_ref().map(|s| &s.raw)
    }

    pub fn smoothed_mask(&self) -> Option<&Mask> {
        self.stages.as_ref().map(|s| s.smoother.smoothed())
    }

    pub fn shaped_mask(&self) -> Option<&Mask> {
        self.stages.as_ref().map(|s| s.shaper.shaped())
    }

    pub fn has_request_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Wait for the frame source, then size every buffer
    ///
    /// Waits indefinitely for readiness. Returns early, leaving the session
    /// stopped, if `stop()` is called meanwhile. Calling it again once
    /// started does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Created {
            tracing::debug!("start() ignored in state {:?}", self.state);
            return Ok(());
        }

        let (width, height) = loop {
            if self.stop.is_stopped() {
                tracing::info!("Session stopped before the frame source was ready");
                self.state = SessionState::Stopped;
                return Ok(());
            }

            match self.frames.dimensions() {
                Some((w, h)) if w > 0 && h > 0 => break (w, h),
                _ => {
                    tracing::debug!("Waiting for frame source");
                    tokio::select! {
                        _ = self.frames.ready() => {}
                        _ = self.stop.stopped() => {}
                    }
                    // ready() may resolve before dimensions are known
                    tokio::time::sleep(READY_RECHECK).await;
                }
            }
        };

        tracing::info!("Starting session at {}x{}", width, height);

        self.stages = Some(Stages::new(&self.config, width, height));
        self.output.allocate(width, height);
        self.masks.reset_state();
        self.state = SessionState::Running;

        Ok(())
    }

    /// Run one tick: decide on a mask request, then recomposite
    ///
    /// Must be called from within a tokio runtime; a mask request is spawned
    /// as a task. A request that has finished by the next tick is folded in
    /// before that tick composites, so hosts can drive ticks themselves.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        if self.stop.is_stopped() {
            self.halt();
            return Ok(TickOutcome::Stopped);
        }

        let stages = self.stages.as_ref().ok_or(CutoutError::NotStarted)?;
        let dims = (stages.width, stages.height);

        self.collect_finished()?;

        self.frame_counter += 1;
        self.stats.ticks += 1;

        let capture_start = Instant::now();
        let frame = self.frames.current_frame().map_err(CutoutError::Capture)?;
        self.stats.total_capture_time += capture_start.elapsed();
        if frame.dimensions() != dims {
            return Err(CutoutError::mismatch("frame", dims, frame.dimensions()));
        }
        let frame = Arc::new(frame);

        let outcome = self.schedule_request(&frame);
        self.render(&frame)?;

        if self.stats.ticks % STATS_INTERVAL == 0 {
            self.stats.log_summary();
        }

        Ok(outcome)
    }

    /// Await the outstanding request, if any, and fold it in
    ///
    /// Returns `false` when nothing was in flight.
    pub async fn resolve_in_flight(&mut self) -> Result<bool> {
        let Some(request) = self.in_flight.as_mut() else {
            return Ok(false);
        };
        let result = flatten(request.await);
        self.in_flight = None;
        self.settle(result)?;
        Ok(true)
    }

    /// Start, then tick at the refresh rate until stopped
    ///
    /// Returns `Ok(())` after a stop. Only dimension drift or a failing
    /// frame source end the loop with an error; mask failures never do.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        if self.state == SessionState::Stopped {
            return Ok(());
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Starting pipeline loop, tick every {:?}", self.tick_interval);

        let stop = self.stop.clone();
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    self.halt();
                    break;
                }
                result = next_response(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.settle(result)?;
                }
                _ = interval.tick() => {
                    if self.tick()? == TickOutcome::Stopped {
                        break;
                    }
                }
            }
        }

        tracing::info!("Pipeline loop finished after {} ticks", self.stats.ticks);
        self.stats.log_summary();
        Ok(())
    }

    /// Request on ticks 1, k+1, 2k+1, ... and only if nothing is outstanding
    fn schedule_request(&mut self, frame: &Arc<RgbImage>) -> TickOutcome {
        let divider = u64::from(self.config.mask_request_divider());
        if (self.frame_counter - 1) % divider != 0 {
            self.stats.decimated_ticks += 1;
            return TickOutcome::Decimated;
        }

        if self.in_flight.is_some() {
            tracing::trace!("Mask request still outstanding at tick {}", self.frame_counter);
            self.stats.busy_ticks += 1;
            return TickOutcome::Busy;
        }

        let masks = Arc::clone(&self.masks);
        let frame = Arc::clone(frame);
        let (reply, request) = oneshot::channel();
        tokio::spawn(async move {
            // The session may have stopped and dropped the receiver
            let _ = reply.send(masks.request_mask(frame).await);
        });
        self.in_flight = Some(request);
        self.stats.mask_requests += 1;

        TickOutcome::Requested
    }

    /// Fold in a response that is already available, without waiting
    fn collect_finished(&mut self) -> Result<()> {
        let Some(request) = self.in_flight.as_mut() else {
            return Ok(());
        };

        let result = match request.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return Ok(()),
            Err(oneshot::error::TryRecvError::Closed) => Err(dropped_request()),
        };
        self.in_flight = None;
        self.settle(result)
    }

    fn render(&mut self, frame: &RgbImage) -> Result<()> {
        let stages = self.stages.as_ref().ok_or(CutoutError::NotStarted)?;

        let start = Instant::now();
        {
            let mut out = self.output.write();
            stages
                .compositor
                .composite(frame, stages.shaper.shaped(), &mut out)?;
        }
        self.output.publish();
        self.stats.total_composite_time += start.elapsed();

        Ok(())
    }

    /// Apply a provider response; failures keep the previous masks
    fn settle(&mut self, result: anyhow::Result<Mask>) -> Result<()> {
        if self.stop.is_stopped() || self.state != SessionState::Running {
            self.stats.discarded_results += 1;
            return Ok(());
        }

        match result {
            Ok(mask) => {
                let stages = self.stages.as_mut().ok_or(CutoutError::NotStarted)?;
                stages.accept(mask)?;
                self.stats.mask_successes += 1;
                if self.failure_streak > 0 {
                    tracing::info!("Mask provider recovered after {} failures", self.failure_streak);
                }
                self.failure_streak = 0;
            }
            Err(e) => {
                self.stats.mask_failures += 1;
                if self.failure_streak == 0 {
                    tracing::warn!("Mask request failed, reusing previous mask: {:#}", e);
                } else {
                    tracing::debug!("Mask request failed again: {:#}", e);
                }
                self.failure_streak += 1;
            }
        }

        Ok(())
    }

    fn halt(&mut self) {
        if self.state != SessionState::Stopped {
            tracing::info!("Session stopped at tick {}", self.frame_counter);
            self.state = SessionState::Stopped;
        }
        // Detach rather than abort: the provider call finishes on its own
        self.in_flight = None;
    }
}

/// Pending forever when nothing is in flight, so `select!` skips the branch
async fn next_response(in_flight: &mut Option<MaskRequest>) -> anyhow::Result<Mask> {
    match in_flight {
        Some(request) => flatten(request.await),
        None => std::future::pending().await,
    }
}

fn flatten(received: std::result::Result<anyhow::Result<Mask>, oneshot::error::RecvError>) -> anyhow::Result<Mask> {
    received.unwrap_or_else(|_| Err(dropped_request()))
}

fn dropped_request() -> anyhow::Error {
    anyhow::anyhow!("Mask request task ended without a result")
}
