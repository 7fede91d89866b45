use anyhow::{bail, Result};
use async_trait::async_trait;
use camola_cutout::matte::Placement;
use camola_cutout::pipeline::SessionBuilder;
use camola_cutout::{
    CutoutError, FrameProvider, Mask, MaskProvider, PipelineConfig, Session, SessionState,
    TickOutcome,
};
use image::{Luma, Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const W: u32 = 40;
const H: u32 = 30;

/// Frame source with a flat colour; optionally not ready until notified
struct TestFrames {
    size: (u32, u32),
    ready: Option<Arc<Notify>>,
    ready_flag: Arc<AtomicUsize>,
}

impl TestFrames {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            ready: None,
            ready_flag: Arc::new(AtomicUsize::new(1)),
        }
    }

    fn delayed(width: u32, height: u32, notify: Arc<Notify>, flag: Arc<AtomicUsize>) -> Self {
        Self {
            size: (width, height),
            ready: Some(notify),
            ready_flag: flag,
        }
    }
}

#[async_trait(?Send)]
impl FrameProvider for TestFrames {
    fn current_frame(&mut self) -> Result<RgbImage> {
        Ok(RgbImage::from_pixel(self.size.0, self.size.1, Rgb([220, 100, 30])))
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.ready_flag.load(Ordering::SeqCst) > 0 {
            Some(self.size)
        } else {
            None
        }
    }

    async fn ready(&self) {
        if let Some(notify) = &self.ready {
            notify.notified().await;
        }
    }
}

/// Frame source whose `ready()` resolves at once but never reports a size
struct EagerFrames {
    polls: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl FrameProvider for EagerFrames {
    fn current_frame(&mut self) -> Result<RgbImage> {
        bail!("no frames yet")
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        None
    }

    async fn ready(&self) {}
}

#[derive(Clone, Copy)]
enum Reply {
    Value(f32),
    Fail,
    Hang,
    Sized(u32, u32),
}

/// Mask provider answering from a per-call script (calls numbered from 1)
struct ScriptedMasks {
    calls: Arc<AtomicUsize>,
    script: Box<dyn Fn(usize) -> Reply + Send + Sync>,
}

impl ScriptedMasks {
    fn new(script: impl Fn(usize) -> Reply + Send + Sync + 'static) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(Self {
            calls: Arc::clone(&calls),
            script: Box::new(script),
        });
        (provider, calls)
    }
}

#[async_trait]
impl MaskProvider for ScriptedMasks {
    async fn request_mask(&self, frame: Arc<RgbImage>) -> Result<Mask> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let (w, h) = frame.dimensions();
        match (self.script)(call) {
            Reply::Value(v) => Ok(Mask::from_pixel(w, h, Luma([v]))),
            Reply::Fail => bail!("segmenter rejected call {}", call),
            Reply::Hang => std::future::pending().await,
            Reply::Sized(w, h) => Ok(Mask::from_pixel(w, h, Luma([1.0]))),
        }
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::builder()
        .feather_px(0.0)
        .dilate_px(0.0)
        .ema_alpha(1.0)
        .rgb_scale(1.0)
        .build()
        .unwrap()
}

fn session_with(config: PipelineConfig, masks: Arc<dyn MaskProvider>) -> Session {
    SessionBuilder::new(config)
        .frame_provider(Box::new(TestFrames::new(W, H)))
        .mask_provider(masks)
        .build()
        .unwrap()
}

fn fully_transparent(session: &Session) -> bool {
    session.output().read().pixels().all(|p| p[3] == 0)
}

#[test]
fn test_missing_mask_provider_is_fatal() {
    let result = Session::builder(config())
        .frame_provider(Box::new(TestFrames::new(W, H)))
        .build();

    assert!(matches!(result, Err(CutoutError::ProviderUnavailable)));
}

#[tokio::test]
async fn test_start_sizes_output_to_frame_source() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let mut session = session_with(PipelineConfig::default(), masks);
    assert_eq!(session.state(), SessionState::Created);
    assert_eq!(session.output().dimensions(), (0, 0));

    session.start().await.unwrap();

    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.output().dimensions(), (W, H));
    assert_eq!(session.dimensions(), Some((W, H)));
    assert_eq!(session.shaped_mask().unwrap().dimensions(), (W, H));
}

#[tokio::test]
async fn test_tick_before_start_is_rejected() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let mut session = session_with(config(), masks);

    assert!(matches!(session.tick(), Err(CutoutError::NotStarted)));
}

#[tokio::test]
async fn test_output_transparent_before_first_mask() {
    let (masks, calls) = ScriptedMasks::new(|_| Reply::Hang);
    let mut session = session_with(config(), masks);
    session.start().await.unwrap();

    for _ in 0..3 {
        session.tick().unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(fully_transparent(&session));
    assert_eq!(session.output().generation(), 3);
}

#[tokio::test]
async fn test_mask_applies_on_next_composite() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let mut session = session_with(config(), masks);
    session.start().await.unwrap();

    assert_eq!(session.tick().unwrap(), TickOutcome::Requested);
    assert!(fully_transparent(&session));
    assert!(session.resolve_in_flight().await.unwrap());

    session.tick().unwrap();

    let output = session.output().snapshot();
    assert!(output.pixels().all(|p| p[3] == 255));
    assert_eq!(output.get_pixel(0, 0)[0], 220);
}

#[tokio::test]
async fn test_tick_alone_picks_up_finished_masks() {
    let (masks, calls) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let mut session = session_with(config(), masks);
    session.start().await.unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..20 {
        outcomes.push(session.tick().unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let requested = outcomes.iter().filter(|o| **o == TickOutcome::Requested).count();
    assert!(requested >= 10, "outcomes: {:?}", outcomes);
    assert!(calls.load(Ordering::SeqCst) >= 10);
    assert!(session.stats().mask_successes >= 9);
    assert!(session.output().read().pixels().all(|p| p[3] == 255));
}

#[tokio::test]
async fn test_decimation_requests_every_kth_tick() {
    let (masks, calls) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let config = PipelineConfig::builder().mask_request_divider(3).build().unwrap();
    let mut session = session_with(config, masks);
    session.start().await.unwrap();

    let mut requested_on = Vec::new();
    for _ in 0..10 {
        let outcome = session.tick().unwrap();
        if outcome == TickOutcome::Requested {
            requested_on.push(session.frame_counter());
        } else {
            assert_eq!(outcome, TickOutcome::Decimated);
        }
        session.resolve_in_flight().await.unwrap();
    }

    assert_eq!(requested_on, vec![1, 4, 7, 10]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(session.output().generation(), 10);
    assert_eq!(session.stats().decimated_ticks, 6);
}

#[tokio::test]
async fn test_outstanding_request_blocks_new_ones() {
    let (masks, calls) = ScriptedMasks::new(|_| Reply::Hang);
    let mut session = session_with(config(), masks);
    session.start().await.unwrap();

    assert_eq!(session.tick().unwrap(), TickOutcome::Requested);
    assert_eq!(session.tick().unwrap(), TickOutcome::Busy);
    assert_eq!(session.tick().unwrap(), TickOutcome::Busy);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(session.has_request_in_flight());
    assert_eq!(session.stats().busy_ticks, 2);
}

#[tokio::test]
async fn test_failed_request_keeps_previous_mask() {
    let (masks, _) = ScriptedMasks::new(|call| match call {
        2 => Reply::Fail,
        _ => Reply::Value(0.8),
    });
    let config = PipelineConfig::builder()
        .ema_alpha(0.5)
        .feather_px(1.0)
        .dilate_px(1.0)
        .build()
        .unwrap();
    let mut session = session_with(config, masks);
    session.start().await.unwrap();

    session.tick().unwrap();
    session.resolve_in_flight().await.unwrap();
    let shaped_before = session.shaped_mask().unwrap().clone();
    let smoothed_before = session.smoothed_mask().unwrap().clone();

    assert_eq!(session.tick().unwrap(), TickOutcome::Requested);
    session.resolve_in_flight().await.unwrap();

    assert_eq!(session.shaped_mask().unwrap().as_raw(), shaped_before.as_raw());
    assert_eq!(session.smoothed_mask().unwrap().as_raw(), smoothed_before.as_raw());
    assert_eq!(session.stats().mask_failures, 1);

    // The loop carries on and the next request succeeds
    assert_eq!(session.tick().unwrap(), TickOutcome::Requested);
    session.resolve_in_flight().await.unwrap();
    assert_eq!(session.stats().mask_successes, 2);
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_smoothed_mask_converges_to_constant_input() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let config = PipelineConfig::builder().ema_alpha(0.3).build().unwrap();
    let mut session = session_with(config, masks);
    session.start().await.unwrap();

    let mut previous_error = 1.0f32;
    for _ in 0..20 {
        session.tick().unwrap();
        session.resolve_in_flight().await.unwrap();
        let value = session.smoothed_mask().unwrap().get_pixel(5, 5)[0];
        let error = (1.0 - value).abs();
        assert!(error < previous_error);
        previous_error = error;
    }

    assert!(previous_error < 0.01);
}

#[tokio::test]
async fn test_full_mask_fills_scaled_region_only() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let config = PipelineConfig::builder()
        .feather_px(0.0)
        .dilate_px(0.0)
        .ema_alpha(1.0)
        .rgb_scale(0.97)
        .build()
        .unwrap();
    let mut session = SessionBuilder::new(config)
        .frame_provider(Box::new(TestFrames::new(200, 100)))
        .mask_provider(masks)
        .build()
        .unwrap();
    session.start().await.unwrap();

    session.tick().unwrap();
    session.resolve_in_flight().await.unwrap();
    session.tick().unwrap();

    let placement = Placement::centered(200, 100, 0.97);
    let output = session.output().snapshot();
    for (x, y, p) in output.enumerate_pixels() {
        assert_eq!(p[3] == 255, placement.contains(x, y), "pixel {},{}", x, y);
        if !placement.contains(x, y) {
            assert_eq!(p.0, [0, 0, 0, 0]);
        }
    }
}

#[tokio::test]
async fn test_zero_mask_gives_transparent_output() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(0.0));
    let mut session = session_with(PipelineConfig::default(), masks);
    session.start().await.unwrap();

    for _ in 0..3 {
        session.tick().unwrap();
        session.resolve_in_flight().await.unwrap();
    }

    assert!(session.output().read().pixels().all(|p| p.0 == [0, 0, 0, 0]));
}

#[tokio::test]
async fn test_mismatched_mask_is_fatal() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Sized(W + 1, H));
    let mut session = session_with(config(), masks);
    session.start().await.unwrap();

    session.tick().unwrap();
    let err = session.resolve_in_flight().await.unwrap_err();

    assert!(matches!(err, CutoutError::DimensionMismatch { what: "provider mask", .. }));
}

#[tokio::test]
async fn test_stop_is_idempotent_and_freezes_output() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let mut session = session_with(config(), masks);
    session.start().await.unwrap();
    session.tick().unwrap();
    session.resolve_in_flight().await.unwrap();
    session.tick().unwrap();
    let generation = session.output().generation();

    session.stop();
    session.stop();

    assert_eq!(session.tick().unwrap(), TickOutcome::Stopped);
    assert_eq!(session.tick().unwrap(), TickOutcome::Stopped);
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.output().generation(), generation);
    assert_eq!(session.frame_counter(), 2);
}

#[tokio::test]
async fn test_result_after_stop_is_discarded() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let mut session = session_with(config(), masks);
    session.start().await.unwrap();
    session.tick().unwrap();

    session.stop();
    session.resolve_in_flight().await.unwrap();

    assert_eq!(session.stats().discarded_results, 1);
    assert!(session.smoothed_mask().unwrap().iter().all(|&v| v == 0.0));
}

#[tokio::test]
async fn test_stop_before_start() {
    let (masks, calls) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let notify = Arc::new(Notify::new());
    let flag = Arc::new(AtomicUsize::new(0));
    let mut session = SessionBuilder::new(config())
        .frame_provider(Box::new(TestFrames::delayed(W, H, notify, flag)))
        .mask_provider(masks)
        .build()
        .unwrap();

    session.stop();
    session.start().await.unwrap();
    session.run().await.unwrap();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.dimensions(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_waits_for_frame_source() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let notify = Arc::new(Notify::new());
    let flag = Arc::new(AtomicUsize::new(0));
    let mut session = SessionBuilder::new(config())
        .frame_provider(Box::new(TestFrames::delayed(
            W,
            H,
            Arc::clone(&notify),
            Arc::clone(&flag),
        )))
        .mask_provider(masks)
        .build()
        .unwrap();

    let signal = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        flag.store(1, Ordering::SeqCst);
        notify.notify_waiters();
    };
    let (started, _) = tokio::join!(session.start(), signal);

    started.unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.output().dimensions(), (W, H));
}

#[tokio::test]
async fn test_early_ready_does_not_spin() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let polls = Arc::new(AtomicUsize::new(0));
    let mut session = SessionBuilder::new(config())
        .frame_provider(Box::new(EagerFrames {
            polls: Arc::clone(&polls),
        }))
        .mask_provider(masks)
        .build()
        .unwrap();

    let waited = tokio::time::timeout(Duration::from_millis(50), session.start()).await;

    assert!(waited.is_err());
    assert!(polls.load(Ordering::SeqCst) <= 20, "polled {} times", polls.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_waiting_for_frame_source() {
    let (masks, _) = ScriptedMasks::new(|_| Reply::Value(1.0));
    let notify = Arc::new(Notify::new());
    let flag = Arc::new(AtomicUsize::new(0));
    let mut session = SessionBuilder::new(config())
        .frame_provider(Box::new(TestFrames::delayed(W, H, notify, flag)))
        .mask_provider(masks)
        .build()
        .unwrap();
    let stop = session.stop_handle();

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.stop();
    };
    let (started, _) = tokio::join!(session.start(), stopper);

    started.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_run_keeps_ticking_through_failures() {
    let (masks, calls) = ScriptedMasks::new(|call| {
        if call % 2 == 0 {
            Reply::Fail
        } else {
            Reply::Value(1.0)
        }
    });
    let mut session = SessionBuilder::new(config())
        .frame_provider(Box::new(TestFrames::new(W, H)))
        .mask_provider(masks)
        .refresh_rate(50)
        .build()
        .unwrap();
    let stop = session.stop_handle();

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        stop.stop();
    };
    let (ran, _) = tokio::join!(session.run(), stopper);

    ran.unwrap();
    let stats = session.stats();
    assert!(stats.ticks >= 40, "only {} ticks", stats.ticks);
    assert!(stats.mask_failures > 0);
    assert!(stats.mask_successes > 0);
    assert!(calls.load(Ordering::SeqCst) > 2);
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.output().generation(), stats.ticks);
}
