//! Controller loop: the single owner of every calibration session.
//!
//! One task multiplexes UI commands, the range session's poll and countdown
//! timers, the finetune hold-to-repeat deadline and the statistics tick.
//! Device round-trips are awaited inline, so commands that arrive meanwhile
//! wait their turn in the channel.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::calibration::{auto_calibrate, CalibrationStep, CenterCalibrationWizard, RangeCalibrationSession};
use crate::config::EngineConfig;
use crate::device::CalibrationDevice;
use crate::error::{CalibError, Result};
use crate::finetune::{FinetuneEffect, FinetuneEngine};
use crate::histogram::PolarHistogram;
use crate::input::{InputFrame, Stick};
use crate::timing::{TimingAnalyzer, TimingStats};
use crate::web::state::{AnalysisView, StateSnapshot, UiState, WebCommand};

/// Intervals shown in the analysis graph.
const GRAPH_POINTS: usize = 100;

pub enum ActiveSession {
    Range(RangeCalibrationSession),
    Center(CenterCalibrationWizard),
    Finetune(FinetuneEngine),
}

impl ActiveSession {
    pub fn name(&self) -> &'static str {
        match self {
            ActiveSession::Range(_) => "range",
            ActiveSession::Center(_) => "center",
            ActiveSession::Finetune(_) => "finetune",
        }
    }
}

/// Timers owned by an open range session.
struct RangeTimers {
    poll: Interval,
    countdown: Interval,
}

impl RangeTimers {
    fn new(poll_period: Duration) -> Self {
        Self {
            poll: periodic(poll_period),
            countdown: periodic(Duration::from_secs(1)),
        }
    }
}

fn periodic(period: Duration) -> Interval {
    let mut iv = interval_at(Instant::now() + period, period);
    iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
    iv
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// What woke the loop.
enum Wake {
    Command(Option<WebCommand>),
    RangePoll,
    RangeCountdown,
    Repeat,
    Stats,
}

pub struct Controller<D> {
    device: D,
    cfg: EngineConfig,
    session: Option<ActiveSession>,
    /// Finetune engine waiting for a range calibration started from it.
    parked: Option<FinetuneEngine>,
    range_timers: Option<RangeTimers>,
    histograms: [PolarHistogram; 2],
    timing: TimingAnalyzer,
    /// Statistics tick; present while the analysis view is open.
    analysis: Option<Interval>,
    stats: Option<TimingStats>,
    /// One-shot warning for a broken stored range calibration.
    range_suspect_armed: bool,
    ui: Arc<UiState>,
    events: broadcast::Sender<String>,
}

impl<D: CalibrationDevice> Controller<D> {
    pub fn new(device: D, cfg: EngineConfig, ui: Arc<UiState>, events: broadcast::Sender<String>) -> Self {
        Self {
            device,
            timing: TimingAnalyzer::new(&cfg.timing),
            cfg,
            session: None,
            parked: None,
            range_timers: None,
            histograms: [PolarHistogram::new(), PolarHistogram::new()],
            analysis: None,
            stats: None,
            range_suspect_armed: true,
            ui,
            events,
        }
    }

    pub fn session(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    /// Run until the command channel closes.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<WebCommand>) {
        info!("[CTRL] Controller loop started");
        loop {
            let repeat_at = match &self.session {
                Some(ActiveSession::Finetune(engine)) => engine.next_repeat_deadline(),
                _ => None,
            };

            let (poll, countdown) = match self.range_timers.as_mut() {
                Some(t) => (Some(&mut t.poll), Some(&mut t.countdown)),
                None => (None, None),
            };

            let wake = tokio::select! {
                cmd = cmd_rx.recv() => Wake::Command(cmd),
                _ = tick(poll) => Wake::RangePoll,
                _ = tick(countdown) => Wake::RangeCountdown,
                _ = sleep_until(repeat_at) => Wake::Repeat,
                _ = tick(self.analysis.as_mut()) => Wake::Stats,
            };

            match wake {
                Wake::Command(Some(cmd)) => self.handle(cmd).await,
                Wake::Command(None) => break,
                Wake::RangePoll => self.on_range_poll(),
                Wake::RangeCountdown => self.on_range_countdown(),
                Wake::Repeat => self.on_repeat().await,
                Wake::Stats => self.stats = self.timing.compute_stats(),
            }
            self.publish();
        }
        info!("[CTRL] Command channel closed, stopping");
    }

    /// Execute one command, reporting failures to the UI.
    pub async fn handle(&mut self, cmd: WebCommand) {
        // Frames act on whatever session is open; failures belong to it.
        let session = match cmd {
            WebCommand::Input(_) | WebCommand::ClearHistograms => {
                self.session().map_or(cmd.session(), ActiveSession::name)
            }
            _ => cmd.session(),
        };
        if !matches!(cmd, WebCommand::Input(_)) {
            debug!("[CTRL] {cmd:?}");
        }
        if let Err(e) = self.execute(cmd).await {
            self.fail(session, e);
        }
    }

    async fn execute(&mut self, cmd: WebCommand) -> Result<()> {
        match cmd {
            WebCommand::Input(frame) => self.on_input(frame).await,
            WebCommand::ClearHistograms => {
                for h in &mut self.histograms {
                    h.reset();
                }
                if let Some(ActiveSession::Finetune(engine)) = &mut self.session {
                    engine.clear_histograms();
                }
                Ok(())
            }

            WebCommand::RangeOpen => {
                self.ensure_idle()?;
                let session = RangeCalibrationSession::open(&mut self.device, &self.cfg.range).await?;
                self.session = Some(ActiveSession::Range(session));
                self.range_timers = Some(RangeTimers::new(Duration::from_millis(self.cfg.range.poll_interval_ms)));
                Ok(())
            }
            WebCommand::RangeClose => {
                let Some(ActiveSession::Range(range)) = &self.session else {
                    return Err(CalibError::NoSession("range"));
                };
                let message = range.finish(&mut self.device).await?;
                let resume = self.parked.take();
                self.end_session();
                self.range_suspect_armed = true;
                if let Some(mut engine) = resume {
                    engine.reload(&mut self.device).await?;
                    info!("[FINETUNE] Resumed after range calibration");
                    self.session = Some(ActiveSession::Finetune(engine));
                }
                self.emit_outcome("range", true, &message);
                Ok(())
            }

            WebCommand::CenterOpen => {
                self.ensure_idle()?;
                info!("[CENTER] Wizard opened");
                self.session = Some(ActiveSession::Center(CenterCalibrationWizard::new()));
                Ok(())
            }
            WebCommand::CenterNext => {
                let Some(ActiveSession::Center(wizard)) = &mut self.session else {
                    return Err(CalibError::NoSession("center"));
                };
                if wizard.advance(&mut self.device).await? == CalibrationStep::Done {
                    self.end_session();
                    self.emit_outcome("center", true, "Stick center calibration completed");
                }
                Ok(())
            }
            WebCommand::CenterCancel => match self.session.take() {
                Some(ActiveSession::Center(wizard)) => {
                    wizard.cancel();
                    self.end_session();
                    self.emit_outcome("center", false, "Stick center calibration cancelled");
                    Ok(())
                }
                other => {
                    self.session = other;
                    Err(CalibError::NoSession("center"))
                }
            },
            WebCommand::CenterAuto => {
                self.ensure_idle()?;
                self.run_auto_center().await?;
                self.emit_outcome("center", true, "Stick center calibration completed");
                Ok(())
            }

            WebCommand::FinetuneOpen => {
                self.ensure_idle()?;
                let engine = FinetuneEngine::open(&mut self.device, &self.cfg.finetune).await?;
                self.session = Some(ActiveSession::Finetune(engine));
                Ok(())
            }
            WebCommand::FinetuneQuickCenter => {
                self.finetune()?;
                self.run_auto_center().await?;
                let Some(ActiveSession::Finetune(engine)) = &mut self.session else {
                    return Err(CalibError::NoSession("finetune"));
                };
                engine.reload(&mut self.device).await?;
                self.emit_outcome("center", true, "Stick center calibration completed");
                Ok(())
            }
            WebCommand::FinetuneQuickRange => {
                self.finetune()?.suspend();
                let range = RangeCalibrationSession::open(&mut self.device, &self.cfg.range).await?;
                if let Some(ActiveSession::Finetune(engine)) = self.session.replace(ActiveSession::Range(range)) {
                    self.parked = Some(engine);
                }
                self.range_timers = Some(RangeTimers::new(Duration::from_millis(self.cfg.range.poll_interval_ms)));
                Ok(())
            }
            WebCommand::FinetuneMode(mode) => {
                self.finetune()?.set_mode(mode);
                Ok(())
            }
            WebCommand::FinetuneStick(stick) => {
                self.finetune()?.select_stick(stick);
                Ok(())
            }
            WebCommand::FinetuneStepSize(size) => {
                self.finetune()?.set_step_size(size);
                Ok(())
            }
            WebCommand::FinetuneStep {
                stick,
                target,
                direction,
            } => {
                let engine = self.finetune()?;
                let step = engine.step_size();
                let effect = engine.apply_step(stick, target, direction, step)?;
                self.apply_effect(effect).await
            }
            WebCommand::FinetuneSet { param, value } => {
                let effect = self.finetune()?.set_parameter(param, value);
                self.apply_effect(effect).await
            }
            WebCommand::SlackStart(stick) => self.finetune()?.begin_slack(stick),
            WebCommand::Slack { stick, position } => {
                self.finetune()?.apply_slack(stick, position)?;
                Ok(())
            }
            WebCommand::SlackRelease(stick) => {
                let effect = self.finetune()?.release_slack(stick)?;
                self.apply_effect(effect).await
            }
            WebCommand::SlackReset(stick) => {
                let effect = self.finetune()?.reset_slack(stick)?;
                self.apply_effect(effect).await
            }
            WebCommand::FinetuneSave => {
                let set = self.finetune()?.commit()?;
                self.device.write_parameter_set(&set).await?;
                self.end_session();
                info!("[FINETUNE] Saved {:?}", set.values());
                self.emit_outcome("finetune", true, "Changes written");
                Ok(())
            }
            WebCommand::FinetuneCancel => {
                let original = self.finetune()?.cancel();
                if let Some(original) = original {
                    self.device.write_parameter_set(&original).await?;
                }
                self.end_session();
                self.emit_outcome("finetune", false, "Changes discarded");
                Ok(())
            }

            WebCommand::AnalysisStart => {
                self.timing.reset();
                self.stats = None;
                self.analysis = Some(periodic(Duration::from_millis(self.cfg.timing.stats_interval_ms)));
                info!("[TIMING] Analysis started");
                Ok(())
            }
            WebCommand::AnalysisStop => {
                self.analysis = None;
                info!("[TIMING] Analysis stopped");
                Ok(())
            }
        }
    }

    async fn on_input(&mut self, frame: InputFrame) -> Result<()> {
        if self.analysis.is_some() {
            self.timing.on_input(frame.timestamp);
        }
        for stick in Stick::BOTH {
            let s = frame.stick(stick);
            self.histograms[stick.index()].sample(s.x, s.y);
        }

        match &mut self.session {
            None => {
                if self.range_suspect_armed && Stick::BOTH.iter().any(|s| frame.stick(*s).is_saturated_corner()) {
                    self.range_suspect_armed = false;
                    warn!("[RANGE] Stick reports a saturated corner; range calibration looks broken");
                    self.emit_warning("range_calibration_suspect", None);
                }
                Ok(())
            }
            Some(ActiveSession::Range(range)) => {
                for stick in Stick::BOTH {
                    range.on_sample(stick, frame.stick(stick));
                }
                Ok(())
            }
            Some(ActiveSession::Center(_)) => Ok(()),
            Some(ActiveSession::Finetune(engine)) => {
                let effect = engine.handle_input(&frame, Instant::now());
                self.apply_effect(effect).await
            }
        }
    }

    fn on_range_poll(&mut self) {
        match &mut self.session {
            Some(ActiveSession::Range(range)) => {
                range.poll();
            }
            _ => self.range_timers = None,
        }
    }

    fn on_range_countdown(&mut self) {
        match &mut self.session {
            Some(ActiveSession::Range(range)) => {
                range.tick_countdown();
            }
            _ => self.range_timers = None,
        }
    }

    async fn on_repeat(&mut self) {
        let Some(ActiveSession::Finetune(engine)) = &mut self.session else {
            return;
        };
        if let Some(effect) = engine.fire_repeat(Instant::now()) {
            if let Err(e) = self.apply_effect(effect).await {
                self.fail("finetune", e);
            }
        }
    }

    async fn run_auto_center(&mut self) -> Result<()> {
        info!("[CENTER] Automatic calibration started");
        let events = self.events.clone();
        auto_calibrate(&mut self.device, |progress| {
            let msg = json!({ "type": "progress", "session": "center", "progress": progress });
            let _ = events.send(msg.to_string());
        })
        .await
    }

    async fn apply_effect(&mut self, effect: FinetuneEffect) -> Result<()> {
        if let Some(warning) = effect.warning {
            self.emit_warning(&serde_json::to_value(warning).unwrap_or_default(), None);
        }
        if let Some(set) = effect.write {
            self.device.write_parameter_set(&set).await?;
        }
        Ok(())
    }

    fn finetune(&mut self) -> Result<&mut FinetuneEngine> {
        match &mut self.session {
            Some(ActiveSession::Finetune(engine)) => Ok(engine),
            _ => Err(CalibError::NoSession("finetune")),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match &self.session {
            Some(s) => Err(CalibError::SessionActive(s.name())),
            None => Ok(()),
        }
    }

    fn end_session(&mut self) {
        self.session = None;
        self.parked = None;
        self.range_timers = None;
    }

    /// Device and lock failures end the session they happened in, along with
    /// a finetune session that launched it; anything else just rejects the
    /// command.
    fn fail(&mut self, session: &'static str, e: CalibError) {
        match e {
            CalibError::DeviceUnavailable(_) | CalibError::PreconditionFailed(_) => {
                error!("[CTRL] {session}: {e}");
                let owns = self.session().map(ActiveSession::name);
                let launched_from_finetune = matches!(session, "center" | "range") && owns == Some("finetune");
                if owns == Some(session) || launched_from_finetune {
                    self.end_session();
                }
                self.emit_outcome(session, false, &e.to_string());
            }
            _ => {
                warn!("[CTRL] {session}: {e}");
                self.emit_warning("command_rejected", Some(&e.to_string()));
            }
        }
    }

    fn emit(&self, msg: serde_json::Value) {
        // No subscribers just means no UI is connected.
        let _ = self.events.send(msg.to_string());
    }

    fn emit_outcome(&self, session: &str, success: bool, message: &str) {
        self.emit(json!({
            "type": "outcome",
            "session": session,
            "success": success,
            "message": message,
        }));
    }

    fn emit_warning(&self, kind: impl serde::Serialize, message: Option<&str>) {
        self.emit(json!({ "type": "warning", "kind": kind, "message": message }));
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            session: self.session().map(ActiveSession::name),
            histograms: [self.histograms[0].to_vec(), self.histograms[1].to_vec()],
            range: match &self.session {
                Some(ActiveSession::Range(range)) => Some(range.view()),
                _ => None,
            },
            center_step: match &self.session {
                Some(ActiveSession::Center(wizard)) => Some(wizard.step()),
                _ => None,
            },
            finetune: match &self.session {
                Some(ActiveSession::Finetune(engine)) => Some(engine.view()),
                _ => None,
            },
            analysis: self.analysis.as_ref().map(|_| AnalysisView {
                stats: self.stats,
                intervals: self.timing.recent_intervals(GRAPH_POINTS),
            }),
        }
    }

    fn publish(&self) {
        self.ui.update(self.snapshot());
    }
}
