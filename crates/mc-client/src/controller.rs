//! Machine lifecycle: start, poll until running, count down, terminate.
//!
//! ```text
//! Idle ──start──▶ Starting ──accepted──▶ Polling ──RUNNING──▶ Running
//!   ▲                │ rejected             │ failure            │ terminate
//!   └────────────────┴──────────────────────┘                    ▼
//!   └───────────────────────────────ok─────────────────── Terminating
//! ```
//!
//! Every transition goes through the view lock, which also holds the poll
//! epoch. Starting a poll loop, issuing a start or terminate, and completing
//! a terminate all bump the epoch, so a status answer that arrives for an
//! older loop is dropped instead of repainting the screen. While a start or
//! terminate is in flight no poll loop touches the screen.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use machines_api::{MachineDetail, MachineLog, Reply};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::SessionContext;
use crate::timer::{DEFAULT_TICK_INTERVAL, ExpiryTimer};
use crate::ui::{Alert, DetailView, Screen, UiCommand, UiSink, render, render_expiry};
use crate::{Action, Error, MachineBackend, Result};

const START_FAILED: &str = "Failed to process your request.";
const STATUS_FAILED: &str = "Failed to update machine status. Please ask the administrator.";
const TERMINATE_FAILED: &str = "Failed to terminate machine.";

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Wait before each status check that follows a start or a non-running answer.
    pub poll_delay: Duration,
    pub tick_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_secs(5),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Polling,
    Running,
    Terminating,
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Running { expires_at: DateTime<Utc> },
    /// The backend answered `success: false`: there is no machine.
    NoMachine,
    /// Transport failure or an error status.
    Failed,
    /// A newer loop or a terminate took over.
    Superseded,
}

enum StatusAnswer {
    Running { log: MachineLog, detail: MachineDetail },
    Provisioning(MachineDetail),
    NoMachine(Option<String>),
}

struct View {
    screen: Screen,
    epoch: u64,
}

/// Drives one challenge's machine. Cheap to clone.
#[derive(Clone)]
pub struct MachineController {
    inner: Arc<Inner>,
}

struct Inner {
    challenge_id: i64,
    backend: Arc<dyn MachineBackend>,
    ui: Arc<dyn UiSink>,
    timer: ExpiryTimer,
    settings: ControllerSettings,
    view: Mutex<View>,
    phase: watch::Sender<Phase>,
}

impl MachineController {
    pub fn new(
        challenge_id: i64,
        backend: Arc<dyn MachineBackend>,
        ui: Arc<dyn UiSink>,
        session: SessionContext,
        settings: ControllerSettings,
    ) -> Self {
        let timer = ExpiryTimer::new(session, settings.tick_interval);
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            inner: Arc::new(Inner {
                challenge_id,
                backend,
                ui,
                timer,
                settings,
                view: Mutex::new(View {
                    screen: Screen::default(),
                    epoch: 0,
                }),
                phase,
            }),
        }
    }

    pub fn challenge_id(&self) -> i64 {
        self.inner.challenge_id
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    pub fn screen(&self) -> Screen {
        self.lock().screen.clone()
    }

    fn lock(&self) -> MutexGuard<'_, View> {
        self.inner.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.inner.phase.send_replace(phase);
        if previous != phase {
            debug!(challenge_id = self.inner.challenge_id, ?previous, ?phase, "machine phase");
        }
    }

    fn paint(&self, view: &View) {
        self.inner.ui.apply(&render(&view.screen));
    }

    fn alert(&self, body: impl Into<String>) {
        self.inner.ui.apply(&[UiCommand::Alert(Alert::failed(body))]);
    }

    /// Page (re)initialisation.
    ///
    /// Cancels any timer a previous controller in this session left armed,
    /// shows the Start button as loading and resynchronises with the backend
    /// through one non-alerting status check.
    pub fn initialize(&self) -> JoinHandle<PollOutcome> {
        if self.inner.timer.cancel() {
            debug!(challenge_id = self.inner.challenge_id, "cancelled timer left by previous page");
        }
        {
            let mut view = self.lock();
            view.screen = Screen::resyncing();
            self.paint(&view);
            self.set_phase(Phase::Polling);
        }

        let this = self.clone();
        tokio::spawn(async move { this.check_status(true).await })
    }

    /// Request a machine. Returns once the backend accepted or refused; the
    /// status polling that follows runs in the background.
    pub async fn start(&self) -> Result<()> {
        {
            let mut view = self.lock();
            if !view.screen.start.is_actionable() {
                return Err(Error::Busy(Action::Start));
            }
            view.epoch += 1;
            view.screen.start_requested();
            self.paint(&view);
            self.set_phase(Phase::Starting);
        }

        let challenge_id = self.inner.challenge_id;
        match self.inner.backend.start_machine(challenge_id).await {
            Ok(reply) if reply.is_success() => {
                info!(challenge_id, "machine start accepted");
                let epoch = {
                    let mut view = self.lock();
                    view.epoch += 1;
                    self.set_phase(Phase::Polling);
                    view.epoch
                };
                let this = self.clone();
                let delay = self.inner.settings.poll_delay;
                tokio::spawn(async move { this.poll(epoch, false, Some(delay)).await });
                Ok(())
            }
            Ok(reply) => {
                let message = reply.error_message();
                warn!(challenge_id, status = %reply.status, ?message, "machine start rejected");
                let message = message.unwrap_or_else(|| START_FAILED.to_string());
                self.start_failed(&message);
                Err(Error::Rejected {
                    action: Action::Start,
                    status: reply.status,
                    message,
                })
            }
            Err(e) => {
                warn!(challenge_id, error = %e, "machine start failed");
                self.start_failed(START_FAILED);
                Err(e.into())
            }
        }
    }

    fn start_failed(&self, message: &str) {
        self.alert(message);
        let mut view = self.lock();
        view.screen.start_failed();
        self.paint(&view);
        self.set_phase(Phase::Idle);
    }

    /// Poll the backend until the machine runs, is gone, or the check fails.
    ///
    /// A passive check never raises an alert; it is used for page
    /// initialisation where the user did not ask for anything.
    pub async fn check_status(&self, passive: bool) -> PollOutcome {
        let epoch = {
            let mut view = self.lock();
            view.epoch += 1;
            view.epoch
        };
        self.poll(epoch, passive, None).await
    }

    async fn poll(&self, epoch: u64, passive: bool, first_delay: Option<Duration>) -> PollOutcome {
        let challenge_id = self.inner.challenge_id;
        let was_running = {
            let view = self.lock();
            let phase = self.phase();
            if view.epoch != epoch || Self::action_in_flight(phase) {
                debug!(challenge_id, epoch, ?phase, "status check superseded before it began");
                return PollOutcome::Superseded;
            }
            if phase != Phase::Running {
                self.set_phase(Phase::Polling);
            }
            phase == Phase::Running
        };

        let mut delay = first_delay;
        loop {
            if let Some(d) = delay.take() {
                tokio::time::sleep(d).await;
            }
            if self.lock().epoch != epoch {
                return PollOutcome::Superseded;
            }

            let answer = match self.inner.backend.machine_status(challenge_id).await {
                Ok(reply) => Self::interpret(&reply),
                Err(e) => Err(e.into()),
            };

            let mut view = self.lock();
            if view.epoch != epoch || Self::action_in_flight(self.phase()) {
                debug!(challenge_id, epoch, "dropping stale status answer");
                return PollOutcome::Superseded;
            }

            match answer {
                Ok(StatusAnswer::Running { log, detail }) => {
                    let expires_at = log.time_end;
                    info!(
                        challenge_id,
                        machine = ?log.id,
                        public_ip = %detail.public_ip,
                        launch_type = ?detail.launch_type,
                        task_arn = ?detail.task_arn,
                        containers = detail.containers.len(),
                        %expires_at,
                        "machine running"
                    );
                    self.arm_timer(expires_at);
                    view.screen.running(DetailView::from_detail(&detail));
                    self.paint(&view);
                    self.set_phase(Phase::Running);
                    return PollOutcome::Running { expires_at };
                }
                Ok(StatusAnswer::Provisioning(detail)) => {
                    debug!(
                        challenge_id,
                        last_status = ?detail.last_status,
                        desired_status = ?detail.desired_status,
                        "machine not running yet"
                    );
                    delay = Some(self.inner.settings.poll_delay);
                }
                Ok(StatusAnswer::NoMachine(reason)) => {
                    info!(challenge_id, ?reason, "no active machine");
                    self.inner.timer.cancel();
                    view.screen.terminated();
                    self.paint(&view);
                    self.set_phase(Phase::Idle);
                    return PollOutcome::NoMachine;
                }
                Err(e) => {
                    warn!(challenge_id, passive, error = %e, "machine status check failed");
                    if was_running {
                        self.set_phase(Phase::Running);
                    } else {
                        view.screen.idle();
                        self.paint(&view);
                        self.set_phase(Phase::Idle);
                    }
                    drop(view);
                    if !passive {
                        self.alert(STATUS_FAILED);
                    }
                    return PollOutcome::Failed;
                }
            }
        }
    }

    fn action_in_flight(phase: Phase) -> bool {
        matches!(phase, Phase::Starting | Phase::Terminating)
    }

    fn interpret(reply: &Reply) -> Result<StatusAnswer> {
        if !reply.status.is_success() {
            return Err(Error::Rejected {
                action: Action::Status,
                status: reply.status,
                message: reply.error_message().unwrap_or_default(),
            });
        }
        if !reply.body.success {
            return Ok(StatusAnswer::NoMachine(reply.error_message()));
        }

        let log: MachineLog = reply.data("machine status")?;
        let detail = log.decode_detail()?;
        if detail.is_running() {
            Ok(StatusAnswer::Running { log, detail })
        } else {
            Ok(StatusAnswer::Provisioning(detail))
        }
    }

    fn arm_timer(&self, expires_at: DateTime<Utc>) {
        let on_tick: Weak<Inner> = Arc::downgrade(&self.inner);
        let on_expire = on_tick.clone();

        self.inner.timer.arm(
            expires_at,
            move |timer_id: u64, label: &str| {
                if let Some(inner) = on_tick.upgrade() {
                    MachineController { inner }.show_expiry(timer_id, label);
                }
            },
            move || {
                if let Some(inner) = on_expire.upgrade() {
                    let controller = MachineController { inner };
                    tokio::spawn(async move {
                        if let Err(e) = controller.terminate().await {
                            warn!(error = %e, "automatic terminate failed");
                        }
                    });
                }
            },
        );
    }

    fn show_expiry(&self, timer_id: u64, label: &str) {
        let mut view = self.lock();
        // Cancellation happens under this lock; a tick that lost the race is dropped.
        if !self.inner.timer.is_current(timer_id) {
            return;
        }
        view.screen.expiry = label.to_string();
        self.inner.ui.apply(&[render_expiry(label)]);
    }

    /// Terminate the machine. Also invoked by the expiry timer.
    pub async fn terminate(&self) -> Result<()> {
        let prior = {
            let mut view = self.lock();
            if !view.screen.terminate.is_actionable() {
                return Err(Error::Busy(Action::Terminate));
            }
            view.epoch += 1;
            view.screen.terminate_requested();
            self.paint(&view);
            let prior = self.phase();
            self.set_phase(Phase::Terminating);
            prior
        };

        let challenge_id = self.inner.challenge_id;
        match self.inner.backend.terminate_machine(challenge_id).await {
            Ok(reply) if reply.is_success() => {
                info!(challenge_id, "machine terminated");
                let mut view = self.lock();
                view.epoch += 1;
                self.inner.timer.cancel();
                view.screen.terminated();
                self.paint(&view);
                self.set_phase(Phase::Idle);
                Ok(())
            }
            Ok(reply) => {
                let message = reply.error_message();
                warn!(challenge_id, status = %reply.status, ?message, "machine terminate rejected");
                let message = message.unwrap_or_else(|| TERMINATE_FAILED.to_string());
                self.terminate_failed(&message, prior);
                Err(Error::Rejected {
                    action: Action::Terminate,
                    status: reply.status,
                    message,
                })
            }
            Err(e) => {
                warn!(challenge_id, error = %e, "machine terminate failed");
                self.terminate_failed(TERMINATE_FAILED, prior);
                Err(e.into())
            }
        }
    }

    fn terminate_failed(&self, message: &str, prior: Phase) {
        self.alert(message);
        let mut view = self.lock();
        view.screen.terminate_failed();
        self.paint(&view);
        self.set_phase(prior);
    }
}
