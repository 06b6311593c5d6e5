use nimbus_client::{
    ShadePolarity, ShadePosition, ShadeStatus, StatusEvent, StatusPath, StatusStoreError,
    StatusStoreTrait, StatusSubscription,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::shade::countdown::{Countdown, DEFAULT_SYNC_INTERVAL, Tick, format_remaining};
use crate::shade::error::{ControllerError, validate_minutes};
use crate::shade::synchronizer::StatusSynchronizer;
use crate::shade::view::ViewEvent;
use crate::web::metrics::Metrics;
use crate::web::state::{ShadeSnapshot, SharedShadeState};

const EVENT_CAPACITY: usize = 1024;
const COMMAND_CAPACITY: usize = 32;

/// What the retract button does when the shade is already retracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetractPolicy {
    /// Extend the shade and start the default timer.
    #[default]
    Toggle,
    /// Nothing to do.
    RetractOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub polarity: ShadePolarity,
    pub retract_policy: RetractPolicy,
    /// Timer length used when the retract button extends the shade.
    pub default_extend_minutes: u32,
    /// Remaining time is pushed to the store whenever it is a multiple of this.
    pub sync_interval: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            polarity: ShadePolarity::default(),
            retract_policy: RetractPolicy::default(),
            default_extend_minutes: 10,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// User intents accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    SetAutomaticMode(bool),
    SetManualShadeMinutes(u32),
    SetRainStatus(bool),
    Extend(u32),
    Retract,
}

/// Commands sent to the worker task
#[derive(Debug)]
enum WorkerCommand {
    Intent {
        intent: Intent,
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    Shutdown,
}

/// How a snapshot's countdown relates to what this client last saw or wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observation {
    /// Predates a countdown write of ours that has not echoed back yet.
    Stale,
    Unchanged,
    Changed(Option<u64>),
}

/// Tracks the remote `countdownModel` so that our own writes are not mistaken
/// for changes made by another client.
#[derive(Debug, Default)]
struct RemoteCountdown {
    confirmed: Option<u64>,
    pending: Option<Option<u64>>,
}

impl RemoteCountdown {
    fn expect_echo(&mut self, seconds_left: Option<u64>) {
        self.pending = Some(seconds_left);
    }

    fn clear_pending(&mut self) {
        self.pending = None;
    }

    fn observe(&mut self, remote: Option<u64>) -> Observation {
        match self.pending {
            Some(expected) if expected == remote => {
                self.pending = None;
                self.confirmed = remote;
                Observation::Unchanged
            }
            Some(_) => Observation::Stale,
            None if self.confirmed == remote => Observation::Unchanged,
            None => {
                self.confirmed = remote;
                Observation::Changed(remote)
            }
        }
    }
}

struct ShadeWorker<S: StatusStoreTrait> {
    sync: StatusSynchronizer<S>,
    config: ControllerConfig,
    countdown: Countdown,
    remote: RemoteCountdown,
    state: SharedShadeState,
    events: broadcast::Sender<ViewEvent>,
    /// Set when a countdown (re)starts so the next tick is a full second away.
    tick_reset: bool,
}

impl<S: StatusStoreTrait + 'static> ShadeWorker<S> {
    fn new(
        sync: StatusSynchronizer<S>,
        config: ControllerConfig,
        state: SharedShadeState,
        events: broadcast::Sender<ViewEvent>,
    ) -> Self {
        Self {
            sync,
            countdown: Countdown::new(config.sync_interval),
            config,
            remote: RemoteCountdown::default(),
            state,
            events,
            tick_reset: false,
        }
    }

    /// Main worker loop - handles snapshots, intents and the one-second tick
    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<WorkerCommand>,
        mut subscription: StatusSubscription,
    ) {
        let period = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut subscribed = true;

        loop {
            tokio::select! {
                // Snapshots first: an intent must see every write acknowledged before it was sent.
                biased;

                event = subscription.next(), if subscribed => {
                    match event {
                        Some(event) => self.handle_status_event(event).await,
                        None => {
                            warn!("Status subscription closed");
                            subscribed = false;
                        }
                    }
                }

                cmd = receiver.recv() => {
                    match cmd {
                        Some(WorkerCommand::Intent { intent, reply }) => {
                            debug!("Handling intent {intent:?}");
                            let result = self.handle_intent(intent).await;
                            if let Err(e) = &result {
                                self.report_rejection(intent, e);
                            }
                            let _ = reply.send(result);
                        }
                        Some(WorkerCommand::Shutdown) | None => {
                            info!("Shade controller shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => self.handle_tick().await,
            }

            if std::mem::take(&mut self.tick_reset) {
                ticker.reset();
            }
        }
    }

    async fn handle_intent(&mut self, intent: Intent) -> Result<(), ControllerError> {
        match intent {
            Intent::SetAutomaticMode(enabled) => self.handle_automatic_mode(enabled).await,
            Intent::SetManualShadeMinutes(minutes) => self.handle_manual_shade(minutes).await,
            Intent::SetRainStatus(raining) => {
                let result = self.sync.set_rain_status(raining).await;
                Ok(self.field_result(StatusPath::RainStatus, result)?)
            }
            Intent::Extend(minutes) => self.handle_extend(minutes).await,
            Intent::Retract => self.handle_retract().await,
        }
    }

    /// Store errors are reported where the write fails.
    fn report_rejection(&self, intent: Intent, error: &ControllerError) {
        let reason = match error {
            ControllerError::Store(_) => return,
            ControllerError::Validation(_) => "validation",
            ControllerError::AutomaticModeActive => "automatic_mode",
            ControllerError::StatusUnavailable => "unavailable",
            ControllerError::Closed => "closed",
        };
        warn!("Rejected {intent:?}: {error}");
        Metrics::inc_rejected_intents(reason);
        self.emit(ViewEvent::error(error.to_string()));
    }

    async fn handle_status_event(&mut self, event: StatusEvent) {
        let status = match self.sync.reconcile(event).cloned() {
            Ok(status) => status,
            Err(e) => {
                self.state.set_error(Some(e.to_string()));
                self.emit(ViewEvent::error(e.to_string()));
                return;
            }
        };

        self.state.set_status(status.clone());
        self.state.set_error(None);
        self.emit(ViewEvent::AutomaticMode {
            enabled: status.automatic_mode,
        });
        self.emit(ViewEvent::ManualShade {
            minutes: status.manual_shade,
        });
        self.emit(ViewEvent::rain(status.rain_status));
        self.emit(ViewEvent::shade(status.position(self.config.polarity)));
        self.emit(ViewEvent::Status {
            status: status.clone(),
        });

        self.reconcile_countdown(&status).await;
    }

    async fn reconcile_countdown(&mut self, status: &ShadeStatus) {
        let observation = self.remote.observe(status.seconds_left());
        debug!("Remote countdown {:?}: {observation:?}", status.seconds_left());

        if status.automatic_mode {
            if self.countdown.stop() {
                info!("Automatic mode is on, stopping countdown");
                self.publish_countdown();
            }
            if let Observation::Changed(Some(_)) = observation {
                info!("Removing countdown left behind in automatic mode");
                self.remote.expect_echo(None);
                let result = self.sync.cancel_countdown().await;
                if result.is_err() {
                    self.remote.clear_pending();
                }
                let _ = self.field_result(StatusPath::CountdownModel, result);
            }
            return;
        }

        match observation {
            Observation::Stale | Observation::Unchanged => {}
            Observation::Changed(None) | Observation::Changed(Some(0)) => {
                if self.countdown.stop() {
                    info!("Countdown cancelled remotely");
                    self.publish_countdown();
                }
            }
            Observation::Changed(Some(seconds_left)) => {
                info!(
                    "Countdown set remotely to {}",
                    format_remaining(seconds_left)
                );
                self.countdown.start(seconds_left);
                self.tick_reset = true;
                self.publish_countdown();
            }
        }
    }

    async fn handle_tick(&mut self) {
        match self.countdown.tick() {
            Tick::Idle => {}
            Tick::Running { seconds_left, sync } => {
                self.publish_countdown();
                if sync {
                    self.remote.expect_echo(Some(seconds_left));
                    let result = self.sync.update_countdown(seconds_left).await;
                    if result.is_err() {
                        self.remote.clear_pending();
                    }
                    let _ = self.field_result(StatusPath::CountdownSecondsLeft, result);
                }
            }
            Tick::Finished => self.finish_countdown().await,
        }
    }

    async fn finish_countdown(&mut self) {
        info!("Countdown finished");
        self.publish_countdown();
        Metrics::inc_countdown_finished();

        self.remote.expect_echo(None);
        let result = self.sync.cancel_countdown().await;
        if result.is_err() {
            self.remote.clear_pending();
        }
        let _ = self.field_result(StatusPath::CountdownModel, result);

        let result = self.sync.set_extend_button(false).await;
        let _ = self.field_result(StatusPath::ExtendButton, result);

        let extended = self
            .sync
            .mirror()
            .is_some_and(|s| s.position(self.config.polarity) == ShadePosition::Extended);
        if extended {
            let raw = self.config.polarity.encode(ShadePosition::Retracted);
            let result = self.sync.set_shade_status(raw).await;
            if self.field_result(StatusPath::ShadeStatus, result).is_ok() {
                info!("Shade retracted after countdown");
                self.emit(ViewEvent::notice("Timer finished. Shade retracted."));
            }
        }

        self.countdown.stop();
        self.publish_countdown();
    }

    async fn handle_automatic_mode(&mut self, enabled: bool) -> Result<(), ControllerError> {
        let status = self.require_status()?;
        let result = self.sync.set_automatic_mode(enabled).await;
        self.field_result(StatusPath::AutomaticMode, result)?;
        if enabled {
            self.cancel_active_countdown(&status).await?;
            self.emit(ViewEvent::notice("Automatic mode enabled"));
        } else {
            self.emit(ViewEvent::notice("Manual mode enabled"));
        }
        Ok(())
    }

    async fn handle_manual_shade(&mut self, minutes: u32) -> Result<(), ControllerError> {
        let minutes = validate_minutes(minutes)?;
        self.require_status()?;
        let result = self.sync.set_manual_shade(minutes).await;
        Ok(self.field_result(StatusPath::ManualShade, result)?)
    }

    async fn handle_extend(&mut self, minutes: u32) -> Result<(), ControllerError> {
        let minutes = validate_minutes(minutes)?;
        let status = self.require_manual()?;

        let previous = self
            .countdown
            .is_running()
            .then(|| self.countdown.seconds_left())
            .flatten();
        let total = self.countdown.add_minutes(minutes);
        self.arm_countdown(total, previous).await?;
        info!(
            "Added {minutes} minutes, countdown at {}",
            format_remaining(total)
        );

        if previous.is_none() {
            let result = self.sync.set_extend_button(true).await;
            let _ = self.field_result(StatusPath::ExtendButton, result);
        }
        if status.position(self.config.polarity) == ShadePosition::Retracted {
            self.write_position(ShadePosition::Extended).await?;
        }

        self.emit(ViewEvent::notice(format!(
            "Added {minutes} minutes to timer"
        )));
        Ok(())
    }

    async fn handle_retract(&mut self) -> Result<(), ControllerError> {
        let status = self.require_manual()?;

        match status.position(self.config.polarity) {
            ShadePosition::Extended => {
                self.write_position(ShadePosition::Retracted).await?;
                let cancelled = self.cancel_active_countdown(&status).await?;
                if cancelled || status.extend_button {
                    let result = self.sync.set_extend_button(false).await;
                    let _ = self.field_result(StatusPath::ExtendButton, result);
                }
                info!("Shade retracted");
                self.emit(ViewEvent::notice("Shade retracted"));
            }
            ShadePosition::Retracted => match self.config.retract_policy {
                RetractPolicy::Toggle => {
                    let minutes = self.config.default_extend_minutes;
                    let previous = self.countdown.seconds_left();
                    self.arm_countdown(u64::from(minutes) * 60, previous).await?;
                    let result = self.sync.set_extend_button(true).await;
                    let _ = self.field_result(StatusPath::ExtendButton, result);
                    self.write_position(ShadePosition::Extended).await?;
                    info!("Shade extended for {minutes} minutes");
                    self.emit(ViewEvent::notice(format!(
                        "Shade extended for {minutes} minutes"
                    )));
                }
                RetractPolicy::RetractOnly => {
                    info!("Shade already retracted, nothing to do");
                }
            },
        }
        Ok(())
    }

    /// Starts the local countdown at `total` and writes it. On failure the
    /// countdown goes back to `previous`.
    async fn arm_countdown(
        &mut self,
        total: u64,
        previous: Option<u64>,
    ) -> Result<(), ControllerError> {
        self.countdown.start(total);
        self.tick_reset = true;
        self.remote.expect_echo(Some(total));

        let result = self.sync.start_countdown(total).await;
        if result.is_err() {
            self.remote.clear_pending();
            match previous {
                Some(seconds_left) => self.countdown.start(seconds_left),
                None => {
                    self.countdown.stop();
                }
            }
        }
        self.publish_countdown();
        Ok(self.field_result(StatusPath::CountdownModel, result)?)
    }

    /// Stops the local countdown and deletes the remote one if either is
    /// active. Returns whether anything was cancelled.
    async fn cancel_active_countdown(
        &mut self,
        status: &ShadeStatus,
    ) -> Result<bool, ControllerError> {
        let was_running = self.countdown.stop();
        if was_running {
            self.publish_countdown();
        }
        if !was_running && status.countdown_model.is_none() {
            return Ok(false);
        }

        info!("Cancelling countdown");
        self.remote.expect_echo(None);
        let result = self.sync.cancel_countdown().await;
        if result.is_err() {
            self.remote.clear_pending();
        }
        self.field_result(StatusPath::CountdownModel, result)?;
        Ok(true)
    }

    async fn write_position(&mut self, position: ShadePosition) -> Result<(), ControllerError> {
        let raw = self.config.polarity.encode(position);
        let result = self.sync.set_shade_status(raw).await;
        Ok(self.field_result(StatusPath::ShadeStatus, result)?)
    }

    fn require_status(&self) -> Result<ShadeStatus, ControllerError> {
        self.sync
            .mirror()
            .cloned()
            .ok_or(ControllerError::StatusUnavailable)
    }

    fn require_manual(&self) -> Result<ShadeStatus, ControllerError> {
        let status = self.require_status()?;
        if status.automatic_mode {
            return Err(ControllerError::AutomaticModeActive);
        }
        Ok(status)
    }

    /// Reports a single field write. A failure puts the field's displayed
    /// value back to the last acknowledged one.
    fn field_result(
        &self,
        field: StatusPath,
        result: Result<(), StatusStoreError>,
    ) -> Result<(), StatusStoreError> {
        match &result {
            Ok(()) => self.emit(ViewEvent::Updated {
                field,
                success: true,
            }),
            Err(e) => {
                warn!("Failed to update {field}: {e}");
                self.emit(ViewEvent::Updated {
                    field,
                    success: false,
                });
                if let Some(event) = self.acknowledged_value(field) {
                    self.emit(event);
                }
                self.state.set_error(Some(e.to_string()));
                self.emit(ViewEvent::error(e.to_string()));
            }
        }
        result
    }

    fn acknowledged_value(&self, field: StatusPath) -> Option<ViewEvent> {
        let status = self.sync.mirror()?;
        match field {
            StatusPath::AutomaticMode => Some(ViewEvent::AutomaticMode {
                enabled: status.automatic_mode,
            }),
            StatusPath::ManualShade => Some(ViewEvent::ManualShade {
                minutes: status.manual_shade,
            }),
            StatusPath::RainStatus => Some(ViewEvent::rain(status.rain_status)),
            StatusPath::ShadeStatus => {
                Some(ViewEvent::shade(status.position(self.config.polarity)))
            }
            _ => None,
        }
    }

    fn publish_countdown(&self) {
        let seconds_left = self.countdown.seconds_left();
        self.state.set_countdown(self.countdown.state());
        Metrics::set_countdown(seconds_left);
        let seconds_left = seconds_left.unwrap_or_default();
        self.emit(ViewEvent::Countdown {
            seconds_left,
            display: format_remaining(seconds_left),
        });
    }

    fn emit(&self, event: ViewEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Handle to the controller task. Cheap to clone.
#[derive(Clone)]
pub struct ShadeController {
    command_sender: mpsc::Sender<WorkerCommand>,
    state: SharedShadeState,
    events: broadcast::Sender<ViewEvent>,
}

impl ShadeController {
    /// Creates the default record if the store has none, subscribes, and
    /// spawns the controller task.
    pub async fn start<S: StatusStoreTrait + 'static>(
        store: S,
        config: ControllerConfig,
    ) -> Result<Self, StatusStoreError> {
        info!(
            "Starting shade controller (polarity: {:?}, retract policy: {:?})",
            config.polarity, config.retract_policy
        );
        let sync = StatusSynchronizer::new(store);
        if let Err(e) = sync.initialize().await {
            warn!("Could not initialize status record: {e}");
        }
        let subscription = sync.subscribe().await?;

        let state = SharedShadeState::new(config.polarity);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (command_sender, command_receiver) = mpsc::channel(COMMAND_CAPACITY);

        let worker = ShadeWorker::new(sync, config, state.clone(), events.clone());
        tokio::spawn(worker.run(command_receiver, subscription));

        Ok(Self {
            command_sender,
            state,
            events,
        })
    }

    pub async fn set_automatic_mode(&self, enabled: bool) -> Result<(), ControllerError> {
        self.send(Intent::SetAutomaticMode(enabled)).await
    }

    pub async fn set_manual_shade_minutes(&self, minutes: u32) -> Result<(), ControllerError> {
        self.send(Intent::SetManualShadeMinutes(minutes)).await
    }

    pub async fn set_rain_status(&self, raining: bool) -> Result<(), ControllerError> {
        self.send(Intent::SetRainStatus(raining)).await
    }

    pub async fn extend(&self, minutes: u32) -> Result<(), ControllerError> {
        self.send(Intent::Extend(minutes)).await
    }

    pub async fn retract(&self) -> Result<(), ControllerError> {
        self.send(Intent::Retract).await
    }

    pub async fn send(&self, intent: Intent) -> Result<(), ControllerError> {
        let (reply, response) = oneshot::channel();
        self.command_sender
            .send(WorkerCommand::Intent { intent, reply })
            .await
            .map_err(|_| ControllerError::Closed)?;
        response.await.map_err(|_| ControllerError::Closed)?
    }

    pub fn state(&self) -> SharedShadeState {
        self.state.clone()
    }

    pub fn snapshot(&self) -> ShadeSnapshot {
        self.state.snapshot()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.command_sender.send(WorkerCommand::Shutdown).await;
    }
}
