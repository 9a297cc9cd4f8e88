use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use time::UtcOffset;

use super::archive::compress_directory;
use super::client::{download_files, DetectorControl};
use super::config::Config;
use super::constants::{FINAL_STATUS_NAME, INITIAL_STATUS_NAME, REST_LOG_NAME, STATUS_FILE_PREFIX};
use super::error::{
    AcquisitionError, ArchiveError, ClientError, SequencerError, SessionError, Severity,
};
use super::session_status::{SessionPhase, SessionStatus};
use super::snapshot::{dump_config, dump_status, timestamp};
use super::state::DetectorState;
use super::temperature::TemperaturePlotter;

/// Where the sequencer is in a debug session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Uninitialized,
    Restarting,
    InitializingDetector,
    InitializingFileWriter,
    Configuring,
    Arming,
    WaitingReady,
    Triggering,
    Disarming,
    Aborting,
    Finished,
    Error,
}

/// How the acquisition loop ended
#[derive(Debug)]
pub enum LoopOutcome {
    /// Every trigger was issued and the detector disarmed
    Completed,
    /// The user interrupted; an abort was sent
    Aborted,
    /// A fatal error ended the loop early
    Failed(AcquisitionError),
}

/// Ephemeral state of one debug run
#[derive(Debug, Clone)]
pub struct AcquisitionSession {
    pub host: String,
    pub output_directory: PathBuf,
    /// Acquisition name; the detector's files start with it
    pub name: String,
    pub trigger_count: u64,
    pub triggers_completed: u64,
    pub last_known_state: Option<DetectorState>,
    /// One status snapshot per completed trigger, in order
    pub status_snapshots: Vec<Value>,
}

/// What a finished debug run produced
#[derive(Debug)]
pub struct SessionReport {
    pub outcome: LoopOutcome,
    pub triggers_completed: u64,
    pub downloaded: Vec<(String, u64)>,
    pub archive: PathBuf,
}

/// Result of waiting for the detector to become ready
enum ReadyWait {
    Ready,
    Interrupted,
}

/// Drives a detector through a full debug session.
///
/// restart -> initialize -> configure -> arm -> (wait for ready, snapshot, trigger) x N
/// -> disarm, followed by the finishing phase. The finishing phase runs however the
/// acquisition loop ended.
pub struct Sequencer<C: DetectorControl> {
    control: C,
    config: Config,
    session: AcquisitionSession,
    state: SequencerState,
    interrupt: Arc<AtomicBool>,
    plotter: Option<Box<dyn TemperaturePlotter + Send>>,
    status_tx: Option<Sender<SessionStatus>>,
    utc_offset: UtcOffset,
}

impl<C: DetectorControl> Sequencer<C> {
    /// Create a sequencer writing into `output_directory`, which is created if needed.
    ///
    /// The directory name is used as the acquisition name.
    pub fn new(
        control: C,
        config: Config,
        host: &str,
        output_directory: &Path,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self, SequencerError> {
        std::fs::create_dir_all(output_directory)?;
        let name = output_directory
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("EIGERDebug"));
        let session = AcquisitionSession {
            host: host.to_string(),
            output_directory: output_directory.to_path_buf(),
            name,
            trigger_count: config.ntrigger,
            triggers_completed: 0,
            last_known_state: None,
            status_snapshots: Vec::new(),
        };
        Ok(Self {
            control,
            config,
            session,
            state: SequencerState::Uninitialized,
            interrupt,
            plotter: None,
            status_tx: None,
            utc_offset: UtcOffset::UTC,
        })
    }

    pub fn with_plotter(mut self, plotter: Box<dyn TemperaturePlotter + Send>) -> Self {
        self.plotter = Some(plotter);
        self
    }

    pub fn with_status_sender(mut self, tx: Sender<SessionStatus>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    /// Offset used for snapshot timestamps, UTC unless set
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn session(&self) -> &AcquisitionSession {
        &self.session
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    fn set_state(&mut self, state: SequencerState) {
        spdlog::debug!("Sequencer {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn report(&self, phase: SessionPhase) {
        if let Some(tx) = &self.status_tx {
            // A closed receiver only means nobody is watching
            let _ = tx.send(SessionStatus::new(
                phase,
                self.session.triggers_completed,
                self.session.trigger_count,
            ));
        }
    }

    fn expect_acknowledgment(
        command: &str,
        reply: Result<Option<Value>, ClientError>,
    ) -> Result<(), SessionError> {
        match reply? {
            None => Ok(()),
            Some(value) => Err(SessionError::UnexpectedAcknowledgment(
                command.to_string(),
                value.to_string(),
            )),
        }
    }

    /// Restart the detector server, then initialize the detector and the file writer.
    ///
    /// Every command must be acknowledged with an empty reply. Any failure here ends the
    /// session without running the finishing phase.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        self.report(SessionPhase::Initializing);
        let result = self.initialize_steps();
        if result.is_err() {
            self.set_state(SequencerState::Error);
        }
        result
    }

    fn initialize_steps(&mut self) -> Result<(), SessionError> {
        let dir = self.session.output_directory.clone();

        self.set_state(SequencerState::Restarting);
        spdlog::info!("Restarting EIGER DAQ on host {}", self.session.host);
        Self::expect_acknowledgment("restart", self.control.send_system_command("restart"))?;
        std::thread::sleep(self.config.restart_settle());

        self.set_state(SequencerState::InitializingDetector);
        spdlog::info!("Initializing EIGER host {}", self.session.host);
        Self::expect_acknowledgment("initialize", self.control.send_detector_command("initialize"))?;
        dump_status(&self.control, &dir, INITIAL_STATUS_NAME)?;

        self.set_state(SequencerState::InitializingFileWriter);
        spdlog::info!("Initializing file writer on host {}", self.session.host);
        Self::expect_acknowledgment(
            "filewriter initialize",
            self.control.send_filewriter_command("initialize"),
        )?;
        dump_status(&self.control, &dir, INITIAL_STATUS_NAME)?;
        Ok(())
    }

    /// Configure, arm and run the trigger loop.
    ///
    /// Never fails: an interrupt sends one abort, a fatal error is logged and returned in
    /// the outcome. The finish settle delay is always waited.
    pub fn expose(&mut self) -> LoopOutcome {
        self.report(SessionPhase::Acquiring);
        let outcome = match self.acquire() {
            Ok(LoopOutcome::Aborted) => {
                spdlog::warn!("User interrupt, aborting acquisition");
                self.set_state(SequencerState::Aborting);
                if let Err(e) = self.control.send_detector_command("abort") {
                    spdlog::error!("Abort command failed: {}", e);
                }
                LoopOutcome::Aborted
            }
            Ok(outcome) => outcome,
            Err(e) => {
                spdlog::error!("Acquisition failed: {}", e);
                self.set_state(SequencerState::Error);
                LoopOutcome::Failed(e)
            }
        };
        spdlog::info!(
            "Finished acquisition {} after {}/{} triggers",
            self.session.name,
            self.session.triggers_completed,
            self.session.trigger_count
        );
        std::thread::sleep(self.config.finish_settle());
        outcome
    }

    fn configure_filewriter(&mut self) -> Result<(), AcquisitionError> {
        let settings = [
            ("name_pattern", json!(self.session.name)),
            ("compression_enabled", json!(self.config.filewriter_compression)),
            ("nimages_per_file", json!(self.config.images_per_file)),
            ("mode", json!("enabled")),
        ];
        spdlog::info!("Configuring file writer");
        for (key, value) in settings {
            spdlog::info!("  setting {} to {}", key, value);
            self.control.set_filewriter_config(key, value)?;
        }
        Ok(())
    }

    fn configure_detector(&mut self) -> Result<(), AcquisitionError> {
        let settings = [
            ("nimages", json!(self.config.nimages)),
            ("count_time", json!(self.config.count_time)),
            ("frame_time", json!(self.config.frame_time)),
            ("ntrigger", json!(self.config.ntrigger)),
            ("trigger_mode", json!(self.config.trigger_mode)),
            ("compression", json!(self.config.compression)),
            ("pixel_mask_applied", json!(false)),
        ];
        spdlog::info!("Configuring detector");
        for (key, value) in settings {
            spdlog::info!("  setting {} to {}", key, value);
            self.control.set_detector_config(key, value)?;
        }
        Ok(())
    }

    /// Configure, arm and trigger. `Aborted` if the user interrupted at a checkpoint;
    /// the abort command is left to the caller.
    fn acquire(&mut self) -> Result<LoopOutcome, AcquisitionError> {
        let dir = self.session.output_directory.clone();

        self.set_state(SequencerState::Configuring);
        self.configure_filewriter()?;
        self.configure_detector()?;
        dump_config(&self.control, &dir)?;

        if self.interrupted() {
            return Ok(LoopOutcome::Aborted);
        }
        self.set_state(SequencerState::Arming);
        spdlog::info!("Arming");
        self.control.send_detector_command("arm")?;

        let seconds_per_trigger = self.config.frame_time * self.config.nimages as f64;
        for index in 0..self.session.trigger_count {
            if let ReadyWait::Interrupted = self.wait_ready()? {
                return Ok(LoopOutcome::Aborted);
            }

            let name = format!("{STATUS_FILE_PREFIX}_{}", timestamp(self.utc_offset));
            let snapshot = dump_status(&self.control, &dir, &name)?;
            self.session.status_snapshots.push(snapshot.contents);
            self.recover(self.plot_temperatures())?;

            self.set_state(SequencerState::Triggering);
            spdlog::info!(
                "Trigger {}/{} ({} s, abort with CTRL + C)",
                index + 1,
                self.session.trigger_count,
                seconds_per_trigger
            );
            self.control.send_detector_command("trigger")?;
            self.session.triggers_completed += 1;
            self.report(SessionPhase::Acquiring);
        }

        self.set_state(SequencerState::Disarming);
        spdlog::info!("Disarming");
        self.control.send_detector_command("disarm")?;
        Ok(LoopOutcome::Completed)
    }

    /// Poll the detector state until it is ready
    fn wait_ready(&mut self) -> Result<ReadyWait, AcquisitionError> {
        self.set_state(SequencerState::WaitingReady);
        loop {
            if self.interrupted() {
                return Ok(ReadyWait::Interrupted);
            }
            let state = self.control.state()?;
            self.session.last_known_state = Some(state);
            if state == DetectorState::Ready {
                return Ok(ReadyWait::Ready);
            }
            if state.is_unavailable() {
                return Err(AcquisitionError::DetectorUnavailable(state));
            }
            std::thread::sleep(self.config.poll_interval());
        }
    }

    fn plot_temperatures(&self) -> Result<(), AcquisitionError> {
        if !self.config.plot_temperatures {
            return Ok(());
        }
        if let Some(plotter) = &self.plotter {
            plotter.plot(&self.session.output_directory)?;
        }
        Ok(())
    }

    /// Swallow recoverable errors after logging them
    fn recover(&self, result: Result<(), AcquisitionError>) -> Result<(), AcquisitionError> {
        match result {
            Err(e) if e.severity() == Severity::Recoverable => {
                spdlog::warn!("{}", e);
                Ok(())
            }
            other => other,
        }
    }

    /// Download every buffer file belonging to this acquisition. Per-file failures are
    /// logged and skipped.
    pub fn download_data(&mut self) -> Result<Vec<(String, u64)>, ClientError> {
        self.report(SessionPhase::Downloading);
        let names: Vec<String> = self
            .control
            .filewriter_files()?
            .into_iter()
            .filter(|file| file.contains(&self.session.name))
            .collect();
        spdlog::info!("Downloading files {:?}", names);
        Ok(download_files(
            &self.control,
            &names,
            &self.session.output_directory,
        ))
    }

    /// Final status dump, server log retrieval and packaging.
    ///
    /// The dump and the log are best-effort; only packaging can fail.
    pub fn finish(&mut self) -> Result<PathBuf, ArchiveError> {
        self.report(SessionPhase::Finishing);
        let dir = self.session.output_directory.clone();
        if let Err(e) = dump_status(&self.control, &dir, FINAL_STATUS_NAME) {
            spdlog::error!("Could not write the final status: {}", e);
        }
        match self.control.download_log(REST_LOG_NAME, &dir) {
            Ok(bytes) => spdlog::info!(
                "Downloaded {} ({})",
                REST_LOG_NAME,
                human_bytes::human_bytes(bytes as f64)
            ),
            Err(e) => spdlog::error!("Could not download {}: {}", REST_LOG_NAME, e),
        }
        let archive = compress_directory(&dir)?;
        self.set_state(SequencerState::Finished);
        self.report(SessionPhase::Finished);
        Ok(archive)
    }

    /// Run a complete session: initialize, expose, download, finish
    pub fn run(&mut self) -> Result<SessionReport, SequencerError> {
        self.initialize()?;
        let outcome = self.expose();
        let downloaded = if self.config.download_data {
            self.download_data().unwrap_or_else(|e| {
                spdlog::error!("Could not list buffer files: {}", e);
                Vec::new()
            })
        } else {
            Vec::new()
        };
        let archive = self.finish()?;
        Ok(SessionReport {
            outcome,
            triggers_completed: self.session.triggers_completed,
            downloaded,
            archive,
        })
    }
}
