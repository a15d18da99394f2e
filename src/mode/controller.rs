//! Mode controller actor
//!
//! A single task owns the [`ModeMachine`]. Input actions, inbound peer
//! commands and password checks all arrive as messages on one queue, so every
//! mutation is totally ordered. Readers take snapshots from a watch channel.
//! Peer round-trips run in spawned tasks and report back through the same
//! queue, keeping the actor itself free of network waits.

use super::process::Supervisor;
use super::state::{Effect, KeypadKey, ModeEvent, ModeMachine, ModeState, ProcessKind};
use crate::capabilities::AlertQueue;
use crate::channel::{Ack, Outbox, PeerCommand, PeerLink, PeerMessage};
use crate::config::NodeRole;
use crate::error::{NodeError, NodeResult};
use crate::notifications::{NotificationStore, Severity};
use crate::reminders::{ReminderStore, TimeStep};
use chrono::Local;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Confirmed user actions, decoded from hold-gesture action ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    ArmSecurity,
    StartConversation,
    EndConversation,
    EnterMusic,
    LeaveMusic,
    SelectStation(String),
    Keypad(KeypadKey),
    ExitSecurity,
    Sos,
    ShowReminders,
    CloseDialog,
    OpenTimeEditor,
    CloseTimeEditor,
    /// Open the time editor on the reminder at this list position
    EditReminder(usize),
    AdjustTime(TimeStep),
    SaveReminderTime,
    DeleteReminder,
}

impl UiAction {
    /// Map a confirmed hold to an action; unknown ids yield `None`
    pub fn from_confirmed(action_id: &str, payload: Option<&str>) -> Option<Self> {
        let action = match action_id {
            "sec_btn" => UiAction::ArmSecurity,
            "comm_btn" => UiAction::StartConversation,
            "stop_conversation" | "conv_back" => UiAction::EndConversation,
            "music_btn" => UiAction::EnterMusic,
            "back_btn" => UiAction::LeaveMusic,
            "sos_btn" => UiAction::Sos,
            "security_exit" => UiAction::ExitSecurity,
            "security_digit" => UiAction::Keypad(KeypadKey::parse(payload?)?),
            "show_reminders" => UiAction::ShowReminders,
            "modal_close" => UiAction::CloseDialog,
            "time_edit" => UiAction::OpenTimeEditor,
            "time_edit_close" => UiAction::CloseTimeEditor,
            "time_editor_h_up" => UiAction::AdjustTime(TimeStep::HourUp),
            "time_editor_h_down" => UiAction::AdjustTime(TimeStep::HourDown),
            "time_editor_m_up" => UiAction::AdjustTime(TimeStep::MinuteUp),
            "time_editor_m_down" => UiAction::AdjustTime(TimeStep::MinuteDown),
            "time_editor_ok" => UiAction::SaveReminderTime,
            "time_editor_delete" => UiAction::DeleteReminder,
            id if id.starts_with("edit_reminder_") => {
                UiAction::EditReminder(id["edit_reminder_".len()..].parse().ok()?)
            }
            id if id.starts_with("radio_") => {
                UiAction::SelectStation(payload.unwrap_or(id).to_string())
            }
            _ => return None,
        };
        Some(action)
    }
}

/// Requests that need a peer acknowledgement before the local transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerRequest {
    ArmSecurity,
    StartConversation,
}

impl PeerRequest {
    fn command(&self) -> PeerCommand {
        match self {
            PeerRequest::ArmSecurity => PeerCommand::OpenSecurity,
            PeerRequest::StartConversation => PeerCommand::OpenConversation,
        }
    }

    fn acked_event(&self) -> ModeEvent {
        match self {
            PeerRequest::ArmSecurity => ModeEvent::SecurityArmAcked,
            PeerRequest::StartConversation => ModeEvent::ConversationAcked,
        }
    }

    fn process(&self) -> ProcessKind {
        match self {
            PeerRequest::ArmSecurity => ProcessKind::Security,
            PeerRequest::StartConversation => ProcessKind::Conversation,
        }
    }
}

type StateReply = oneshot::Sender<NodeResult<ModeState>>;

enum ModeRequest {
    Action { action: UiAction, reply: StateReply },
    Escape { reply: StateReply },
    Peer { command: PeerCommand, reply: StateReply },
    CheckPassword { password: String, reply: oneshot::Sender<bool> },
    PeerOutcome { request: PeerRequest, result: NodeResult<Ack>, reply: StateReply },
}

/// Collaborators the controller drives
pub struct ModeDeps {
    pub role: NodeRole,
    pub source_name: String,
    pub passcode: String,
    pub max_attempts: u32,
    pub peer: Arc<dyn PeerLink>,
    pub outbox: Outbox,
    pub supervisor: Arc<Supervisor>,
    pub notifications: Arc<NotificationStore>,
    pub alerts: AlertQueue,
    /// Reminder list edited from the panel UI
    pub reminders: Option<Arc<ReminderStore>>,
    /// Fired when escape has nothing left to close
    pub terminate: Option<Arc<watch::Sender<bool>>>,
}

/// Cloneable handle to the controller actor
#[derive(Clone)]
pub struct ModeHandle {
    tx: mpsc::Sender<ModeRequest>,
    state_rx: watch::Receiver<ModeState>,
}

impl ModeHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ModeRequest) -> NodeResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Apply a confirmed user action
    pub async fn action(&self, action: UiAction) -> NodeResult<ModeState> {
        self.request(|reply| ModeRequest::Action { action, reply }).await?
    }

    pub async fn escape(&self) -> NodeResult<ModeState> {
        self.request(|reply| ModeRequest::Escape { reply }).await?
    }

    /// Apply a command received from the peer node
    pub async fn peer_command(&self, command: PeerCommand) -> NodeResult<ModeState> {
        self.request(|reply| ModeRequest::Peer { command, reply }).await?
    }

    /// Compare a passcode; a match also leaves security mode
    pub async fn check_password(&self, password: String) -> NodeResult<bool> {
        self.request(|reply| ModeRequest::CheckPassword { password, reply })
            .await
    }

    /// Queue an action without waiting for its outcome
    ///
    /// Used by the input loop, which must never wait on peer I/O. Queue order
    /// is preserved, so confirmations still apply in the order submitted.
    pub fn submit(&self, action: UiAction) -> bool {
        let (reply, _) = oneshot::channel();
        self.try_send(ModeRequest::Action { action, reply })
    }

    /// Queue an escape without waiting for its outcome
    pub fn submit_escape(&self) -> bool {
        let (reply, _) = oneshot::channel();
        self.try_send(ModeRequest::Escape { reply })
    }

    fn try_send(&self, request: ModeRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Mode controller queue rejected input: {}", e);
                false
            }
        }
    }

    pub fn snapshot(&self) -> ModeState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModeState> {
        self.state_rx.clone()
    }
}

/// The actor
pub struct ModeController {
    machine: ModeMachine,
    deps: ModeDeps,
    pending: Option<PeerRequest>,
    state_tx: watch::Sender<ModeState>,
    self_tx: mpsc::WeakSender<ModeRequest>,
}

impl ModeController {
    /// Spawn the actor and return its handle
    pub fn spawn(deps: ModeDeps) -> (ModeHandle, JoinHandle<()>) {
        let machine = ModeMachine::new(deps.passcode.clone(), deps.max_attempts);
        let (state_tx, state_rx) = watch::channel(machine.state().clone());
        let (tx, mut rx) = mpsc::channel::<ModeRequest>(64);

        let mut controller = ModeController {
            machine,
            deps,
            pending: None,
            state_tx,
            self_tx: tx.downgrade(),
        };

        let handle = tokio::spawn(async move {
            tracing::info!("Mode controller started ({})", controller.deps.role.as_str());
            while let Some(request) = rx.recv().await {
                controller.handle(request);
            }
            tracing::info!("Mode controller stopped");
        });

        (ModeHandle { tx, state_rx }, handle)
    }

    fn handle(&mut self, request: ModeRequest) {
        match request {
            ModeRequest::Action { action, reply } => self.on_action(action, reply),
            ModeRequest::Escape { reply } => {
                self.apply(ModeEvent::Escape);
                let _ = reply.send(Ok(self.publish()));
            }
            ModeRequest::Peer { command, reply } => {
                let result = self.on_peer_command(command);
                self.publish();
                let _ = reply.send(result);
            }
            ModeRequest::CheckPassword { password, reply } => {
                let matched = self.machine.passcode_matches(&password);
                if matched {
                    self.apply(ModeEvent::PasswordSubmitted(password));
                } else {
                    tracing::warn!("Password check failed");
                }
                self.publish();
                let _ = reply.send(matched);
            }
            ModeRequest::PeerOutcome {
                request,
                result,
                reply,
            } => self.on_peer_outcome(request, result, reply),
        }
    }

    /// Broadcast the current state to readers and return a copy
    fn publish(&self) -> ModeState {
        let state = self.machine.state().clone();
        self.state_tx.send_replace(state.clone());
        state
    }

    fn on_action(&mut self, action: UiAction, reply: StateReply) {
        let event = match action {
            UiAction::ArmSecurity => return self.begin_peer_request(PeerRequest::ArmSecurity, reply),
            UiAction::StartConversation => {
                return self.begin_peer_request(PeerRequest::StartConversation, reply)
            }
            UiAction::Sos => {
                self.raise_sos();
                let _ = reply.send(Ok(self.publish()));
                return;
            }
            UiAction::EndConversation => ModeEvent::EndConversation,
            UiAction::EnterMusic => ModeEvent::EnterMusic,
            UiAction::LeaveMusic => ModeEvent::LeaveMusic,
            UiAction::SelectStation(url) => ModeEvent::SelectStation(url),
            UiAction::Keypad(key) => ModeEvent::Keypad(key),
            UiAction::ExitSecurity => ModeEvent::ExitSecurity,
            UiAction::ShowReminders => ModeEvent::SetListDialog(true),
            UiAction::CloseDialog => ModeEvent::SetListDialog(false),
            UiAction::OpenTimeEditor => ModeEvent::SetTimeEditor(true),
            UiAction::CloseTimeEditor => {
                if let Some(reminders) = &self.deps.reminders {
                    reminders.cancel_edit();
                }
                ModeEvent::SetTimeEditor(false)
            }
            reminder => {
                self.on_reminder_action(reminder);
                let _ = reply.send(Ok(self.publish()));
                return;
            }
        };
        self.apply(event);
        let _ = reply.send(Ok(self.publish()));
    }

    fn on_reminder_action(&mut self, action: UiAction) {
        let Some(reminders) = self.deps.reminders.clone() else {
            tracing::debug!("No reminder list on this node, ignoring {:?}", action);
            return;
        };
        let editing = self.machine.state().time_editor_open;

        match action {
            UiAction::EditReminder(index) => {
                match reminders.begin_edit(index, Local::now().time()) {
                    Ok(draft) => {
                        tracing::info!(
                            "Editing reminder {} at {:02}:{:02}",
                            index,
                            draft.hours,
                            draft.minutes
                        );
                        self.apply(ModeEvent::SetTimeEditor(true));
                    }
                    Err(e) => tracing::debug!("Cannot edit reminder: {}", e),
                }
            }
            UiAction::AdjustTime(step) if editing => {
                reminders.adjust(step);
            }
            UiAction::SaveReminderTime if editing => match reminders.save_draft() {
                Ok(reminder) => {
                    tracing::info!("Reminder {:?} set to {:?}", reminder.task, reminder.time);
                    self.apply(ModeEvent::SetTimeEditor(false));
                    self.apply(ModeEvent::SetListDialog(true));
                }
                Err(e) => tracing::warn!("Saving reminder time failed: {}", e),
            },
            UiAction::DeleteReminder if editing => match reminders.delete_draft() {
                Ok(reminder) => {
                    tracing::info!("Deleted reminder {:?}", reminder.task);
                    self.apply(ModeEvent::SetTimeEditor(false));
                    self.apply(ModeEvent::SetListDialog(true));
                }
                Err(e) => tracing::warn!("Deleting reminder failed: {}", e),
            },
            other => tracing::debug!("Ignoring {:?} with the time editor closed", other),
        }
    }

    /// Ping the peer, then ask it to act; the local transition waits for the answer
    fn begin_peer_request(&mut self, request: PeerRequest, reply: StateReply) {
        if self.machine.mode() != super::Mode::Main {
            tracing::debug!("Ignoring {:?} outside MAIN", request);
            let _ = reply.send(Ok(self.publish()));
            return;
        }
        if let Some(in_flight) = self.pending {
            tracing::debug!("Ignoring {:?}: {:?} still in flight", request, in_flight);
            let _ = reply.send(Ok(self.publish()));
            return;
        }
        self.pending = Some(request);

        let peer = self.deps.peer.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = match peer.ping().await {
                Ok(()) => peer.send(&PeerMessage::Command(request.command())).await,
                Err(e) => Err(e),
            };
            if let Some(tx) = self_tx.upgrade() {
                let _ = tx
                    .send(ModeRequest::PeerOutcome {
                        request,
                        result,
                        reply,
                    })
                    .await;
            }
        });
    }

    fn on_peer_outcome(&mut self, request: PeerRequest, result: NodeResult<Ack>, reply: StateReply) {
        self.pending = None;
        match result {
            Ok(_) => {
                tracing::info!("Peer acknowledged {}", request.command());
                if self.deps.role.owns_subprocesses() {
                    if let Err(e) = self.deps.supervisor.start(request.process()) {
                        self.notify("PROCESS ERROR", &e.to_string(), Severity::Danger);
                        self.publish();
                        let _ = reply.send(Err(e));
                        return;
                    }
                }
                self.apply(request.acked_event());
                let _ = reply.send(Ok(self.publish()));
            }
            Err(e) => {
                tracing::warn!("{} aborted: {}", request.command(), e);
                match &e {
                    NodeError::Rejected { reason } => self.notify(
                        "PEER REJECTED",
                        &format!("Peer declined {}: {}", request.command(), reason),
                        Severity::Warning,
                    ),
                    _ => self.notify(
                        "PEER UNAVAILABLE",
                        &format!("Peer unavailable, {} cancelled", request.command()),
                        Severity::Warning,
                    ),
                }
                self.publish();
                let _ = reply.send(Err(e));
            }
        }
    }

    fn on_peer_command(&mut self, command: PeerCommand) -> NodeResult<ModeState> {
        tracing::info!("Peer command: {}", command);

        if self.deps.role.owns_subprocesses() {
            let kind = match command {
                PeerCommand::OpenSecurity => Some(ProcessKind::Security),
                PeerCommand::OpenConversation => Some(ProcessKind::Conversation),
                _ => None,
            };
            if let Some(kind) = kind {
                self.deps.supervisor.start(kind)?;
            }
        }

        self.apply(ModeEvent::Peer(command));

        // The hub echoes mode changes so the panel's screens follow
        if self.deps.role.owns_subprocesses() && command != PeerCommand::HideExitButton {
            self.deps.outbox.enqueue(PeerMessage::Command(command));
        }
        Ok(self.machine.state().clone())
    }

    fn raise_sos(&self) {
        tracing::warn!("SOS requested");
        self.notify("SOS", "Emergency assistance requested", Severity::Danger);

        self.deps.alerts.chat("SOS: Emergency assistance requested");

        self.deps.outbox.enqueue(PeerMessage::RecordVideo {
            reason: "sos".to_string(),
            source: self.deps.source_name.clone(),
        });
    }

    fn apply(&mut self, event: ModeEvent) {
        let step = self.machine.apply(event);
        for effect in step.effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::NotifyPeer(command) => {
                self.deps.outbox.enqueue(PeerMessage::Command(command));
            }
            Effect::Notify {
                title,
                message,
                severity,
            } => self.notify(&title, &message, severity),
            Effect::StopProcess(kind) => {
                if let Some(process) = self.deps.supervisor.detach(kind) {
                    tokio::spawn(process.terminate());
                }
            }
            Effect::StartPlayback(url) => tracing::info!("Playback requested: {}", url),
            Effect::StopPlayback => tracing::info!("Playback stopped"),
            Effect::Terminate => {
                tracing::info!("Nothing left to close, requesting shutdown");
                if let Some(terminate) = &self.deps.terminate {
                    let _ = terminate.send(true);
                }
            }
        }
    }

    fn notify(&self, title: &str, message: &str, severity: Severity) {
        self.deps.notifications.add(title, message, severity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;
    use crate::mode::Mode;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Peer that records what it was sent; `up` controls reachability
    struct FakePeer {
        up: bool,
        reject: Option<String>,
        sent: Mutex<Vec<PeerMessage>>,
    }

    impl FakePeer {
        fn new(up: bool) -> Arc<Self> {
            Arc::new(Self {
                up,
                reject: None,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn rejecting(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                up: true,
                reject: Some(reason.to_string()),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PeerLink for FakePeer {
        async fn ping(&self) -> NodeResult<()> {
            if self.up {
                Ok(())
            } else {
                Err(NodeError::Unreachable("ping failed".into()))
            }
        }

        async fn send(&self, message: &PeerMessage) -> NodeResult<Ack> {
            self.sent.lock().push(message.clone());
            if let Some(reason) = &self.reject {
                return Err(NodeError::Rejected {
                    reason: reason.clone(),
                });
            }
            if self.up {
                Ok(Ack::ok("ok"))
            } else {
                Err(NodeError::Unreachable("send failed".into()))
            }
        }
    }

    fn spawn(role: NodeRole, peer: Arc<FakePeer>) -> (ModeHandle, Arc<NotificationStore>) {
        let (handle, notifications, _) =
            spawn_with_processes(role, peer, &ProcessConfig::default());
        (handle, notifications)
    }

    fn spawn_with_processes(
        role: NodeRole,
        peer: Arc<FakePeer>,
        processes: &ProcessConfig,
    ) -> (ModeHandle, Arc<NotificationStore>, Arc<Supervisor>) {
        spawn_full(role, peer, processes, Arc::new(ReminderStore::new(8)))
    }

    fn spawn_full(
        role: NodeRole,
        peer: Arc<FakePeer>,
        processes: &ProcessConfig,
        reminders: Arc<ReminderStore>,
    ) -> (ModeHandle, Arc<NotificationStore>, Arc<Supervisor>) {
        let supervisor = Arc::new(Supervisor::new(processes));
        let notifications = Arc::new(NotificationStore::new(role.as_str()));
        let (outbox, _) = Outbox::spawn(peer.clone(), 16);
        let (alerts, _) = AlertQueue::spawn(
            Arc::new(crate::capabilities::LogChatNotifier),
            Arc::new(crate::capabilities::LogVoiceAnnouncer),
            16,
        );
        let (handle, _) = ModeController::spawn(ModeDeps {
            role,
            source_name: role.as_str().to_string(),
            passcode: "123456".to_string(),
            max_attempts: 3,
            peer,
            outbox,
            supervisor: supervisor.clone(),
            notifications: notifications.clone(),
            alerts,
            reminders: Some(reminders),
            terminate: None,
        });
        (handle, notifications, supervisor)
    }

    async fn type_code(handle: &ModeHandle, code: &str) -> ModeState {
        let mut state = handle.snapshot();
        for c in code.chars() {
            state = handle
                .action(UiAction::Keypad(KeypadKey::Digit(c)))
                .await
                .unwrap();
        }
        state
    }

    #[test]
    fn test_action_id_mapping() {
        assert_eq!(UiAction::from_confirmed("sec_btn", None), Some(UiAction::ArmSecurity));
        assert_eq!(
            UiAction::from_confirmed("security_digit", Some("4")),
            Some(UiAction::Keypad(KeypadKey::Digit('4')))
        );
        assert_eq!(UiAction::from_confirmed("security_digit", None), None);
        assert_eq!(
            UiAction::from_confirmed("radio_2", Some("http://stream/2")),
            Some(UiAction::SelectStation("http://stream/2".into()))
        );
        assert_eq!(UiAction::from_confirmed("mystery", None), None);
        assert_eq!(
            UiAction::from_confirmed("edit_reminder_3", None),
            Some(UiAction::EditReminder(3))
        );
        assert_eq!(UiAction::from_confirmed("edit_reminder_x", None), None);
        assert_eq!(
            UiAction::from_confirmed("time_editor_m_down", None),
            Some(UiAction::AdjustTime(TimeStep::MinuteDown))
        );
        assert_eq!(
            UiAction::from_confirmed("time_editor_delete", None),
            Some(UiAction::DeleteReminder)
        );
    }

    #[tokio::test]
    async fn test_reminder_time_editor_flow() {
        let reminders = Arc::new(ReminderStore::new(8));
        reminders
            .add("Walk", chrono::NaiveTime::from_hms_opt(10, 0, 0))
            .unwrap();
        reminders
            .add("Lunch", chrono::NaiveTime::from_hms_opt(14, 0, 0))
            .unwrap();
        let (handle, _, _) = spawn_full(
            NodeRole::Panel,
            FakePeer::new(true),
            &ProcessConfig::default(),
            reminders.clone(),
        );

        // Editor buttons do nothing until a reminder is opened
        handle.action(UiAction::SaveReminderTime).await.unwrap();
        assert_eq!(reminders.list()[0].task, "Walk");

        let state = handle.action(UiAction::EditReminder(0)).await.unwrap();
        assert!(state.time_editor_open);
        for _ in 0..5 {
            handle.action(UiAction::AdjustTime(TimeStep::HourUp)).await.unwrap();
        }
        let state = handle.action(UiAction::SaveReminderTime).await.unwrap();
        assert!(!state.time_editor_open);
        assert!(state.list_dialog_open);

        let tasks: Vec<_> = reminders.list().into_iter().map(|r| r.task).collect();
        assert_eq!(tasks, vec!["Lunch", "Walk"]);
        assert_eq!(
            reminders.list()[1].time,
            chrono::NaiveTime::from_hms_opt(15, 0, 0)
        );

        handle.action(UiAction::EditReminder(0)).await.unwrap();
        let state = handle.action(UiAction::DeleteReminder).await.unwrap();
        assert!(!state.time_editor_open);
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders.list()[0].task, "Walk");
    }

    #[tokio::test]
    async fn test_start_conversation_with_peer_down_stays_main() {
        let (handle, notifications) = spawn(NodeRole::Panel, FakePeer::new(false));

        let err = handle.action(UiAction::StartConversation).await.unwrap_err();
        assert_eq!(err.reason(), "unreachable");
        assert_eq!(handle.snapshot().current_mode, Mode::Main);

        let recent = notifications.recent(1);
        assert_eq!(recent[0].title, "PEER UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_start_conversation_with_peer_up() {
        let peer = FakePeer::new(true);
        let (handle, _) = spawn(NodeRole::Panel, peer.clone());

        let state = handle.action(UiAction::StartConversation).await.unwrap();
        assert_eq!(state.current_mode, Mode::Conversation);
        assert_eq!(
            peer.sent.lock()[0],
            PeerMessage::Command(PeerCommand::OpenConversation)
        );
    }

    #[tokio::test]
    async fn test_arm_security_keeps_main_until_peer_opens() {
        let (handle, _) = spawn(NodeRole::Panel, FakePeer::new(true));

        let state = handle.action(UiAction::ArmSecurity).await.unwrap();
        assert_eq!(state.current_mode, Mode::Main);
        assert!(state.peer_security_armed);

        let state = handle.peer_command(PeerCommand::OpenSecurity).await.unwrap();
        assert_eq!(state.current_mode, Mode::Security);
    }

    #[tokio::test]
    async fn test_three_wrong_codes_stay_in_security() {
        let (handle, notifications) = spawn(NodeRole::Panel, FakePeer::new(true));
        handle.peer_command(PeerCommand::OpenSecurity).await.unwrap();

        assert_eq!(type_code(&handle, "000000").await.security_attempts, 1);
        assert_eq!(type_code(&handle, "000001").await.security_attempts, 2);
        let state = type_code(&handle, "000002").await;

        assert_eq!(state.security_attempts, 0);
        assert_eq!(state.current_mode, Mode::Security);
        assert_eq!(notifications.recent(1)[0].severity, Severity::Danger);
    }

    #[tokio::test]
    async fn test_correct_code_notifies_peer() {
        let peer = FakePeer::new(true);
        let (handle, _) = spawn(NodeRole::Panel, peer.clone());
        handle.peer_command(PeerCommand::OpenSecurity).await.unwrap();

        let state = type_code(&handle, "123456").await;
        assert_eq!(state.current_mode, Mode::Main);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(peer
            .sent
            .lock()
            .contains(&PeerMessage::Command(PeerCommand::CloseSecurity)));
    }

    #[tokio::test]
    async fn test_check_password() {
        let (handle, _) = spawn(NodeRole::Panel, FakePeer::new(true));
        handle.peer_command(PeerCommand::OpenSecurity).await.unwrap();

        assert!(!handle.check_password("999999".into()).await.unwrap());
        assert_eq!(handle.snapshot().current_mode, Mode::Security);
        assert!(handle.check_password("123456".into()).await.unwrap());
        assert_eq!(handle.snapshot().current_mode, Mode::Main);
    }

    #[tokio::test]
    async fn test_hub_echoes_mode_commands() {
        let peer = FakePeer::new(true);
        let (handle, _) = spawn(NodeRole::Hub, peer.clone());

        let state = handle.peer_command(PeerCommand::OpenSecurity).await.unwrap();
        assert_eq!(state.current_mode, Mode::Security);
        handle.peer_command(PeerCommand::HideExitButton).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(
            *peer.sent.lock(),
            vec![PeerMessage::Command(PeerCommand::OpenSecurity)]
        );
    }

    #[tokio::test]
    async fn test_sos_requests_clip() {
        let peer = FakePeer::new(true);
        let (handle, notifications) = spawn(NodeRole::Panel, peer.clone());

        handle.action(UiAction::Sos).await.unwrap();
        assert_eq!(notifications.recent(1)[0].title, "SOS");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(matches!(
            peer.sent.lock()[0],
            PeerMessage::RecordVideo { .. }
        ));
    }

    #[tokio::test]
    async fn test_exit_button_closes_peer_security() {
        let peer = FakePeer::new(true);
        let (handle, _) = spawn(NodeRole::Panel, peer.clone());
        handle.peer_command(PeerCommand::OpenSecurity).await.unwrap();

        let state = handle.action(UiAction::ExitSecurity).await.unwrap();
        assert_eq!(state.current_mode, Mode::Main);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(peer
            .sent
            .lock()
            .contains(&PeerMessage::Command(PeerCommand::CloseSecurity)));
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_reported_as_unavailable() {
        let (handle, notifications) =
            spawn(NodeRole::Panel, FakePeer::rejecting("subprocess_failure"));

        let err = handle.action(UiAction::ArmSecurity).await.unwrap_err();
        assert_eq!(err.reason(), "subprocess_failure");
        assert_eq!(handle.snapshot().current_mode, Mode::Main);

        let recent = notifications.recent(1);
        assert_eq!(recent[0].title, "PEER REJECTED");
        assert!(recent[0].message.contains("subprocess_failure"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_then_open_security_keeps_monitor_running() {
        let processes = ProcessConfig {
            security_command: Some(vec!["sleep".to_string(), "30".to_string()]),
            conversation_command: None,
            stop_grace_secs: 1,
        };
        let (handle, _, supervisor) =
            spawn_with_processes(NodeRole::Hub, FakePeer::new(true), &processes);

        handle.peer_command(PeerCommand::OpenSecurity).await.unwrap();
        assert!(supervisor.is_running(ProcessKind::Security));

        let (closed, opened) = tokio::join!(
            handle.peer_command(PeerCommand::CloseSecurity),
            handle.peer_command(PeerCommand::OpenSecurity)
        );
        closed.unwrap();
        assert_eq!(opened.unwrap().current_mode, Mode::Security);

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert!(supervisor.is_running(ProcessKind::Security));
        supervisor.stop_all().await;
    }
}
