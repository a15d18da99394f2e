//! Node mode state machine
//!
//! Pure transition logic: events go in, the new state and a list of side
//! effects come out. Performing the effects (peer calls, subprocesses,
//! notifications) is the controller's job.
//!
//! ```text
//!          open_security (peer)            passcode ok / exit / close_security
//!   MAIN ─────────────────────────► SECURITY ─────────────────────────────► MAIN
//!   MAIN ── peer acked start ─────► CONVERSATION ── end / escape / close ─► MAIN
//!   MAIN ── music ────────────────► MUSIC ── back / escape ───────────────► MAIN
//! ```

use crate::channel::PeerCommand;
use crate::notifications::Severity;
use serde::{Deserialize, Serialize};

/// Length of the security passcode
pub const PASSCODE_LENGTH: usize = 6;

/// The node's operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    #[default]
    Main,
    Security,
    Conversation,
    Music,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Main => "MAIN",
            Mode::Security => "SECURITY",
            Mode::Conversation => "CONVERSATION",
            Mode::Music => "MUSIC",
        }
    }
}

/// External subprocesses owned by a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Security,
    Conversation,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Security => "security",
            ProcessKind::Conversation => "conversation",
        }
    }
}

/// Keys on the passcode keypad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypadKey {
    Digit(char),
    Clear,
    Backspace,
}

impl KeypadKey {
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            "C" | "c" => Some(KeypadKey::Clear),
            "<" | "←" => Some(KeypadKey::Backspace),
            d if d.len() == 1 && d.chars().all(|c| c.is_ascii_digit()) => {
                d.chars().next().map(KeypadKey::Digit)
            }
            _ => None,
        }
    }
}

/// Events the mode machine reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeEvent {
    /// Command received from the peer node
    Peer(PeerCommand),
    /// The peer acknowledged our request to arm security
    SecurityArmAcked,
    /// The peer acknowledged our request to start a conversation
    ConversationAcked,
    Keypad(KeypadKey),
    /// Passcode submitted in one piece (`/check_password`)
    PasswordSubmitted(String),
    ExitSecurity,
    EndConversation,
    EnterMusic,
    SelectStation(String),
    LeaveMusic,
    Escape,
    SetTimeEditor(bool),
    SetListDialog(bool),
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Best-effort command to the peer node
    NotifyPeer(PeerCommand),
    /// User-facing notification
    Notify {
        title: String,
        message: String,
        severity: Severity,
    },
    StopProcess(ProcessKind),
    StartPlayback(String),
    StopPlayback,
    /// Nothing left to close; the UI may exit
    Terminate,
}

impl Effect {
    fn notify(title: &str, message: &str, severity: Severity) -> Self {
        Effect::Notify {
            title: title.to_string(),
            message: message.to_string(),
            severity,
        }
    }
}

/// Outcome of a single event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub from: Mode,
    pub to: Mode,
    pub effects: Vec<Effect>,
}

impl Step {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Process-wide mode state with mode-specific substate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeState {
    pub current_mode: Mode,
    pub security_code_input: String,
    pub security_attempts: u32,
    pub exit_button_visible: bool,
    pub peer_security_armed: bool,
    pub peer_conversation_armed: bool,
    pub time_editor_open: bool,
    pub list_dialog_open: bool,
    pub current_stream: String,
}

impl Default for ModeState {
    fn default() -> Self {
        Self {
            current_mode: Mode::Main,
            security_code_input: String::new(),
            security_attempts: 0,
            exit_button_visible: false,
            peer_security_armed: false,
            peer_conversation_armed: false,
            time_editor_open: false,
            list_dialog_open: false,
            current_stream: String::new(),
        }
    }
}

/// Mode machine plus the passcode it checks against
#[derive(Debug, Clone)]
pub struct ModeMachine {
    state: ModeState,
    passcode: String,
    max_attempts: u32,
}

impl ModeMachine {
    pub fn new(passcode: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            state: ModeState::default(),
            passcode: passcode.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn state(&self) -> &ModeState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.current_mode
    }

    pub fn passcode_matches(&self, candidate: &str) -> bool {
        candidate == self.passcode
    }

    /// Apply one event and return the resulting step
    pub fn apply(&mut self, event: ModeEvent) -> Step {
        let from = self.state.current_mode;
        let mut effects = Vec::new();

        match (from, event) {
            (mode, ModeEvent::Peer(PeerCommand::OpenSecurity)) => {
                if mode != Mode::Security {
                    self.leave(mode, &mut effects);
                }
                self.state.current_mode = Mode::Security;
                self.state.security_code_input.clear();
                self.state.security_attempts = 0;
                self.state.exit_button_visible = true;
            }
            (_, ModeEvent::Peer(PeerCommand::HideExitButton)) => {
                self.state.exit_button_visible = false;
            }
            (mode, ModeEvent::Peer(PeerCommand::CloseSecurity)) => {
                self.state.peer_security_armed = false;
                if mode == Mode::Security {
                    self.leave(mode, &mut effects);
                    self.state.current_mode = Mode::Main;
                }
            }
            (mode, ModeEvent::Peer(PeerCommand::OpenConversation)) => {
                self.state.peer_conversation_armed = true;
                if mode != Mode::Conversation {
                    self.leave(mode, &mut effects);
                    self.state.current_mode = Mode::Conversation;
                }
            }
            (mode, ModeEvent::Peer(PeerCommand::CloseConversation)) => {
                self.state.peer_conversation_armed = false;
                if mode == Mode::Conversation {
                    self.leave(mode, &mut effects);
                    self.state.current_mode = Mode::Main;
                }
            }

            (Mode::Main, ModeEvent::SecurityArmAcked) => {
                self.state.peer_security_armed = true;
            }
            (Mode::Main, ModeEvent::ConversationAcked) => {
                self.state.peer_conversation_armed = true;
                self.state.current_mode = Mode::Conversation;
            }

            (Mode::Security, ModeEvent::Keypad(key)) => self.keypad(key, &mut effects),
            (Mode::Security, ModeEvent::PasswordSubmitted(code)) => {
                if self.passcode_matches(&code) {
                    self.disarm(&mut effects);
                }
            }
            (Mode::Security, ModeEvent::ExitSecurity) if self.state.exit_button_visible => {
                self.leave(Mode::Security, &mut effects);
                self.state.peer_security_armed = false;
                self.state.current_mode = Mode::Main;
                // The hub's monitor must stop too
                effects.push(Effect::NotifyPeer(PeerCommand::CloseSecurity));
            }

            (Mode::Conversation, ModeEvent::EndConversation) => {
                effects.push(Effect::NotifyPeer(PeerCommand::CloseConversation));
                self.leave(Mode::Conversation, &mut effects);
                self.state.current_mode = Mode::Main;
            }

            (Mode::Main, ModeEvent::EnterMusic) => {
                self.state.current_mode = Mode::Music;
            }
            (Mode::Music, ModeEvent::SelectStation(url)) => {
                if self.state.current_stream == url {
                    self.state.current_stream.clear();
                    effects.push(Effect::StopPlayback);
                } else {
                    self.state.current_stream = url.clone();
                    effects.push(Effect::StartPlayback(url));
                }
            }
            (Mode::Music, ModeEvent::LeaveMusic) => {
                self.leave(Mode::Music, &mut effects);
                self.state.current_mode = Mode::Main;
            }

            (mode, ModeEvent::Escape) => self.escape(mode, &mut effects),

            (_, ModeEvent::SetTimeEditor(open)) => self.state.time_editor_open = open,
            (_, ModeEvent::SetListDialog(open)) => self.state.list_dialog_open = open,

            (mode, event) => {
                tracing::debug!("Ignoring {:?} in {}", event, mode.as_str());
            }
        }

        let to = self.state.current_mode;
        if from != to {
            tracing::info!("Mode transition: {} -> {}", from.as_str(), to.as_str());
        }
        Step { from, to, effects }
    }

    /// Clear the substate owned by `mode` and queue its teardown effects
    fn leave(&mut self, mode: Mode, effects: &mut Vec<Effect>) {
        match mode {
            Mode::Main => {}
            Mode::Security => {
                self.state.security_code_input.clear();
                self.state.security_attempts = 0;
                self.state.exit_button_visible = false;
                effects.push(Effect::StopProcess(ProcessKind::Security));
            }
            Mode::Conversation => {
                self.state.peer_conversation_armed = false;
                effects.push(Effect::StopProcess(ProcessKind::Conversation));
            }
            Mode::Music => {
                if !self.state.current_stream.is_empty() {
                    self.state.current_stream.clear();
                    effects.push(Effect::StopPlayback);
                }
            }
        }
    }

    fn keypad(&mut self, key: KeypadKey, effects: &mut Vec<Effect>) {
        match key {
            KeypadKey::Clear => self.state.security_code_input.clear(),
            KeypadKey::Backspace => {
                self.state.security_code_input.pop();
            }
            KeypadKey::Digit(d) => {
                if self.state.security_code_input.len() >= PASSCODE_LENGTH {
                    return;
                }
                self.state.security_code_input.push(d);
                if self.state.security_code_input.len() == PASSCODE_LENGTH {
                    self.check_entered_code(effects);
                }
            }
        }
    }

    fn check_entered_code(&mut self, effects: &mut Vec<Effect>) {
        if self.passcode_matches(&self.state.security_code_input) {
            self.disarm(effects);
            return;
        }

        self.state.security_code_input.clear();
        self.state.security_attempts += 1;
        tracing::warn!(
            "Incorrect passcode ({}/{})",
            self.state.security_attempts,
            self.max_attempts
        );

        if self.state.security_attempts >= self.max_attempts {
            self.state.security_attempts = 0;
            effects.push(Effect::notify(
                "SECURITY",
                "Maximum attempts reached",
                Severity::Danger,
            ));
        } else {
            effects.push(Effect::notify("SECURITY", "Incorrect code", Severity::Warning));
        }
    }

    fn disarm(&mut self, effects: &mut Vec<Effect>) {
        tracing::info!("Passcode accepted, leaving security");
        self.leave(Mode::Security, effects);
        self.state.peer_security_armed = false;
        self.state.current_mode = Mode::Main;
        effects.push(Effect::NotifyPeer(PeerCommand::CloseSecurity));
        effects.push(Effect::notify(
            "SECURITY",
            "Security mode deactivated",
            Severity::Success,
        ));
    }

    fn escape(&mut self, mode: Mode, effects: &mut Vec<Effect>) {
        if self.state.time_editor_open {
            self.state.time_editor_open = false;
            return;
        }
        match mode {
            Mode::Conversation => {
                effects.push(Effect::NotifyPeer(PeerCommand::CloseConversation));
                self.leave(mode, effects);
                self.state.current_mode = Mode::Main;
            }
            Mode::Security | Mode::Music => {
                self.leave(mode, effects);
                self.state.current_mode = Mode::Main;
            }
            Mode::Main if self.state.list_dialog_open => {
                self.state.list_dialog_open = false;
            }
            Mode::Main => effects.push(Effect::Terminate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ModeMachine {
        ModeMachine::new("123456", 3)
    }

    fn enter_code(m: &mut ModeMachine, code: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        for c in code.chars() {
            effects.extend(m.apply(ModeEvent::Keypad(KeypadKey::Digit(c))).effects);
        }
        effects
    }

    fn in_security() -> ModeMachine {
        let mut m = machine();
        m.apply(ModeEvent::Peer(PeerCommand::OpenSecurity));
        m
    }

    #[test]
    fn test_open_security_resets_substate() {
        let m = in_security();
        assert_eq!(m.mode(), Mode::Security);
        assert!(m.state().exit_button_visible);
        assert_eq!(m.state().security_attempts, 0);
        assert!(m.state().security_code_input.is_empty());
    }

    #[test]
    fn test_correct_code_returns_to_main() {
        let mut m = in_security();
        let effects = enter_code(&mut m, "123456");

        assert_eq!(m.mode(), Mode::Main);
        assert!(effects.contains(&Effect::NotifyPeer(PeerCommand::CloseSecurity)));
        assert!(effects.contains(&Effect::StopProcess(ProcessKind::Security)));
        assert!(m.state().security_code_input.is_empty());
    }

    #[test]
    fn test_mismatch_increments_by_one_and_clears() {
        let mut m = in_security();
        enter_code(&mut m, "12345");
        assert_eq!(m.state().security_code_input, "12345");

        let effects = m.apply(ModeEvent::Keypad(KeypadKey::Digit('0'))).effects;
        assert_eq!(m.state().security_attempts, 1);
        assert!(m.state().security_code_input.is_empty());
        assert!(matches!(
            &effects[0],
            Effect::Notify { severity: Severity::Warning, .. }
        ));
    }

    #[test]
    fn test_three_mismatches_reset_attempts_and_stay() {
        let mut m = in_security();
        enter_code(&mut m, "000000");
        enter_code(&mut m, "111111");
        assert_eq!(m.state().security_attempts, 2);

        let effects = enter_code(&mut m, "222222");
        assert_eq!(m.state().security_attempts, 0);
        assert_eq!(m.mode(), Mode::Security);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Notify { severity: Severity::Danger, .. }
        )));
    }

    #[test]
    fn test_keypad_clear_and_backspace() {
        let mut m = in_security();
        enter_code(&mut m, "123");
        m.apply(ModeEvent::Keypad(KeypadKey::Backspace));
        assert_eq!(m.state().security_code_input, "12");
        m.apply(ModeEvent::Keypad(KeypadKey::Clear));
        assert!(m.state().security_code_input.is_empty());

        assert_eq!(KeypadKey::parse("←"), Some(KeypadKey::Backspace));
        assert_eq!(KeypadKey::parse("7"), Some(KeypadKey::Digit('7')));
        assert_eq!(KeypadKey::parse("77"), None);
    }

    #[test]
    fn test_keypad_ignored_outside_security() {
        let mut m = machine();
        enter_code(&mut m, "123456");
        assert_eq!(m.mode(), Mode::Main);
        assert!(m.state().security_code_input.is_empty());
    }

    #[test]
    fn test_exit_button_gate() {
        let mut m = in_security();
        m.apply(ModeEvent::Peer(PeerCommand::HideExitButton));
        m.apply(ModeEvent::ExitSecurity);
        assert_eq!(m.mode(), Mode::Security);

        let mut m = in_security();
        let step = m.apply(ModeEvent::ExitSecurity);
        assert_eq!(m.mode(), Mode::Main);
        assert!(step
            .effects
            .contains(&Effect::NotifyPeer(PeerCommand::CloseSecurity)));
        assert!(step
            .effects
            .contains(&Effect::StopProcess(ProcessKind::Security)));
    }

    #[test]
    fn test_close_commands_only_leave_matching_mode() {
        let mut m = machine();
        m.apply(ModeEvent::EnterMusic);
        m.apply(ModeEvent::Peer(PeerCommand::CloseSecurity));
        assert_eq!(m.mode(), Mode::Music);

        let mut m = in_security();
        m.apply(ModeEvent::Peer(PeerCommand::CloseSecurity));
        assert_eq!(m.mode(), Mode::Main);
    }

    #[test]
    fn test_conversation_lifecycle() {
        let mut m = machine();
        let step = m.apply(ModeEvent::ConversationAcked);
        assert!(step.changed());
        assert_eq!(m.mode(), Mode::Conversation);
        assert!(m.state().peer_conversation_armed);

        let step = m.apply(ModeEvent::EndConversation);
        assert_eq!(step.to, Mode::Main);
        assert_eq!(
            step.effects,
            vec![
                Effect::NotifyPeer(PeerCommand::CloseConversation),
                Effect::StopProcess(ProcessKind::Conversation)
            ]
        );
        assert!(!m.state().peer_conversation_armed);
    }

    #[test]
    fn test_station_toggle() {
        let mut m = machine();
        m.apply(ModeEvent::EnterMusic);

        let step = m.apply(ModeEvent::SelectStation("http://radio/a".into()));
        assert_eq!(step.effects, vec![Effect::StartPlayback("http://radio/a".into())]);
        let step = m.apply(ModeEvent::SelectStation("http://radio/a".into()));
        assert_eq!(step.effects, vec![Effect::StopPlayback]);
        assert!(m.state().current_stream.is_empty());

        m.apply(ModeEvent::SelectStation("http://radio/b".into()));
        let step = m.apply(ModeEvent::LeaveMusic);
        assert_eq!(step.effects, vec![Effect::StopPlayback]);
        assert_eq!(m.mode(), Mode::Main);
    }

    #[test]
    fn test_escape_precedence() {
        // Time editor closes before anything else
        let mut m = machine();
        m.apply(ModeEvent::ConversationAcked);
        m.apply(ModeEvent::SetTimeEditor(true));
        m.apply(ModeEvent::Escape);
        assert!(!m.state().time_editor_open);
        assert_eq!(m.mode(), Mode::Conversation);

        // Conversation notifies the peer first
        let step = m.apply(ModeEvent::Escape);
        assert_eq!(step.effects[0], Effect::NotifyPeer(PeerCommand::CloseConversation));
        assert_eq!(m.mode(), Mode::Main);

        // Security clears attempts
        let mut m = in_security();
        enter_code(&mut m, "999999");
        m.apply(ModeEvent::Escape);
        assert_eq!(m.mode(), Mode::Main);
        assert_eq!(m.state().security_attempts, 0);

        // Then the list dialog, then terminate
        let mut m = machine();
        m.apply(ModeEvent::SetListDialog(true));
        assert!(m.apply(ModeEvent::Escape).effects.is_empty());
        assert!(!m.state().list_dialog_open);
        assert_eq!(m.apply(ModeEvent::Escape).effects, vec![Effect::Terminate]);
    }

    #[test]
    fn test_password_submission() {
        let mut m = in_security();
        m.apply(ModeEvent::PasswordSubmitted("000000".into()));
        assert_eq!(m.mode(), Mode::Security);
        m.apply(ModeEvent::PasswordSubmitted("123456".into()));
        assert_eq!(m.mode(), Mode::Main);
    }
}
