use huddle_common::{ParticipantId, RoomId};

/// What the orchestrator reports to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// The gateway assigned us an id.
    Connected { participant_id: ParticipantId },
    /// Join acknowledged; `members` were already present.
    Joined {
        room_id: RoomId,
        members: Vec<ParticipantId>,
    },
    MemberJoined { participant_id: ParticipantId },
    MemberLeft { participant_id: ParticipantId },
    /// `local` is set for our own line, rendered before the gateway sees it.
    Chat {
        from: ParticipantId,
        text: String,
        timestamp: i64,
        local: bool,
    },
    MuteChanged { muted: bool },
    ScreenShareChanged { sharing: bool },
    Notice(String),
    Disconnected,
}

/// What the UI asks the orchestrator to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ToggleMute,
    StartScreenShare,
    StopScreenShare,
    Chat(String),
    Leave,
}

impl Command {
    /// Parses a line typed at the prompt. Slash commands map to actions,
    /// anything else is chat. Blank lines are ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed {
            "/mute" => Some(Self::ToggleMute),
            "/share" => Some(Self::StartScreenShare),
            "/unshare" => Some(Self::StopScreenShare),
            "/quit" | "/leave" => Some(Self::Leave),
            _ => Some(Self::Chat(line.trim_end_matches(['\r', '\n']).to_string())),
        }
    }
}
