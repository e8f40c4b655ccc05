/// Node lifecycle state machine.
///
/// Transitions are a pure function of (state, event). Entering a state
/// yields the actions the controller must run; the machine itself never
/// performs side effects.
use std::fmt;

/// Phases nested inside [`SyncState::SyncingWithNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    DownloadingBlocks,
    DownloadPaused,
    DownloadFinished,
    ProcessFinished,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    #[default]
    Uninitialised,
    Init,
    /// Caught up; waiting for new blocks or the wake-up timer.
    Idle,
    /// Processing a block received while idle.
    NewBlock,
    SyncingWithNetwork(SyncPhase),
    /// Rolling back after a detected fork.
    Fork,
    Stopped,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Start,
    NetworkStart,
    Started,
    Failure,
    Success,
    NewBlock,
    WakeUp,
    ProcessFinished,
    SyncFinished,
    Downloaded,
    NoBlock,
    Synced,
    NotSynced,
    Paused,
    NetworkHalted,
    Fork,
    Stop,
}

/// Side effects run on entering a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Initialize,
    CheckLater,
    BlockchainReady,
    CheckLastDownloadedBlockSynced,
    DownloadBlocks,
    DownloadFinished,
    DownloadPaused,
    CheckLastBlockSynced,
    SyncingComplete,
    StartForkRecovery,
    Stopped,
    ExitApp,
}

impl SyncState {
    /// Target state for `event`, or `None` when the state ignores it.
    pub fn next(self, event: Event) -> Option<SyncState> {
        use SyncPhase as P;
        use SyncState as S;

        if event == Event::Stop {
            return Some(S::Stopped);
        }

        match (self, event) {
            (S::Uninitialised | S::Stopped, Event::Start) => Some(S::Init),

            (S::Init, Event::NetworkStart) => Some(S::Idle),
            (S::Init, Event::Started) => Some(S::SyncingWithNetwork(P::Idle)),
            (S::Init, Event::Failure) => Some(S::Exit),

            (S::Idle, Event::NewBlock) => Some(S::NewBlock),
            (S::Idle, Event::WakeUp) => Some(S::SyncingWithNetwork(P::Idle)),
            (S::Idle | S::NewBlock, Event::Fork) => Some(S::Fork),

            (S::NewBlock, Event::ProcessFinished) => Some(S::Idle),

            (S::SyncingWithNetwork(phase), event) => phase
                .next(event)
                .map(S::SyncingWithNetwork)
                .or(match event {
                    Event::SyncFinished => Some(S::Idle),
                    Event::Fork => Some(S::Fork),
                    _ => None,
                }),

            (S::Fork, Event::Success) => Some(S::SyncingWithNetwork(P::Idle)),
            (S::Fork, Event::Failure) => Some(S::Exit),

            _ => None,
        }
    }

    pub fn entry_actions(self) -> &'static [Action] {
        match self {
            SyncState::Uninitialised | SyncState::NewBlock => &[],
            SyncState::Init => &[Action::Initialize],
            SyncState::Idle => &[Action::CheckLater, Action::BlockchainReady],
            SyncState::SyncingWithNetwork(phase) => phase.entry_actions(),
            SyncState::Fork => &[Action::StartForkRecovery],
            SyncState::Stopped => &[Action::Stopped],
            SyncState::Exit => &[Action::ExitApp],
        }
    }
}

impl SyncPhase {
    fn next(self, event: Event) -> Option<SyncPhase> {
        use SyncPhase as P;

        match (self, event) {
            (P::Idle, Event::Downloaded | Event::NotSynced) => Some(P::DownloadingBlocks),
            (P::Idle, Event::Synced) => Some(P::DownloadFinished),
            (P::Idle, Event::Paused) => Some(P::DownloadPaused),
            (P::Idle, Event::NetworkHalted) => Some(P::End),

            (P::DownloadingBlocks, Event::ProcessFinished) => Some(P::DownloadFinished),
            (P::DownloadingBlocks, Event::Downloaded | Event::NoBlock) => Some(P::Idle),

            (P::DownloadFinished | P::DownloadPaused, Event::ProcessFinished) => Some(P::ProcessFinished),

            (P::ProcessFinished, Event::Synced) => Some(P::End),
            (P::ProcessFinished, Event::NotSynced) => Some(P::DownloadingBlocks),

            _ => None,
        }
    }

    fn entry_actions(self) -> &'static [Action] {
        match self {
            SyncPhase::Idle => &[Action::CheckLastDownloadedBlockSynced],
            SyncPhase::DownloadingBlocks => &[Action::DownloadBlocks],
            SyncPhase::DownloadPaused => &[Action::DownloadPaused],
            SyncPhase::DownloadFinished => &[Action::DownloadFinished],
            SyncPhase::ProcessFinished => &[Action::CheckLastBlockSynced],
            SyncPhase::End => &[Action::SyncingComplete],
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::SyncingWithNetwork(phase) => write!(f, "syncWithNetwork.{phase:?}"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SyncState,
    pub to: SyncState,
    pub event: Event,
    pub actions: &'static [Action],
}

#[derive(Debug, Default)]
pub struct SyncStateMachine {
    state: SyncState,
}

impl SyncStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = SyncState::Uninitialised;
    }

    /// Apply `event`. `None` leaves the state untouched.
    pub fn transition(&mut self, event: Event) -> Option<Transition> {
        let from = self.state;
        let to = from.next(event)?;
        self.state = to;
        Some(Transition {
            from,
            to,
            event,
            actions: to.entry_actions(),
        })
    }
}
