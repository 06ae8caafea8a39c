use crate::{
    address::AccountAddress,
    ledger::RawGameRecord,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::Serialize;
use std::fmt;

pub const OCTAS_PER_APT: u64 = 100_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum GamePhase {
    #[default]
    NotStarted,
    Active,
    Ended,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GamePhase::NotStarted => "Waiting to Start",
            GamePhase::Active => "In Progress",
            GamePhase::Ended => "Ended",
        };
        f.write_str(label)
    }
}

/// The published view of the tracked game.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub last_buyer: Option<AccountAddress>,
    /// octas
    pub prize_pool: u64,
    /// octas
    pub ticket_price: u64,
    pub time_left: u64,
    pub is_game_active: bool,
    pub winner: Option<AccountAddress>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub phase: GamePhase,
    pub timer_end: Option<u64>,
    pub resolved_address: Option<AccountAddress>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Sequence number of the read this state was built from.
    pub sequence: u64,
}

/// Everything that follows from one record at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Derived {
    pub time_left: u64,
    pub is_game_active: bool,
    pub phase: GamePhase,
    pub winner: Option<AccountAddress>,
}

pub fn derive(record: &RawGameRecord, creator: &AccountAddress, now: u64) -> Derived {
    let time_left = record.timer_end.saturating_sub(now);
    let ended = record.started && time_left == 0;
    let is_game_active = record.started && !ended;
    let phase = if is_game_active {
        GamePhase::Active
    } else if ended {
        GamePhase::Ended
    } else {
        GamePhase::NotStarted
    };
    let winner = if is_game_active {
        None
    } else {
        record.declared_winner.or_else(|| {
            record
                .last_buyer
                .filter(|buyer| !buyer.is_zero() && buyer != creator)
        })
    };
    Derived {
        time_left,
        is_game_active,
        phase,
        winner,
    }
}

impl SyncState {
    /// Replaces every ledger-derived field with values from `record`.
    pub fn reconcile(
        &mut self,
        record: &RawGameRecord,
        creator: &AccountAddress,
        resolved: AccountAddress,
        now: u64,
        sequence: u64,
    ) {
        let derived = derive(record, creator, now);
        *self = SyncState {
            last_buyer: record.last_buyer.filter(|buyer| !buyer.is_zero()),
            prize_pool: record.total_deposit,
            ticket_price: record.ticket_price,
            timer_end: Some(record.timer_end),
            resolved_address: Some(resolved),
            last_synced_at: DateTime::from_timestamp(now as i64, 0),
            sequence,
            last_error: None,
            retry_count: 0,
            ..SyncState::default()
        };
        self.apply_derived(derived);
    }

    /// Re-derives the time-dependent fields from the cached record without
    /// touching anything the ledger reported. Returns whether anything changed.
    pub fn tick(&mut self, record: &RawGameRecord, creator: &AccountAddress, now: u64) -> bool {
        let derived = derive(record, creator, now);
        let before = (self.time_left, self.is_game_active, self.phase, self.winner);
        self.apply_derived(derived);
        before != (self.time_left, self.is_game_active, self.phase, self.winner)
    }

    /// Counts a failed cycle. Previously synced fields stay as they were.
    pub fn record_failure(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    pub fn surface_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn can_buy_ticket(&self) -> bool {
        self.is_game_active
    }

    pub fn has_synced(&self) -> bool {
        self.last_synced_at.is_some()
    }

    fn apply_derived(&mut self, derived: Derived) {
        self.time_left = derived.time_left;
        self.is_game_active = derived.is_game_active;
        self.phase = derived.phase;
        self.winner = derived.winner;
    }
}

/// `150000000` octas -> `"1.50000000 APT"`.
pub fn format_apt(octas: u64) -> String {
    format!(
        "{}.{:08} APT",
        octas / OCTAS_PER_APT,
        octas % OCTAS_PER_APT
    )
}

/// `125` -> `"02:05"`, `3725` -> `"1:02:05"`.
pub fn format_countdown(secs: u64) -> String {
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
