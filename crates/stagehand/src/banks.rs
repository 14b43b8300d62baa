//! Bank definitions and last-session persistence.
//!
//! Banks are ordered collections of pedalboards with their own navigation
//! policy. They live in a single `banks.json` under the data dir; the last
//! loaded bank/pedalboard pair sits next to it so a reboot comes back where
//! it left off.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stageproto::PedalboardEntry;
use tracing::warn;

/// One bank as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bank {
    pub title: String,
    /// Footswitches 1/2 page pedalboards down/up when set; otherwise the
    /// engine listens for MIDI program changes on `navigate_channel`.
    #[serde(default, rename = "navigateFootswitches")]
    pub navigate_footswitches: bool,
    /// 1-based MIDI channel for program-change navigation.
    #[serde(default, rename = "navigateChannel")]
    pub navigate_channel: Option<u8>,
    #[serde(default)]
    pub pedalboards: Vec<PedalboardEntry>,
}

impl Bank {
    /// The 0-based channel handed to `midi_program_listen`; channel 15 is
    /// the fallback used whenever footswitch navigation is active.
    pub fn program_channel(&self) -> i32 {
        if self.navigate_footswitches {
            return 15;
        }
        match self.navigate_channel {
            Some(channel) => i32::from(channel) - 1,
            None => 15,
        }
    }
}

/// Load every bank; a missing or broken file is just "no banks".
pub fn list_banks(path: &Path) -> Vec<Bank> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return Vec::new(),
    };

    match serde_json::from_str(&text) {
        Ok(banks) => banks,
        Err(err) => {
            warn!(%err, path = %path.display(), "ignoring malformed banks file");
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LastState {
    bank: usize,
    pedalboard: String,
}

/// The bank id and bundle path the session should restore on boot.
pub fn last_bank_and_pedalboard(path: &Path) -> (usize, String) {
    let Ok(text) = std::fs::read_to_string(path) else {
        return (0, String::new());
    };
    match serde_json::from_str::<LastState>(&text) {
        Ok(last) => (last.bank, last.pedalboard),
        Err(err) => {
            warn!(%err, path = %path.display(), "ignoring malformed last-state file");
            (0, String::new())
        }
    }
}

/// Persist the current bank/pedalboard pair. Failures are logged only; a
/// stale last-state file must never break a running session.
pub fn save_last_bank_and_pedalboard(path: &Path, bank: usize, pedalboard: &str) {
    let state = LastState {
        bank,
        pedalboard: pedalboard.to_string(),
    };
    let text = match serde_json::to_string(&state) {
        Ok(text) => text,
        Err(err) => {
            warn!(%err, "cannot serialize last-state");
            return;
        }
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(err) = std::fs::write(path, text) {
        warn!(%err, path = %path.display(), "cannot write last-state file");
    }
}
