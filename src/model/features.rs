//! App-integration features of a character.
//!
//! These map onto the `special` array of the script JSON. Every feature that
//! applies "to someone, at some time" is a [`ScopeGrid`]: rows are who it
//! applies to, columns are when.

use serde_json::Value;

use crate::error::{Result, ScriptError};
use crate::snapshot::SpecialEntry;

/// Row of a scope grid: whose tokens or players the feature covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GlobalScope {
    /// The character's own player. Serialized as an entry with no `global`.
    Player,
    Townsfolk,
    Outsider,
    Minion,
    Demon,
    Traveller,
    Dead,
}

impl GlobalScope {
    pub const COUNT: usize = 7;
    pub const ALL: [GlobalScope; Self::COUNT] = [
        GlobalScope::Player,
        GlobalScope::Townsfolk,
        GlobalScope::Outsider,
        GlobalScope::Minion,
        GlobalScope::Demon,
        GlobalScope::Traveller,
        GlobalScope::Dead,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            GlobalScope::Player => None,
            GlobalScope::Townsfolk => Some("townsfolk"),
            GlobalScope::Outsider => Some("outsider"),
            GlobalScope::Minion => Some("minion"),
            GlobalScope::Demon => Some("demon"),
            GlobalScope::Traveller => Some("traveller"),
            GlobalScope::Dead => Some("dead"),
        }
    }

    pub fn from_wire(name: Option<&str>) -> Option<GlobalScope> {
        match name {
            None => Some(GlobalScope::Player),
            Some(n) => GlobalScope::ALL
                .into_iter()
                .find(|g| g.wire_name() == Some(n)),
        }
    }
}

/// Column of a scope grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeOfDay {
    Pregame,
    FirstNight,
    FirstDay,
    OtherNight,
    OtherDay,
}

impl TimeOfDay {
    pub const COUNT: usize = 5;
    pub const ALL: [TimeOfDay; Self::COUNT] = [
        TimeOfDay::Pregame,
        TimeOfDay::FirstNight,
        TimeOfDay::FirstDay,
        TimeOfDay::OtherNight,
        TimeOfDay::OtherDay,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            TimeOfDay::Pregame => "pregame",
            TimeOfDay::FirstNight => "firstNight",
            TimeOfDay::FirstDay => "firstDay",
            TimeOfDay::OtherNight => "otherNight",
            TimeOfDay::OtherDay => "otherDay",
        }
    }

    pub fn from_wire(name: &str) -> Option<TimeOfDay> {
        TimeOfDay::ALL.into_iter().find(|t| t.wire_name() == name)
    }
}

/// Tri-state summary of one grid row, as shown by a row checkbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowState {
    Off,
    Partial,
    All,
}

/// 7×5 boolean grid of [`GlobalScope`] × [`TimeOfDay`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScopeGrid {
    cells: [[bool; TimeOfDay::COUNT]; GlobalScope::COUNT],
}

impl ScopeGrid {
    pub fn get(&self, row: GlobalScope, col: TimeOfDay) -> bool {
        self.cells[row.index()][col.index()]
    }

    pub fn set(&mut self, row: GlobalScope, col: TimeOfDay, on: bool) {
        self.cells[row.index()][col.index()] = on;
    }

    pub fn set_row(&mut self, row: GlobalScope, on: bool) {
        self.cells[row.index()] = [on; TimeOfDay::COUNT];
    }

    pub fn row_state(&self, row: GlobalScope) -> RowState {
        let enabled = self.cells[row.index()].iter().filter(|c| **c).count();
        match enabled {
            0 => RowState::Off,
            n if n == TimeOfDay::COUNT => RowState::All,
            _ => RowState::Partial,
        }
    }

    pub fn column_any(&self, col: TimeOfDay) -> bool {
        self.cells.iter().any(|row| row[col.index()])
    }

    pub fn is_empty(&self) -> bool {
        GlobalScope::ALL
            .into_iter()
            .all(|row| self.row_state(row) == RowState::Off)
    }

    /// Every enabled cell, row-major.
    pub fn enabled(&self) -> impl Iterator<Item = (GlobalScope, TimeOfDay)> + '_ {
        GlobalScope::ALL.into_iter().flat_map(move |row| {
            TimeOfDay::ALL
                .into_iter()
                .filter(move |col| self.get(row, *col))
                .map(move |col| (row, col))
        })
    }
}

/// How the storyteller's bag treats the character during setup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    Default,
    BagDisabled,
    BagDuplicate,
}

impl Selection {
    fn wire_name(self) -> Option<&'static str> {
        match self {
            Selection::Default => None,
            Selection::BagDisabled => Some("bag-disabled"),
            Selection::BagDuplicate => Some("bag-duplicate"),
        }
    }
}

/// Ability features the app understands, each carrying a scope grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbilityFeature {
    DistributeRoles,
    GhostVotes,
    Pointing,
    GrimoireSignal,
    OpenEyes,
}

impl AbilityFeature {
    pub const COUNT: usize = 5;
    pub const ALL: [AbilityFeature; Self::COUNT] = [
        AbilityFeature::DistributeRoles,
        AbilityFeature::GhostVotes,
        AbilityFeature::Pointing,
        AbilityFeature::GrimoireSignal,
        AbilityFeature::OpenEyes,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            AbilityFeature::DistributeRoles => "distribute-roles",
            AbilityFeature::GhostVotes => "ghost-votes",
            AbilityFeature::Pointing => "pointing",
            AbilityFeature::GrimoireSignal => "grimoire",
            AbilityFeature::OpenEyes => "open-eyes",
        }
    }

    fn from_wire(name: &str) -> Option<AbilityFeature> {
        AbilityFeature::ALL.into_iter().find(|f| f.wire_name() == name)
    }
}

/// What a signal shows to the player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Card,
    Player,
    Character,
}

impl SignalKind {
    fn wire_name(self) -> &'static str {
        match self {
            SignalKind::Card => "card",
            SignalKind::Player => "player",
            SignalKind::Character => "character",
        }
    }

    fn from_wire(name: &str) -> Option<SignalKind> {
        [SignalKind::Card, SignalKind::Player, SignalKind::Character]
            .into_iter()
            .find(|k| k.wire_name() == name)
    }
}

/// A prompt the app can show the player, e.g. a card reading "You are".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    pub text: String,
    pub kind: SignalKind,
    pub times: [bool; TimeOfDay::COUNT],
}

impl Signal {
    pub fn new(kind: SignalKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
            times: [false; TimeOfDay::COUNT],
        }
    }

    pub fn at(mut self, time: TimeOfDay) -> Self {
        self.times[time.index()] = true;
        self
    }

    pub fn applies_at(&self, time: TimeOfDay) -> bool {
        self.times[time.index()]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppFeatures {
    pub selection: Selection,
    multiplier: u32,
    pub hidden: bool,
    pub is_swap_reveal_token: bool,
    pub swap_reveal_token: String,
    scopes: [ScopeGrid; AbilityFeature::COUNT],
    /// `special` entries this crate does not model, kept for round-trips.
    pub extra: Vec<SpecialEntry>,
}

impl Default for AppFeatures {
    fn default() -> Self {
        Self {
            selection: Selection::Default,
            multiplier: 1,
            hidden: false,
            is_swap_reveal_token: false,
            swap_reveal_token: String::new(),
            scopes: [ScopeGrid::default(); AbilityFeature::COUNT],
            extra: Vec::new(),
        }
    }
}

impl AppFeatures {
    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn set_multiplier(&mut self, multiplier: u32) -> Result<()> {
        if multiplier == 0 {
            return Err(ScriptError::InvalidValue {
                field: "multiplier",
                reason: "a vote counts at least once".into(),
            });
        }
        self.multiplier = multiplier;
        Ok(())
    }

    pub fn scope(&self, feature: AbilityFeature) -> &ScopeGrid {
        &self.scopes[feature as usize]
    }

    pub fn scope_mut(&mut self, feature: AbilityFeature) -> &mut ScopeGrid {
        &mut self.scopes[feature as usize]
    }

    pub fn is_default(&self) -> bool {
        *self == AppFeatures::default()
    }

    /// Builds features and signals from `special` entries.
    ///
    /// Entries that look like a known feature but carry bad values are
    /// reported in the returned messages and dropped; unknown entries are
    /// kept in [`AppFeatures::extra`].
    pub fn from_specials(entries: &[SpecialEntry]) -> (AppFeatures, Vec<Signal>, Vec<String>) {
        let mut features = AppFeatures::default();
        let mut signals: Vec<Signal> = Vec::new();
        let mut problems = Vec::new();

        for entry in entries {
            match (entry.kind.as_str(), entry.name.as_str()) {
                ("selection", "bag-disabled") => features.selection = Selection::BagDisabled,
                ("selection", "bag-duplicate") => features.selection = Selection::BagDuplicate,
                ("vote", "hidden") => features.hidden = true,
                ("vote", "multiplier") => {
                    let value = entry.value.as_ref().and_then(Value::as_u64).unwrap_or(0);
                    match u32::try_from(value).ok().filter(|v| *v > 0) {
                        Some(v) => features.multiplier = v,
                        None => problems.push(format!("vote multiplier must be at least 1, got {value}")),
                    }
                }
                ("reveal", "replace-character") => {
                    features.is_swap_reveal_token = true;
                    features.swap_reveal_token = entry
                        .value
                        .as_ref()
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                }
                ("signal", name) if SignalKind::from_wire(name).is_some() => {
                    let Some(kind) = SignalKind::from_wire(name) else { continue };
                    let text = entry
                        .value
                        .as_ref()
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let time = entry.time.as_deref().and_then(TimeOfDay::from_wire);
                    // One entry per time; consecutive entries fold into one signal.
                    match signals.last_mut() {
                        Some(last) if last.kind == kind && last.text == text && time.is_some() => {
                            if let Some(t) = time {
                                last.times[t.index()] = true;
                            }
                        }
                        _ => {
                            let mut signal = Signal::new(kind, text);
                            if let Some(t) = time {
                                signal.times[t.index()] = true;
                            }
                            signals.push(signal);
                        }
                    }
                }
                ("ability", name) if AbilityFeature::from_wire(name).is_some() => {
                    let Some(feature) = AbilityFeature::from_wire(name) else { continue };
                    let Some(row) = GlobalScope::from_wire(entry.global.as_deref()) else {
                        problems.push(format!(
                            "unknown global '{}' on {name}",
                            entry.global.as_deref().unwrap_or_default()
                        ));
                        continue;
                    };
                    match entry.time.as_deref() {
                        None => features.scope_mut(feature).set_row(row, true),
                        Some(t) => match TimeOfDay::from_wire(t) {
                            Some(col) => features.scope_mut(feature).set(row, col, true),
                            None => problems.push(format!("unknown time '{t}' on {name}")),
                        },
                    }
                }
                _ => features.extra.push(entry.clone()),
            }
        }

        (features, signals, problems)
    }

    pub fn to_specials(&self, signals: &[Signal]) -> Vec<SpecialEntry> {
        let mut out = Vec::new();

        if let Some(name) = self.selection.wire_name() {
            out.push(SpecialEntry::new("selection", name));
        }
        if self.multiplier > 1 {
            out.push(SpecialEntry::new("vote", "multiplier").with_value(Value::from(self.multiplier)));
        }
        if self.hidden {
            out.push(SpecialEntry::new("vote", "hidden"));
        }
        if self.is_swap_reveal_token {
            out.push(
                SpecialEntry::new("reveal", "replace-character")
                    .with_value(Value::from(self.swap_reveal_token.clone())),
            );
        }

        for signal in signals {
            let base = SpecialEntry::new("signal", signal.kind.wire_name())
                .with_value(Value::from(signal.text.clone()));
            let times: Vec<TimeOfDay> = TimeOfDay::ALL
                .into_iter()
                .filter(|t| signal.applies_at(*t))
                .collect();
            if times.is_empty() {
                out.push(base);
                continue;
            }
            for t in times {
                let mut entry = base.clone();
                entry.time = Some(t.wire_name().to_string());
                out.push(entry);
            }
        }

        for feature in AbilityFeature::ALL {
            let grid = self.scope(feature);
            for row in GlobalScope::ALL {
                let global = row.wire_name().map(str::to_string);
                match grid.row_state(row) {
                    RowState::Off => {}
                    RowState::All => {
                        let mut entry = SpecialEntry::new("ability", feature.wire_name());
                        entry.global = global;
                        out.push(entry);
                    }
                    RowState::Partial => {
                        for col in TimeOfDay::ALL.into_iter().filter(|c| grid.get(row, *c)) {
                            let mut entry = SpecialEntry::new("ability", feature.wire_name());
                            entry.global = global.clone();
                            entry.time = Some(col.wire_name().to_string());
                            out.push(entry);
                        }
                    }
                }
            }
        }

        out.extend(self.extra.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_state() {
        let mut grid = ScopeGrid::default();
        assert_eq!(grid.row_state(GlobalScope::Dead), RowState::Off);
        grid.set(GlobalScope::Dead, TimeOfDay::OtherDay, true);
        assert_eq!(grid.row_state(GlobalScope::Dead), RowState::Partial);
        grid.set_row(GlobalScope::Dead, true);
        assert_eq!(grid.row_state(GlobalScope::Dead), RowState::All);
        assert!(grid.column_any(TimeOfDay::Pregame));
        assert!(!grid.is_empty());
        assert_eq!(grid.enabled().count(), TimeOfDay::COUNT);
    }

    #[test]
    fn test_multiplier_must_be_positive() {
        let mut features = AppFeatures::default();
        assert_eq!(features.multiplier(), 1);
        assert!(features.set_multiplier(0).is_err());
        features.set_multiplier(3).unwrap();
        assert_eq!(features.multiplier(), 3);
    }

    #[test]
    fn test_specials_round_trip() {
        let mut features = AppFeatures::default();
        features.selection = Selection::BagDuplicate;
        features.hidden = true;
        features.set_multiplier(2).unwrap();
        features
            .scope_mut(AbilityFeature::GhostVotes)
            .set_row(GlobalScope::Dead, true);
        features
            .scope_mut(AbilityFeature::Pointing)
            .set(GlobalScope::Player, TimeOfDay::OtherDay, true);
        features.extra.push(SpecialEntry::new("bag", "something-new"));
        let signals = vec![Signal::new(SignalKind::Card, "You are")
            .at(TimeOfDay::FirstNight)
            .at(TimeOfDay::OtherNight)];

        let specials = features.to_specials(&signals);
        let (parsed, parsed_signals, problems) = AppFeatures::from_specials(&specials);
        assert!(problems.is_empty());
        assert_eq!(parsed, features);
        assert_eq!(parsed_signals, signals);
    }

    #[test]
    fn test_signal_without_times_is_written_once() {
        let features = AppFeatures::default();
        let signals = vec![
            Signal::new(SignalKind::Player, "Choose"),
            Signal::new(SignalKind::Card, "You are").at(TimeOfDay::FirstDay),
        ];

        let specials = features.to_specials(&signals);
        assert_eq!(specials.len(), 2);
        assert_eq!(specials[0].time, None);
        assert_eq!(specials[1].time.as_deref(), Some(TimeOfDay::FirstDay.wire_name()));

        let (_, parsed_signals, problems) = AppFeatures::from_specials(&specials);
        assert!(problems.is_empty());
        assert_eq!(parsed_signals, signals);
    }

    #[test]
    fn test_bad_specials_are_reported() {
        let entries = vec![
            SpecialEntry::new("vote", "multiplier").with_value(Value::from(0)),
            SpecialEntry {
                global: Some("nobody".into()),
                ..SpecialEntry::new("ability", "pointing")
            },
        ];
        let (features, _, problems) = AppFeatures::from_specials(&entries);
        assert_eq!(problems.len(), 2);
        assert_eq!(features.multiplier(), 1);
        assert!(features.scope(AbilityFeature::Pointing).is_empty());
    }
}
