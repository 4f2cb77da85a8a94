use serde::{Deserialize, Serialize};

/// Character team. Declaration order is script display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Townsfolk,
    Outsider,
    Minion,
    Demon,
    Traveller,
    Fabled,
    Special,
}

impl Team {
    pub const ALL: [Team; 7] = [
        Team::Townsfolk,
        Team::Outsider,
        Team::Minion,
        Team::Demon,
        Team::Traveller,
        Team::Fabled,
        Team::Special,
    ];

    /// Number of token images a character of this team carries: one per
    /// alignment it can be played as.
    pub fn token_slots(self) -> usize {
        match self {
            Team::Special | Team::Fabled => 1,
            Team::Townsfolk | Team::Outsider | Team::Minion | Team::Demon => 2,
            Team::Traveller => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::Townsfolk => "townsfolk",
            Team::Outsider => "outsider",
            Team::Minion => "minion",
            Team::Demon => "demon",
            Team::Traveller => "traveller",
            Team::Fabled => "fabled",
            Team::Special => "special",
        }
    }

    pub fn parse(s: &str) -> Option<Team> {
        Team::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

/// Ability wording category.
///
/// Used both to group similar abilities together inside a team and to
/// auto-prefix ability text. Declaration order is the grouping order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortInfo {
    StartKnowing,
    FirstNight,
    EachNightStar,
    EachNight,
    EachDay,
    OncePerGame,
    OnDeath,
    #[default]
    Other,
}

impl SortInfo {
    pub const ALL: [SortInfo; 8] = [
        SortInfo::StartKnowing,
        SortInfo::FirstNight,
        SortInfo::EachNightStar,
        SortInfo::EachNight,
        SortInfo::EachDay,
        SortInfo::OncePerGame,
        SortInfo::OnDeath,
        SortInfo::Other,
    ];

    /// Leading words of an ability in this category, without separator.
    pub fn label(self) -> &'static str {
        match self {
            SortInfo::StartKnowing => "You start knowing",
            SortInfo::FirstNight => "On your 1st night",
            SortInfo::EachNightStar => "Each night*",
            SortInfo::EachNight => "Each night",
            SortInfo::EachDay => "Each day",
            SortInfo::OncePerGame => "Once per game",
            SortInfo::OnDeath => "If you die",
            SortInfo::Other => "",
        }
    }

    /// Text prepended to an ability body for this category.
    pub fn prefix(self) -> String {
        match self {
            SortInfo::Other => String::new(),
            SortInfo::StartKnowing => format!("{} ", self.label()),
            _ => format!("{}, ", self.label()),
        }
    }

    /// Classifies ability text by its opening words.
    pub fn infer(ability: &str) -> SortInfo {
        // "Each night*" must be tested before its prefix "Each night".
        SortInfo::ALL
            .into_iter()
            .filter(|s| *s != SortInfo::Other)
            .find(|s| ability.trim_start().starts_with(s.label()))
            .unwrap_or(SortInfo::Other)
    }

    /// Returns `ability` with this category's opening words removed.
    pub fn strip<'a>(self, ability: &'a str) -> &'a str {
        if self == SortInfo::Other {
            return ability;
        }
        match ability.trim_start().strip_prefix(self.label()) {
            Some(rest) => rest.trim_start_matches([',', ' ']),
            None => ability,
        }
    }
}

/// Which night-order list an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Night {
    First,
    Other,
}
