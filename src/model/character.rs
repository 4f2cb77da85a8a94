use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::archive;
use crate::error::{Result, ScriptError};
use crate::snapshot::CharacterData;

use super::event::Event;
use super::features::{AppFeatures, Signal};
use super::handle::Handle;
use super::reminder::ReminderToken;
use super::team::{Night, SortInfo, Team};
use super::tracked::TrackedList;

/// Which part of a character changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CharacterField {
    Id,
    Name,
    Ability,
    Team,
    Edition,
    SortInfo,
    Image,
    FirstNight,
    OtherNight,
    Reminders,
    AppFeatures,
}

/// Night-order placement. An order of 0 means the character does not wake.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NightInfo {
    pub order: f64,
    pub reminder: String,
}

impl NightInfo {
    pub fn wakes(&self) -> bool {
        self.order > 0.0
    }
}

/// One playable role on a script.
///
/// All setters take `&self` and raise [`Character::changed`] only when the
/// value actually changes.
pub struct Character {
    self_ref: Weak<Character>,
    id: RefCell<String>,
    name: RefCell<String>,
    ability: RefCell<String>,
    team: Cell<Team>,
    edition: RefCell<String>,
    sort_info: Cell<SortInfo>,
    images: RefCell<Vec<String>>,
    first_night: RefCell<NightInfo>,
    other_night: RefCell<NightInfo>,
    reminders: TrackedList<Handle<ReminderToken>>,
    features: RefCell<AppFeatures>,
    signals: TrackedList<Signal>,
    changed: Event<CharacterField>,
}

impl Character {
    pub fn new(id: impl Into<String>, name: impl Into<String>, team: Team) -> Handle<Character> {
        let id = id.into();
        let name = name.into();
        Handle::from_rc(Rc::new_cyclic(|weak: &Weak<Character>| {
            let character = Character {
                self_ref: weak.clone(),
                id: RefCell::new(id),
                name: RefCell::new(name),
                ability: RefCell::new(String::new()),
                team: Cell::new(team),
                edition: RefCell::new(String::new()),
                sort_info: Cell::new(SortInfo::Other),
                images: RefCell::new(Vec::new()),
                first_night: RefCell::new(NightInfo::default()),
                other_night: RefCell::new(NightInfo::default()),
                reminders: TrackedList::new(),
                features: RefCell::new(AppFeatures::default()),
                signals: TrackedList::new(),
                changed: Event::new(),
            };
            character.forward_collection_events();
            character
        }))
    }

    // Reminder and signal list changes count as changes to the character.
    fn forward_collection_events(&self) {
        use CharacterField::{AppFeatures as Features, Reminders};
        let weak = &self.self_ref;
        self.reminders.item_added().subscribe(forwarder(weak, Reminders));
        self.reminders.item_removed().subscribe(forwarder(weak, Reminders));
        self.reminders.order_changed().subscribe(forwarder(weak, Reminders));
        self.signals.item_added().subscribe(forwarder(weak, Features));
        self.signals.item_removed().subscribe(forwarder(weak, Features));
        self.signals.order_changed().subscribe(forwarder(weak, Features));
    }

    /// Builds a character from its persisted form.
    ///
    /// Problems that do not prevent loading are returned as messages.
    pub fn from_data(data: &CharacterData) -> (Handle<Character>, Vec<String>) {
        let mut problems = Vec::new();
        let character = Character::new(data.id.clone(), data.name.clone(), data.team);
        *character.ability.borrow_mut() = data.ability.clone();
        character.sort_info.set(SortInfo::infer(&data.ability));
        *character.edition.borrow_mut() = data.edition.clone();

        let slots = data.team.token_slots();
        let mut images = data.image.clone();
        if images.len() > slots {
            problems.push(format!(
                "{} has {} images but a {} only has {slots}",
                data.id,
                images.len(),
                data.team.as_str()
            ));
            images.truncate(slots);
        }
        *character.images.borrow_mut() = images;

        *character.first_night.borrow_mut() = NightInfo {
            order: data.first_night,
            reminder: data.first_night_reminder.clone(),
        };
        *character.other_night.borrow_mut() = NightInfo {
            order: data.other_night,
            reminder: data.other_night_reminder.clone(),
        };

        let (features, signals, feature_problems) = AppFeatures::from_specials(&data.special);
        problems.extend(feature_problems.into_iter().map(|p| format!("{}: {p}", data.id)));
        *character.features.borrow_mut() = features;
        for signal in signals {
            character.signals.add(signal);
        }

        for text in &data.reminders {
            character.add_reminder(text.clone(), false);
        }
        for text in &data.reminders_global {
            character.add_reminder(text.clone(), true);
        }

        (character, problems)
    }

    pub fn to_data(&self) -> CharacterData {
        let reminders = self.reminders.to_vec();
        let first = self.first_night.borrow();
        let other = self.other_night.borrow();
        CharacterData {
            id: self.id(),
            name: self.name(),
            team: self.team(),
            ability: self.ability(),
            edition: self.edition(),
            image: self.images(),
            setup: self.has_setup(),
            first_night: first.order,
            first_night_reminder: first.reminder.clone(),
            other_night: other.order,
            other_night_reminder: other.reminder.clone(),
            reminders: reminders
                .iter()
                .filter(|r| !r.is_global())
                .map(|r| r.text())
                .collect(),
            reminders_global: reminders
                .iter()
                .filter(|r| r.is_global())
                .map(|r| r.text())
                .collect(),
            special: self.features.borrow().to_specials(&self.signals.to_vec()),
        }
    }

    pub fn changed(&self) -> &Event<CharacterField> {
        &self.changed
    }

    pub fn id(&self) -> String {
        self.id.borrow().clone()
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn ability(&self) -> String {
        self.ability.borrow().clone()
    }

    /// Ability length in characters, the secondary sort key within a team.
    pub fn ability_len(&self) -> usize {
        self.ability.borrow().chars().count()
    }

    pub fn team(&self) -> Team {
        self.team.get()
    }

    pub fn edition(&self) -> String {
        self.edition.borrow().clone()
    }

    pub fn sort_info(&self) -> SortInfo {
        self.sort_info.get()
    }

    pub fn images(&self) -> Vec<String> {
        self.images.borrow().clone()
    }

    /// Stored image path for `slot`, if one was provided.
    pub fn image(&self, slot: usize) -> Option<String> {
        self.images
            .borrow()
            .get(slot)
            .filter(|p| !p.is_empty())
            .cloned()
    }

    pub fn night(&self, night: Night) -> NightInfo {
        match night {
            Night::First => self.first_night.borrow().clone(),
            Night::Other => self.other_night.borrow().clone(),
        }
    }

    pub fn reminders(&self) -> &TrackedList<Handle<ReminderToken>> {
        &self.reminders
    }

    pub fn signals(&self) -> &TrackedList<Signal> {
        &self.signals
    }

    pub fn features(&self) -> AppFeatures {
        self.features.borrow().clone()
    }

    /// The bracketed setup clause of the ability, e.g. `+2 Outsiders`.
    pub fn setup_clause(&self) -> Option<String> {
        let ability = self.ability.borrow();
        let start = ability.find('[')?;
        let end = ability[start..].find(']')? + start;
        Some(ability[start + 1..end].trim().to_string())
    }

    pub fn has_setup(&self) -> bool {
        self.setup_clause().is_some()
    }

    fn replace_text(&self, cell: &RefCell<String>, value: String, field: CharacterField) {
        if *cell.borrow() == value {
            return;
        }
        *cell.borrow_mut() = value;
        self.changed.emit(&field);
    }

    pub fn set_id(&self, id: impl Into<String>) {
        self.replace_text(&self.id, id.into(), CharacterField::Id);
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.replace_text(&self.name, name.into(), CharacterField::Name);
    }

    /// Sets the ability text; the category follows its opening words.
    pub fn set_ability(&self, ability: impl Into<String>) {
        let ability = ability.into();
        let inferred = SortInfo::infer(&ability);
        self.replace_text(&self.ability, ability, CharacterField::Ability);
        if self.sort_info.replace(inferred) != inferred {
            self.changed.emit(&CharacterField::SortInfo);
        }
    }

    pub fn set_edition(&self, edition: impl Into<String>) {
        self.replace_text(&self.edition, edition.into(), CharacterField::Edition);
    }

    /// Changes the category and rewrites the ability's opening words to match.
    pub fn set_sort_info(&self, sort_info: SortInfo) {
        let ability = self.ability();
        let body = SortInfo::infer(&ability).strip(&ability).to_string();
        self.replace_text(
            &self.ability,
            format!("{}{}", sort_info.prefix(), body),
            CharacterField::Ability,
        );
        if self.sort_info.replace(sort_info) != sort_info {
            self.changed.emit(&CharacterField::SortInfo);
        }
    }

    /// Changes team, dropping image slots the new team does not have.
    pub fn set_team(&self, team: Team) {
        if self.team.replace(team) == team {
            return;
        }
        self.changed.emit(&CharacterField::Team);
        let truncated = {
            let mut images = self.images.borrow_mut();
            let before = images.len();
            images.truncate(team.token_slots());
            images.len() != before
        };
        if truncated {
            self.changed.emit(&CharacterField::Image);
        }
    }

    pub fn set_images(&self, images: Vec<String>) -> Result<()> {
        let slots = self.team().token_slots();
        if images.len() > slots {
            return Err(ScriptError::InvalidValue {
                field: "image",
                reason: format!("{} allows {slots} images, got {}", self.team().as_str(), images.len()),
            });
        }
        if *self.images.borrow() == images {
            return Ok(());
        }
        *self.images.borrow_mut() = images;
        self.changed.emit(&CharacterField::Image);
        Ok(())
    }

    /// Points one slot at `path`. Empty earlier slots get their conventional
    /// archive path.
    pub fn set_image(&self, slot: usize, path: impl Into<String>) -> Result<()> {
        if slot >= self.team().token_slots() {
            return Err(ScriptError::InvalidValue {
                field: "image",
                reason: format!("slot {slot} does not exist for a {}", self.team().as_str()),
            });
        }
        let id = self.id();
        let mut images = self.images();
        while images.len() <= slot {
            images.push(archive::token_path(&id, images.len()));
        }
        images[slot] = path.into();
        self.set_images(images)
    }

    pub fn set_night_order(&self, night: Night, order: f64) {
        let (cell, field) = self.night_cell(night);
        if cell.borrow().order == order {
            return;
        }
        cell.borrow_mut().order = order;
        self.changed.emit(&field);
    }

    pub fn set_night_reminder(&self, night: Night, reminder: impl Into<String>) {
        let reminder = reminder.into();
        let (cell, field) = self.night_cell(night);
        if cell.borrow().reminder == reminder {
            return;
        }
        cell.borrow_mut().reminder = reminder;
        self.changed.emit(&field);
    }

    fn night_cell(&self, night: Night) -> (&RefCell<NightInfo>, CharacterField) {
        match night {
            Night::First => (&self.first_night, CharacterField::FirstNight),
            Night::Other => (&self.other_night, CharacterField::OtherNight),
        }
    }

    /// Edits app features in place; raises one change event if anything differs.
    pub fn update_features<R>(&self, edit: impl FnOnce(&mut AppFeatures) -> R) -> R {
        let (result, changed) = {
            let mut features = self.features.borrow_mut();
            let before = features.clone();
            let result = edit(&mut features);
            (result, *features != before)
        };
        if changed {
            self.changed.emit(&CharacterField::AppFeatures);
        }
        result
    }

    pub fn add_reminder(&self, text: impl Into<String>, is_global: bool) -> Handle<ReminderToken> {
        let token = Handle::new(ReminderToken::new(self.self_ref.clone(), text.into(), is_global));
        self.reminders.add(token.clone());
        token
    }

    pub fn remove_reminder(&self, token: &Handle<ReminderToken>) -> bool {
        self.reminders.remove(token)
    }
}

fn forwarder<T: 'static>(weak: &Weak<Character>, field: CharacterField) -> impl Fn(&T) + 'static {
    let weak = weak.clone();
    move |_: &T| {
        if let Some(c) = weak.upgrade() {
            c.changed.emit(&field);
        }
    }
}

impl fmt::Debug for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Character")
            .field("id", &*self.id.borrow())
            .field("name", &*self.name.borrow())
            .field("team", &self.team.get())
            .finish_non_exhaustive()
    }
}
