//! An open script: the meta record, the characters in display order and the
//! jinxes, plus the dirty tracking that watches all of them.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archive::{normalize_path, token_path, ScriptArchive, BACKGROUND_PATH, LOGO_PATH};
use crate::context::AppContext;
use crate::error::{Result, ScriptError};
use crate::images::{ImageKey, ImageLoader};
use crate::model::{Character, Event, Handle, Jinx, Meta, Night, SubscriptionId, Team, TrackedList};
use crate::repository::CharacterRepository;
use crate::snapshot::{CharacterEntry, MetaData, ScriptSnapshot, ValidationIssue};
use crate::util::is_url;

const NEW_CHARACTER_ID: &str = "new_character";
const ID_SUFFIX: &str = "_new";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentState {
    Unloaded,
    Loading,
    Ready,
    /// Ready with unsaved changes.
    Dirty,
    Closed,
}

/// A loaded document with the problems found while reading it.
pub struct LoadOutcome {
    pub document: ScriptDocument,
    pub issues: Vec<ValidationIssue>,
}

/// Dirty flag plus the per-record subscriptions feeding it.
struct ChangeTracker {
    phase: Cell<DocumentState>,
    changed: Cell<bool>,
    dirty_changed: Event<bool>,
    characters: RefCell<HashMap<Handle<Character>, SubscriptionId>>,
    jinxes: RefCell<HashMap<Handle<Jinx>, SubscriptionId>>,
}

impl ChangeTracker {
    fn new() -> Self {
        Self {
            phase: Cell::new(DocumentState::Unloaded),
            changed: Cell::new(false),
            dirty_changed: Event::new(),
            characters: RefCell::new(HashMap::new()),
            jinxes: RefCell::new(HashMap::new()),
        }
    }

    fn mark(&self) {
        if self.phase.get() != DocumentState::Ready {
            return;
        }
        if !self.changed.replace(true) {
            self.dirty_changed.emit(&true);
        }
    }

    fn clear(&self) {
        if self.changed.replace(false) {
            self.dirty_changed.emit(&false);
        }
    }
}

fn marker<T: 'static>(tracker: &Weak<ChangeTracker>) -> impl Fn(&T) + 'static {
    let tracker = tracker.clone();
    move |_: &T| {
        if let Some(t) = tracker.upgrade() {
            t.mark();
        }
    }
}

fn watch_list<T: Clone + PartialEq + 'static>(list: &TrackedList<T>, tracker: &Weak<ChangeTracker>) {
    list.item_added().subscribe(marker(tracker));
    list.item_removed().subscribe(marker(tracker));
    list.order_changed().subscribe(marker(tracker));
}

pub struct ScriptDocument {
    meta: Meta,
    characters: TrackedList<Handle<Character>>,
    jinxes: TrackedList<Handle<Jinx>>,
    images: ImageLoader,
    repository: Arc<dyn CharacterRepository>,
    tracker: Rc<ChangeTracker>,
    saved_image_version: Cell<u64>,
}

impl ScriptDocument {
    /// A new, empty script.
    pub fn new(ctx: &AppContext) -> Self {
        let doc = Self::unloaded(ctx, ScriptArchive::new());
        doc.tracker.phase.set(DocumentState::Ready);
        doc
    }

    fn unloaded(ctx: &AppContext, archive: ScriptArchive) -> Self {
        let doc = Self {
            meta: Meta::new(),
            characters: TrackedList::new(),
            jinxes: TrackedList::new(),
            images: ctx.image_loader(archive),
            repository: Arc::clone(ctx.repository()),
            tracker: Rc::new(ChangeTracker::new()),
            saved_image_version: Cell::new(0),
        };
        doc.wire_tracking();
        doc
    }

    fn wire_tracking(&self) {
        let weak = Rc::downgrade(&self.tracker);

        self.meta.changed().subscribe(marker(&weak));
        watch_list(self.meta.bootlegger(), &weak);
        watch_list(self.meta.first_night(), &weak);
        watch_list(self.meta.other_night(), &weak);
        watch_list(&self.characters, &weak);
        watch_list(&self.jinxes, &weak);

        // Records are watched only while they belong to the script.
        let w = weak.clone();
        self.characters.item_added().subscribe(move |c: &Handle<Character>| {
            if let Some(t) = w.upgrade() {
                let id = c.changed().subscribe(marker(&w));
                t.characters.borrow_mut().insert(c.clone(), id);
            }
        });
        let w = weak.clone();
        self.characters.item_removed().subscribe(move |c: &Handle<Character>| {
            if let Some(t) = w.upgrade() {
                if let Some(id) = t.characters.borrow_mut().remove(c) {
                    c.changed().unsubscribe(id);
                }
            }
        });
        let w = weak.clone();
        self.jinxes.item_added().subscribe(move |j: &Handle<Jinx>| {
            if let Some(t) = w.upgrade() {
                let id = j.changed().subscribe(marker(&w));
                t.jinxes.borrow_mut().insert(j.clone(), id);
            }
        });
        let w = weak;
        self.jinxes.item_removed().subscribe(move |j: &Handle<Jinx>| {
            if let Some(t) = w.upgrade() {
                if let Some(id) = t.jinxes.borrow_mut().remove(j) {
                    j.changed().unsubscribe(id);
                }
            }
        });
    }

    /// Opens a script archive, or a bare `script.json` when the path ends in `.json`.
    pub fn open(ctx: &AppContext, path: &Path) -> Result<LoadOutcome> {
        info!(path = %path.display(), "Opening script");
        let is_json = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            let json = std::fs::read_to_string(path)?;
            let (snapshot, issues) = ScriptSnapshot::parse(&json)?;
            Ok(Self::build(ctx, snapshot, ScriptArchive::new(), issues))
        } else {
            Self::load_archive(ctx, ScriptArchive::open(path)?)
        }
    }

    pub fn load_archive(ctx: &AppContext, archive: ScriptArchive) -> Result<LoadOutcome> {
        let (snapshot, issues) = archive.read_snapshot()?;
        Ok(Self::build(ctx, snapshot, archive, issues))
    }

    /// Rebuilds a document from an already parsed snapshot.
    pub fn from_snapshot(ctx: &AppContext, snapshot: &ScriptSnapshot, archive: ScriptArchive) -> LoadOutcome {
        Self::build(ctx, snapshot.clone(), archive, Vec::new())
    }

    fn build(
        ctx: &AppContext,
        snapshot: ScriptSnapshot,
        archive: ScriptArchive,
        mut issues: Vec<ValidationIssue>,
    ) -> LoadOutcome {
        let doc = Self::unloaded(ctx, archive);
        doc.tracker.phase.set(DocumentState::Loading);

        let meta = &snapshot.meta;
        doc.meta.set_name(meta.name.clone());
        doc.meta.set_author(meta.author.clone());
        doc.meta.set_logo(meta.logo.clone());
        doc.meta.set_background(meta.background.clone());
        doc.meta.set_hide_title(meta.hide_title);
        doc.meta.set_almanac(snapshot.almanac.clone());
        doc.meta.bootlegger().reset(meta.bootlegger.clone());

        for entry in &snapshot.characters {
            let (character, problems) = match entry {
                CharacterEntry::Official(id) => match doc.repository.character(id) {
                    Some(data) => Character::from_data(&data),
                    None => {
                        issues.push(ValidationIssue::new(None, format!("unknown official character '{id}'")));
                        continue;
                    }
                },
                CharacterEntry::Custom(data) => Character::from_data(data),
            };
            issues.extend(problems.into_iter().map(|p| ValidationIssue::new(None, p)));
            if doc.character(&character.id()).is_some() {
                issues.push(ValidationIssue::new(
                    None,
                    format!("duplicate character '{}' ignored", character.id()),
                ));
                continue;
            }
            doc.characters.add(character);
        }

        for (night, ids) in [(Night::First, &meta.first_night), (Night::Other, &meta.other_night)] {
            if ids.is_empty() {
                doc.rebuild_night_order(night);
                continue;
            }
            let list = doc.meta.night_order(night);
            for id in ids {
                match doc.character(id) {
                    Some(c) if !list.contains(&c) => list.add(c),
                    Some(_) => {}
                    None => issues.push(ValidationIssue::new(
                        None,
                        format!("{} order lists '{id}' which is not on the script", night_label(night)),
                    )),
                }
            }
        }

        for jinx in &snapshot.jinxes {
            doc.jinxes.add(Jinx::from_data(jinx));
        }

        doc.tracker.phase.set(DocumentState::Ready);
        doc.tracker.clear();
        doc.saved_image_version.set(doc.images.version());

        for issue in &issues {
            warn!("{issue}");
        }
        info!(
            name = %doc.meta.name(),
            characters = doc.characters.len(),
            jinxes = doc.jinxes.len(),
            issues = issues.len(),
            "Loaded script"
        );
        LoadOutcome { document: doc, issues }
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn characters(&self) -> &TrackedList<Handle<Character>> {
        &self.characters
    }

    pub fn jinxes(&self) -> &TrackedList<Handle<Jinx>> {
        &self.jinxes
    }

    pub fn images(&self) -> &ImageLoader {
        &self.images
    }

    pub fn character(&self, id: &str) -> Option<Handle<Character>> {
        self.characters
            .find_index(0, |c| c.id() == id)
            .and_then(|i| self.characters.get(i))
    }

    pub fn is_official(&self, character: &Character) -> bool {
        self.repository.is_official(&character.id())
    }

    /// Raised with the new value whenever the dirty flag flips.
    pub fn dirty_changed(&self) -> &Event<bool> {
        &self.tracker.dirty_changed
    }

    pub fn is_changed(&self) -> bool {
        self.tracker.changed.get()
    }

    /// Data changes or artwork changes since the last save.
    pub fn has_unsaved_changes(&self) -> bool {
        self.is_changed() || self.images.version() != self.saved_image_version.get()
    }

    pub fn state(&self) -> DocumentState {
        match self.tracker.phase.get() {
            DocumentState::Ready if self.has_unsaved_changes() => DocumentState::Dirty,
            phase => phase,
        }
    }

    /// Detaches from every record. Further edits no longer mark the document.
    pub fn close(&self) {
        if self.tracker.phase.replace(DocumentState::Closed) == DocumentState::Closed {
            return;
        }
        for (c, id) in self.tracker.characters.borrow_mut().drain() {
            c.changed().unsubscribe(id);
        }
        for (j, id) in self.tracker.jinxes.borrow_mut().drain() {
            j.changed().unsubscribe(id);
        }
        info!(name = %self.meta.name(), "Closed script");
    }

    /// Adds a character at its sorted position: by team, then ability
    /// category, then ability length. Returns the index it landed at.
    ///
    /// A character that wakes at night is also placed in the matching
    /// night-order list.
    pub fn add_character(&self, character: Handle<Character>) -> Result<usize> {
        let id = character.id();
        if self.character(&id).is_some() {
            return Err(ScriptError::DuplicateId(id));
        }

        let team = character.team();
        let key = (character.sort_info(), character.ability_len());
        let index = self
            .characters
            .find_index(0, |c| c.team() > team || (c.team() == team && (c.sort_info(), c.ability_len()) > key));
        let index = match index {
            Some(i) => {
                self.characters.insert(i, character.clone());
                i
            }
            None => {
                self.characters.add(character.clone());
                self.characters.len() - 1
            }
        };

        for night in [Night::First, Night::Other] {
            if character.night(night).wakes() {
                self.place_in_night_order(&character, night);
            }
        }
        debug!(id = %id, index, "Added character");
        Ok(index)
    }

    /// Removes a character from the script and from both night orders.
    /// Jinxes that mention it stay.
    pub fn remove_character(&self, character: &Handle<Character>) -> bool {
        if !self.characters.remove(character) {
            return false;
        }
        self.meta.first_night().remove(character);
        self.meta.other_night().remove(character);
        debug!(id = %character.id(), "Removed character");
        true
    }

    /// Adds an official character copied from the repository.
    pub fn import_official(&self, id: &str) -> Result<Handle<Character>> {
        let data = self
            .repository
            .character(id)
            .ok_or_else(|| ScriptError::UnknownCharacter(id.to_string()))?;
        let (character, problems) = Character::from_data(&data);
        for problem in problems {
            warn!("{problem}");
        }
        self.add_character(character.clone())?;
        Ok(character)
    }

    /// Adds a blank homebrew character.
    pub fn new_character(&self, team: Team) -> Result<Handle<Character>> {
        let character = Character::new(self.unique_id(NEW_CHARACTER_ID), "New Character", team);
        self.add_character(character.clone())?;
        Ok(character)
    }

    /// `base`, suffixed with `_new` until it clashes with neither a character
    /// on the script nor an official id.
    pub fn unique_id(&self, base: &str) -> String {
        let mut id = base.to_string();
        while self.character(&id).is_some() || self.repository.is_official(&id) {
            id.push_str(ID_SUFFIX);
        }
        id
    }

    /// Turns an official character into an editable homebrew copy under a
    /// new id. Token art is copied into the archive and jinxes follow the
    /// rename. Returns the id actually assigned.
    pub fn fork(&self, character: &Handle<Character>, new_id: &str) -> Result<String> {
        let old_id = character.id();
        if !self.characters.contains(character) {
            return Err(ScriptError::UnknownCharacter(old_id));
        }
        if !self.repository.is_official(&old_id) {
            return Err(ScriptError::NotOfficial(old_id));
        }
        let new_id = self.unique_id(new_id);

        let mut paths = Vec::new();
        for slot in 0..character.team().token_slots() {
            let dest = token_path(&new_id, slot);
            let copied = character
                .image(slot)
                .filter(|p| !is_url(p))
                .is_some_and(|p| self.images.with_archive_mut(|a| a.copy(&p, &dest)));
            if !copied {
                match self.repository.image(&old_id, slot) {
                    Some(bytes) => self.images.with_archive_mut(|a| a.put(&dest, bytes)),
                    None => debug!(id = %old_id, slot, "No artwork to copy for fork"),
                }
            }
            paths.push(dest);
        }

        character.set_images(paths.clone())?;
        character.set_id(new_id.clone());
        for jinx in self.jinxes.to_vec() {
            jinx.rename_character(&old_id, &new_id);
        }
        for path in paths {
            self.images.notify_reload(Some(path));
        }

        info!(from = %old_id, to = %new_id, "Forked character");
        Ok(new_id)
    }

    /// Sets a character's night order and keeps the matching meta list in
    /// step: order 0 takes it out, a positive order puts it in if missing.
    pub fn set_night_order(&self, character: &Handle<Character>, night: Night, order: f64) {
        character.set_night_order(night, order);
        if order > 0.0 {
            self.place_in_night_order(character, night);
        } else {
            self.meta.night_order(night).remove(character);
        }
    }

    fn place_in_night_order(&self, character: &Handle<Character>, night: Night) {
        let list = self.meta.night_order(night);
        if list.contains(character) {
            return;
        }
        let order = character.night(night).order;
        match list.find_index(0, |c| c.night(night).order > order) {
            Some(i) => list.insert(i, character.clone()),
            None => list.add(character.clone()),
        }
    }

    /// Rebuilds a night-order list from the characters' numeric orders.
    pub fn rebuild_night_order(&self, night: Night) {
        let mut waking: Vec<_> = self
            .characters
            .to_vec()
            .into_iter()
            .filter(|c| c.night(night).wakes())
            .collect();
        waking.sort_by(|a, b| a.night(night).order.total_cmp(&b.night(night).order));
        self.meta.night_order(night).reset(waking);
    }

    /// Writes each listed character's 1-based position back as its order.
    pub fn renumber_night_order(&self, night: Night) {
        for (i, character) in self.meta.night_order(night).to_vec().iter().enumerate() {
            character.set_night_order(night, (i + 1) as f64);
        }
    }

    pub fn add_jinx(&self, parent: &str, child: &str, rule: &str) -> Handle<Jinx> {
        let jinx = Jinx::new(parent, child, rule);
        self.jinxes.add(jinx.clone());
        jinx
    }

    pub fn remove_jinx(&self, jinx: &Handle<Jinx>) -> bool {
        self.jinxes.remove(jinx)
    }

    pub fn jinxes_for(&self, id: &str) -> Vec<Handle<Jinx>> {
        self.jinxes
            .to_vec()
            .into_iter()
            .filter(|j| j.involves(id))
            .collect()
    }

    /// Jinxes whose parent or child is not on the script.
    pub fn dangling_jinxes(&self) -> Vec<Handle<Jinx>> {
        self.jinxes
            .to_vec()
            .into_iter()
            .filter(|j| self.character(&j.parent()).is_none() || self.character(&j.child()).is_none())
            .collect()
    }

    pub fn prune_dangling_jinxes(&self) -> usize {
        let dangling = self.dangling_jinxes();
        for jinx in &dangling {
            self.jinxes.remove(jinx);
        }
        dangling.len()
    }

    pub fn image_key(&self, character: &Character, slot: usize) -> ImageKey {
        ImageKey::for_character(character, slot, self.is_official(character))
    }

    /// Stores uploaded artwork for one token slot and points the character at it.
    pub fn set_character_image(&self, character: &Handle<Character>, slot: usize, png: Vec<u8>) -> Result<()> {
        if slot >= character.team().token_slots() {
            return Err(ScriptError::InvalidValue {
                field: "image",
                reason: format!("slot {slot} does not exist for a {}", character.team().as_str()),
            });
        }
        let path = token_path(&character.id(), slot);
        self.images.set_image(&path, png)?;
        character.set_image(slot, path)
    }

    pub fn set_logo_image(&self, png: Vec<u8>) -> Result<()> {
        self.images.set_image(LOGO_PATH, png)?;
        self.meta.set_logo(Some(LOGO_PATH.to_string()));
        Ok(())
    }

    pub fn set_background_image(&self, png: Vec<u8>) -> Result<()> {
        self.images.set_image(BACKGROUND_PATH, png)?;
        self.meta.set_background(Some(BACKGROUND_PATH.to_string()));
        Ok(())
    }

    /// The current contents as a snapshot, without touching the dirty flag.
    ///
    /// Official characters are written as bare ids, so edits to them are not
    /// kept unless they are forked first.
    pub fn snapshot(&self) -> ScriptSnapshot {
        let ids = |list: &TrackedList<Handle<Character>>| -> Vec<String> { list.to_vec().iter().map(|c| c.id()).collect() };
        ScriptSnapshot {
            meta: MetaData {
                name: self.meta.name(),
                author: self.meta.author(),
                logo: self.meta.logo(),
                background: self.meta.background(),
                hide_title: self.meta.hide_title(),
                bootlegger: self.meta.bootlegger().to_vec(),
                first_night: ids(self.meta.first_night()),
                other_night: ids(self.meta.other_night()),
            },
            almanac: self.meta.almanac(),
            characters: self
                .characters
                .to_vec()
                .iter()
                .map(|c| {
                    if self.is_official(c) {
                        CharacterEntry::Official(c.id())
                    } else {
                        CharacterEntry::Custom(c.to_data())
                    }
                })
                .collect(),
            jinxes: self.jinxes.to_vec().iter().map(|j| j.to_data()).collect(),
        }
    }

    /// Normalizes, snapshots and marks the document saved.
    pub fn save(&self) -> ScriptSnapshot {
        let snapshot = self.prepare_save();
        self.mark_saved();
        snapshot
    }

    pub fn to_archive_bytes(&self) -> Result<Vec<u8>> {
        let snapshot = self.prepare_save();
        let bytes = self.images.with_archive_mut(|a| {
            a.write_snapshot(&snapshot)?;
            a.to_zip_bytes()
        })?;
        self.mark_saved();
        Ok(bytes)
    }

    /// Writes the archive to `path`. The document stays dirty if writing fails.
    pub fn write_archive(&self, path: &Path) -> Result<()> {
        let snapshot = self.prepare_save();
        self.images.with_archive_mut(|a| {
            a.write_snapshot(&snapshot)?;
            a.save(path)
        })?;
        self.mark_saved();
        info!(path = %path.display(), "Saved script");
        Ok(())
    }

    // Remote artwork that has already been fetched into the archive is
    // referenced by its archive path from now on. Saving is not an edit, so
    // the rewrite does not mark the document.
    fn prepare_save(&self) -> ScriptSnapshot {
        let phase = self.tracker.phase.replace(DocumentState::Loading);
        for character in self.characters.to_vec() {
            if self.is_official(&character) {
                continue;
            }
            let id = character.id();
            let mut images = character.images();
            let mut rewritten = false;
            for (slot, path) in images.iter_mut().enumerate() {
                let local = token_path(&id, slot);
                if is_url(path) && self.images.with_archive(|a| a.contains(&local)) {
                    *path = local;
                    rewritten = true;
                }
            }
            if rewritten {
                if let Err(e) = character.set_images(images) {
                    warn!("Could not normalize images of {id}: {e}");
                }
            }
        }
        self.tracker.phase.set(phase);
        self.prune_stale_tokens();
        self.snapshot()
    }

    // Token art is kept only while a homebrew character references it or
    // owns its conventional path.
    fn prune_stale_tokens(&self) {
        let mut keep: HashSet<String> = HashSet::new();
        for character in self.characters.to_vec() {
            if self.is_official(&character) {
                continue;
            }
            keep.extend(character.images().into_iter().filter(|p| !is_url(p)).map(|p| normalize_path(&p)));
            let id = character.id();
            keep.extend((0..character.team().token_slots()).map(|slot| token_path(&id, slot)));
        }
        let stale: Vec<String> = self.images.with_archive(|a| {
            a.paths()
                .filter(|p| p.starts_with("token/") && !keep.contains(*p))
                .map(str::to_string)
                .collect()
        });
        for path in stale {
            debug!(path = %path, "Dropping stale token art");
            self.images.remove_image(&path);
        }
    }

    fn mark_saved(&self) {
        self.tracker.clear();
        self.saved_image_version.set(self.images.version());
    }
}

fn night_label(night: Night) -> &'static str {
    match night {
        Night::First => "first night",
        Night::Other => "other night",
    }
}

impl std::fmt::Debug for ScriptDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptDocument")
            .field("name", &self.meta.name())
            .field("characters", &self.characters.len())
            .field("jinxes", &self.jinxes.len())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::DecodedImage;
    use crate::model::SortInfo;
    use crate::repository::BundledRepository;
    use crate::snapshot::CharacterData;

    fn png(shade: u8) -> Vec<u8> {
        DecodedImage {
            width: 1,
            height: 1,
            rgba: vec![shade, shade, shade, 255],
        }
        .encode_png()
        .unwrap()
    }

    fn official(id: &str, name: &str, team: Team, ability: &str, first_night: f64) -> CharacterData {
        let mut data = CharacterData::new(id, name, team);
        data.ability = ability.to_string();
        data.first_night = first_night;
        data
    }

    fn context() -> AppContext {
        let mut images = ScriptArchive::new();
        images.put("token/washerwoman/0.png", png(10));
        images.put("token/washerwoman/1.png", png(20));
        let repo = BundledRepository::from_parts(
            vec![
                official(
                    "washerwoman",
                    "Washerwoman",
                    Team::Townsfolk,
                    "You start knowing that 1 of 2 players is a particular Townsfolk.",
                    32.0,
                ),
                official("spy", "Spy", Team::Minion, "Each night, you see the Grimoire.", 48.0),
                official("imp", "Imp", Team::Demon, "Each night*, choose a player: they die.", 0.0),
            ],
            images,
        );
        AppContext::new(Arc::new(repo)).unwrap()
    }

    fn homebrew(id: &str, team: Team, sort_info: SortInfo, body: &str) -> Handle<Character> {
        let c = Character::new(id, id.to_uppercase(), team);
        c.set_ability(body);
        c.set_sort_info(sort_info);
        c
    }

    #[test]
    fn test_sorted_insertion() {
        let doc = ScriptDocument::new(&context());
        let a = homebrew("a", Team::Townsfolk, SortInfo::EachNight, "learn a thing.");
        let b = homebrew("b", Team::Townsfolk, SortInfo::EachNight, "learn a thing.");
        let c = homebrew("c", Team::Townsfolk, SortInfo::StartKnowing, "a thing.");
        assert_eq!(doc.add_character(a.clone()).unwrap(), 0);
        assert_eq!(doc.add_character(b.clone()).unwrap(), 1);
        assert_eq!(doc.add_character(c.clone()).unwrap(), 0);
        assert_eq!(doc.characters().to_vec(), vec![c, a, b]);
    }

    #[test]
    fn test_team_then_ability_length() {
        let doc = ScriptDocument::new(&context());
        let minion = homebrew("m", Team::Minion, SortInfo::Other, "x");
        let long = homebrew("long", Team::Townsfolk, SortInfo::Other, "a much longer ability");
        let short = homebrew("short", Team::Townsfolk, SortInfo::Other, "short");
        doc.add_character(minion.clone()).unwrap();
        doc.add_character(long.clone()).unwrap();
        doc.add_character(short.clone()).unwrap();
        assert_eq!(doc.characters().to_vec(), vec![short, long, minion]);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let doc = ScriptDocument::new(&context());
        doc.import_official("spy").unwrap();
        let copy = Character::new("spy", "Other Spy", Team::Minion);
        assert!(matches!(doc.add_character(copy), Err(ScriptError::DuplicateId(id)) if id == "spy"));
        assert!(matches!(doc.import_official("nobody"), Err(ScriptError::UnknownCharacter(_))));
        assert_eq!(doc.characters().len(), 1);
    }

    #[test]
    fn test_remove_cascades_to_night_orders() {
        let doc = ScriptDocument::new(&context());
        let c = homebrew("owl", Team::Townsfolk, SortInfo::EachNight, "hoot.");
        doc.add_character(c.clone()).unwrap();
        doc.set_night_order(&c, Night::First, 5.0);
        doc.set_night_order(&c, Night::Other, 7.0);
        assert!(doc.meta().first_night().contains(&c));
        assert!(doc.meta().other_night().contains(&c));

        assert!(doc.remove_character(&c));
        assert!(!doc.characters().contains(&c));
        assert!(doc.meta().first_night().is_empty());
        assert!(doc.meta().other_night().is_empty());
        assert!(!doc.remove_character(&c));
    }

    #[test]
    fn test_fork_copies_art_and_renames_jinxes() {
        let doc = ScriptDocument::new(&context());
        let ww = doc.import_official("washerwoman").unwrap();
        let jinx = doc.add_jinx("washerwoman", "spy", "Something odd.");
        let reverse = doc.add_jinx("spy", "washerwoman", "Odd the other way.");
        let other = doc.add_jinx("spy", "imp", "Unrelated.");
        let mut reloads = doc.images().subscribe();

        let id = doc.fork(&ww, "washerwoman_mychange").unwrap();
        assert_eq!(id, "washerwoman_mychange");
        assert_eq!(ww.id(), "washerwoman_mychange");
        assert!(!doc.is_official(&ww));
        assert_eq!(jinx.parent(), "washerwoman_mychange");
        assert_eq!(reverse.parent(), "spy");
        assert_eq!(reverse.child(), "washerwoman_mychange");
        assert_eq!(other.parent(), "spy");
        assert_eq!(other.child(), "imp");
        assert!(doc.jinxes_for("washerwoman").is_empty());
        assert_eq!(doc.jinxes_for("washerwoman_mychange").len(), 2);
        assert_eq!(
            ww.images(),
            vec!["token/washerwoman_mychange/0.png", "token/washerwoman_mychange/1.png"]
        );
        doc.images().with_archive(|a| {
            assert_eq!(a.get("token/washerwoman_mychange/0.png"), Some(png(10).as_slice()));
            assert_eq!(a.get("token/washerwoman_mychange/1.png"), Some(png(20).as_slice()));
        });
        assert_eq!(reloads.try_recv().unwrap().path.as_deref(), Some("token/washerwoman_mychange/0.png"));
        assert_eq!(reloads.try_recv().unwrap().path.as_deref(), Some("token/washerwoman_mychange/1.png"));
    }

    #[test]
    fn test_fork_avoids_taken_ids() {
        let doc = ScriptDocument::new(&context());
        let ww = doc.import_official("washerwoman").unwrap();
        doc.add_character(Character::new("washerwoman_mychange", "Mine", Team::Townsfolk))
            .unwrap();
        assert_eq!(doc.fork(&ww, "washerwoman_mychange").unwrap(), "washerwoman_mychange_new");

        // Official ids are never reused either.
        let spy = doc.import_official("spy").unwrap();
        assert_eq!(doc.fork(&spy, "imp").unwrap(), "imp_new");
    }

    #[test]
    fn test_fork_requires_official_character_on_script() {
        let doc = ScriptDocument::new(&context());
        let brew = homebrew("brew", Team::Outsider, SortInfo::Other, "x");
        assert!(matches!(doc.fork(&brew, "x"), Err(ScriptError::UnknownCharacter(_))));
        doc.add_character(brew.clone()).unwrap();
        assert!(matches!(doc.fork(&brew, "x"), Err(ScriptError::NotOfficial(_))));
    }

    #[test]
    fn test_dirty_tracking() {
        let doc = ScriptDocument::new(&context());
        assert_eq!(doc.state(), DocumentState::Ready);
        let flips = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&flips);
        doc.dirty_changed().subscribe(move |d| seen.borrow_mut().push(*d));

        doc.meta().set_name("Test");
        assert!(doc.is_changed());
        assert_eq!(doc.state(), DocumentState::Dirty);
        doc.save();
        assert_eq!(doc.state(), DocumentState::Ready);

        let c = doc.new_character(Team::Outsider).unwrap();
        doc.save();
        c.add_reminder("Drunk", false);
        assert!(doc.is_changed());
        doc.save();

        // Once removed, edits to the character no longer count.
        doc.remove_character(&c);
        doc.save();
        c.set_name("Ghost");
        assert!(!doc.is_changed());

        assert_eq!(*flips.borrow(), vec![true, false, true, false, true, false, true, false]);

        doc.close();
        assert_eq!(doc.state(), DocumentState::Closed);
        doc.meta().set_name("After close");
        assert!(!doc.is_changed());
    }

    #[test]
    fn test_image_changes_count_as_unsaved() {
        let doc = ScriptDocument::new(&context());
        doc.set_logo_image(png(1)).unwrap();
        assert!(doc.has_unsaved_changes());
        doc.save();
        assert!(!doc.has_unsaved_changes());
        doc.images().reload_all();
        assert!(!doc.is_changed());
        assert!(doc.has_unsaved_changes());
    }

    #[test]
    fn test_night_order_correlation() {
        let doc = ScriptDocument::new(&context());
        let ww = doc.import_official("washerwoman").unwrap();
        let spy = doc.import_official("spy").unwrap();
        let imp = doc.import_official("imp").unwrap();
        assert_eq!(doc.meta().first_night().to_vec(), vec![ww.clone(), spy.clone()]);

        doc.set_night_order(&imp, Night::First, 40.0);
        assert_eq!(doc.meta().first_night().to_vec(), vec![ww.clone(), imp.clone(), spy.clone()]);

        doc.renumber_night_order(Night::First);
        assert_eq!(ww.night(Night::First).order, 1.0);
        assert_eq!(imp.night(Night::First).order, 2.0);
        assert_eq!(spy.night(Night::First).order, 3.0);

        doc.set_night_order(&imp, Night::First, 0.0);
        assert_eq!(doc.meta().first_night().to_vec(), vec![ww, spy]);
    }

    #[test]
    fn test_round_trip_through_archive() {
        let ctx = context();
        let doc = ScriptDocument::new(&ctx);
        doc.meta().set_name("Mixtape");
        doc.meta().set_author("Someone");
        doc.meta().set_almanac("# Mixtape\n\nNotes.");
        doc.meta().bootlegger().add("Each player starts with a card.".to_string());
        doc.import_official("washerwoman").unwrap();
        doc.import_official("spy").unwrap();
        let brew = homebrew("lantern", Team::Outsider, SortInfo::EachNight, "you glow.");
        doc.add_character(brew.clone()).unwrap();
        doc.set_night_order(&brew, Night::Other, 12.0);
        brew.set_night_reminder(Night::Other, "Wake the lantern.");
        brew.add_reminder("Lit", false);
        brew.add_reminder("Everyone sees", true);
        doc.set_character_image(&brew, 0, png(99)).unwrap();
        doc.add_jinx("spy", "lantern", "The Spy glows too.");

        let bytes = doc.to_archive_bytes().unwrap();
        assert!(!doc.is_changed());

        let outcome = ScriptDocument::load_archive(&ctx, ScriptArchive::from_zip_bytes(&bytes).unwrap()).unwrap();
        assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
        let loaded = outcome.document;
        assert_eq!(loaded.state(), DocumentState::Ready);
        assert_eq!(loaded.snapshot(), doc.snapshot());
        loaded.images().with_archive(|a| {
            assert_eq!(a.get("token/lantern/0.png"), Some(png(99).as_slice()));
            // Official characters never carry art in the archive.
            assert!(a.token_paths("washerwoman").is_empty());
        });
    }

    #[test]
    fn test_load_reports_issues() {
        let ctx = context();
        let json = r#"[
            { "id": "_meta", "name": "Broken", "firstNight": ["washerwoman", "ghost"] },
            "washerwoman",
            "nobody",
            "washerwoman",
            { "id": "tiny", "name": "Tiny", "team": "fabled", "image": ["a.png", "b.png"] }
        ]"#;
        let (snapshot, issues) = ScriptSnapshot::parse(json).unwrap();
        assert!(issues.is_empty());
        let outcome = ScriptDocument::build(&ctx, snapshot, ScriptArchive::new(), issues);
        let messages: Vec<String> = outcome.issues.iter().map(|i| i.message.clone()).collect();
        assert_eq!(messages.len(), 4, "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("unknown official character 'nobody'")));
        assert!(messages.iter().any(|m| m.contains("duplicate character 'washerwoman'")));
        assert!(messages.iter().any(|m| m.contains("'ghost'")));
        assert!(messages.iter().any(|m| m.contains("tiny has 2 images")));

        let doc = outcome.document;
        assert_eq!(doc.characters().len(), 2);
        assert_eq!(doc.character("tiny").unwrap().images(), vec!["a.png"]);
        assert!(!doc.is_changed());
    }

    #[test]
    fn test_open_json_and_fatal_errors() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("script.json");
        std::fs::write(&good, r#"[{ "id": "_meta", "name": "Plain" }, "spy"]"#).unwrap();
        let outcome = ScriptDocument::open(&ctx, &good).unwrap();
        assert_eq!(outcome.document.meta().name(), "Plain");
        // No stored first night order: rebuilt from the characters.
        assert_eq!(outcome.document.meta().first_night().len(), 1);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{ "id": "_meta" }"#).unwrap();
        assert!(matches!(ScriptDocument::open(&ctx, &bad), Err(ScriptError::Parse(_))));
    }

    #[test]
    fn test_write_archive_to_disk() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.zip");
        let doc = ScriptDocument::new(&ctx);
        doc.meta().set_name("On disk");
        doc.write_archive(&path).unwrap();
        assert!(!doc.has_unsaved_changes());

        let reopened = ScriptDocument::open(&ctx, &path).unwrap().document;
        assert_eq!(reopened.meta().name(), "On disk");
    }

    #[test]
    fn test_save_prefers_fetched_art_over_urls() {
        let doc = ScriptDocument::new(&context());
        let c = homebrew("kite", Team::Townsfolk, SortInfo::Other, "x");
        doc.add_character(c.clone()).unwrap();
        c.set_image(0, "https://example.com/kite.png").unwrap();
        c.set_image(1, "https://example.com/kite-evil.png").unwrap();
        doc.images().with_archive_mut(|a| a.put("token/kite/0.png", png(3)));

        doc.save();
        assert_eq!(c.images(), vec!["token/kite/0.png", "https://example.com/kite-evil.png"]);
        assert!(!doc.is_changed());

        // Art fetched into a clean document: saving rewrites the path
        // without flipping the dirty flag.
        let flips = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&flips);
        doc.dirty_changed().subscribe(move |d| seen.borrow_mut().push(*d));
        doc.images().with_archive_mut(|a| a.put("token/kite/1.png", png(4)));
        doc.save();
        assert_eq!(c.images(), vec!["token/kite/0.png", "token/kite/1.png"]);
        assert!(flips.borrow().is_empty());
        assert!(!doc.is_changed());
        assert_eq!(doc.state(), DocumentState::Ready);
    }

    #[test]
    fn test_renamed_homebrew_keeps_its_art() {
        let ctx = context();
        let doc = ScriptDocument::new(&ctx);
        let kite = homebrew("kite", Team::Townsfolk, SortInfo::Other, "x");
        let gone = homebrew("gone", Team::Outsider, SortInfo::Other, "y");
        doc.add_character(kite.clone()).unwrap();
        doc.add_character(gone.clone()).unwrap();
        doc.set_character_image(&kite, 0, png(5)).unwrap();
        doc.set_character_image(&gone, 0, png(6)).unwrap();
        doc.remove_character(&gone);
        kite.set_id("hawk");

        let bytes = doc.to_archive_bytes().unwrap();
        let archive = ScriptArchive::from_zip_bytes(&bytes).unwrap();
        assert_eq!(archive.get("token/kite/0.png"), Some(png(5).as_slice()));
        assert!(archive.token_paths("gone").is_empty());

        let outcome = ScriptDocument::load_archive(&ctx, archive).unwrap();
        assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
        let hawk = outcome.document.character("hawk").unwrap();
        assert_eq!(hawk.images(), vec!["token/kite/0.png"]);
    }

    #[test]
    fn test_sort_position_matches_after_reload() {
        let ctx = context();
        let doc = ScriptDocument::new(&ctx);
        for (id, ability) in [
            ("dawn", "You start knowing which player is the longest talker."),
            ("dusk", "Each night, learn a number."),
            ("noon", "Nothing happens."),
        ] {
            let c = Character::new(id, id, Team::Townsfolk);
            c.set_ability(ability);
            doc.add_character(c).unwrap();
        }
        let order = |d: &ScriptDocument| -> Vec<String> { d.characters().to_vec().iter().map(|c| c.id()).collect() };
        assert_eq!(order(&doc), vec!["dawn", "dusk", "noon"]);

        let reloaded = ScriptDocument::from_snapshot(&ctx, &doc.snapshot(), ScriptArchive::new()).document;
        assert_eq!(reloaded.state(), DocumentState::Ready);
        assert_eq!(reloaded.snapshot(), doc.snapshot());

        // A newcomer lands in the same spot either way.
        for target in [&doc, &reloaded] {
            let late = Character::new("late", "Late", Team::Townsfolk);
            late.set_ability("Each night, learn a much longer number.");
            assert_eq!(target.add_character(late).unwrap(), 2);
        }
        assert_eq!(order(&doc), order(&reloaded));
    }

    #[test]
    fn test_dangling_jinxes_are_kept_until_pruned() {
        let doc = ScriptDocument::new(&context());
        let spy = doc.import_official("spy").unwrap();
        doc.import_official("imp").unwrap();
        doc.add_jinx("spy", "imp", "Fine.");
        doc.add_jinx("spy", "gone", "Dangling.");
        doc.remove_character(&spy);

        assert_eq!(doc.jinxes().len(), 2);
        assert_eq!(doc.jinxes_for("spy").len(), 2);
        assert_eq!(doc.prune_dangling_jinxes(), 2);
        assert!(doc.jinxes().is_empty());
    }
}
