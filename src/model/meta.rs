use std::cell::{Cell, RefCell};
use std::fmt;

use super::character::Character;
use super::event::Event;
use super::handle::Handle;
use super::team::Night;
use super::tracked::TrackedList;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetaField {
    Name,
    Author,
    Logo,
    Background,
    HideTitle,
    Almanac,
}

/// Script-level metadata.
///
/// The night-order lists hold the same character handles as the script's
/// character list; membership is correlated with each character's own night
/// order but kept separately so the user can sequence them freely.
pub struct Meta {
    name: RefCell<String>,
    author: RefCell<String>,
    logo: RefCell<Option<String>>,
    background: RefCell<Option<String>>,
    hide_title: Cell<bool>,
    almanac: RefCell<String>,
    bootlegger: TrackedList<String>,
    first_night: TrackedList<Handle<Character>>,
    other_night: TrackedList<Handle<Character>>,
    changed: Event<MetaField>,
}

impl Meta {
    pub fn new() -> Self {
        Self {
            name: RefCell::new(String::new()),
            author: RefCell::new(String::new()),
            logo: RefCell::new(None),
            background: RefCell::new(None),
            hide_title: Cell::new(false),
            almanac: RefCell::new(String::new()),
            bootlegger: TrackedList::new(),
            first_night: TrackedList::new(),
            other_night: TrackedList::new(),
            changed: Event::new(),
        }
    }

    pub fn changed(&self) -> &Event<MetaField> {
        &self.changed
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn author(&self) -> String {
        self.author.borrow().clone()
    }

    pub fn logo(&self) -> Option<String> {
        self.logo.borrow().clone()
    }

    pub fn background(&self) -> Option<String> {
        self.background.borrow().clone()
    }

    pub fn hide_title(&self) -> bool {
        self.hide_title.get()
    }

    pub fn almanac(&self) -> String {
        self.almanac.borrow().clone()
    }

    pub fn bootlegger(&self) -> &TrackedList<String> {
        &self.bootlegger
    }

    pub fn night_order(&self, night: Night) -> &TrackedList<Handle<Character>> {
        match night {
            Night::First => &self.first_night,
            Night::Other => &self.other_night,
        }
    }

    pub fn first_night(&self) -> &TrackedList<Handle<Character>> {
        &self.first_night
    }

    pub fn other_night(&self) -> &TrackedList<Handle<Character>> {
        &self.other_night
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        if *self.name.borrow() != name {
            *self.name.borrow_mut() = name;
            self.changed.emit(&MetaField::Name);
        }
    }

    pub fn set_author(&self, author: impl Into<String>) {
        let author = author.into();
        if *self.author.borrow() != author {
            *self.author.borrow_mut() = author;
            self.changed.emit(&MetaField::Author);
        }
    }

    pub fn set_logo(&self, logo: Option<String>) {
        if *self.logo.borrow() != logo {
            *self.logo.borrow_mut() = logo;
            self.changed.emit(&MetaField::Logo);
        }
    }

    pub fn set_background(&self, background: Option<String>) {
        if *self.background.borrow() != background {
            *self.background.borrow_mut() = background;
            self.changed.emit(&MetaField::Background);
        }
    }

    pub fn set_hide_title(&self, hide: bool) {
        if self.hide_title.replace(hide) != hide {
            self.changed.emit(&MetaField::HideTitle);
        }
    }

    pub fn set_almanac(&self, almanac: impl Into<String>) {
        let almanac = almanac.into();
        if *self.almanac.borrow() != almanac {
            *self.almanac.borrow_mut() = almanac;
            self.changed.emit(&MetaField::Almanac);
        }
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meta")
            .field("name", &*self.name.borrow())
            .field("author", &*self.author.borrow())
            .field("first_night", &self.first_night.len())
            .field("other_night", &self.other_night.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::team::Team;
    use std::rc::Rc;

    fn record(meta: &Meta) -> Rc<RefCell<Vec<MetaField>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        meta.changed().subscribe(move |f| l.borrow_mut().push(*f));
        log
    }

    #[test]
    fn test_setters_only_fire_on_change() {
        let meta = Meta::new();
        let log = record(&meta);
        meta.set_name("Trouble Brewing");
        meta.set_name("Trouble Brewing");
        meta.set_author("The Pandemonium Institute");
        meta.set_logo(Some("logo.png".to_string()));
        meta.set_logo(Some("logo.png".to_string()));
        meta.set_background(Some("background.png".to_string()));
        meta.set_background(None);
        meta.set_hide_title(false);
        meta.set_hide_title(true);
        meta.set_almanac("# Notes");
        meta.set_almanac("# Notes");

        assert_eq!(
            *log.borrow(),
            vec![
                MetaField::Name,
                MetaField::Author,
                MetaField::Logo,
                MetaField::Background,
                MetaField::Background,
                MetaField::HideTitle,
                MetaField::Almanac,
            ]
        );
        assert_eq!(meta.name(), "Trouble Brewing");
        assert_eq!(meta.logo().as_deref(), Some("logo.png"));
        assert_eq!(meta.background(), None);
        assert!(meta.hide_title());
        assert_eq!(meta.almanac(), "# Notes");
    }

    #[test]
    fn test_bootlegger_rules_are_tracked() {
        let meta = Meta::new();
        let added = Rc::new(RefCell::new(Vec::new()));
        let a = Rc::clone(&added);
        meta.bootlegger().item_added().subscribe(move |rule: &String| a.borrow_mut().push(rule.clone()));
        let fields = record(&meta);

        meta.bootlegger().add("The Storyteller may break ties.".to_string());
        meta.bootlegger().add("Each player knows a secret.".to_string());
        assert!(meta.bootlegger().remove(&"The Storyteller may break ties.".to_string()));

        assert_eq!(added.borrow().len(), 2);
        assert_eq!(meta.bootlegger().to_vec(), vec!["Each player knows a secret.".to_string()]);
        // Rule edits are list events, not field changes.
        assert!(fields.borrow().is_empty());
    }

    #[test]
    fn test_night_order_selects_list() {
        let meta = Meta::new();
        let owl = Character::new("owl", "Owl", Team::Townsfolk);
        meta.night_order(Night::First).add(owl.clone());
        assert_eq!(meta.first_night().to_vec(), vec![owl.clone()]);
        assert!(meta.other_night().is_empty());
        meta.night_order(Night::Other).add(owl.clone());
        assert!(meta.other_night().contains(&owl));
    }
}
