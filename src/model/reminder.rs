use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Weak;

use super::character::{Character, CharacterField};
use super::event::Event;
use super::handle::Handle;

/// A reminder token owned by exactly one character.
///
/// Created through [`Character::add_reminder`]; the back-reference is weak so
/// a token never keeps its character alive.
pub struct ReminderToken {
    text: RefCell<String>,
    is_global: Cell<bool>,
    parent: Weak<Character>,
    changed: Event<()>,
}

impl ReminderToken {
    pub(crate) fn new(parent: Weak<Character>, text: String, is_global: bool) -> Self {
        Self {
            text: RefCell::new(text),
            is_global: Cell::new(is_global),
            parent,
            changed: Event::new(),
        }
    }

    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    pub fn is_global(&self) -> bool {
        self.is_global.get()
    }

    pub fn parent(&self) -> Option<Handle<Character>> {
        self.parent.upgrade().map(Handle::from_rc)
    }

    pub fn changed(&self) -> &Event<()> {
        &self.changed
    }

    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        if *self.text.borrow() == text {
            return;
        }
        *self.text.borrow_mut() = text;
        self.notify();
    }

    pub fn set_global(&self, is_global: bool) {
        if self.is_global.replace(is_global) != is_global {
            self.notify();
        }
    }

    fn notify(&self) {
        self.changed.emit(&());
        if let Some(parent) = self.parent.upgrade() {
            parent.changed().emit(&CharacterField::Reminders);
        }
    }
}

impl fmt::Debug for ReminderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReminderToken")
            .field("text", &*self.text.borrow())
            .field("is_global", &self.is_global.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::character::{Character, CharacterField};
    use crate::model::team::Team;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn test_edits_notify_token_then_character() {
        let c = Character::new("drunk", "Drunk", Team::Outsider);
        let token = c.add_reminder("Drunk", false);

        let order = Rc::new(RefCell::new(Vec::new()));
        let o = Rc::clone(&order);
        token.changed().subscribe(move |_| o.borrow_mut().push("token"));
        let o = Rc::clone(&order);
        c.changed().subscribe(move |f| {
            if *f == CharacterField::Reminders {
                o.borrow_mut().push("character");
            }
        });

        token.set_text("Drunk");
        token.set_global(false);
        assert!(order.borrow().is_empty());

        token.set_text("Is the Drunk");
        token.set_global(true);
        assert_eq!(token.text(), "Is the Drunk");
        assert!(token.is_global());
        assert_eq!(*order.borrow(), vec!["token", "character", "token", "character"]);
    }

    #[test]
    fn test_orphaned_token_still_edits() {
        let c = Character::new("mayor", "Mayor", Team::Townsfolk);
        let token = c.add_reminder("Bounce", true);
        drop(c);

        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        token.changed().subscribe(move |_| f.set(f.get() + 1));
        token.set_text("No bounce");
        assert!(token.parent().is_none());
        assert_eq!(fired.get(), 1);
    }
}
