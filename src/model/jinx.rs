use std::cell::RefCell;
use std::fmt;

use crate::snapshot::JinxData;

use super::event::Event;
use super::handle::Handle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JinxField {
    Rule,
    Parent,
    Child,
}

/// A rule override between two characters, stored by id.
///
/// Either id may name a character that is not on the script.
pub struct Jinx {
    parent: RefCell<String>,
    child: RefCell<String>,
    rule: RefCell<String>,
    changed: Event<JinxField>,
}

impl Jinx {
    pub fn new(parent: impl Into<String>, child: impl Into<String>, rule: impl Into<String>) -> Handle<Jinx> {
        Handle::new(Jinx {
            parent: RefCell::new(parent.into()),
            child: RefCell::new(child.into()),
            rule: RefCell::new(rule.into()),
            changed: Event::new(),
        })
    }

    pub fn from_data(data: &JinxData) -> Handle<Jinx> {
        Jinx::new(data.parent.clone(), data.child.clone(), data.reason.clone())
    }

    pub fn to_data(&self) -> JinxData {
        JinxData {
            parent: self.parent(),
            child: self.child(),
            reason: self.rule(),
        }
    }

    pub fn changed(&self) -> &Event<JinxField> {
        &self.changed
    }

    pub fn parent(&self) -> String {
        self.parent.borrow().clone()
    }

    pub fn child(&self) -> String {
        self.child.borrow().clone()
    }

    pub fn rule(&self) -> String {
        self.rule.borrow().clone()
    }

    pub fn involves(&self, id: &str) -> bool {
        *self.parent.borrow() == id || *self.child.borrow() == id
    }

    fn replace(&self, cell: &RefCell<String>, value: String, field: JinxField) -> bool {
        if *cell.borrow() == value {
            return false;
        }
        *cell.borrow_mut() = value;
        self.changed.emit(&field);
        true
    }

    pub fn set_parent(&self, id: impl Into<String>) {
        self.replace(&self.parent, id.into(), JinxField::Parent);
    }

    pub fn set_child(&self, id: impl Into<String>) {
        self.replace(&self.child, id.into(), JinxField::Child);
    }

    pub fn set_rule(&self, rule: impl Into<String>) {
        self.replace(&self.rule, rule.into(), JinxField::Rule);
    }

    /// Rewrites whichever side points at `old`. Returns true if anything changed.
    pub fn rename_character(&self, old: &str, new: &str) -> bool {
        let mut renamed = false;
        if *self.parent.borrow() == old {
            renamed |= self.replace(&self.parent, new.to_string(), JinxField::Parent);
        }
        if *self.child.borrow() == old {
            renamed |= self.replace(&self.child, new.to_string(), JinxField::Child);
        }
        renamed
    }
}

impl fmt::Debug for Jinx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jinx")
            .field("parent", &*self.parent.borrow())
            .field("child", &*self.child.borrow())
            .field("rule", &*self.rule.borrow())
            .finish()
    }
}
