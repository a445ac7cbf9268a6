//! Global String Interner
//!
//! Node type names and field-owner names are interned into integer
//! [`Symbol`]s so the factory registry and field stores compare and hash them
//! in O(1).

use lasso::{Spur, ThreadedRodeo};
use once_cell::sync::Lazy;

static INTERNER: Lazy<ThreadedRodeo> = Lazy::new(ThreadedRodeo::new);

/// Compact identifier for an interned string.
pub type Symbol = Spur;

/// Interns `s`, returning the existing symbol if it was seen before.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up the symbol of an already-interned string without allocating.
#[inline]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a symbol back to its string.
#[inline]
pub fn resolve(sym: Symbol) -> &'static str {
    INTERNER.resolve(&sym)
}

/// Pre-interns the built-in node type names so that factory lookups on the
/// build path never allocate.
pub fn preload_builtin_types() {
    let builtin = [
        "Root",
        "Group",
        "Transform",
        "Switch",
        "Shape",
        "Box",
        "Sphere",
        "Cone",
        "Appearance",
        "Material",
        "WorldInfo",
        "children",
        "whichChoice",
    ];

    for name in builtin {
        intern(name);
    }
}
