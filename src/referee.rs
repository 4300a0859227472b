use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Dense id into a [`RefereeRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefereeId(pub u32);

/// Resolution of a free-form referee name against a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefereeRef {
    Known { id: RefereeId },
    Unknown { key: String },
}

impl RefereeRef {
    pub fn known_id(&self) -> Option<RefereeId> {
        match self {
            RefereeRef::Known { id } => Some(*id),
            RefereeRef::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeEntry {
    pub id: RefereeId,
    pub key: String,
    pub name: String,
}

/// Closed-but-growing set of referees keyed by normalized name, so
/// "Antonio Mateu Lahoz" and "antonio  mateu-lahoz" resolve to one id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefereeRegistry {
    entries: Vec<RefereeEntry>,
    #[serde(skip)]
    by_key: HashMap<String, RefereeId>,
}

impl RefereeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the lookup map after deserialization.
    pub fn reindexed(mut self) -> Self {
        // Keys always follow the current `normalize_name`.
        for e in &mut self.entries {
            e.key = normalize_name(&e.name);
        }
        self.by_key = self
            .entries
            .iter()
            .map(|e| (e.key.clone(), e.id))
            .collect();
        self
    }

    pub fn intern(&mut self, name: &str) -> Option<RefereeId> {
        let key = normalize_name(name);
        if key.is_empty() {
            return None;
        }
        if let Some(id) = self.by_key.get(&key) {
            return Some(*id);
        }
        let id = RefereeId(self.entries.len() as u32);
        self.entries.push(RefereeEntry {
            id,
            key: key.clone(),
            name: name.trim().to_string(),
        });
        self.by_key.insert(key, id);
        Some(id)
    }

    pub fn resolve(&self, name: &str) -> RefereeRef {
        let key = normalize_name(name);
        match self.by_key.get(&key) {
            Some(id) => RefereeRef::Known { id: *id },
            None => RefereeRef::Unknown { key },
        }
    }

    pub fn name(&self, id: RefereeId) -> Option<&str> {
        self.entries.get(id.0 as usize).map(|e| e.name.as_str())
    }

    pub fn entries(&self) -> &[RefereeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lowercased alphanumeric runs joined by `_`, with diacritics stripped so
/// "Clément" and "Clement" name the same referee.
pub fn normalize_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_us = false;
    let folded = input.trim().nfd().filter(|c| !is_combining_mark(*c));
    for ch in folded.flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            out.push(ch);
            prev_us = false;
        } else if !prev_us && !out.is_empty() {
            out.push('_');
            prev_us = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_compacts() {
        assert_eq!(normalize_name(" Antonio Mateu Lahoz "), "antonio_mateu_lahoz");
        assert_eq!(normalize_name("Antonio  Mateu-Lahoz"), "antonio_mateu_lahoz");
        assert_eq!(normalize_name("Björn Kuipers"), "bjorn_kuipers");
        assert_eq!(normalize_name("Carlos del Cerro Grande"), "carlos_del_cerro_grande");
        assert_eq!(normalize_name("  "), "");
    }

    #[test]
    fn intern_deduplicates_spellings() {
        let mut reg = RefereeRegistry::new();
        let a = reg.intern("Clément Turpin").unwrap();
        let b = reg.intern("clément  turpin").unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.name(a), Some("Clément Turpin"));
        assert!(reg.intern("").is_none());
    }

    #[test]
    fn intern_folds_accents() {
        let mut reg = RefereeRegistry::new();
        let a = reg.intern("Clément Turpin").unwrap();
        let b = reg.intern("Clement Turpin").unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.resolve("CLÉMENT TURPIN").known_id(), Some(a));
    }

    #[test]
    fn unknown_names_stay_unknown() {
        let mut reg = RefereeRegistry::new();
        reg.intern("Felix Brych");
        assert!(reg.resolve("Felix  Brych").known_id().is_some());
        assert_eq!(
            reg.resolve("Someone Else"),
            RefereeRef::Unknown {
                key: "someone_else".into()
            }
        );
    }

    #[test]
    fn reindex_after_roundtrip() {
        let mut reg = RefereeRegistry::new();
        reg.intern("Szymon Marciniak");
        let raw = serde_json::to_string(&reg).unwrap();
        let back: RefereeRegistry = serde_json::from_str::<RefereeRegistry>(&raw)
            .unwrap()
            .reindexed();
        assert_eq!(back.resolve("szymon marciniak").known_id(), Some(RefereeId(0)));
    }
}
