//! UCI options of one session.
//!
//! Names are case-insensitive and listed in insertion order. Side effects of
//! changing an option (resizing the pool, the hash table...) are applied by
//! the command loop after a successful `set`; the map itself only stores and
//! validates values.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Largest hash size accepted, in MiB.
pub const MAX_HASH_MB: i64 = 33_554_432;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("No such option: {0}")]
    Unknown(String),
    #[error("invalid value '{value}' for option {name}")]
    InvalidValue { name: String, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionKind {
    Check,
    Spin { min: i64, max: i64 },
    /// Alternatives are listed in the default value, separated by ` var `.
    Combo,
    Button,
    String,
}

impl OptionKind {
    fn as_str(&self) -> &'static str {
        match self {
            OptionKind::Check => "check",
            OptionKind::Spin { .. } => "spin",
            OptionKind::Combo => "combo",
            OptionKind::Button => "button",
            OptionKind::String => "string",
        }
    }
}

#[derive(Clone, Debug)]
pub struct UciOption {
    kind: OptionKind,
    default: String,
    current: String,
    idx: usize,
}

impl UciOption {
    pub fn check(default: bool) -> Self {
        Self::with(OptionKind::Check, bool_str(default))
    }

    pub fn spin(default: i64, min: i64, max: i64) -> Self {
        Self::with(OptionKind::Spin { min, max }, &default.to_string())
    }

    pub fn combo(default: &str, alternatives: &str) -> Self {
        let mut opt = Self::with(OptionKind::Combo, alternatives);
        opt.current = default.to_string();
        opt
    }

    pub fn button() -> Self {
        Self::with(OptionKind::Button, "")
    }

    pub fn string(default: &str) -> Self {
        Self::with(OptionKind::String, default)
    }

    fn with(kind: OptionKind, default: &str) -> Self {
        Self {
            kind,
            default: default.to_string(),
            current: default.to_string(),
            idx: 0,
        }
    }

    pub fn kind(&self) -> &OptionKind {
        &self.kind
    }

    pub fn value(&self) -> &str {
        &self.current
    }

    /// Validates `v` the way a GUI is expected to, since values can also
    /// arrive from a hand-typed console.
    fn accepts(&self, v: &str) -> bool {
        match &self.kind {
            OptionKind::Button | OptionKind::String => true,
            _ if v.is_empty() => false,
            OptionKind::Check => v == "true" || v == "false",
            OptionKind::Spin { min, max } => v
                .parse::<f64>()
                .is_ok_and(|x| x >= *min as f64 && x <= *max as f64),
            OptionKind::Combo => {
                !v.eq_ignore_ascii_case("var")
                    && self
                        .default
                        .split_whitespace()
                        .any(|alt| alt.eq_ignore_ascii_case(v))
            }
        }
    }
}

fn bool_str(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}

#[derive(Clone, Debug, Default)]
pub struct OptionsMap {
    // lowercased name -> (display name, option)
    entries: BTreeMap<String, (String, UciOption)>,
    insert_order: usize,
}

impl OptionsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine's standard option set.
    pub fn with_defaults() -> Self {
        let mut o = Self::new();
        o.add("Threads", UciOption::spin(1, 1, 1024));
        o.add("Hash", UciOption::spin(16, 1, MAX_HASH_MB));
        o.add("Clear Hash", UciOption::button());
        o.add("Ponder", UciOption::check(false));
        o.add("MultiPV", UciOption::spin(1, 1, 500));
        o.add("Skill Level", UciOption::spin(20, 0, 20));
        o.add("Move Overhead", UciOption::spin(10, 0, 5000));
        o.add("Slow Mover", UciOption::spin(100, 10, 1000));
        o.add("UCI_LimitStrength", UciOption::check(false));
        o.add("UCI_Elo", UciOption::spin(1320, 1320, 3190));
        o.add("SyzygyPath", UciOption::string("<empty>"));
        o.add("SyzygyProbeDepth", UciOption::spin(1, 1, 100));
        o.add("Syzygy50MoveRule", UciOption::check(true));
        o.add("SyzygyProbeLimit", UciOption::spin(7, 0, 7));
        o
    }

    /// Registers an option. Re-adding a name replaces it but keeps its
    /// first listing position.
    pub fn add(&mut self, name: &str, mut opt: UciOption) {
        let key = name.to_ascii_lowercase();
        match self.entries.get_mut(&key) {
            Some((_, existing)) => {
                opt.idx = existing.idx;
                *existing = opt;
            }
            None => {
                opt.idx = self.insert_order;
                self.insert_order += 1;
                self.entries.insert(key, (name.to_string(), opt));
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&UciOption> {
        self.entries.get(&name.to_ascii_lowercase()).map(|(_, o)| o)
    }

    /// Stores a new value and returns the option's canonical name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<&str, OptionError> {
        let (display, opt) = self
            .entries
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| OptionError::Unknown(name.to_string()))?;
        if !opt.accepts(value) {
            return Err(OptionError::InvalidValue {
                name: display.clone(),
                value: value.to_string(),
            });
        }
        if opt.kind != OptionKind::Button {
            opt.current = value.to_string();
        }
        Ok(display.as_str())
    }

    /// Integer value of a spin or check option; 0 if the option is missing.
    pub fn int(&self, name: &str) -> i64 {
        let Some(opt) = self.get(name) else {
            debug_assert!(false, "unknown option {name}");
            return 0;
        };
        match opt.kind {
            OptionKind::Check => i64::from(opt.current == "true"),
            OptionKind::Spin { .. } => opt.current.parse::<f64>().map_or(0, |v| v as i64),
            _ => 0,
        }
    }

    pub fn check(&self, name: &str) -> bool {
        self.int(name) != 0
    }

    pub fn string(&self, name: &str) -> &str {
        self.get(name).map_or("", UciOption::value)
    }

    fn ordered(&self) -> Vec<(&str, &UciOption)> {
        let mut v: Vec<_> = self
            .entries
            .values()
            .map(|(name, opt)| (name.as_str(), opt))
            .collect();
        v.sort_by_key(|(_, opt)| opt.idx);
        v
    }
}

impl fmt::Display for OptionsMap {
    /// One `option name ...` line per option, in insertion order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, opt)) in self.ordered().into_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "option name {name} type {}", opt.kind.as_str())?;
            match &opt.kind {
                OptionKind::String | OptionKind::Check | OptionKind::Combo => {
                    write!(f, " default {}", opt.default)?
                }
                OptionKind::Spin { min, max } => {
                    let def = opt.default.parse::<f64>().map_or(0, |v| v as i64);
                    write!(f, " default {def} min {min} max {max}")?
                }
                OptionKind::Button => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let mut o = OptionsMap::with_defaults();
        assert_eq!(o.set("threads", "4").unwrap(), "Threads");
        assert_eq!(o.int("THREADS"), 4);
        assert!(o.contains("multipv"));
    }

    #[test]
    fn test_spin_bounds_are_enforced() {
        let mut o = OptionsMap::with_defaults();
        assert!(matches!(o.set("Threads", "0"), Err(OptionError::InvalidValue { .. })));
        assert!(matches!(o.set("Threads", "1025"), Err(OptionError::InvalidValue { .. })));
        assert!(matches!(o.set("Threads", ""), Err(OptionError::InvalidValue { .. })));
        assert_eq!(o.int("Threads"), 1);
        o.set("Threads", "1024").unwrap();
        assert_eq!(o.int("Threads"), 1024);
    }

    #[test]
    fn test_check_and_string_values() {
        let mut o = OptionsMap::with_defaults();
        assert!(o.set("Ponder", "yes").is_err());
        o.set("Ponder", "true").unwrap();
        assert!(o.check("Ponder"));
        o.set("SyzygyPath", "").unwrap();
        assert_eq!(o.string("SyzygyPath"), "");
        assert_eq!(o.set("Nope", "1"), Err(OptionError::Unknown("Nope".into())));
    }

    #[test]
    fn test_combo_accepts_listed_alternatives_only() {
        let mut o = OptionsMap::new();
        o.add("Style", UciOption::combo("Normal", "Solid var Normal var Risky"));
        o.set("Style", "risky").unwrap();
        assert_eq!(o.get("style").unwrap().value(), "risky");
        assert!(o.set("Style", "var").is_err());
        assert!(o.set("Style", "Wild").is_err());
    }

    #[test]
    fn test_button_keeps_no_value() {
        let mut o = OptionsMap::with_defaults();
        assert_eq!(o.set("clear hash", "").unwrap(), "Clear Hash");
        assert_eq!(o.get("Clear Hash").unwrap().value(), "");
    }

    #[test]
    fn test_listing_follows_insertion_order() {
        let text = OptionsMap::with_defaults().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "option name Threads type spin default 1 min 1 max 1024");
        assert_eq!(lines[2], "option name Clear Hash type button");
        assert_eq!(lines[3], "option name Ponder type check default false");
        assert_eq!(lines.last().copied(), Some("option name SyzygyProbeLimit type spin default 7 min 0 max 7"));
    }

    #[test]
    fn test_two_maps_number_independently() {
        // A second session's map must list the same way as the first.
        let a = OptionsMap::with_defaults();
        let b = OptionsMap::with_defaults();
        assert_eq!(a.to_string(), b.to_string());
    }
}
