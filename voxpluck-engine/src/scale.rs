//! Scale catalog and key parsing.
//!
//! A scale is an ordered list of allowed pitch classes relative to the key
//! (0 = the key's tonic). Order matters: when two members are equally close to
//! a pitch, the one declared first wins.

use core::fmt;

use crate::error::ConfigIssue;

/// Fixed-capacity, ordered set of pitch classes in `0..=11`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct PitchClassSet {
    classes: [u8; 12],
    len: u8,
}

impl PitchClassSet {
    const fn from_array<const N: usize>(members: [u8; N]) -> Self {
        let mut classes = [0u8; 12];
        let mut i = 0;
        while i < N {
            classes[i] = members[i];
            i += 1;
        }
        #[allow(clippy::cast_possible_truncation)]
        Self { classes, len: N as u8 }
    }

    /// Validate a caller-supplied set: non-empty, every class in `0..=11`, no repeats.
    pub fn from_slice(members: &[u8]) -> Result<Self, ConfigIssue> {
        if members.is_empty() {
            return Err(ConfigIssue::MalformedCustomScale("no pitch classes".into()));
        }
        let mut set = Self { classes: [0; 12], len: 0 };
        for &pc in members {
            if pc > 11 {
                return Err(ConfigIssue::MalformedCustomScale(format!("pitch class {pc} outside 0..=11")));
            }
            if set.contains(pc) {
                return Err(ConfigIssue::MalformedCustomScale(format!("pitch class {pc} repeated")));
            }
            set.classes[set.len as usize] = pc;
            set.len += 1;
        }
        Ok(set)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.classes[..self.len as usize]
    }

    #[inline]
    pub fn contains(&self, pc: u8) -> bool {
        self.as_slice().contains(&pc)
    }

    #[inline] pub fn len(&self) -> usize { self.len as usize }
    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }
}

impl fmt::Debug for PitchClassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScaleKind {
    Chromatic,
    Major,
    Minor,
    PentatonicMajor,
    PentatonicMinor,
    Blues,
    Custom,
}

impl ScaleKind {
    /// Catalog entries, in display order. `Custom` is not listed.
    pub const CATALOG: [ScaleKind; 6] = [
        ScaleKind::Chromatic,
        ScaleKind::Major,
        ScaleKind::Minor,
        ScaleKind::PentatonicMajor,
        ScaleKind::PentatonicMinor,
        ScaleKind::Blues,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ScaleKind::Chromatic => "chromatic",
            ScaleKind::Major => "major",
            ScaleKind::Minor => "minor",
            ScaleKind::PentatonicMajor => "pentatonic-major",
            ScaleKind::PentatonicMinor => "pentatonic-minor",
            ScaleKind::Blues => "blues",
            ScaleKind::Custom => "custom",
        }
    }

    /// Case-insensitive lookup; `_` and spaces are accepted in place of `-`.
    pub fn from_name(name: &str) -> Option<Self> {
        let norm: String = name
            .trim()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c.to_ascii_lowercase() })
            .collect();
        match norm.as_str() {
            "chromatic" => Some(ScaleKind::Chromatic),
            "major" | "ionian" => Some(ScaleKind::Major),
            "minor" | "natural-minor" | "aeolian" => Some(ScaleKind::Minor),
            "pentatonic-major" | "major-pentatonic" => Some(ScaleKind::PentatonicMajor),
            "pentatonic-minor" | "minor-pentatonic" => Some(ScaleKind::PentatonicMinor),
            "blues" => Some(ScaleKind::Blues),
            "custom" => Some(ScaleKind::Custom),
            _ => None,
        }
    }
}

const CHROMATIC: PitchClassSet = PitchClassSet::from_array([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
const MAJOR: PitchClassSet = PitchClassSet::from_array([0, 2, 4, 5, 7, 9, 11]);
const MINOR: PitchClassSet = PitchClassSet::from_array([0, 2, 3, 5, 7, 8, 10]);
const PENTATONIC_MAJOR: PitchClassSet = PitchClassSet::from_array([0, 2, 4, 7, 9]);
const PENTATONIC_MINOR: PitchClassSet = PitchClassSet::from_array([0, 3, 5, 7, 10]);
const BLUES: PitchClassSet = PitchClassSet::from_array([0, 3, 5, 6, 7, 10]);

/// Immutable scale: a kind plus its ordered pitch classes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScaleDefinition {
    kind: ScaleKind,
    classes: PitchClassSet,
}

impl ScaleDefinition {
    pub const CHROMATIC: Self = Self { kind: ScaleKind::Chromatic, classes: CHROMATIC };

    /// Catalog scale. `ScaleKind::Custom` has no intrinsic members and maps to chromatic.
    pub const fn catalog(kind: ScaleKind) -> Self {
        let classes = match kind {
            ScaleKind::Chromatic | ScaleKind::Custom => return Self::CHROMATIC,
            ScaleKind::Major => MAJOR,
            ScaleKind::Minor => MINOR,
            ScaleKind::PentatonicMajor => PENTATONIC_MAJOR,
            ScaleKind::PentatonicMinor => PENTATONIC_MINOR,
            ScaleKind::Blues => BLUES,
        };
        Self { kind, classes }
    }

    /// Caller-supplied scale, validated.
    pub fn custom(members: &[u8]) -> Result<Self, ConfigIssue> {
        Ok(Self { kind: ScaleKind::Custom, classes: PitchClassSet::from_slice(members)? })
    }

    /// Resolve a scale by name, falling back to chromatic with a diagnostic.
    /// `custom` supplies the members when `name` is `"custom"`.
    pub fn resolve(name: &str, custom: Option<&[u8]>) -> (Self, Option<ConfigIssue>) {
        match ScaleKind::from_name(name) {
            Some(ScaleKind::Custom) => match custom {
                Some(members) => match Self::custom(members) {
                    Ok(scale) => (scale, None),
                    Err(issue) => (Self::CHROMATIC, Some(issue)),
                },
                None => (
                    Self::CHROMATIC,
                    Some(ConfigIssue::MalformedCustomScale("no pitch classes supplied".into())),
                ),
            },
            Some(kind) => (Self::catalog(kind), None),
            None => (Self::CHROMATIC, Some(ConfigIssue::UnknownScale(name.to_string()))),
        }
    }

    #[inline] pub fn kind(&self) -> ScaleKind { self.kind }
    #[inline] pub fn name(&self) -> &'static str { self.kind.name() }
    #[inline] pub fn pitch_classes(&self) -> &[u8] { self.classes.as_slice() }
    #[inline] pub fn contains(&self, pc: u8) -> bool { self.classes.contains(pc) }

    /// Member nearest to `rel` (linear distance within `0..=11`), first declared wins ties.
    pub fn nearest_member(&self, rel: u8) -> u8 {
        let mut best = self.classes.as_slice()[0];
        let mut best_dist = best.abs_diff(rel);
        for &m in &self.classes.as_slice()[1..] {
            let dist = m.abs_diff(rel);
            if dist < best_dist {
                best = m;
                best_dist = dist;
            }
        }
        best
    }
}

impl Default for ScaleDefinition {
    fn default() -> Self {
        Self::CHROMATIC
    }
}

/// Parse a key: note letter with optional `#`/`b` (`C`, `F#`, `Db`, `B#`...) or
/// a number in `0..=11`. Returns the pitch class of the tonic.
pub fn parse_key(name: &str) -> Option<u8> {
    let s = name.trim();
    if let Ok(n) = s.parse::<u8>() {
        return (n <= 11).then_some(n);
    }
    let mut chars = s.chars();
    let base: i32 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let shift = match chars.as_str() {
        "" => 0,
        "#" | "♯" => 1,
        "b" | "♭" => -1,
        _ => return None,
    };
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    Some((base + shift).rem_euclid(12) as u8)
}

/// Key lookup with fallback to C and a diagnostic.
pub fn resolve_key(name: &str) -> (u8, Option<ConfigIssue>) {
    match parse_key(name) {
        Some(pc) => (pc, None),
        None => (0, Some(ConfigIssue::UnknownKey(name.to_string()))),
    }
}
