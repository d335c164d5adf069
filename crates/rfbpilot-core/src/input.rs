//! Key combination parsing.
//!
//! Turns strings like `Ctrl+Alt+Delete` into an ordered modifier list and a
//! main key, then resolves both to keysyms.

use crate::keysym::keysym_of;

/// A parsed key request: modifiers in the order given, then the main key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub modifiers: Vec<String>,
    pub key: String,
}

/// Keysyms for a [`KeyInput`], ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeys {
    pub modifiers: Vec<u32>,
    pub key: u32,
}

impl KeyInput {
    /// Whether this is a combination rather than a single key.
    pub fn is_combo(&self) -> bool {
        !self.modifiers.is_empty()
    }

    /// Resolve every part to a keysym.
    ///
    /// Returns the first name that has no keysym as the error, so nothing is
    /// sent for a half-understood combination.
    pub fn resolve(&self) -> Result<ResolvedKeys, String> {
        let modifiers = self
            .modifiers
            .iter()
            .map(|m| keysym_of(m).ok_or_else(|| m.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let key = keysym_of(&self.key).ok_or_else(|| self.key.clone())?;
        Ok(ResolvedKeys { modifiers, key })
    }
}

impl std::fmt::Display for KeyInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier)?;
        }
        write!(f, "{}", self.key)
    }
}

/// Split a combination on `+`.
///
/// A single token is the key with no modifiers. With several tokens, all but
/// the last are modifiers in the given order and the last is the key. A lone
/// `+` is the plus key; inside a combination use the `plus` name instead.
///
/// ```
/// use rfbpilot_core::input::parse_key_input;
///
/// let input = parse_key_input("Ctrl+Alt+Delete");
/// assert_eq!(input.modifiers, vec!["Ctrl", "Alt"]);
/// assert_eq!(input.key, "Delete");
/// ```
pub fn parse_key_input(input: &str) -> KeyInput {
    let input = input.trim();
    if input == "+" {
        return KeyInput {
            modifiers: Vec::new(),
            key: "+".to_string(),
        };
    }

    let mut parts: Vec<String> = input.split('+').map(|p| p.trim().to_string()).collect();
    // split always yields at least one item
    let key = parts.pop().unwrap_or_default();
    KeyInput {
        modifiers: parts,
        key,
    }
}
