//! X11 keysym lookup for RFB key events.
//!
//! The table is static: named keys, letters, digits, punctuation and the
//! shift-level symbols all have direct codes. One fallback rule covers
//! everything else, a single character maps to its code point.

/// Keysym for the left Shift key.
pub const SHIFT: u32 = 0xffe1;

/// Keysym for Return.
pub const RETURN: u32 = 0xff0d;

/// Symbols typed with Shift held on a US layout.
const SHIFT_SYMBOLS: &str = "~!@#$%^&*()_+{}|:\"<>?";

/// Resolve a key name or single character to its keysym.
///
/// Single characters are case sensitive (`a` and `A` differ). Longer names
/// are matched case-insensitively, so `Enter`, `ENTER` and `enter` agree.
/// Returns `None` for unknown multi-character names.
///
/// ```
/// use rfbpilot_core::keysym::keysym_of;
///
/// assert_eq!(keysym_of("a"), Some(0x0061));
/// assert_eq!(keysym_of("Enter"), Some(0xff0d));
/// assert_eq!(keysym_of("!"), Some(0x0021));
/// ```
pub fn keysym_of(name: &str) -> Option<u32> {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (None, _) => None,
        (Some(c), None) => Some(char_keysym(c)),
        _ => named_keysym(&name.to_lowercase()),
    }
}

/// Keysym used when typing `c` as text.
///
/// Control characters that have a key of their own (newline, tab) map to
/// that key; everything else goes through [`keysym_of`].
pub fn keysym_for_char(c: char) -> u32 {
    match c {
        '\n' | '\r' => RETURN,
        '\t' => 0xff09,
        '\u{8}' => 0xff08,
        _ => char_keysym(c),
    }
}

/// Whether typing `c` requires holding Shift.
pub fn needs_shift(c: char) -> bool {
    SHIFT_SYMBOLS.contains(c)
}

/// The physical base key of a shifted symbol (`!` is on the `1` key).
pub fn unshifted_of(c: char) -> Option<char> {
    let base = match c {
        '~' => '`',
        '!' => '1',
        '@' => '2',
        '#' => '3',
        '$' => '4',
        '%' => '5',
        '^' => '6',
        '&' => '7',
        '*' => '8',
        '(' => '9',
        ')' => '0',
        '_' => '-',
        '+' => '=',
        '{' => '[',
        '}' => ']',
        '|' => '\\',
        ':' => ';',
        '"' => '\'',
        '<' => ',',
        '>' => '.',
        '?' => '/',
        _ => return None,
    };
    Some(base)
}

fn char_keysym(c: char) -> u32 {
    match c {
        'a'..='z' | 'A'..='Z' | '0'..='9' => c as u32,
        ' ' => 0x0020,

        // Unshifted punctuation
        '`' => 0x0060,
        '-' => 0x002d,
        '=' => 0x003d,
        '[' => 0x005b,
        ']' => 0x005d,
        '\\' => 0x005c,
        ';' => 0x003b,
        '\'' => 0x0027,
        ',' => 0x002c,
        '.' => 0x002e,
        '/' => 0x002f,

        // Shift-level symbols have their own keysyms
        '~' => 0x007e,
        '!' => 0x0021,
        '@' => 0x0040,
        '#' => 0x0023,
        '$' => 0x0024,
        '%' => 0x0025,
        '^' => 0x005e,
        '&' => 0x0026,
        '*' => 0x002a,
        '(' => 0x0028,
        ')' => 0x0029,
        '_' => 0x005f,
        '+' => 0x002b,
        '{' => 0x007b,
        '}' => 0x007d,
        '|' => 0x007c,
        ':' => 0x003a,
        '"' => 0x0022,
        '<' => 0x003c,
        '>' => 0x003e,
        '?' => 0x003f,

        // Latin-1 keysyms equal the code point; the rest use the Unicode range
        _ if (c as u32) <= 0xff => c as u32,
        _ => 0x0100_0000 + c as u32,
    }
}

fn named_keysym(name: &str) -> Option<u32> {
    let keysym = match name {
        // Editing
        "enter" | "return" => RETURN,
        "tab" => 0xff09,
        "escape" | "esc" => 0xff1b,
        "backspace" => 0xff08,
        "delete" | "del" => 0xffff,
        "insert" | "ins" => 0xff63,
        "space" => 0x0020,
        "plus" => 0x002b,
        "minus" => 0x002d,

        // Navigation
        "home" => 0xff50,
        "end" => 0xff57,
        "pageup" | "pgup" => 0xff55,
        "pagedown" | "pgdn" => 0xff56,
        "left" | "arrowleft" => 0xff51,
        "up" | "arrowup" => 0xff52,
        "right" | "arrowright" => 0xff53,
        "down" | "arrowdown" => 0xff54,

        // Function keys
        "f1" => 0xffbe,
        "f2" => 0xffbf,
        "f3" => 0xffc0,
        "f4" => 0xffc1,
        "f5" => 0xffc2,
        "f6" => 0xffc3,
        "f7" => 0xffc4,
        "f8" => 0xffc5,
        "f9" => 0xffc6,
        "f10" => 0xffc7,
        "f11" => 0xffc8,
        "f12" => 0xffc9,

        // Modifiers
        "shift" | "shift_l" => SHIFT,
        "shift_r" => 0xffe2,
        "ctrl" | "control" | "control_l" | "ctrl_l" => 0xffe3,
        "ctrl_r" | "control_r" => 0xffe4,
        "alt" | "alt_l" | "option" => 0xffe9,
        "alt_r" | "altgr" => 0xffea,
        "meta" | "meta_l" => 0xffe7,
        "meta_r" => 0xffe8,
        "super" | "super_l" | "win" | "windows" | "cmd" | "command" => 0xffeb,
        "super_r" => 0xffec,
        "capslock" => 0xffe5,

        // System
        "printscreen" | "print" => 0xff61,
        "pause" => 0xff13,
        "scrolllock" => 0xff14,
        "numlock" => 0xff7f,
        "menu" => 0xff67,

        _ => return None,
    };
    Some(keysym)
}
