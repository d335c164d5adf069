//! Mouse and keyboard event synthesis.
//!
//! Ordering and pauses mimic a person at a real keyboard. Remote toolkits
//! drop or merge events that arrive faster, so the delays are part of the
//! contract and are covered by tests.

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use rfbpilot_core::error::DesktopError;
use rfbpilot_core::input::ResolvedKeys;
use rfbpilot_core::keysym::{self, keysym_for_char, needs_shift, unshifted_of};
use rfbpilot_core::protocol::MouseButton;
use rfbpilot_core::snapshot::{validate_point, Point};

use crate::daemon::rfb::RemoteDesktop;

const CLICK_HOLD: Duration = Duration::from_millis(100);
const DOUBLE_CLICK_STEP: Duration = Duration::from_millis(50);
const KEY_HOLD: Duration = Duration::from_millis(50);
const MODIFIER_STEP: Duration = Duration::from_millis(10);
const LINE_PAUSE: Duration = Duration::from_millis(100);

/// Texts longer than this are typed at the slow pace.
const FAST_TYPING_MAX_CHARS: usize = 10;

/// Press and gap durations for one typed character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TypingPace {
    hold: Duration,
    gap: Duration,
}

impl TypingPace {
    const FAST: Self = Self {
        hold: Duration::from_millis(50),
        gap: Duration::from_millis(50),
    };
    const SLOW: Self = Self {
        hold: Duration::from_millis(75),
        gap: Duration::from_millis(100),
    };

    fn for_text(text: &str) -> Self {
        if text.chars().count() > FAST_TYPING_MAX_CHARS || text.chars().any(needs_shift) {
            Self::SLOW
        } else {
            Self::FAST
        }
    }
}

async fn checked_point<D: RemoteDesktop>(desktop: &D, x: i64, y: i64) -> Result<Point, DesktopError> {
    validate_point(x, y, desktop.screen_size().await)
}

/// Move the pointer without pressing anything.
pub(crate) async fn move_pointer<D: RemoteDesktop>(
    desktop: &D,
    x: i64,
    y: i64,
) -> Result<Point, DesktopError> {
    let point = checked_point(desktop, x, y).await?;
    desktop.pointer_event(point, 0).await?;
    Ok(point)
}

/// Click or double-click `button` at a screen position.
pub(crate) async fn click<D: RemoteDesktop>(
    desktop: &D,
    x: i64,
    y: i64,
    button: MouseButton,
    double: bool,
) -> Result<Point, DesktopError> {
    let point = checked_point(desktop, x, y).await?;
    let mask = button.mask();

    if double {
        desktop.pointer_event(point, mask).await?;
        sleep(DOUBLE_CLICK_STEP).await;
        desktop.pointer_event(point, 0).await?;
        sleep(DOUBLE_CLICK_STEP).await;
        desktop.pointer_event(point, mask).await?;
        sleep(DOUBLE_CLICK_STEP).await;
        desktop.pointer_event(point, 0).await?;
    } else {
        desktop.pointer_event(point, mask).await?;
        sleep(CLICK_HOLD).await;
        desktop.pointer_event(point, 0).await?;
    }
    Ok(point)
}

/// Press and release one key.
async fn tap<D: RemoteDesktop>(desktop: &D, keysym: u32, hold: Duration) -> Result<(), DesktopError> {
    desktop.key_event(keysym, true).await?;
    sleep(hold).await;
    desktop.key_event(keysym, false).await
}

/// Press a single key or a modifier combination.
///
/// Modifiers go down in the given order and come up in reverse, with a short
/// pause around each so the remote side registers them as held.
pub(crate) async fn press_keys<D: RemoteDesktop>(
    desktop: &D,
    keys: &ResolvedKeys,
) -> Result<(), DesktopError> {
    if keys.modifiers.is_empty() {
        return tap(desktop, keys.key, KEY_HOLD).await;
    }

    for &modifier in &keys.modifiers {
        desktop.key_event(modifier, true).await?;
        sleep(MODIFIER_STEP).await;
    }

    tap(desktop, keys.key, KEY_HOLD).await?;
    sleep(MODIFIER_STEP).await;

    for &modifier in keys.modifiers.iter().rev() {
        desktop.key_event(modifier, false).await?;
        sleep(MODIFIER_STEP).await;
    }
    Ok(())
}

async fn type_char<D: RemoteDesktop>(
    desktop: &D,
    c: char,
    pace: TypingPace,
) -> Result<(), DesktopError> {
    match unshifted_of(c).filter(|_| needs_shift(c)) {
        Some(base) => {
            desktop.key_event(keysym::SHIFT, true).await?;
            sleep(MODIFIER_STEP).await;
            tap(desktop, keysym_for_char(base), pace.hold).await?;
            sleep(MODIFIER_STEP).await;
            desktop.key_event(keysym::SHIFT, false).await
        }
        None => tap(desktop, keysym_for_char(c), pace.hold).await,
    }
}

/// Type `text` one character at a time, optionally pressing Enter after.
///
/// The first failure aborts the rest of the text. The error names the
/// character that failed; earlier characters have already been typed.
pub(crate) async fn type_text<D: RemoteDesktop>(
    desktop: &D,
    text: &str,
    enter: bool,
) -> Result<(), DesktopError> {
    let pace = TypingPace::for_text(text);
    debug!("Typing {} chars at {:?}", text.chars().count(), pace);

    let mut typed = 0;
    for (index, c) in text.chars().enumerate() {
        type_char(desktop, c, pace)
            .await
            .map_err(|e| DesktopError::CharacterSynthesis {
                index,
                character: c,
                reason: e.to_string(),
            })?;
        sleep(pace.gap).await;
        typed += 1;
    }

    if enter {
        tap(desktop, keysym::RETURN, KEY_HOLD)
            .await
            .map_err(|e| DesktopError::CharacterSynthesis {
                index: typed,
                character: '\n',
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

/// Type each line followed by Enter.
pub(crate) async fn type_lines<D: RemoteDesktop>(
    desktop: &D,
    lines: &[String],
) -> Result<(), DesktopError> {
    for line in lines {
        type_text(desktop, line, true).await?;
        sleep(LINE_PAUSE).await;
    }
    Ok(())
}
