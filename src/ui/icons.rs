//! Icons shared by the terminal views, with plain-text fallbacks.

use console::Emoji;

// Outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("\u{2705} ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("\u{274c} ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("\u{26a0}\u{fe0f}  ", "[WARN]");
pub static SKIP: Emoji<'_, '_> = Emoji("\u{23ed}\u{fe0f}  ", "[SKIP]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("\u{2728} ", "*");

// Records
pub static FOLDER: Emoji<'_, '_> = Emoji("\u{1f4c1} ", "");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("\u{1f4c4} ", "+");
pub static FILE_DEL: Emoji<'_, '_> = Emoji("\u{1f5d1}\u{fe0f}  ", "-");

// Running work
pub static PROGRESS: Emoji<'_, '_> = Emoji("\u{1f4ca} ", "[PROG]");
pub static CLOCK: Emoji<'_, '_> = Emoji("\u{23f1}\u{fe0f}  ", "[T]");
