//! Shared UI icons and emojis.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[STOP]");

// Job indicators
pub static FILM: Emoji<'_, '_> = Emoji("🎬 ", "[GEN]");
pub static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[DL]");
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static COOKIE: Emoji<'_, '_> = Emoji("🍪 ", "");
