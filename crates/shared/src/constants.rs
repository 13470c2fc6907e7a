pub const APP_NAME: &str = "Reel";

// Feed viewport
pub const ACTIVE_VISIBILITY_THRESHOLD: f64 = 0.6;
pub const DOUBLE_TAP_WINDOW_MS: u64 = 300;

// Messaging
pub const ROOM_ID_SEPARATOR: char = '_';
pub const THREAD_MESSAGE_LIMIT: usize = 100;

// Limits
pub const MAX_MESSAGE_LENGTH: usize = 4000;
pub const MAX_COMMENT_LENGTH: usize = 1000;
pub const MAX_TITLE_LENGTH: usize = 150;
pub const MAX_SUMMARY_LENGTH: usize = 2000;
pub const MAX_TAGS: usize = 10;
pub const MAX_TAG_LENGTH: usize = 32;

// Profiles
pub const DEFAULT_DISPLAY_NAME: &str = "Family Member";
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";
