use crate::model::Ms;
use crate::time::DAY_MS;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_CONTACT_LEN: usize = 254;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_APPOINTMENTS_PER_DAY: usize = 1_000;
/// Widest range a calendar or listing query may cover.
pub const MAX_QUERY_WINDOW_MS: Ms = 62 * DAY_MS;
pub const PAGE_SIZE: usize = 20;
