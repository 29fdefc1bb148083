//! Command-line window arguments to [`Window`]s.

use chrono::Duration;

use vra_core::Window;

use crate::{CliError, WindowArgs};

// Same ceiling the matcher applies to its candidate reach.
const MAX_REACH_SEC: u64 = 366 * 86_400;

pub fn resolve(args: &WindowArgs) -> Result<Window, CliError> {
    match (&args.month, &args.from, &args.to) {
        (Some(month), None, None) => Ok(Window::month(month)?),
        (None, Some(from), Some(to)) => {
            Ok(Window::new(Window::parse_bound(from)?, Window::parse_bound(to)?)?)
        }
        (None, None, None) => {
            Err(CliError::fatal("no window given").with_hint("pass --from/--to or --month YYYY-MM"))
        }
        _ => Err(CliError::fatal("pass either --from with --to, or --month, not a mix")),
    }
}

/// `window` widened by the matching time window on both sides, so expected
/// rows just outside a statement day can still be candidates.
pub fn candidate_window(window: &Window, time_window_sec: u64) -> Window {
    let reach = Duration::seconds(time_window_sec.min(MAX_REACH_SEC) as i64);
    Window {
        from: window.from - reach,
        to: window.to + reach,
    }
}
