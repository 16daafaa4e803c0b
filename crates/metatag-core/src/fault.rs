use metatag_script::panic_message;
use std::panic::{self, AssertUnwindSafe};

/// Run a collaborator callback, turning a panic into its message.
pub(crate) fn contain<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}
