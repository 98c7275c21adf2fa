use log::{error, warn};
use std::panic;

use crate::cache::is_worker_thread;

/// Pretty backtraces on the terminal, plus a copy of the panic in the log
/// file.
///
/// The hook runs before any unwinding, so it also sees panics that the page
/// cache later catches and turns into a failed load. Those raised on pool
/// workers are only logged; the terminal report is left for panics that
/// actually take a thread down. Loads run on the caller's thread still get
/// the full report.
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        if is_worker_thread(thread.name()) {
            warn!(
                "Worker thread '{}' panicked: {panic_info}",
                thread.name().unwrap_or_default()
            );
            return;
        }

        let name = thread.name().unwrap_or("<unnamed>");
        error!("Thread '{name}' panicked: {panic_info}");
        log::logger().flush();

        default_hook(panic_info);
    }));
}
