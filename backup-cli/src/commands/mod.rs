mod backup;
mod schedule;

// Backup commands
pub use backup::{run_create, run_delete, run_list, run_restore};

// Schedule commands
pub use schedule::{run_daemon, set_schedule, show_schedule};
