pub mod launcher;

pub use launcher::{launch_browser, remove_profile_dir, BrowserOptions, LaunchedBrowser};
