pub mod refresh;

pub use refresh::config_refresh;
