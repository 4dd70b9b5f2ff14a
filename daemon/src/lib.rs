pub mod config;
pub mod device_monitor;
pub mod event;
pub mod event_bus;
pub mod focus;
pub mod focus_trigger;
pub mod input_backend;
pub mod lifecycle;
pub mod logging;
pub mod paths;
pub mod process_monitor;
pub mod window_list;
