// Vesper Debugger Module
// Time-travel stepping over recorded VM snapshots

mod controller;


pub use controller::Controller;
