//! Prism: live shader webcam with detection-reactive uniforms
//!
//! Captures video, runs an object detector on a fixed interval, and draws the
//! frame through a hot-swappable fragment shader that can read the current
//! detections as uniforms.

pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod generate;
pub mod output;
pub mod schedule;
pub mod shader;
pub mod status;
pub mod utils;
pub mod watch;
