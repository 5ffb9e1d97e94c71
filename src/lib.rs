//! # stickcal Library
//!
//! Measure how a game remaps right-stick deflection into turn rate.
//!
//! A virtual gamepad pushes the stick through a scripted magnitude sweep
//! while an operator times full-circle rotations. The timings are fitted
//! into the game's response curve and its inverse, ready to be entered
//! into the game's curve editor.

pub mod calibration;
pub mod clock;
pub mod config;
pub mod controls;
pub mod error;
pub mod gamepad;
pub mod operator;
pub mod scheduler;
