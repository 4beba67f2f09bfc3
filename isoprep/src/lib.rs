//! Turn upstream installer media into images that install unattended.
//!
//! An [`answer::AnswerFile`] is generated from a template and a
//! [`config::BuildConfig`], then baked into a clone of the source image by
//! an [`installer::Installer`] recipe so the boot menu runs it by default.

pub mod answer;
pub mod cli;
pub mod config;
pub mod installer;
pub mod network;
pub mod password;
pub mod ports;
