//! Shared integration-test support: data factories, fake agents and helpers
#![allow(dead_code)]

pub mod factories;
pub mod fakes;
pub mod helpers;
