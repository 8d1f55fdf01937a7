//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation. Each write service
//! takes the participant bound to the calling connection, mutates the live
//! record under the session lock, and returns the `SessionEvent` to fan out.

pub mod control;
pub mod cursor;
pub mod exercise;
pub mod input;
pub mod persistence;
pub mod session;
