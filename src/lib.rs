//! Chunk Relay Server Library
//!
//! Accepts large files as independently uploaded chunks, reassembles them in
//! index order and relays the result to catbox or litterbox.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `upload`: Chunk store, session tracking, assembly, finalize
//! - `relay`: Multipart forwarding to the file hosts
//! - `routes`: HTTP surface (`/chunk`, `/finish`, `/health`)

pub mod config;
pub mod relay;
pub mod routes;
pub mod state;
pub mod upload;
