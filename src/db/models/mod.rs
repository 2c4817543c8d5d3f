// src/db/models/mod.rs

//! Data models for imgsift database entities

mod file_record;

pub use file_record::{FileMetadata, FileRecord, InsertOutcome, StoreStats};
