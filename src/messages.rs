//! Reply texts sent back to clients, and the JSON body of the status API.
//!
//! Replies are free text. Nothing in the system parses them beyond checking
//! that one arrived, so the wording follows what existing clients expect.

use serde::{Deserialize, Serialize};

pub fn uploaded(name: &str) -> String {
    format!("File {} successfully uploaded", name)
}

pub fn cannot_write(path: &str) -> String {
    format!("Unable to open file {} for writing", path)
}

pub fn downloaded(name: &str) -> String {
    format!("File {} successfully downloaded", name)
}

pub fn not_found(name: &str) -> String {
    format!("Error: File {} not found", name)
}

pub fn deleted(name: &str) -> String {
    format!("File {} deleted successfully.", name)
}

pub fn cannot_delete(name: &str) -> String {
    format!("Error: Unable to delete file {}.", name)
}

pub fn archived(extension: &str) -> String {
    format!("Tar file for {} files created successfully.", extension)
}

pub fn archive_failed(extension: &str) -> String {
    format!("Error: Failed to create tar file for {} files.", extension)
}

pub fn unsupported_extension(extension: &str) -> String {
    format!("Error: Unsupported file type {}", extension)
}

pub fn unsupported_file(name: &str) -> String {
    format!("File type {} is not supported.", name)
}

pub fn node_unreachable(node: &str) -> String {
    format!("Error: storage node {} is unreachable", node)
}

pub fn no_matching_files(extension: &str) -> String {
    format!("No {} files found in the specified directory.", extension)
}

/// Whether a reply reports a failed operation.
pub fn is_failure(reply: &str) -> bool {
    reply.starts_with("Error") || reply.starts_with("File type") || reply.starts_with("Unable")
}

pub const NO_FILES: &str = "No files available in the specified directory.";

pub const INVALID_COMMAND: &str = "Invalid command";

/// Body of `GET /status`: one line per storage node, in routing order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: Vec<String>,
}
