//! Canonical forms for commands, paths and image references.
//!
//! All functions here are pure and idempotent, so cosmetic differences
//! (quoting, shell vs exec form, registry aliases, `./` prefixes) never
//! register as mismatches downstream.

pub mod command;
pub mod image_ref;
pub mod package;
pub mod path;
pub mod shell;

pub use command::{
    command_similarity, normalize_args, normalize_command, NormalizedCommand, CONTENT_REF,
};
pub use image_ref::{normalize_image_ref, ImageRef, InvalidImageRef, DEFAULT_REGISTRY};
pub use package::{extract_packages, PackageManager, PackageRef};
pub use path::{normalize_path, NormalizedPath};
