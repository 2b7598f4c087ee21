// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for geometry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while cutting a mesh
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Degenerate plane: {0}")]
    DegeneratePlane(String),

    #[error("Missing bone: {0}")]
    MissingBone(String),

    #[error("Triangulation failed: {0}")]
    TriangulationError(String),
}
