// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod grid;

pub use grid::*;

use serde::Deserialize;

/// View properies of a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub pos: Position,
    pub size: Size,
}

impl View {
    /// Right edge (exclusive)
    #[must_use]
    pub fn right(&self) -> i64 {
        self.pos.x + self.size.width as i64
    }

    /// Bottom edge (exclusive)
    #[must_use]
    pub fn bottom(&self) -> i64 {
        self.pos.y + self.size.height as i64
    }
}

/// Cartesian pixel position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    /// X position
    pub x: i64,
    /// Y position
    pub y: i64,
}

/// Cartesian pixel dimension
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Size {
    /// horizontal dimension
    pub width: usize,
    /// vertical dimension
    pub height: usize,
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Size {
    /// HD (High Definition)
    pub const HD: Self = Self {
        width: 1280,
        height: 720,
    };
    /// Full HD (FHD)
    pub const FHD: Self = Self {
        width: 1920,
        height: 1080,
    };

    /// Number of pixels
    #[must_use]
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Trait of video picture layouts.
pub trait Layout: std::fmt::Debug + Send + Sync + 'static {
    /// Update the current layout for changes on the resolution.
    fn set_resolution_changed(&mut self, resolution: Size);

    /// Update the current layout for changes on the amount of visibles.
    fn set_amount_of_visibles(&mut self, visibles: usize);

    /// Get view of the nth stream.
    ///
    /// Returns None if the stream is not part of the layout.
    fn calculate_stream_view(&self, stream_position: usize) -> Option<View>;
}
