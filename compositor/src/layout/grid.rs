// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use super::{Layout, Position, Size, View};

/// Grid layout
/// Places all the *visible* participants row by row in a grid on screen.
///
/// The grid has `ceil(sqrt(n))` columns and as many rows as needed. Cell edges are
/// rounded to whole pixels so that the cells always cover the full resolution.
#[derive(Debug, Default, Clone)]
pub struct Grid {
    resolution: Size,
    visibles: usize,
}

impl Layout for Grid {
    fn set_resolution_changed(&mut self, resolution: Size) {
        self.resolution = resolution;
    }

    fn set_amount_of_visibles(&mut self, visibles: usize) {
        self.visibles = visibles;
    }

    fn calculate_stream_view(&self, stream_position: usize) -> Option<View> {
        if stream_position >= self.visibles {
            return None;
        }
        let (columns, rows) = self.grid();
        let row = stream_position / columns;
        let column = stream_position % columns;
        let (x, width) = edge(self.resolution.width, columns, column);
        let (y, height) = edge(self.resolution.height, rows, row);
        Some(View {
            pos: Position {
                x: x as i64,
                y: y as i64,
            },
            size: Size { width, height },
        })
    }
}

impl Grid {
    #[must_use]
    pub fn new(resolution: Size, visibles: usize) -> Self {
        Self {
            resolution,
            visibles,
        }
    }

    /// Number of columns and rows
    #[must_use]
    pub fn grid(&self) -> (usize, usize) {
        if self.visibles > 1 {
            let mut columns = 1;
            while columns * columns < self.visibles {
                columns += 1;
            }
            let rows = (self.visibles + columns - 1) / columns;
            (columns, rows)
        } else {
            (1, 1)
        }
    }
}

/// Offset and length of the `index`th of `count` slices of `total` pixels.
fn edge(total: usize, count: usize, index: usize) -> (usize, usize) {
    let start = index * total / count;
    let end = (index + 1) * total / count;
    (start, end - start)
}
