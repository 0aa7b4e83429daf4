// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use crate::*;
use pretty_assertions::assert_eq;

fn views(resolution: Size, visibles: usize) -> Vec<View> {
    let grid = Grid::new(resolution, visibles);
    (0..visibles)
        .map(|n| grid.calculate_stream_view(n).expect("visible stream without view"))
        .collect()
}

fn overlaps(a: &View, b: &View) -> bool {
    a.pos.x < b.right() && b.pos.x < a.right() && a.pos.y < b.bottom() && b.pos.y < a.bottom()
}

#[test]
fn grid_dimensions() {
    let expected = [
        (1, (1, 1)),
        (2, (2, 1)),
        (3, (2, 2)),
        (4, (2, 2)),
        (5, (3, 2)),
        (9, (3, 3)),
        (10, (4, 3)),
    ];
    for (visibles, grid) in expected {
        assert_eq!(Grid::new(Size::FHD, visibles).grid(), grid, "{visibles} visibles");
    }
}

#[test]
fn three_participants() {
    assert_eq!(
        views(Size::FHD, 3),
        vec![
            View {
                pos: Position { x: 0, y: 0 },
                size: Size {
                    width: 960,
                    height: 540
                },
            },
            View {
                pos: Position { x: 960, y: 0 },
                size: Size {
                    width: 960,
                    height: 540
                },
            },
            View {
                pos: Position { x: 0, y: 540 },
                size: Size {
                    width: 960,
                    height: 540
                },
            },
        ]
    );
}

#[test]
fn full_grid_tiles_the_canvas() {
    // 7 columns do not divide 1920 evenly
    for (resolution, columns) in [(Size::FHD, 3), (Size::FHD, 7), (Size::HD, 5)] {
        let visibles = columns * columns;
        let views = views(resolution, visibles);

        let area: usize = views.iter().map(|view| view.size.area()).sum();
        assert_eq!(area, resolution.area());

        for view in &views {
            assert!(view.pos.x >= 0 && view.pos.y >= 0);
            assert!(view.right() <= resolution.width as i64);
            assert!(view.bottom() <= resolution.height as i64);
        }
        for (n, a) in views.iter().enumerate() {
            for b in &views[n + 1..] {
                assert!(!overlaps(a, b), "{a:?} overlaps {b:?}");
            }
        }
    }
}

#[test]
fn single_participant_fills_canvas() {
    assert_eq!(
        views(Size::FHD, 1),
        vec![View {
            pos: Position::default(),
            size: Size::FHD,
        }]
    );
}

#[test]
fn invisible_positions_have_no_view() {
    let grid = Grid::new(Size::FHD, 2);
    assert!(grid.calculate_stream_view(2).is_none());
    assert!(Grid::new(Size::FHD, 0).calculate_stream_view(0).is_none());
}
