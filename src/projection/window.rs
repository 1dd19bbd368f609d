//! Row virtualization: which slice of the projected rows intersects the viewport.

use super::ViewRow;

pub const GROUP_ROW_HEIGHT: u32 = 44;
pub const HEADER_ROW_HEIGHT: u32 = 36;
pub const ITEM_ROW_HEIGHT: u32 = 36;
pub const FOOTER_ROW_HEIGHT: u32 = 36;

pub fn row_height(row: &ViewRow) -> u32 {
    match row {
        ViewRow::Group { .. } => GROUP_ROW_HEIGHT,
        ViewRow::Header { .. } => HEADER_ROW_HEIGHT,
        ViewRow::Item { .. } => ITEM_ROW_HEIGHT,
        ViewRow::Footer { .. } => FOOTER_ROW_HEIGHT,
    }
}

/// Half-open row range `start..end` to render, with the pixel offset of `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualWindow {
    pub start: usize,
    pub end: usize,
    pub offset_top: u32,
    pub total_height: u32,
}

pub fn virtual_window(
    rows: &[ViewRow],
    scroll_top: u32,
    viewport_height: u32,
    overscan: usize,
) -> VirtualWindow {
    let mut tops = Vec::with_capacity(rows.len());
    let mut total = 0u32;
    for row in rows {
        tops.push(total);
        total += row_height(row);
    }

    let bottom = scroll_top.saturating_add(viewport_height);
    let first_visible = tops
        .iter()
        .zip(rows)
        .position(|(top, row)| top + row_height(row) > scroll_top)
        .unwrap_or(rows.len());
    let last_visible = tops
        .iter()
        .position(|top| *top >= bottom)
        .unwrap_or(rows.len());

    let start = first_visible.saturating_sub(overscan);
    let end = (last_visible + overscan).min(rows.len()).max(start);
    VirtualWindow {
        start,
        end,
        offset_top: tops.get(start).copied().unwrap_or(total),
        total_height: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<ViewRow> {
        (0..n)
            .map(|i| ViewRow::Item {
                id: i.to_string(),
                group_id: "g".into(),
            })
            .collect()
    }

    #[test]
    fn test_window_covers_viewport() {
        let rows = items(100);
        let w = virtual_window(&rows, 360, 180, 0);
        assert_eq!(w.start, 10);
        assert_eq!(w.end, 15);
        assert_eq!(w.offset_top, 360);
        assert_eq!(w.total_height, 3600);
    }

    #[test]
    fn test_overscan_is_clamped() {
        let rows = items(5);
        let w = virtual_window(&rows, 0, 1000, 3);
        assert_eq!((w.start, w.end), (0, 5));
    }

    #[test]
    fn test_empty_rows() {
        let w = virtual_window(&[], 0, 500, 2);
        assert_eq!((w.start, w.end, w.total_height), (0, 0, 0));
    }
}
