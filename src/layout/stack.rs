//! Packing templates into the fewest non-colliding rows.

use crate::group::{Group, Template};
use crate::region::Region;

/// Inputs to one stacking pass.
#[derive(Debug, Clone, Copy)]
pub struct StackParams {
    pub paired: bool,
    /// Variant or structural mode: one row per template, insertion order.
    pub insertion_order: bool,
    /// Minimum horizontal gap between templates of a row.
    pub spacing: f64,
    pub min_ntwidth_overlap: f64,
}

/// Occupancy of one row while packing.
#[derive(Debug, Clone)]
struct Row {
    /// Right edge of the rightmost occupant.
    right: f64,
    /// Left edge of the first template packed by the main pass.
    first_x1: f64,
    /// Right edge of templates filled in to the left of `first_x1`.
    left_cursor: f64,
}

impl Row {
    fn opened_by(t: &Template) -> Self {
        Self {
            right: t.x2,
            first_x1: t.x1,
            left_cursor: f64::NEG_INFINITY,
        }
    }
}

fn region_right_edge(regions: &[Region], t: &Template) -> f64 {
    regions
        .get(t.last_region())
        .map(Region::right_edge)
        .unwrap_or(f64::INFINITY)
}

/// First-fit. `abut_ok` also accepts a row whose right edge sits exactly on
/// the region edge.
fn first_fit(
    rows: &mut Vec<Row>,
    t: &mut Template,
    regions: &[Region],
    spacing: f64,
    abut_ok: bool,
) {
    let edge = region_right_edge(regions, t);
    let slot = rows.iter().position(|row| {
        let within = if abut_ok { row.right <= edge } else { row.right < edge };
        row.right + spacing < t.x1 && within
    });
    match slot {
        Some(i) => {
            rows[i].right = rows[i].right.max(t.x2);
            t.row = i;
        }
        None => {
            t.row = rows.len();
            rows.push(Row::opened_by(t));
        }
    }
}

/// Fill the gap left of each row's first occupant.
fn left_fill(rows: &mut Vec<Row>, t: &mut Template, spacing: f64) {
    let slot = rows
        .iter()
        .position(|row| row.left_cursor + spacing < t.x1 && t.x2 + spacing < row.first_x1);
    match slot {
        Some(i) => {
            rows[i].left_cursor = t.x2;
            rows[i].right = rows[i].right.max(t.x2);
            t.row = i;
        }
        None => {
            t.row = rows.len();
            let mut row = Row::opened_by(t);
            row.first_x1 = f64::INFINITY;
            row.left_cursor = t.x2;
            rows.push(row);
        }
    }
}

fn sort_by_x1(templates: &mut [Template]) {
    templates.sort_by(|a, b| a.x1.total_cmp(&b.x1));
}

/// Flag overlapping mate pairs that get their second segment drawn one row
/// lower.
fn mark_overlaps(group: &mut Group, min_ntwidth_overlap: f64) {
    let Group { templates, regions, .. } = group;
    for t in templates.iter_mut() {
        let zoomed = regions
            .get(t.segments[0].region_index)
            .is_some_and(|r| r.ntwidth >= min_ntwidth_overlap);
        if zoomed && !t.is_discordant() && !t.is_multi_region() && t.segments_overlap() {
            t.second_segment_below = true;
            t.height_multiplier = 2;
        }
    }
}

/// Assign every template of `group` a row and record per-row height multipliers.
pub fn stack_group(group: &mut Group, params: &StackParams) {
    if params.paired {
        mark_overlaps(group, params.min_ntwidth_overlap);
    }

    let row_count = if params.insertion_order {
        for (i, t) in group.templates.iter_mut().enumerate() {
            t.row = i;
        }
        group.templates.len()
    } else if params.paired {
        stack_paired(group, params.spacing)
    } else {
        let mut rows = Vec::new();
        sort_by_x1(&mut group.templates);
        let Group { templates, regions, .. } = &mut *group;
        for t in templates.iter_mut() {
            first_fit(&mut rows, t, regions, params.spacing, false);
        }
        rows.len()
    };

    group.rows = vec![1; row_count];
    for t in &group.templates {
        if t.second_segment_below {
            group.rows[t.row] = 2;
        }
    }
}

/// Multi-region templates first, then single-region ones left of them, then
/// the rest.
fn stack_paired(group: &mut Group, spacing: f64) -> usize {
    let (mut multi, singles): (Vec<Template>, Vec<Template>) =
        std::mem::take(&mut group.templates).into_iter().partition(Template::is_multi_region);
    sort_by_x1(&mut multi);
    let first_multi_x1 = multi.first().map_or(f64::INFINITY, |t| t.x1);
    let (mut left, mut rest): (Vec<Template>, Vec<Template>) =
        singles.into_iter().partition(|t| t.x2 < first_multi_x1 && !multi.is_empty());
    sort_by_x1(&mut left);
    sort_by_x1(&mut rest);

    let regions = &group.regions;
    let mut rows = Vec::new();
    for t in multi.iter_mut() {
        first_fit(&mut rows, t, regions, spacing, false);
    }
    for t in left.iter_mut() {
        left_fill(&mut rows, t, spacing);
    }
    for t in rest.iter_mut() {
        first_fit(&mut rows, t, regions, spacing, true);
    }

    group.templates = multi.into_iter().chain(left).chain(rest).collect();
    rows.len()
}
