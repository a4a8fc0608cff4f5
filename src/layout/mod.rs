//! Row heights, absolute offsets and per-group rendering flags.

pub mod stack;
pub mod window;

pub use stack::{stack_group, StackParams};
pub use window::{apply_window, RowWindow};

use crate::config::TrackConfig;
use crate::group::{Group, TemplateBox};

/// Sizing limits taken from the track configuration.
#[derive(Debug, Clone, Copy)]
pub struct LayoutParams {
    pub max_canvas_height: u32,
    pub min_stack_height: u32,
    pub max_stack_height: u32,
    pub stack_spacing_threshold: u32,
    pub max_rows_for_detail: usize,
    pub min_height_for_detail: u32,
    pub min_ntwidth_qual: f64,
    pub min_ntwidth_print_nt: f64,
}

impl From<&TrackConfig> for LayoutParams {
    fn from(cfg: &TrackConfig) -> Self {
        Self {
            max_canvas_height: cfg.max_canvas_height,
            min_stack_height: cfg.min_stack_height,
            max_stack_height: cfg.max_stack_height,
            stack_spacing_threshold: cfg.stack_spacing_threshold,
            max_rows_for_detail: cfg.max_rows_for_detail,
            min_height_for_detail: cfg.min_height_for_detail,
            min_ntwidth_qual: cfg.min_ntwidth_qual,
            min_ntwidth_print_nt: cfg.min_ntwidth_print_nt,
        }
    }
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self::from(&TrackConfig::default())
    }
}

/// Pick the row height and spacing of a stacked group.
///
/// The canvas budget is halved when several groups share the canvas.
pub fn compute_heights(group: &mut Group, params: &LayoutParams, group_count: usize) {
    let budget = if group_count > 1 {
        params.max_canvas_height / 2
    } else {
        params.max_canvas_height
    };
    let weighted = group.weighted_rows();
    let height = (budget / weighted.max(1))
        .min(params.max_stack_height)
        .max(params.min_stack_height);
    group.stack_height = height;
    group.stack_spacing = u32::from(height > params.stack_spacing_threshold);
    group.allow_partial_stack =
        u64::from(weighted) * u64::from(params.min_stack_height) > u64::from(budget);
}

/// Turn row indices into pixel offsets, emit hover boxes when affordable and
/// set the per-group region flags.
pub fn finalize(group: &mut Group, params: &LayoutParams, force_detail: bool) {
    let height = group.stack_height;
    let mut offsets = Vec::with_capacity(group.rows.len());
    let mut y = 0u32;
    for &multiplier in &group.rows {
        offsets.push(y);
        y += multiplier * height + group.stack_spacing;
    }
    for t in &mut group.templates {
        t.y = offsets.get(t.row).copied().unwrap_or(0);
    }

    let detail = force_detail
        || (group.row_count() <= params.max_rows_for_detail
            && height >= params.min_height_for_detail);
    group.template_boxes = detail.then(|| {
        group
            .templates
            .iter()
            .map(|t| TemplateBox {
                qname: t.qname().to_string(),
                x1: t.x1,
                x2: t.x2,
                y: t.y,
                height: t.height_multiplier * height,
            })
            .collect()
    });

    for region in &mut group.regions {
        region.to_show_qual = region.ntwidth >= params.min_ntwidth_qual;
        region.to_print_nt =
            region.ntwidth >= params.min_ntwidth_print_nt && height >= params.min_height_for_detail;
    }
}
