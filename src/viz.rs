//! Terminal plots.
//!
//! Plain-text renderings of training curves and of 2D predictions, written to the log
//! instead of a plotting window.

use crate::train::History;
use crate::{Error, Result, Tensor};

/// Line chart of `values` with a y-axis scale and epoch labels.
pub fn curve(values: &[f32], title: &str, width: usize, height: usize) -> String {
    if values.is_empty() {
        return format!("{title}: (no data)\n");
    }
    let height = height.max(2);
    let width = width.max(1);

    let min_val = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max_val = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = if (max_val - min_val).abs() < 1e-12 {
        1.0
    } else {
        max_val - min_val
    };

    let mut out = format!("{title} over {} epochs:\n", values.len());

    let chart_width = width.min(values.len());
    let mut grid = vec![vec![' '; chart_width]; height];
    for col in 0..chart_width {
        let idx = if chart_width == 1 {
            0
        } else {
            col * (values.len() - 1) / (chart_width - 1)
        };
        let val = values[idx];
        let row = ((max_val - val) / range * (height - 1) as f32).round() as usize;
        grid[row.min(height - 1)][col] = '*';
    }

    for (r, line) in grid.iter().enumerate() {
        let y_val = max_val - (r as f32 / (height - 1) as f32) * range;
        out.push_str(&format!("{y_val:>8.4} |"));
        out.extend(line.iter());
        out.push('\n');
    }
    out.push_str(&format!("{:>8} +{}\n", "", "-".repeat(chart_width)));
    out.push_str(&format!(
        "{:>8}  0{:>w$}\n",
        "",
        values.len() - 1,
        w = chart_width.saturating_sub(1)
    ));
    out
}

/// Loss curve followed by the train and test accuracy curves.
pub fn history(h: &History, title: &str, width: usize, height: usize) -> String {
    let mut out = format!("{title}\n");
    out.push_str(&curve(&h.loss, "training loss", width, height));
    out.push_str(&curve(&h.train_accuracy, "train accuracy", width, height));
    out.push_str(&curve(&h.test_accuracy, "test accuracy", width, height));
    out
}

/// Scatter plot of 2D `points` (one per row) coloured by `labels`.
///
/// A cell shows `#` when most of its points are labelled `true`, `.` when most are
/// `false`, and stays blank when it holds no point.
pub fn scatter(
    points: &Tensor,
    labels: &[bool],
    title: &str,
    width: usize,
    height: usize,
) -> Result<String> {
    if points.cols() != 2 {
        return Err(Error::InvalidShape(format!(
            "scatter needs 2D points, got {} columns",
            points.cols()
        )));
    }
    if points.rows() != labels.len() {
        return Err(Error::InvalidShape(format!(
            "{} points but {} labels",
            points.rows(),
            labels.len()
        )));
    }
    if width == 0 || height == 0 {
        return Err(Error::InvalidConfig(
            "scatter width and height must be > 0".to_owned(),
        ));
    }

    let bounds = |c: usize| {
        (0..points.rows()).fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), r| {
            let v = points.get(r, c);
            (lo.min(v), hi.max(v))
        })
    };
    let (x_lo, x_hi) = bounds(0);
    let (y_lo, y_hi) = bounds(1);
    let cell = |v: f32, lo: f32, hi: f32, n: usize| {
        let span = if hi > lo { hi - lo } else { 1.0 };
        (((v - lo) / span * (n - 1) as f32).round() as usize).min(n - 1)
    };

    // (count false, count true) per cell
    let mut counts = vec![vec![(0_u32, 0_u32); width]; height];
    for (r, &label) in labels.iter().enumerate() {
        let col = cell(points.get(r, 0), x_lo, x_hi, width);
        // Row 0 is the top of the plot.
        let row = height - 1 - cell(points.get(r, 1), y_lo, y_hi, height);
        let slot = &mut counts[row][col];
        if label {
            slot.1 += 1;
        } else {
            slot.0 += 1;
        }
    }

    let positives = labels.iter().filter(|&&l| l).count();
    let mut out = format!(
        "{title} ({positives} of {} predicted positive):\n",
        labels.len()
    );
    out.push_str(&format!("+{}+\n", "-".repeat(width)));
    for line in &counts {
        out.push('|');
        out.extend(line.iter().map(|&(neg, pos)| match (neg, pos) {
            (0, 0) => ' ',
            (n, p) if p > n => '#',
            _ => '.',
        }));
        out.push_str("|\n");
    }
    out.push_str(&format!("+{}+\n", "-".repeat(width)));
    Ok(out)
}
