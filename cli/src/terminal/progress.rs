use std::sync::atomic::{AtomicUsize, Ordering};

use colored::*;
use indicatif::ProgressStyle;
use tracing::{Span, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use vortex_common::network::host::HostResult;
use vortex_core::SweepProgress;

const TICKS: &[&str] = &[
    "▁▁▁▁▁", "▁▂▂▂▁", "▁▄▂▄▁", "▂▄▆▄▂", "▄▆█▆▄", "▂▄▆▄▂", "▁▄▂▄▁", "▁▂▂▂▁",
];

/// Progress bar attached to the sweep span, advanced by streamed host results.
pub struct SweepBar {
    span: Span,
    alive: AtomicUsize,
}

impl SweepBar {
    pub fn new(total: usize) -> Self {
        let span = info_span!("discovery", indicatif.pb_show = true);
        span.pb_set_style(&style());
        span.pb_set_length(total as u64);
        span.pb_set_message("waiting for the first host");
        Self {
            span,
            alive: AtomicUsize::new(0),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn advance(&self, host: &HostResult, progress: SweepProgress) {
        self.span.pb_set_position(progress.completed as u64);
        if host.alive {
            let alive = self.alive.fetch_add(1, Ordering::Relaxed) + 1;
            self.span.pb_set_message(&format!(
                "{} alive so far, latest {}",
                alive.to_string().green().bold(),
                host.display_name()
            ));
        }
    }
}

fn style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {bar:28.cyan/bright_black} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_strings(TICKS)
}
